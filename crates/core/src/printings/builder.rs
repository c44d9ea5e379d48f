//! Printing index construction and caching.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::Utc;
use tracing::{info, warn};

use super::types::{
    PrintingEntry, PrintingIndexError, PrintingIndexPayload, PrintingsByName,
    PRINTING_INDEX_VERSION,
};
use crate::atomic;
use crate::card::CardRecord;
use crate::metrics;

/// Alternate face names for multi-faced, split and adventure cards.
///
/// Includes every non-empty face name and, for `A // B` names, both halves.
/// The canonical name is never part of the result (case-insensitively).
pub fn collect_face_aliases(card: &CardRecord, display_name: &str) -> BTreeSet<String> {
    let mut aliases: BTreeSet<String> = card
        .faces()
        .iter()
        .filter_map(|face| face.name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if display_name.contains("//") {
        aliases.extend(
            display_name
                .split("//")
                .map(str::trim)
                .filter(|piece| !piece.is_empty())
                .map(str::to_string),
        );
    }

    let display_key = display_name.trim().to_lowercase();
    aliases.retain(|alias| alias.to_lowercase() != display_key);
    aliases
}

/// Build the name → printings map. Returns the map and the number of
/// indexed card records.
pub fn build_printing_index(cards: &[CardRecord]) -> (PrintingsByName, usize) {
    let mut by_name = PrintingsByName::new();
    let mut total_printings = 0;

    for card in cards {
        let name = card.display_name();
        if name.is_empty() {
            continue;
        }
        let Some(entry) = PrintingEntry::from_card(card) else {
            continue;
        };

        let key = name.to_lowercase();
        for alias in collect_face_aliases(card, name) {
            let alias_key = alias.to_lowercase();
            if alias_key != key {
                by_name.entry(alias_key).or_default().push(entry.clone());
            }
        }
        by_name.entry(key).or_default().push(entry);
        total_printings += 1;
    }

    for entries in by_name.values_mut() {
        // Stable; undated entries have an empty date and sort last.
        entries.sort_by(|a, b| b.released_at.cmp(&a.released_at));
    }

    (by_name, total_printings)
}

/// Snapshot modification time in seconds since the epoch.
pub fn bulk_mtime(bulk_path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(bulk_path).ok()?.modified().ok()?;
    Some(
        modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0),
    )
}

/// Load a cached index. Missing, unreadable and version-mismatched files
/// are all treated as a cache miss.
pub fn load_printing_index_payload(
    index_path: &Path,
    expected_version: u32,
) -> Option<PrintingIndexPayload> {
    if !index_path.exists() {
        return None;
    }
    let raw = match std::fs::read(index_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %index_path.display(), error = %e, "Failed to read printings index cache");
            return None;
        }
    };

    #[derive(serde::Deserialize)]
    struct VersionProbe {
        version: Option<u32>,
    }
    match serde_json::from_slice::<VersionProbe>(&raw) {
        Ok(probe) if probe.version == Some(expected_version) => {}
        Ok(_) => {
            info!("Discarding printings index cache due to version mismatch");
            return None;
        }
        Err(e) => {
            warn!(path = %index_path.display(), error = %e, "Failed to parse printings index cache");
            return None;
        }
    }

    match serde_json::from_slice(&raw) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(path = %index_path.display(), error = %e, "Malformed printings index cache");
            None
        }
    }
}

fn is_current(payload: &PrintingIndexPayload, bulk_mtime: Option<f64>) -> bool {
    match bulk_mtime {
        Some(mtime) => payload.bulk_mtime >= mtime,
        None => true,
    }
}

/// Read the snapshot, build the index and write it atomically.
pub fn build_printing_index_file(
    bulk_path: &Path,
    index_path: &Path,
) -> Result<PrintingIndexPayload, PrintingIndexError> {
    let payload = build_payload(bulk_path)?;
    atomic::write_json(index_path, &payload)?;
    info!(
        unique_names = payload.unique_names,
        total_printings = payload.total_printings,
        "Cached card printings index"
    );
    Ok(payload)
}

fn build_payload(bulk_path: &Path) -> Result<PrintingIndexPayload, PrintingIndexError> {
    let mtime = bulk_mtime(bulk_path)
        .ok_or_else(|| PrintingIndexError::BulkDataMissing(bulk_path.to_path_buf()))?;

    info!(path = %bulk_path.display(), "Building card printings index from bulk data");
    let raw = std::fs::read(bulk_path)?;
    let cards: Vec<CardRecord> = serde_json::from_slice(&raw)?;
    let (data, total_printings) = build_printing_index(&cards);

    metrics::PRINTING_INDEX_LOADS
        .with_label_values(&["built"])
        .inc();

    Ok(PrintingIndexPayload {
        version: PRINTING_INDEX_VERSION,
        generated_at: Utc::now(),
        bulk_mtime: mtime,
        unique_names: data.len(),
        total_printings,
        data,
    })
}

/// Return a current cached index, building one when the cache is missing,
/// outdated or `force` is set.
///
/// A cached index is reused when its version matches and it is at least as
/// new as the snapshot (or no snapshot exists). Failing to write the cache
/// file is logged and the freshly built index is still returned.
pub fn ensure_printing_index(
    bulk_path: &Path,
    index_path: &Path,
    force: bool,
) -> Result<PrintingIndexPayload, PrintingIndexError> {
    let mtime = bulk_mtime(bulk_path);
    if !force {
        if let Some(existing) = load_printing_index_payload(index_path, PRINTING_INDEX_VERSION) {
            if is_current(&existing, mtime) {
                metrics::PRINTING_INDEX_LOADS
                    .with_label_values(&["cached"])
                    .inc();
                return Ok(existing);
            }
        }
    }

    let payload = build_payload(bulk_path)?;
    match atomic::write_json(index_path, &payload) {
        Ok(()) => info!(
            unique_names = payload.unique_names,
            total_printings = payload.total_printings,
            "Cached card printings index"
        ),
        Err(e) => warn!(error = %e, "Failed to write printings index cache"),
    }
    Ok(payload)
}

/// Cached index if it is valid for the current snapshot.
pub fn load_current_printing_index(
    bulk_path: &Path,
    index_path: &Path,
) -> Option<PrintingIndexPayload> {
    let existing = load_printing_index_payload(index_path, PRINTING_INDEX_VERSION)?;
    is_current(&existing, bulk_mtime(bulk_path)).then_some(existing)
}
