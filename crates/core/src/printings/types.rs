use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::card::CardRecord;

/// Current on-disk format of the printing index.
pub const PRINTING_INDEX_VERSION: u32 = 2;

/// One printing of a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintingEntry {
    /// Remote identity of the printing.
    pub id: String,
    /// Upper-cased set code.
    pub set: String,
    pub set_name: String,
    pub collector_number: String,
    /// ISO date, empty when unknown.
    pub released_at: String,
}

impl PrintingEntry {
    /// Build an entry from a card record. Records without an identity are
    /// not printings.
    pub fn from_card(card: &CardRecord) -> Option<Self> {
        let id = card.id.as_deref().filter(|id| !id.is_empty())?;
        Some(Self {
            id: id.to_string(),
            set: card.set_code().to_uppercase(),
            set_name: card.set_name.clone().unwrap_or_default(),
            collector_number: card.collector_number().to_string(),
            released_at: card.released_at.clone().unwrap_or_default(),
        })
    }
}

/// Lower-cased name (canonical or face alias) to printings, newest first.
pub type PrintingsByName = BTreeMap<String, Vec<PrintingEntry>>;

/// Cached printing index file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintingIndexPayload {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    /// Modification time (seconds since the epoch) of the snapshot the index
    /// was built from.
    pub bulk_mtime: f64,
    pub unique_names: usize,
    pub total_printings: usize,
    pub data: PrintingsByName,
}

impl PrintingIndexPayload {
    pub fn stats(&self) -> PrintingIndexStats {
        PrintingIndexStats {
            unique_names: self.unique_names,
            total_printings: self.total_printings,
        }
    }

    /// Printings for a name, case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<&[PrintingEntry]> {
        self.data
            .get(&name.trim().to_lowercase())
            .map(Vec::as_slice)
    }
}

/// Summary of a loaded index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintingIndexStats {
    pub unique_names: usize,
    pub total_printings: usize,
}

/// Errors for printing index operations.
#[derive(Debug, Error)]
pub enum PrintingIndexError {
    #[error("Bulk data not found at {0}; cannot build printings index")]
    BulkDataMissing(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse bulk data: {0}")]
    Parse(#[from] serde_json::Error),
}
