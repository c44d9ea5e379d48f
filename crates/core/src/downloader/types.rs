use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheError, ImageSize};
use crate::card::BulkMetadata;

/// Errors that can occur while talking to the remote card source.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The remote confirmed the card does not exist (404).
    #[error("404 Not Found: {0}")]
    NotFound(String),

    /// The card exists but has no image for the requested size.
    #[error("No {size} image for {name}")]
    MissingImage { name: String, size: ImageSize },

    /// The card record carries no identity to key the image by.
    #[error("No identity for {0}")]
    MissingIdentity(String),

    /// Remote returned an unexpected status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a response or the bulk snapshot.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("No download URI in bulk data response")]
    NoDownloadUri,

    #[error("Bulk data not downloaded: {0}")]
    BulkDataMissing(PathBuf),
}

impl DownloadError {
    /// Confirmed absence; retrying cannot succeed.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DownloadError::NotFound(_))
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Http { .. }
            | DownloadError::Request(_)
            | DownloadError::Io(_)
            | DownloadError::Cache(_) => true,
            DownloadError::NotFound(_)
            | DownloadError::MissingImage { .. }
            | DownloadError::MissingIdentity(_)
            | DownloadError::Parse(_)
            | DownloadError::NoDownloadUri
            | DownloadError::BulkDataMissing(_) => false,
        }
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(e: serde_json::Error) -> Self {
        DownloadError::Parse(e.to_string())
    }
}

/// Result of the vendor metadata comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub stale: bool,
    pub reason: String,
    pub metadata: BulkMetadata,
}

/// Result of a bulk snapshot download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkDownload {
    /// The local snapshot already matches the vendor.
    UpToDate,
    Downloaded { source_uri: String, bytes: u64 },
}

impl BulkDownload {
    pub fn message(&self) -> String {
        match self {
            BulkDownload::UpToDate => "Using cached bulk data".to_string(),
            BulkDownload::Downloaded { bytes, .. } => format!(
                "Bulk data downloaded ({:.1} MB)",
                *bytes as f64 / (1024.0 * 1024.0)
            ),
        }
    }
}

/// Outcome of fetching one face image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    Downloaded(PathBuf),
    Cached(PathBuf),
}

impl AssetOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            AssetOutcome::Downloaded(path) | AssetOutcome::Cached(path) => path,
        }
    }
}

/// Outcome of fetching every face of one card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardDownload {
    pub downloaded: usize,
    pub cached: usize,
    /// Front face image, when available.
    pub front: Option<PathBuf>,
}

impl CardDownload {
    pub fn already_cached(&self) -> bool {
        self.downloaded == 0 && self.cached > 0
    }

    pub(crate) fn record(&mut self, face_index: i64, outcome: AssetOutcome) {
        if face_index == 0 {
            self.front = Some(outcome.path().clone());
        }
        match outcome {
            AssetOutcome::Downloaded(_) => self.downloaded += 1,
            AssetOutcome::Cached(_) => self.cached += 1,
        }
    }
}

/// Summary of a mass image download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkImageStats {
    pub total: usize,
    pub downloaded: usize,
    /// Cards whose images were already cached.
    pub skipped: usize,
    pub failed: usize,
}

/// Progress report for a mass image download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkProgress {
    pub completed: usize,
    pub stats: BulkImageStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DownloadError::NotFound("x".into()).is_not_found());
        assert!(!DownloadError::NotFound("x".into()).is_retryable());
        assert!(DownloadError::Http {
            status: 429,
            message: "Too Many Requests".into()
        }
        .is_retryable());
        assert!(!DownloadError::MissingImage {
            name: "x".into(),
            size: ImageSize::Png
        }
        .is_retryable());
    }

    #[test]
    fn test_not_found_message() {
        let err = DownloadError::NotFound("Mirrorpool (aeoe)".into());
        assert_eq!(err.to_string(), "404 Not Found: Mirrorpool (aeoe)");
    }

    #[test]
    fn test_card_download_tracks_front_face() {
        let mut download = CardDownload::default();
        download.record(1, AssetOutcome::Downloaded(PathBuf::from("b.jpg")));
        download.record(0, AssetOutcome::Cached(PathBuf::from("a.jpg")));
        assert_eq!(download.front, Some(PathBuf::from("a.jpg")));
        assert!(!download.already_cached());
    }

    #[test]
    fn test_bulk_download_serialization() {
        let json = serde_json::to_value(BulkDownload::Downloaded {
            source_uri: "https://x/y.json".into(),
            bytes: 10,
        })
        .unwrap();
        assert_eq!(json["status"], "downloaded");
        let back: BulkDownload = serde_json::from_value(json).unwrap();
        assert!(matches!(back, BulkDownload::Downloaded { bytes: 10, .. }));
    }
}
