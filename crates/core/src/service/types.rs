use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheError;
use crate::downloader::DownloadError;
use crate::jobs::JobError;
use crate::printings::{PrintingEntry, PrintingIndexError, PrintingIndexStats};
use crate::queue::ImageRequest;

/// Notifications published by the image service.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageEvent {
    /// Human-readable progress text.
    Status(String),
    ImageDownloaded(ImageRequest),
    ImageFailed {
        request: ImageRequest,
        reason: String,
    },
    PrintingsLoaded {
        name: String,
        printings: Vec<PrintingEntry>,
    },
    PrintingsFailed {
        name: String,
        reason: String,
    },
}

/// Options for [`ImageService::ensure_data_ready`](super::ImageService::ensure_data_ready).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnsureOptions {
    /// Never touch the network; use whatever snapshot is on disk.
    pub cached_only: bool,
    /// Download the snapshot even if the vendor metadata matches.
    pub force_download: bool,
}

/// Outcome of [`ImageService::ensure_data_ready`](super::ImageService::ensure_data_ready).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DataReadiness {
    /// The index is loaded from an existing snapshot.
    Ready { stats: PrintingIndexStats },
    /// A new snapshot was downloaded and indexed.
    Downloaded { stats: PrintingIndexStats },
    /// No usable snapshot; the user has to download one.
    NeedsDownload { reason: String },
    /// Another check is in progress.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Printings(#[from] PrintingIndexError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Printings index cache missing after build: {0}")]
    IndexMissing(PathBuf),

    #[error("Background task failed: {0}")]
    Task(String),
}
