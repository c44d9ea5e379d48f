//! Bounded-concurrency download queue for single card images.
//!
//! Requests move from *pending* to *in-flight* and are dropped from tracking
//! once they reach a terminal outcome, which is reported as a [`QueueEvent`].

mod not_found;
mod runner;
mod types;

pub use not_found::NotFoundMemo;
pub use runner::DownloadQueue;
pub use types::*;

use async_trait::async_trait;

use crate::downloader::DownloadError;

/// Performs the network side of one queued request.
///
/// Success means the image(s) were written through the cache.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, request: &ImageRequest) -> Result<(), DownloadError>;
}
