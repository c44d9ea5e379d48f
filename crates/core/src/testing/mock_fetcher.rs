//! Mock image fetcher for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};

use crate::cache::{CardImageCache, ImageCache, ImageEntry};
use crate::downloader::DownloadError;
use crate::queue::{ImageFetcher, ImageRequest};

/// Scripted result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Succeed, writing an image when a cache is attached.
    Ok,
    /// Remote reports the card absent.
    NotFound,
    /// Remote answers with this status.
    Http(u16),
    /// Card exists but has no image of the requested size.
    MissingImage,
    /// The fetch panics.
    Panic,
    /// Report success after this long without writing anything.
    SlowWithoutImage(Duration),
}

/// Mock implementation of the ImageFetcher trait.
///
/// Provides controllable behavior for testing:
/// - Scripted responses per card name, `Ok` once a script runs out
/// - Recorded requests, in call order
/// - An optional gate that holds every fetch until released
/// - Peak concurrency tracking
///
/// # Example
///
/// ```rust,ignore
/// let fetcher = MockFetcher::gated().with_cache(cache.clone());
/// fetcher.script("Bolt", vec![MockResponse::Http(429), MockResponse::Ok]).await;
///
/// // ... enqueue requests ...
/// fetcher.release(1);
/// assert_eq!(fetcher.calls().await.len(), 1);
/// ```
pub struct MockFetcher {
    /// Scripted responses keyed by lower-cased card name.
    scripts: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    /// Recorded fetch calls.
    calls: Arc<RwLock<Vec<ImageRequest>>>,
    /// Holds fetches until permits are released.
    gate: Option<Arc<Semaphore>>,
    /// Where successful fetches write their image.
    cache: Option<Arc<CardImageCache>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("gated", &self.gate.is_some())
            .field("has_cache", &self.cache.is_some())
            .finish()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    /// Create a fetcher that answers immediately.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            gate: None,
            cache: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a fetcher whose calls block until [`MockFetcher::release`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Write a placeholder image into `cache` on every successful fetch.
    pub fn with_cache(mut self, cache: Arc<CardImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Queue responses for a card name.
    pub async fn script(&self, card_name: &str, responses: Vec<MockResponse>) {
        self.scripts
            .write()
            .await
            .entry(card_name.trim().to_lowercase())
            .or_default()
            .extend(responses);
    }

    /// Let `count` gated fetches proceed.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Requests fetched so far.
    pub async fn calls(&self) -> Vec<ImageRequest> {
        self.calls.read().await.clone()
    }

    /// Highest number of fetches that ran at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn next_response(&self, request: &ImageRequest) -> MockResponse {
        self.scripts
            .write()
            .await
            .get_mut(&request.card_name.trim().to_lowercase())
            .and_then(VecDeque::pop_front)
            .unwrap_or(MockResponse::Ok)
    }

    fn store_image(&self, request: &ImageRequest) -> Result<(), DownloadError> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let identity = match request.identity() {
            Some(identity) => identity.to_string(),
            None => format!(
                "mock-{}-{}",
                request.card_name.trim().to_lowercase().replace(' ', "-"),
                request.set_code().unwrap_or("any").to_lowercase()
            ),
        };
        let path = cache
            .size_dir(request.size)
            .join(format!("{}.{}", identity, request.size.extension()));
        std::fs::write(&path, b"image")?;
        cache.add_image(&ImageEntry {
            identity,
            face_index: 0,
            name: request.card_name.trim().to_string(),
            set_code: request.set_code().unwrap_or("").to_string(),
            collector_number: request.collector_number().unwrap_or("").to_string(),
            size: request.size,
            file_path: path,
            source_uri: None,
            artist: None,
        })?;
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for MockFetcher {
    async fn fetch(&self, request: &ImageRequest) -> Result<(), DownloadError> {
        self.calls.write().await.push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let response = self.next_response(request).await;
        let result = match response {
            MockResponse::Ok => self.store_image(request),
            MockResponse::NotFound => Err(DownloadError::NotFound(request.to_string())),
            MockResponse::Http(status) => Err(DownloadError::Http {
                status,
                message: format!("mock status {}", status),
            }),
            MockResponse::MissingImage => Err(DownloadError::MissingImage {
                name: request.card_name.clone(),
                size: request.size,
            }),
            MockResponse::SlowWithoutImage(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            MockResponse::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("scripted panic for {}", request.card_name);
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
