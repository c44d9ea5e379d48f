use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::types::{DataReadiness, EnsureOptions, ImageEvent, ServiceError};
use crate::cache::{CacheStats, CardImageCache};
use crate::config::Config;
use crate::downloader::{BulkDownload, CardDownloader};
use crate::jobs::{create_job_launcher, JobError, JobKind, JobLauncher, JobSpec};
use crate::printings::{
    bulk_mtime, load_current_printing_index, load_printing_index_payload, PrintingEntry,
    PrintingIndexError, PrintingIndexPayload, PrintingIndexStats, PRINTING_INDEX_VERSION,
};
use crate::queue::{DownloadQueue, ImageRequest, NotFoundMemo, QueueEvent};

const EVENT_CAPACITY: usize = 256;

/// Clears a busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Removes a printings fetch key from the in-flight set when dropped.
struct InflightKey {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InflightKey {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, key: String) -> Option<Self> {
        lock(set).insert(key.clone()).then(|| Self {
            set: Arc::clone(set),
            key,
        })
    }
}

impl Drop for InflightKey {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.key);
    }
}

/// Owns the image cache, download queue, job runner and the in-memory
/// printing index.
///
/// Results of background work are published as [`ImageEvent`]s; see
/// [`ImageService::subscribe`].
pub struct ImageService {
    config: Config,
    cache: Arc<CardImageCache>,
    downloader: Arc<CardDownloader>,
    queue: DownloadQueue,
    jobs: Arc<dyn JobLauncher>,
    not_found: Arc<NotFoundMemo>,
    events: broadcast::Sender<ImageEvent>,
    printing_index: RwLock<Option<Arc<PrintingIndexPayload>>>,
    loading: AtomicBool,
    checking: AtomicBool,
    printings_inflight: Arc<Mutex<HashSet<String>>>,
    forwarder: JoinHandle<()>,
}

impl ImageService {
    /// Build the service from configuration. Must be called inside a tokio
    /// runtime.
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let jobs = create_job_launcher(&config.jobs)?;
        Self::with_job_launcher(config, jobs)
    }

    pub fn with_job_launcher(
        config: Config,
        jobs: Arc<dyn JobLauncher>,
    ) -> Result<Self, ServiceError> {
        let cache = Arc::new(CardImageCache::from_config(&config.cache)?);
        let downloader = Arc::new(CardDownloader::from_config(cache.clone(), &config)?);
        let not_found = Arc::new(NotFoundMemo::new());
        let (queue, queue_events) = DownloadQueue::start(
            config.queue.clone(),
            cache.clone(),
            downloader.clone(),
            not_found.clone(),
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let forwarder = tokio::spawn(forward_queue_events(queue_events, events.clone()));

        info!(root = %config.cache.root.display(), "Image service started");
        Ok(Self {
            config,
            cache,
            downloader,
            queue,
            jobs,
            not_found,
            events,
            printing_index: RwLock::new(None),
            loading: AtomicBool::new(false),
            checking: AtomicBool::new(false),
            printings_inflight: Arc::new(Mutex::new(HashSet::new())),
            forwarder,
        })
    }

    pub fn cache(&self) -> &Arc<CardImageCache> {
        &self.cache
    }

    pub fn downloader(&self) -> &Arc<CardDownloader> {
        &self.downloader
    }

    pub fn not_found_memo(&self) -> &Arc<NotFoundMemo> {
        &self.not_found
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImageEvent> {
        self.events.subscribe()
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        info!(status = %message, "Image service status");
        let _ = self.events.send(ImageEvent::Status(message));
    }

    fn bulk_path(&self) -> PathBuf {
        self.config.cache.bulk_path()
    }

    fn index_path(&self) -> PathBuf {
        self.config.cache.printing_index_path(PRINTING_INDEX_VERSION)
    }

    // ========================================================================
    // Image downloads
    // ========================================================================

    /// Queue an image download. Returns `false` when the queue rejected it.
    pub fn queue_download(&self, request: ImageRequest, prioritize: bool) -> bool {
        let description = request.to_string();
        let enqueued = self.queue.enqueue(request, prioritize);
        debug!(
            request = %description,
            result = if enqueued { "enqueued" } else { "skipped" },
            "Queue image request"
        );
        enqueued
    }

    /// Update the request the user is looking at.
    pub fn set_selected(&self, request: Option<ImageRequest>) {
        self.queue.set_selected(request);
    }

    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    pub fn cache_stats(&self) -> Result<CacheStats, ServiceError> {
        Ok(self.cache.get_cache_stats()?)
    }

    // ========================================================================
    // Printings
    // ========================================================================

    /// Every printing of `name` from the remote, newest first.
    pub async fn fetch_printings(&self, name: &str) -> Result<Vec<PrintingEntry>, ServiceError> {
        Ok(fetch_printing_entries(&self.downloader, name).await?)
    }

    /// Fetch printings in the background and publish
    /// [`ImageEvent::PrintingsLoaded`] or [`ImageEvent::PrintingsFailed`].
    /// Returns `false` if a fetch for the same name is already running.
    pub fn fetch_printings_by_name(&self, name: &str) -> bool {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return false;
        }
        let Some(claim) = InflightKey::claim(&self.printings_inflight, key) else {
            debug!(name, "Printings fetch already running");
            return false;
        };

        let downloader = Arc::clone(&self.downloader);
        let events = self.events.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let result = fetch_printing_entries(&downloader, &name).await;
            drop(claim);
            let event = match result {
                Ok(printings) => ImageEvent::PrintingsLoaded { name, printings },
                Err(e) => {
                    error!(name = %name, error = %e, "Failed to fetch printings");
                    ImageEvent::PrintingsFailed {
                        name,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
        true
    }

    /// The loaded printing index, if any.
    pub fn printing_index(&self) -> Option<Arc<PrintingIndexPayload>> {
        self.printing_index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn install_index(&self, payload: PrintingIndexPayload) -> PrintingIndexStats {
        let stats = payload.stats();
        *self
            .printing_index
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(payload));
        stats
    }

    /// Load the printing index, reusing the in-memory or on-disk copy when
    /// it is current for the snapshot and building it through the job
    /// runner otherwise. `force` always rebuilds.
    pub async fn load_printing_index(
        &self,
        force: bool,
    ) -> Result<PrintingIndexStats, ServiceError> {
        let Some(_busy) = BusyGuard::acquire(&self.loading) else {
            return Err(JobError::AlreadyRunning(JobKind::BuildPrintingIndex).into());
        };

        let bulk_path = self.bulk_path();
        let index_path = self.index_path();
        let snapshot_mtime = bulk_mtime(&bulk_path);

        if !force {
            if let Some(loaded) = self.printing_index() {
                if snapshot_mtime.map_or(true, |mtime| loaded.bulk_mtime >= mtime) {
                    debug!("Printing index already loaded");
                    return Ok(loaded.stats());
                }
            }

            let (bulk, index) = (bulk_path.clone(), index_path.clone());
            let cached = tokio::task::spawn_blocking(move || load_current_printing_index(&bulk, &index))
                .await
                .map_err(|e| ServiceError::Task(e.to_string()))?;
            if let Some(payload) = cached {
                let stats = self.install_index(payload);
                info!(
                    unique_names = stats.unique_names,
                    total_printings = stats.total_printings,
                    "Loaded cached printings index"
                );
                return Ok(stats);
            }
        }

        if snapshot_mtime.is_none() {
            return Err(PrintingIndexError::BulkDataMissing(bulk_path).into());
        }

        self.status("Preparing card printings cache...");
        let handle = self.jobs.launch(JobSpec::BuildPrintingIndex {
            bulk_path,
            index_path: index_path.clone(),
        })?;
        handle.wait().await?;

        let path = index_path.clone();
        let payload = tokio::task::spawn_blocking(move || {
            load_printing_index_payload(&path, PRINTING_INDEX_VERSION)
        })
        .await
        .map_err(|e| ServiceError::Task(e.to_string()))?
        .ok_or(ServiceError::IndexMissing(index_path))?;

        Ok(self.install_index(payload))
    }

    // ========================================================================
    // Bulk data
    // ========================================================================

    pub fn check_bulk_data_exists(&self) -> bool {
        self.bulk_path().exists()
    }

    /// Download the bulk snapshot in a job.
    pub async fn download_bulk_data(&self, force: bool) -> Result<BulkDownload, ServiceError> {
        let handle = self.jobs.launch(JobSpec::BulkDownload {
            cache: self.config.cache.clone(),
            remote: self.config.remote.clone(),
            bulk: self.config.bulk.clone(),
            force,
        })?;
        let payload = handle.wait().await?;
        serde_json::from_value(payload["result"].clone())
            .map_err(|e| ServiceError::Job(JobError::Protocol(e.to_string())))
    }

    /// Make sure a snapshot and its printing index are available.
    ///
    /// Checks vendor freshness (unless `cached_only`), downloads a new
    /// snapshot when needed and loads the index. A missing snapshot that
    /// cannot be downloaded yields [`DataReadiness::NeedsDownload`] rather
    /// than an error.
    pub async fn ensure_data_ready(
        &self,
        options: EnsureOptions,
    ) -> Result<DataReadiness, ServiceError> {
        let Some(_busy) = BusyGuard::acquire(&self.checking) else {
            debug!("Bulk data check already running");
            return Ok(DataReadiness::AlreadyRunning);
        };

        if options.cached_only {
            self.status("Loading cached card image database...");
            return self.load_existing("Using cached card image database").await;
        }

        self.status("Checking card image database...");
        let reason = if options.force_download {
            "Download forced".to_string()
        } else {
            match self.downloader.check_freshness().await {
                Ok(freshness) if !freshness.stale => {
                    return self.load_existing("Card image database ready").await;
                }
                Ok(freshness) => freshness.reason,
                Err(e) => {
                    warn!(error = %e, "Bulk data freshness check failed");
                    if self.check_bulk_data_exists() {
                        return self.load_existing("Using cached card image database").await;
                    }
                    return Ok(DataReadiness::NeedsDownload {
                        reason: format!("Could not check card image database: {}", e),
                    });
                }
            }
        };

        info!(reason = %reason, "Bulk data needs update");
        // Serve printings from the old snapshot while the new one downloads.
        if self.printing_index().is_none() && self.check_bulk_data_exists() {
            if let Err(e) = self.load_printing_index(false).await {
                warn!(error = %e, "Could not load existing printings index before download");
            }
        }
        self.status("Downloading card image database...");
        match self.download_bulk_data(options.force_download).await {
            Ok(result) => {
                self.status(result.message());
                let stats = self.load_printing_index(false).await?;
                self.status("Card image database ready");
                Ok(match result {
                    BulkDownload::UpToDate => DataReadiness::Ready { stats },
                    BulkDownload::Downloaded { .. } => DataReadiness::Downloaded { stats },
                })
            }
            Err(ServiceError::Job(JobError::AlreadyRunning(_))) => Ok(DataReadiness::AlreadyRunning),
            Err(e) => {
                error!(error = %e, "Bulk data download failed");
                if self.check_bulk_data_exists() {
                    return self.load_existing("Using cached card image database").await;
                }
                Ok(DataReadiness::NeedsDownload {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn load_existing(&self, ready_status: &str) -> Result<DataReadiness, ServiceError> {
        if !self.check_bulk_data_exists() {
            return Ok(DataReadiness::NeedsDownload {
                reason: "Bulk data cache not found".to_string(),
            });
        }
        let stats = self.load_printing_index(false).await?;
        self.status(ready_status);
        Ok(DataReadiness::Ready { stats })
    }

    /// Stop the queue and kill every live job.
    pub async fn shutdown(&self) {
        info!("Shutting down image service");
        self.queue.stop().await;
        self.jobs.terminate_all().await;
        self.forwarder.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn fetch_printing_entries(
    downloader: &CardDownloader,
    name: &str,
) -> Result<Vec<PrintingEntry>, crate::downloader::DownloadError> {
    let cards = downloader.fetch_printings_by_name(name).await?;
    Ok(cards.iter().filter_map(PrintingEntry::from_card).collect())
}

async fn forward_queue_events(
    mut queue_events: tokio::sync::mpsc::UnboundedReceiver<QueueEvent>,
    events: broadcast::Sender<ImageEvent>,
) {
    while let Some(event) = queue_events.recv().await {
        let event = match event {
            QueueEvent::Downloaded(request) => ImageEvent::ImageDownloaded(request),
            QueueEvent::Failed { request, reason } => ImageEvent::ImageFailed { request, reason },
        };
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ImageCache, ImageSize, RemoteMetadataRecord};
    use crate::config::JobMode;
    use crate::testing::{fixtures, StaticHttpServer, StaticResponse};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, base_url: String) -> Config {
        let mut config = Config::default();
        config.cache.root = dir.path().to_path_buf();
        config.remote.api_base_url = base_url;
        config.jobs.mode = JobMode::Inline;
        config
    }

    async fn serve_bulk(server: &StaticHttpServer, cards: serde_json::Value) {
        server
            .route(
                "/bulk-data/default-cards",
                StaticResponse::json(&json!({
                    "download_uri": server.url("/files/bulk.json"),
                    "updated_at": "2024-06-01T09:00:00Z"
                })),
            )
            .await;
        server
            .route("/files/bulk.json", StaticResponse::json(&cards))
            .await;
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<ImageEvent>, pred: F) -> ImageEvent
    where
        F: Fn(&ImageEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_downloads_then_reuses() {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        let mut bolt = fixtures::card_json("uuid-bolt", "Lightning Bolt", "m11", "146");
        bolt["released_at"] = json!("2010-07-16");
        serve_bulk(&server, json!([bolt])).await;

        let service = ImageService::new(test_config(&dir, server.base_url())).unwrap();
        let mut events = service.subscribe();

        let first = service
            .ensure_data_ready(EnsureOptions::default())
            .await
            .unwrap();
        assert_eq!(
            first,
            DataReadiness::Downloaded {
                stats: PrintingIndexStats {
                    unique_names: 1,
                    total_printings: 1
                }
            }
        );
        let index = service.printing_index().unwrap();
        assert_eq!(index.lookup("LIGHTNING BOLT").unwrap()[0].set, "M11");
        assert!(matches!(events.try_recv(), Ok(ImageEvent::Status(_))));

        let second = service
            .ensure_data_ready(EnsureOptions::default())
            .await
            .unwrap();
        assert!(matches!(second, DataReadiness::Ready { .. }));
        assert_eq!(server.hit_count("/files/bulk.json").await, 1);
        assert!(!service.is_loading());

        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_snapshot_serves_printings_during_download() {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        serve_bulk(
            &server,
            json!([fixtures::card_json("uuid-opt-new", "Opt", "dom", "60")]),
        )
        .await;
        server
            .route(
                "/files/bulk.json",
                StaticResponse::json(&json!([])).delayed(Duration::from_secs(30)),
            )
            .await;

        let service = ImageService::new(test_config(&dir, server.base_url())).unwrap();
        fixtures::write_bulk(
            &service.bulk_path(),
            &[fixtures::card_json("uuid-opt", "Opt", "inv", "64")],
        );
        service
            .cache()
            .upsert_remote_metadata(&RemoteMetadataRecord {
                downloaded_at: "2024-01-01T09:00:00Z".to_string(),
                total_cards: 1,
                source_uri: server.url("/files/bulk.json"),
            })
            .unwrap();

        let ensure = service.ensure_data_ready(EnsureOptions::default());
        tokio::pin!(ensure);
        let index = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                tokio::select! {
                    readiness = &mut ensure => panic!("finished before download: {:?}", readiness),
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {
                        if let Some(index) = service.printing_index() {
                            break index;
                        }
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(index.lookup("opt").unwrap()[0].set, "INV");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_remote_without_snapshot_needs_download() {
        let dir = TempDir::new().unwrap();
        let service =
            ImageService::new(test_config(&dir, "http://127.0.0.1:1".to_string())).unwrap();

        let readiness = service
            .ensure_data_ready(EnsureOptions::default())
            .await
            .unwrap();
        assert!(matches!(readiness, DataReadiness::NeedsDownload { .. }));
        assert!(service.printing_index().is_none());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_cached_only_uses_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let service =
            ImageService::new(test_config(&dir, "http://127.0.0.1:1".to_string())).unwrap();
        let cached_only = EnsureOptions {
            cached_only: true,
            ..Default::default()
        };

        let missing = service.ensure_data_ready(cached_only).await.unwrap();
        assert!(matches!(missing, DataReadiness::NeedsDownload { .. }));

        fixtures::write_bulk(
            &dir.path().join("bulk_data.json"),
            &[fixtures::card_json("uuid-opt", "Opt", "dom", "60")],
        );
        let ready = service.ensure_data_ready(cached_only).await.unwrap();
        assert!(matches!(ready, DataReadiness::Ready { stats } if stats.total_printings == 1));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_load_printing_index_requires_snapshot() {
        let dir = TempDir::new().unwrap();
        let service =
            ImageService::new(test_config(&dir, "http://127.0.0.1:1".to_string())).unwrap();
        let err = service.load_printing_index(false).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Printings(PrintingIndexError::BulkDataMissing(_))
        ));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_printings_is_memoized_while_running() {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        let mut newer = fixtures::card_json("p2", "Opt", "dom", "60");
        newer["set_name"] = json!("Dominaria");
        server
            .route(
                "/cards/search",
                StaticResponse::json(&json!({
                    "data": [newer, fixtures::card_json("p1", "Opt", "inv", "64")],
                    "has_more": false
                })),
            )
            .await;

        let service = ImageService::new(test_config(&dir, server.base_url())).unwrap();
        let mut events = service.subscribe();

        assert!(service.fetch_printings_by_name("Opt"));
        assert!(!service.fetch_printings_by_name(" opt "));
        assert!(!service.fetch_printings_by_name("  "));

        let event = next_matching(&mut events, |e| {
            matches!(e, ImageEvent::PrintingsLoaded { .. })
        })
        .await;
        match event {
            ImageEvent::PrintingsLoaded { name, printings } => {
                assert_eq!(name, "Opt");
                assert_eq!(printings.len(), 2);
                assert_eq!(printings[0].set, "DOM");
                assert_eq!(printings[0].set_name, "Dominaria");
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Finished fetches can be started again.
        assert!(service.fetch_printings_by_name("Opt"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_printings_failure_is_published_and_released() {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        server
            .route(
                "/cards/search",
                StaticResponse::status(500, "upstream unavailable"),
            )
            .await;

        let service = ImageService::new(test_config(&dir, server.base_url())).unwrap();
        let mut events = service.subscribe();

        assert!(service.fetch_printings_by_name("Opt"));
        let event = next_matching(&mut events, |e| {
            matches!(e, ImageEvent::PrintingsFailed { .. })
        })
        .await;
        match event {
            ImageEvent::PrintingsFailed { name, reason } => {
                assert_eq!(name, "Opt");
                assert!(reason.contains("500"), "reason {}", reason);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(service.fetch_printings_by_name("opt"));
        service.shutdown().await;
    }

    #[test]
    fn test_inflight_key_released_on_panic() {
        let set = Arc::new(Mutex::new(HashSet::new()));
        let claim = InflightKey::claim(&set, "opt".to_string()).unwrap();
        assert!(InflightKey::claim(&set, "opt".to_string()).is_none());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _claim = claim;
            panic!("fetch blew up");
        }));
        assert!(result.is_err());
        assert!(lock(&set).is_empty());
        assert!(InflightKey::claim(&set, "opt".to_string()).is_some());
    }

    #[tokio::test]
    async fn test_queue_download_publishes_events() {
        let dir = TempDir::new().unwrap();
        let server = StaticHttpServer::start().await.unwrap();
        let mut card = fixtures::card_json("uuid-bolt", "Lightning Bolt", "m11", "146");
        card["image_uris"] = json!({"normal": server.url("/img/bolt.jpg")});
        server.route("/cards/named", StaticResponse::json(&card)).await;
        server
            .route("/img/bolt.jpg", StaticResponse::bytes(b"jpeg".to_vec()))
            .await;

        let service = ImageService::new(test_config(&dir, server.base_url())).unwrap();
        let mut events = service.subscribe();

        let request = ImageRequest::new("Lightning Bolt").with_set("m11");
        assert!(service.queue_download(request.clone(), false));
        let event = next_matching(&mut events, |e| {
            matches!(e, ImageEvent::ImageDownloaded(_) | ImageEvent::ImageFailed { .. })
        })
        .await;
        assert_eq!(event, ImageEvent::ImageDownloaded(request.clone()));

        assert!(service
            .cache()
            .get_image_path("Lightning Bolt", ImageSize::Normal)
            .unwrap()
            .is_some());
        // Cached now, so a second request is rejected.
        assert!(!service.queue_download(request, true));

        let missing = ImageRequest::new("Mirrorpool")
            .with_set("aeoe")
            .with_collector_number("1");
        assert!(service.queue_download(missing.clone(), false));
        let event = next_matching(&mut events, |e| matches!(e, ImageEvent::ImageFailed { .. })).await;
        assert!(matches!(event, ImageEvent::ImageFailed { ref request, .. } if *request == missing));
        assert!(service.not_found_memo().contains(&missing.not_found_key()));

        let stats = service.cache_stats().unwrap();
        assert_eq!(stats.unique_cards, 1);
        service.shutdown().await;
    }
}
