use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::not_found::NotFoundMemo;
use super::types::{ImageRequest, QueueEvent, QueueKey};
use super::ImageFetcher;
use crate::cache::ImageCache;
use crate::config::QueueConfig;
use crate::metrics;

/// Terminal outcome of one request after retries.
enum Outcome {
    Downloaded,
    NotFound(String),
    Failed(String),
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Downloaded => "downloaded",
            Outcome::NotFound(_) => "not_found",
            Outcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ImageRequest>,
    pending_keys: HashSet<QueueKey>,
    inflight_keys: HashSet<QueueKey>,
    selected: Option<ImageRequest>,
}

impl QueueState {
    fn remove_pending(&mut self, key: &QueueKey) {
        if self.pending_keys.remove(key) {
            self.pending.retain(|request| request.queue_key() != *key);
        }
    }

    fn push(&mut self, request: ImageRequest, key: QueueKey, front: bool) {
        if front {
            self.pending.push_front(request);
        } else {
            self.pending.push_back(request);
        }
        self.pending_keys.insert(key);
    }

    fn update_gauges(&self) {
        metrics::QUEUE_PENDING.set(self.pending.len() as i64);
        metrics::QUEUE_INFLIGHT.set(self.inflight_keys.len() as i64);
    }
}

struct QueueInner {
    config: QueueConfig,
    cache: Arc<dyn ImageCache>,
    fetcher: Arc<dyn ImageFetcher>,
    not_found: Arc<NotFoundMemo>,
    state: Mutex<QueueState>,
    wake: Notify,
    permits: Arc<Semaphore>,
    stopped: AtomicBool,
    events: mpsc::UnboundedSender<QueueEvent>,
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Cache check for a request. Lookup errors count as "not cached".
    fn is_cached(&self, request: &ImageRequest) -> bool {
        let result = if let Some(identity) = request.identity() {
            self.cache.is_cached(identity, request.size, None)
        } else if request.card_name.trim().is_empty() {
            Ok(false)
        } else if let Some(set) = request.set_code() {
            self.cache
                .get_image_path_for_printing(&request.card_name, set, request.size)
                .map(|path| path.is_some())
        } else {
            self.cache
                .get_image_path(&request.card_name, request.size)
                .map(|path| path.is_some())
        };
        result.unwrap_or_else(|e| {
            warn!(request = %request, error = %e, "Cache lookup failed");
            false
        })
    }

    fn pop_next(&self) -> Option<ImageRequest> {
        let mut state = self.lock_state();
        let request = state.pending.pop_front()?;
        let key = request.queue_key();
        state.pending_keys.remove(&key);
        state.inflight_keys.insert(key);
        state.update_gauges();
        Some(request)
    }

    /// Put the selected request at the front of the pending list if it
    /// still needs downloading.
    fn reassert_selected(&self) {
        if self.is_stopped() {
            return;
        }
        let Some(request) = self.lock_state().selected.clone() else {
            return;
        };
        if !request.can_fetch()
            || self.is_cached(&request)
            || self.not_found.contains(&request.not_found_key())
        {
            return;
        }

        let key = request.queue_key();
        {
            let mut state = self.lock_state();
            // Selection may have moved on while the cache was consulted.
            if state.selected.as_ref().map(ImageRequest::queue_key).as_ref() != Some(&key) {
                return;
            }
            if state.inflight_keys.contains(&key) {
                return;
            }
            if state.pending.front().map(ImageRequest::queue_key).as_ref() == Some(&key) {
                return;
            }
            state.remove_pending(&key);
            state.push(request, key, true);
            state.update_gauges();
        }
        self.wake.notify_one();
    }

    async fn process(self: Arc<Self>, request: ImageRequest) {
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.download_with_retry(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(request = %request, "Image download task panicked");
                Outcome::Failed("download task panicked".to_string())
            });

        metrics::IMAGE_DOWNLOADS
            .with_label_values(&[outcome.label()])
            .inc();
        metrics::IMAGE_DOWNLOAD_DURATION
            .with_label_values(&[outcome.label()])
            .observe(started.elapsed().as_secs_f64());

        {
            let mut state = self.lock_state();
            state.inflight_keys.remove(&request.queue_key());
            state.update_gauges();
        }

        if !self.is_stopped() {
            let event = match outcome {
                Outcome::Downloaded if self.is_cached(&request) => QueueEvent::Downloaded(request),
                Outcome::Downloaded => QueueEvent::Failed {
                    request,
                    reason: "download completed but image is not in the cache".to_string(),
                },
                Outcome::NotFound(reason) | Outcome::Failed(reason) => {
                    QueueEvent::Failed { request, reason }
                }
            };
            let _ = self.events.send(event);
        }

        self.reassert_selected();
        self.wake.notify_one();
    }

    async fn download_with_retry(&self, request: &ImageRequest) -> Outcome {
        debug!(request = %request, "Starting image download");
        if self.is_cached(request) {
            return Outcome::Downloaded;
        }

        let slow_threshold = Duration::from_millis(self.config.slow_success_threshold_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let result = self.fetcher.fetch(request).await;
            let elapsed = started.elapsed();

            let err = match result {
                Ok(()) => {
                    if elapsed > slow_threshold && !self.is_cached(request) {
                        error!(
                            request = %request,
                            elapsed_secs = elapsed.as_secs_f64(),
                            "Slow download reported success but the image is missing"
                        );
                        return Outcome::Failed(format!(
                            "download reported success after {:.2}s but no image was stored",
                            elapsed.as_secs_f64()
                        ));
                    }
                    self.not_found.discard(&request.not_found_key());
                    return Outcome::Downloaded;
                }
                Err(e) => e,
            };

            if err.is_not_found() {
                error!(request = %request, error = %err, "Card image not found");
                self.not_found.add(request.not_found_key());
                return Outcome::NotFound(err.to_string());
            }
            if !err.is_retryable() || attempt >= self.config.max_retries || self.is_stopped() {
                error!(request = %request, error = %err, "Card image download failed");
                return Outcome::Failed(err.to_string());
            }

            attempt += 1;
            metrics::DOWNLOAD_RETRIES.inc();
            warn!(
                request = %request,
                error = %err,
                attempt,
                max_retries = self.config.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying card image download"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

async fn dispatch_loop(inner: Arc<QueueInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    let poll = Duration::from_millis(inner.config.dispatch_poll_ms.max(1));
    debug!("Download queue dispatcher started");

    loop {
        let permit: OwnedSemaphorePermit = tokio::select! {
            _ = shutdown_rx.recv() => break,
            permit = inner.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let request = loop {
            if inner.is_stopped() {
                debug!("Download queue dispatcher stopped");
                return;
            }
            if let Some(request) = inner.pop_next() {
                break request;
            }
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Download queue dispatcher stopped");
                    return;
                }
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        };

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            worker.process(request).await;
            drop(permit);
        });
    }

    debug!("Download queue dispatcher stopped");
}

/// Background queue that downloads card images with bounded concurrency.
///
/// The currently selected request always jumps to the front of the pending
/// list while it still needs downloading. Terminal outcomes are delivered on
/// the channel returned by [`DownloadQueue::start`].
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl DownloadQueue {
    /// Create the queue and spawn its dispatcher on the current runtime.
    pub fn start(
        config: QueueConfig,
        cache: Arc<dyn ImageCache>,
        fetcher: Arc<dyn ImageFetcher>,
        not_found: Arc<NotFoundMemo>,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let inner = Arc::new(QueueInner {
            permits: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            config,
            cache,
            fetcher,
            not_found,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            events,
        });

        info!(
            max_concurrent = inner.config.max_concurrent_downloads,
            "Starting download queue"
        );
        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&inner), shutdown_rx));

        (
            Self {
                inner,
                dispatcher: Mutex::new(Some(dispatcher)),
                shutdown_tx,
            },
            events_rx,
        )
    }

    /// Queue a request. Returns `false` when it was rejected: unfetchable,
    /// already cached, known missing, in flight, or already pending without
    /// `prioritize`. A prioritized request that is already pending moves to
    /// the front.
    pub fn enqueue(&self, request: ImageRequest, prioritize: bool) -> bool {
        if self.inner.is_stopped() || !request.can_fetch() {
            return false;
        }
        if self.inner.is_cached(&request) {
            return false;
        }
        if self.inner.not_found.contains(&request.not_found_key()) {
            debug!(request = %request, "Skipping request marked not found");
            metrics::NOT_FOUND_MEMO_HITS.inc();
            return false;
        }

        let key = request.queue_key();
        {
            let mut state = self.inner.lock_state();
            if state.inflight_keys.contains(&key) {
                return false;
            }
            if state.pending_keys.contains(&key) {
                if !prioritize {
                    return false;
                }
                state.remove_pending(&key);
            }
            state.push(request, key, prioritize);
            state.update_gauges();
        }
        self.inner.wake.notify_one();
        true
    }

    /// Record the request the user is looking at; `None` clears it.
    pub fn set_selected(&self, request: Option<ImageRequest>) {
        self.inner.lock_state().selected = request;
        self.inner.reassert_selected();
    }

    pub fn selected(&self) -> Option<ImageRequest> {
        self.inner.lock_state().selected.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.inner.lock_state().inflight_keys.len()
    }

    /// Snapshot of the pending list, front first.
    pub fn pending_requests(&self) -> Vec<ImageRequest> {
        self.inner.lock_state().pending.iter().cloned().collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stop accepting work and discard pending requests.
    ///
    /// In-flight downloads run to completion but their outcomes are not
    /// reported. Waits up to `stop_timeout_ms` for the dispatcher.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping download queue");

        let _ = self.shutdown_tx.send(());
        self.inner.permits.close();
        self.inner.wake.notify_waiters();

        let discarded = {
            let mut state = self.inner.lock_state();
            let discarded = state.pending.len();
            state.pending.clear();
            state.pending_keys.clear();
            state.update_gauges();
            discarded
        };

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut handle) = handle {
            let timeout = Duration::from_millis(self.inner.config.stop_timeout_ms);
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("Download queue dispatcher did not stop in time; aborting");
                handle.abort();
            }
        }

        info!(discarded, "Download queue stopped");
    }
}

impl Drop for DownloadQueue {
    fn drop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        self.inner.permits.close();
        if let Some(handle) = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
