//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Single-image downloads (results, retries, not-found memo hits)
//! - Download queue depth
//! - Bulk snapshot downloads and printing index builds
//! - Out-of-process jobs

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Image Downloads
// =============================================================================

/// Image download outcomes by result.
pub static IMAGE_DOWNLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cardcache_image_downloads_total", "Total image download outcomes"),
        &["result"], // "downloaded", "cached", "not_found", "failed"
    )
    .unwrap()
});

/// Image download duration in seconds.
pub static IMAGE_DOWNLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cardcache_image_download_duration_seconds",
            "Duration of single image downloads including retries",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["result"],
    )
    .unwrap()
});

/// Retried image download attempts.
pub static DOWNLOAD_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cardcache_download_retries_total",
        "Total retried image download attempts",
    )
    .unwrap()
});

/// Requests rejected because the remote confirmed the card absent.
pub static NOT_FOUND_MEMO_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "cardcache_not_found_memo_hits_total",
        "Requests skipped by the not-found memo",
    )
    .unwrap()
});

// =============================================================================
// Download Queue
// =============================================================================

/// Requests waiting in the download queue.
pub static QUEUE_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cardcache_queue_pending", "Requests waiting to be dispatched").unwrap()
});

/// Requests currently being downloaded.
pub static QUEUE_INFLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("cardcache_queue_inflight", "Requests currently downloading").unwrap()
});

// =============================================================================
// Bulk Data
// =============================================================================

/// Bulk snapshot downloads by result.
pub static BULK_DOWNLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cardcache_bulk_downloads_total", "Total bulk snapshot downloads"),
        &["result"], // "downloaded", "cached", "failed"
    )
    .unwrap()
});

/// Printing index loads by source.
pub static PRINTING_INDEX_LOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cardcache_printing_index_loads_total",
            "Printing index loads by source",
        ),
        &["source"], // "built", "cached"
    )
    .unwrap()
});

// =============================================================================
// Jobs
// =============================================================================

/// Job runs by kind and result.
pub static JOB_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cardcache_job_runs_total", "Total out-of-process job runs"),
        &["kind", "result"], // result: "success", "failed", "crashed"
    )
    .unwrap()
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Images
        Box::new(IMAGE_DOWNLOADS.clone()),
        Box::new(IMAGE_DOWNLOAD_DURATION.clone()),
        Box::new(DOWNLOAD_RETRIES.clone()),
        Box::new(NOT_FOUND_MEMO_HITS.clone()),
        // Queue
        Box::new(QUEUE_PENDING.clone()),
        Box::new(QUEUE_INFLIGHT.clone()),
        // Bulk data
        Box::new(BULK_DOWNLOADS.clone()),
        Box::new(PRINTING_INDEX_LOADS.clone()),
        // Jobs
        Box::new(JOB_RUNS.clone()),
    ]
}
