//! Job bodies, shared by the worker subprocess and the inline runner.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use super::types::{JobError, JobOutcome, JobSpec};
use crate::cache::CardImageCache;
use crate::downloader::CardDownloader;
use crate::printings::build_printing_index_file;

/// Execute a job in the current process.
pub async fn run_job(spec: JobSpec) -> Result<serde_json::Value, JobError> {
    let kind = spec.kind();
    info!(kind = %kind, "Running job");

    match spec {
        JobSpec::BulkDownload {
            cache,
            remote,
            bulk,
            force,
        } => {
            let image_cache =
                CardImageCache::from_config(&cache).map_err(|e| JobError::Failed(e.to_string()))?;
            let downloader =
                CardDownloader::new(Arc::new(image_cache), &remote, &bulk, cache.bulk_path())
                    .map_err(|e| JobError::Failed(e.to_string()))?;
            let result = downloader
                .download_bulk_data(force)
                .await
                .map_err(|e| JobError::Failed(e.to_string()))?;
            Ok(json!({
                "message": result.message(),
                "result": result,
            }))
        }
        JobSpec::BuildPrintingIndex {
            bulk_path,
            index_path,
        } => {
            let payload = tokio::task::spawn_blocking(move || {
                build_printing_index_file(&bulk_path, &index_path)
            })
            .await
            .map_err(|e| JobError::Failed(format!("index build task failed: {}", e)))?
            .map_err(|e| JobError::Failed(e.to_string()))?;
            Ok(json!({
                "unique_names": payload.unique_names,
                "total_printings": payload.total_printings,
                "bulk_mtime": payload.bulk_mtime,
            }))
        }
    }
}

/// Entry point of the worker subprocess: decode the job argument, run it
/// and return the outcome line to print.
pub async fn run_worker(job_arg: &str) -> JobOutcome {
    let spec: JobSpec = match serde_json::from_str(job_arg) {
        Ok(spec) => spec,
        Err(e) => {
            error!(error = %e, "Invalid job argument");
            return JobOutcome::failure(format!("invalid job argument: {}", e));
        }
    };

    match run_job(spec).await {
        Ok(payload) => JobOutcome::success(payload),
        Err(e) => {
            error!(error = %e, "Job failed");
            JobOutcome::failure(e.to_string())
        }
    }
}
