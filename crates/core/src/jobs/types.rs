use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{BulkConfig, CacheConfig, RemoteConfig};

/// Kinds of heavy work that run as isolated jobs. At most one job of each
/// kind runs at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    BulkDownload,
    BuildPrintingIndex,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::BulkDownload => "bulk_download",
            JobKind::BuildPrintingIndex => "build_printing_index",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job and all of its arguments, passed to the worker as one JSON
/// argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobSpec {
    BulkDownload {
        cache: CacheConfig,
        remote: RemoteConfig,
        bulk: BulkConfig,
        force: bool,
    },
    BuildPrintingIndex {
        bulk_path: PathBuf,
        index_path: PathBuf,
    },
}

impl JobSpec {
    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::BulkDownload { .. } => JobKind::BulkDownload,
            JobSpec::BuildPrintingIndex { .. } => JobKind::BuildPrintingIndex,
        }
    }
}

/// The single line a worker prints on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn success(payload: Value) -> Self {
        Self {
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Value, JobError> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(JobError::Failed(
                self.error.unwrap_or_else(|| "Job failed".to_string()),
            ))
        }
    }
}

/// Errors reported by the job runner.
#[derive(Debug, Error)]
pub enum JobError {
    /// A job of the same kind is still running; try again later.
    #[error("A {0} job is already running")]
    AlreadyRunning(JobKind),

    #[error("Failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker went away without reporting a result.
    #[error("Worker exited without returning a result ({exit})")]
    Crashed { exit: String },

    /// The worker reported a failure.
    #[error("{0}")]
    Failed(String),

    #[error("Invalid worker output: {0}")]
    Protocol(String),

    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            JobError::AlreadyRunning(_) => "already_running",
            JobError::Spawn(_) => "spawn_failed",
            JobError::Crashed { .. } => "crashed",
            JobError::Failed(_) => "failed",
            JobError::Protocol(_) => "protocol_error",
            JobError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_serialization_is_tagged() {
        let spec = JobSpec::BuildPrintingIndex {
            bulk_path: PathBuf::from("/tmp/bulk.json"),
            index_path: PathBuf::from("/tmp/printings_v2.json"),
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["job"], "build_printing_index");

        let back: JobSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), JobKind::BuildPrintingIndex);
    }

    #[test]
    fn test_outcome_wire_format() {
        let ok = serde_json::to_string(&JobOutcome::success(json!({"n": 1}))).unwrap();
        assert_eq!(ok, r#"{"ok":true,"payload":{"n":1}}"#);

        let err = serde_json::to_string(&JobOutcome::failure("boom")).unwrap();
        assert_eq!(err, r#"{"ok":false,"error":"boom"}"#);
    }

    #[test]
    fn test_outcome_into_result() {
        let value = JobOutcome::success(json!(3)).into_result().unwrap();
        assert_eq!(value, json!(3));

        let err = JobOutcome::failure("no snapshot").into_result().unwrap_err();
        assert!(matches!(err, JobError::Failed(ref msg) if msg == "no snapshot"));

        let bare: JobOutcome = serde_json::from_str(r#"{"ok":false}"#).unwrap();
        assert!(matches!(bare.into_result(), Err(JobError::Failed(_))));
    }
}
