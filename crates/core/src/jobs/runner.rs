use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{JobError, JobKind, JobOutcome, JobSpec};
use super::worker::run_job;
use crate::config::{JobMode, JobsConfig};
use crate::metrics;

/// How long a worker that already reported gets to exit before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// A launched job. Await [`JobHandle::wait`] for its result.
#[derive(Debug)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: JobKind,
    result: oneshot::Receiver<Result<Value, JobError>>,
}

impl JobHandle {
    pub async fn wait(self) -> Result<Value, JobError> {
        self.result.await.unwrap_or(Err(JobError::Cancelled))
    }
}

/// Starts isolated jobs and tracks the live ones.
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Start a job. Fails with [`JobError::AlreadyRunning`] while a job of
    /// the same kind is live.
    fn launch(&self, spec: JobSpec) -> Result<JobHandle, JobError>;

    fn is_running(&self, kind: JobKind) -> bool;

    /// Kill every live job and wait for it to go away.
    async fn terminate_all(&self);
}

/// Build the launcher selected by `jobs.mode`.
pub fn create_job_launcher(config: &JobsConfig) -> Result<Arc<dyn JobLauncher>, JobError> {
    match config.mode {
        JobMode::Process => Ok(Arc::new(ProcessJobRunner::from_config(config)?)),
        JobMode::Inline => Ok(Arc::new(InlineJobRunner::new())),
    }
}

struct RunningJob {
    id: Uuid,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Live jobs by kind.
#[derive(Clone, Default)]
struct ActiveJobs(Arc<Mutex<HashMap<JobKind, RunningJob>>>);

impl ActiveJobs {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobKind, RunningJob>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contains(&self, kind: JobKind) -> bool {
        self.lock().contains_key(&kind)
    }

    /// Forget a finished job, unless a newer job of the same kind replaced it.
    fn finish(&self, kind: JobKind, id: Uuid) {
        let mut active = self.lock();
        if active.get(&kind).map(|job| job.id) == Some(id) {
            active.remove(&kind);
        }
    }

    fn drain(&self) -> Vec<RunningJob> {
        self.lock().drain().map(|(_, job)| job).collect()
    }
}

fn record_result(kind: JobKind, id: Uuid, result: &Result<Value, JobError>) {
    let label = match result {
        Ok(_) => "success",
        Err(e) => e.label(),
    };
    metrics::JOB_RUNS
        .with_label_values(&[kind.as_str(), label])
        .inc();
    match result {
        Ok(_) => info!(job_id = %id, kind = %kind, "Job completed"),
        Err(JobError::Cancelled) => info!(job_id = %id, kind = %kind, "Job cancelled"),
        Err(e) => error!(job_id = %id, kind = %kind, error = %e, "Job failed"),
    }
}

/// Runs each job in a separate worker process.
///
/// The worker is `program` with `args` followed by the JSON-encoded
/// [`JobSpec`]. It must print one [`JobOutcome`] line on stdout.
pub struct ProcessJobRunner {
    program: PathBuf,
    args: Vec<String>,
    poll_interval: Duration,
    active: ActiveJobs,
}

impl ProcessJobRunner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, poll_interval: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            poll_interval,
            active: ActiveJobs::default(),
        }
    }

    /// Re-execute `jobs.worker_program` (default: the current executable)
    /// with the `worker` subcommand.
    pub fn from_config(config: &JobsConfig) -> Result<Self, JobError> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe().map_err(JobError::Spawn)?,
        };
        Ok(Self::new(
            program,
            vec!["worker".to_string()],
            Duration::from_millis(config.poll_interval_ms.max(1)),
        ))
    }
}

#[async_trait]
impl JobLauncher for ProcessJobRunner {
    fn launch(&self, spec: JobSpec) -> Result<JobHandle, JobError> {
        let kind = spec.kind();
        let job_arg = serde_json::to_string(&spec).map_err(|e| JobError::Protocol(e.to_string()))?;

        let mut active = self.active.lock();
        if active.contains_key(&kind) {
            return Err(JobError::AlreadyRunning(kind));
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(job_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(JobError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JobError::Protocol("worker stdout unavailable".to_string()))?;

        let id = Uuid::new_v4();
        let (result_tx, result_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let registry = self.active.clone();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let result = watch_worker(child, stdout, cancel_rx, poll_interval).await;
            registry.finish(kind, id);
            record_result(kind, id, &result);
            let _ = result_tx.send(result);
        });

        active.insert(
            kind,
            RunningJob {
                id,
                cancel: Some(cancel_tx),
                task,
            },
        );
        info!(job_id = %id, kind = %kind, program = %self.program.display(), "Started worker process");

        Ok(JobHandle {
            id,
            kind,
            result: result_rx,
        })
    }

    fn is_running(&self, kind: JobKind) -> bool {
        self.active.contains(kind)
    }

    async fn terminate_all(&self) {
        for mut job in self.active.drain() {
            debug!(job_id = %job.id, "Terminating worker process");
            if let Some(cancel) = job.cancel.take() {
                let _ = cancel.send(());
            }
            if let Err(e) = job.task.await {
                warn!(error = %e, "Worker watcher ended abnormally");
            }
        }
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

/// Wait for the worker's result line while keeping an eye on the process.
///
/// A process that exits without printing a result is reported as crashed.
async fn watch_worker(
    mut child: Child,
    stdout: ChildStdout,
    mut cancel_rx: oneshot::Receiver<()>,
    poll_interval: Duration,
) -> Result<Value, JobError> {
    let mut lines = BufReader::new(stdout).lines();
    let mut outcome = None;
    let mut exited = false;

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill worker process");
                }
                return Err(JobError::Cancelled);
            }
            read = tokio::time::timeout(poll_interval, lines.next_line()) => match read {
                Ok(Ok(Some(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JobOutcome>(line) {
                        Ok(parsed) => {
                            outcome = Some(parsed.into_result());
                            break;
                        }
                        Err(_) => debug!(line, "Ignoring non-protocol worker output"),
                    }
                }
                Ok(Ok(None)) => break,
                Ok(Err(e)) => {
                    outcome = Some(Err(JobError::Protocol(e.to_string())));
                    break;
                }
                Err(_) => {
                    // Give an exited worker one more interval to flush.
                    if exited {
                        break;
                    }
                    exited = matches!(child.try_wait(), Ok(Some(_)));
                }
            }
        }
    }

    let status = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to reap worker process");
            None
        }
        Err(_) => {
            warn!("Worker did not exit after reporting; killing it");
            let _ = child.kill().await;
            None
        }
    };

    outcome.unwrap_or_else(|| {
        Err(JobError::Crashed {
            exit: describe_exit(status),
        })
    })
}

/// Runs jobs on a task inside the current process.
///
/// Same contract as [`ProcessJobRunner`] without the isolation.
#[derive(Clone, Default)]
pub struct InlineJobRunner {
    active: ActiveJobs,
}

impl InlineJobRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLauncher for InlineJobRunner {
    fn launch(&self, spec: JobSpec) -> Result<JobHandle, JobError> {
        let kind = spec.kind();
        let mut active = self.active.lock();
        if active.contains_key(&kind) {
            return Err(JobError::AlreadyRunning(kind));
        }

        let id = Uuid::new_v4();
        let (result_tx, result_rx) = oneshot::channel();
        let registry = self.active.clone();
        let task = tokio::spawn(async move {
            let result = run_job(spec).await;
            registry.finish(kind, id);
            record_result(kind, id, &result);
            let _ = result_tx.send(result);
        });

        active.insert(
            kind,
            RunningJob {
                id,
                cancel: None,
                task,
            },
        );
        debug!(job_id = %id, kind = %kind, "Started inline job");

        Ok(JobHandle {
            id,
            kind,
            result: result_rx,
        })
    }

    fn is_running(&self, kind: JobKind) -> bool {
        self.active.contains(kind)
    }

    async fn terminate_all(&self) {
        for job in self.active.drain() {
            job.task.abort();
            let _ = job.task.await;
        }
    }
}
