//! Isolated execution of heavy jobs (bulk download, index build).
//!
//! The process runner re-executes a worker binary with the job as a JSON
//! argument and reads a single JSON result line from its stdout.

mod runner;
mod types;
mod worker;

pub use runner::{create_job_launcher, InlineJobRunner, JobHandle, JobLauncher, ProcessJobRunner};
pub use types::*;
pub use worker::{run_job, run_worker};
