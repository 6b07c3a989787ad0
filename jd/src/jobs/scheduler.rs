//! Per-job scheduler loop
//!
//! One loop runs per running job. Each iteration executes the job's command
//! to completion, records its output, then waits for the interval. The loop
//! checks its cancellation token and the job's registry entry only at
//! iteration boundaries; the interval wait also ends early on cancellation.
//! A subprocess that is already running is never interrupted.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::state::StateManager;

use super::runner::JobRunner;

/// Why a job loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLoopResult {
    /// The job's status was no longer running
    Stopped { name: String, iterations: u64 },
    /// The job disappeared from the registry
    Removed { name: String, iterations: u64 },
    /// The loop's token was cancelled (stop, re-add, or shutdown)
    Cancelled { name: String, iterations: u64 },
    /// The registry could not be reached
    Failed { name: String, reason: String },
}

impl JobLoopResult {
    pub fn name(&self) -> &str {
        match self {
            Self::Stopped { name, .. }
            | Self::Removed { name, .. }
            | Self::Cancelled { name, .. }
            | Self::Failed { name, .. } => name,
        }
    }
}

/// Run one job until it is stopped, removed, or cancelled
pub async fn run_job_loop(
    name: String,
    state: StateManager,
    runner: JobRunner,
    job_dir: PathBuf,
    token: CancellationToken,
) -> JobLoopResult {
    debug!(%name, ?job_dir, "run_job_loop: called");
    info!(%name, "Job loop started");
    let mut iterations = 0u64;

    loop {
        if token.is_cancelled() {
            debug!(%name, iterations, "run_job_loop: token cancelled");
            return JobLoopResult::Cancelled { name, iterations };
        }

        let job = match state.get_job(&name).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(%name, iterations, "run_job_loop: job removed");
                return JobLoopResult::Removed { name, iterations };
            }
            Err(e) => {
                warn!(%name, error = %e, "Job loop lost the registry");
                return JobLoopResult::Failed {
                    name,
                    reason: e.to_string(),
                };
            }
        };

        if !job.is_running() {
            debug!(%name, status = %job.status, "run_job_loop: job no longer running");
            return JobLoopResult::Stopped { name, iterations };
        }

        let output = runner.run(&job.launch_command, &job_dir).await;
        iterations += 1;
        debug!(%name, iterations, output_len = output.len(), "run_job_loop: iteration finished");

        match state.record_output(&name, output).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%name, iterations, "run_job_loop: job removed during execution");
                return JobLoopResult::Removed { name, iterations };
            }
            Err(e) => {
                warn!(%name, error = %e, "Failed to record job output");
                return JobLoopResult::Failed {
                    name,
                    reason: e.to_string(),
                };
            }
        }

        tokio::select! {
            _ = token.cancelled() => {
                debug!(%name, iterations, "run_job_loop: cancelled during interval wait");
                return JobLoopResult::Cancelled { name, iterations };
            }
            _ = tokio::time::sleep(job.interval()) => {}
        }
    }
}
