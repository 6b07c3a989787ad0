//! Job domain type
//!
//! The registry stores jobs keyed by name, so the name itself is not part of
//! the persisted record.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::time::Duration;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Scheduler loop is expected to be iterating
    #[default]
    Running,
    /// Loop exits at its next iteration boundary
    Stopped,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persisted descriptor of a registered job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Source file materialized in the job's directory
    pub filename: String,

    /// Shell command used to execute the job
    #[serde(rename = "applaunch")]
    pub launch_command: String,

    /// Delay between successive executions in milliseconds
    #[serde(rename = "interval")]
    pub interval_ms: u64,

    /// Current status
    pub status: JobStatus,

    /// Captured output of the most recent execution
    #[serde(rename = "output", default)]
    pub last_output: String,
}

impl Job {
    /// Create a new running job with no output yet
    pub fn new(filename: impl Into<String>, launch_command: impl Into<String>, interval_ms: u64) -> Self {
        Self {
            filename: filename.into(),
            launch_command: launch_command.into(),
            interval_ms,
            status: JobStatus::Running,
            last_output: String::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }
}

/// Check that a name is usable as a single directory or file name
///
/// Rejects empty names, separators, and `.`/`..` so a job can never escape
/// its own directory under the apps dir.
pub fn is_plain_component(name: &str) -> bool {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!((components.next(), components.next()), (Some(Component::Normal(_)), None))
}
