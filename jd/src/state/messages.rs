//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Job, JobStatus};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
///
/// Each mutating command is one load, mutate, persist transaction.
#[derive(Debug)]
pub enum StateCommand {
    /// Insert or overwrite a job, returning the previous descriptor
    PutJob {
        name: String,
        job: Job,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    /// Delete a job, returning it if it existed
    RemoveJob {
        name: String,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    GetJob {
        name: String,
        reply: oneshot::Sender<StateResponse<Option<Job>>>,
    },
    /// Job names in registry order
    ListNames {
        reply: oneshot::Sender<StateResponse<Vec<String>>>,
    },
    /// Full copy of the registry
    Snapshot {
        reply: oneshot::Sender<StateResponse<Vec<(String, Job)>>>,
    },
    /// Set status to `to` only if the job exists with status `from`
    Transition {
        name: String,
        from: JobStatus,
        to: JobStatus,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    /// Store the latest output; replies false if the job no longer exists
    RecordOutput {
        name: String,
        output: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },

    // Shutdown
    Shutdown,
}
