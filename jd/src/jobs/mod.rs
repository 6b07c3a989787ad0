//! Job execution
//!
//! - [`manager`] - add/remove/start/stop/list/get and the loop task table
//! - [`scheduler`] - the per-job loop
//! - [`runner`] - shell subprocess execution

pub mod manager;
pub mod runner;
pub mod scheduler;

pub use manager::{JobManager, JobManagerConfig};
pub use runner::JobRunner;
pub use scheduler::{JobLoopResult, run_job_loop};
