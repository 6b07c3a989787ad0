//! Domain types for JobDaemon
//!
//! A [`Job`] is the persisted descriptor of one recurring subprocess.

mod job;

pub use job::{Job, JobStatus, is_plain_component};
