//! JobDaemon - recurring subprocess job server
//!
//! Remote clients register named jobs (a source file plus a shell command)
//! that the server runs on a fixed interval, keeping the most recent output.
//! Clients talk to the server over TCP using length-prefixed frames.
//!
//! # Modules
//!
//! - [`protocol`] - Frame encoding, command codec, and the TCP client
//! - [`state`] - Registry actor that owns the persisted job map
//! - [`jobs`] - Job manager, per-job scheduler loop, and subprocess runner
//! - [`server`] - Connection server driving the job manager
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod jobs;
pub mod protocol;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use domain::{Job, JobStatus};
pub use jobs::{JobLoopResult, JobManager, JobManagerConfig};
pub use protocol::{Command, CommandCodec, CodecError, FrameError, JobClient, Reply, WireFormat};
pub use server::Server;
pub use state::{StateError, StateManager, StateResponse};
