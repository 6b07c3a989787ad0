//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// JobDaemon - recurring subprocess job server
#[derive(Parser)]
#[command(
    name = "jd",
    about = "Run named shell jobs on a fixed interval and query their output over TCP",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Server address, overrides server.host/server.port from config
    #[arg(short, long, global = true, value_name = "HOST:PORT")]
    pub addr: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the job server in the foreground
    Serve,

    /// Upload a file and register a job that runs a command next to it
    Add {
        /// Job name
        name: String,

        /// Local file to upload into the job directory
        file: PathBuf,

        /// Shell command run in the job directory
        launch: String,

        /// Milliseconds between the end of one run and the start of the next
        interval: u64,
    },

    /// Delete a job and its directory
    Remove {
        /// Job name
        name: String,
    },

    /// Resume a stopped job
    Start {
        /// Job name
        name: String,
    },

    /// Pause a running job
    Stop {
        /// Job name
        name: String,
    },

    /// List registered job names
    List,

    /// Show the latest output of a job
    Get {
        /// Job name
        name: String,
    },

    /// Ask the server to shut down
    Shutdown,
}
