//! JobDaemon - recurring subprocess job server
//!
//! CLI entry point: `jd serve` runs the server, every other subcommand sends
//! one command to a running server and prints the reply.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use jobdaemon::cli::{Cli, Command};
use jobdaemon::config::Config;
use jobdaemon::jobs::JobManager;
use jobdaemon::protocol::JobClient;
use jobdaemon::server::Server;
use jobdaemon::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // Server and one-shot clients share the file, so append rather than truncate
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("jobdaemon.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let addr = cli.addr.clone().unwrap_or_else(|| config.server.addr());
    info!(%addr, wire_format = ?config.protocol.wire_format, "JobDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    let Some(command) = cli.command else {
        debug!("main: no command specified");
        eprintln!("No command given, see `jd --help`");
        return Ok(());
    };

    let client = JobClient::new(addr.clone())
        .with_codec(config.codec())
        .with_timeout(Duration::from_millis(config.client.timeout_ms))
        .with_max_frame_size(config.protocol.max_frame_bytes);

    let reply = match command {
        Command::Serve => {
            debug!("main: matched Serve command");
            return cmd_serve(&config, &addr).await;
        }
        Command::Add {
            name,
            file,
            launch,
            interval,
        } => {
            debug!(%name, ?file, %launch, interval, "main: matched Add command");
            let (filename, contents) = read_upload(&file)?;
            client.add(&name, &filename, &launch, interval, &contents).await
        }
        Command::Remove { name } => {
            debug!(%name, "main: matched Remove command");
            client.remove(&name).await
        }
        Command::Start { name } => {
            debug!(%name, "main: matched Start command");
            client.start(&name).await
        }
        Command::Stop { name } => {
            debug!(%name, "main: matched Stop command");
            client.stop(&name).await
        }
        Command::List => {
            debug!("main: matched List command");
            client.list().await
        }
        Command::Get { name } => {
            debug!(%name, "main: matched Get command");
            client.get(&name).await
        }
        Command::Shutdown => {
            debug!("main: matched Shutdown command");
            client.shutdown().await
        }
    }
    .with_context(|| format!("Request to {} failed", client.addr()))?;

    println!("{}", reply.display());
    Ok(())
}

/// Read a local file for upload, returning its bare file name and contents
fn read_upload(path: &Path) -> Result<(String, String)> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| eyre::eyre!("{} has no file name", path.display()))?;
    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok((filename, contents))
}

async fn cmd_serve(config: &Config, addr: &str) -> Result<()> {
    debug!(%addr, "cmd_serve: called");

    let state = StateManager::spawn(&config.storage.registry_file).context("Failed to open job registry")?;
    let manager = Arc::new(JobManager::new(config.job_manager_config(), state.clone()));

    manager.resume_running().await.context("Failed to resume jobs")?;

    let server = Server::bind(addr, Arc::clone(&manager), config.codec(), config.protocol.max_frame_bytes)
        .await?
        .with_drain_timeout(Duration::from_millis(config.scheduler.shutdown_timeout_ms));
    let local_addr = server.local_addr()?;
    println!("Сервер запущен на {}", local_addr);

    let token = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    server.run().await?;
    state.shutdown().await;
    info!("JobDaemon stopped");
    Ok(())
}
