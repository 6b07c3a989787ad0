//! JobDaemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::jobs::JobManagerConfig;
use crate::jobs::runner::DEFAULT_SHELL;
use crate::protocol::{CommandCodec, DEFAULT_DELIMITER, DEFAULT_MAX_FRAME_SIZE, WireFormat};

/// Base directory for jobdaemon data files
fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobdaemon")
}

/// Main JobDaemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Listening address
    pub server: ServerConfig,

    /// Registry file and job directories
    pub storage: StorageConfig,

    /// Wire format settings, shared by server and client
    pub protocol: ProtocolConfig,

    /// Job loop settings
    pub scheduler: SchedulerConfig,

    /// One-shot client settings
    pub client: ClientConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(eyre::eyre!("server.port must be non-zero"));
        }
        if self.protocol.delimiter.chars().count() != 1 {
            return Err(eyre::eyre!(
                "protocol.delimiter must be exactly one character, got '{}'",
                self.protocol.delimiter
            ));
        }
        if self.protocol.max_frame_bytes == 0 {
            return Err(eyre::eyre!("protocol.max-frame-bytes must be non-zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .jobdaemon.yml
        let local_config = PathBuf::from(".jobdaemon.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/jobdaemon/jobdaemon.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("jobdaemon").join("jobdaemon.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Command codec for the configured wire format
    pub fn codec(&self) -> CommandCodec {
        CommandCodec::new(self.protocol.wire_format, self.protocol.delimiter_char())
    }

    pub fn job_manager_config(&self) -> JobManagerConfig {
        JobManagerConfig {
            apps_dir: self.storage.apps_dir.clone(),
            shell: self.scheduler.shell.clone(),
            shutdown_timeout: Duration::from_millis(self.scheduler.shutdown_timeout_ms),
        }
    }
}

/// Listening address
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding or connecting
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding the job registry
    #[serde(rename = "registry-file")]
    pub registry_file: PathBuf,

    /// Directory with one subdirectory per job
    #[serde(rename = "apps-dir")]
    pub apps_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            registry_file: base.join("apps.json"),
            apps_dir: base.join("apps"),
        }
    }
}

/// Wire protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Command payload encoding
    #[serde(rename = "wire-format")]
    pub wire_format: WireFormat,

    /// Field delimiter for the delimited format
    pub delimiter: String,

    /// Largest frame accepted from a peer
    #[serde(rename = "max-frame-bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::Fields,
            delimiter: DEFAULT_DELIMITER.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ProtocolConfig {
    /// The delimiter as a character (falls back to the default when unset)
    pub fn delimiter_char(&self) -> char {
        self.delimiter.chars().next().unwrap_or(DEFAULT_DELIMITER)
    }
}

/// Job loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Shell that interprets launch commands
    pub shell: String,

    /// How long shutdown waits for loops in milliseconds
    #[serde(rename = "shutdown-timeout-ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect/read/write timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}
