//! Bootstrap configuration read from `beacon.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root bootstrap configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl BeaconConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.enabled && self.server.port == 0 {
            return Err("server.port must be > 0".to_string());
        }
        if self.storage.path.as_os_str().is_empty() {
            return Err("storage.path must not be empty".to_string());
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_server_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".beacon").join("beacon.db"))
        .unwrap_or_else(|| PathBuf::from("beacon.db"))
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file_prefix: default_log_prefix(),
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".beacon").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}

fn default_log_prefix() -> String {
    "beacon.log".to_string()
}

/// Timing of the process supervisor's stop/start cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Grace period granted to the notifying process after cancellation.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    /// Pause between stop and start during a restart.
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

fn default_shutdown_grace() -> u64 {
    500
}

fn default_settle_delay() -> u64 {
    100
}

impl SupervisorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
