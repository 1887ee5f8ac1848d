//! Configuration loading and management
//!
//! Host configuration is loaded from `~/.config/capturr/config.toml`. The
//! per-device profile (graph, token, formatting) is not part of this file; it
//! lives in the database, see [`crate::profile`].
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/capturr/` (~/.config/capturr/)
//! - Data: `$XDG_DATA_HOME/capturr/` (~/.local/share/capturr/)
//! - State/Logs: `$XDG_STATE_HOME/capturr/` (~/.local/state/capturr/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Sync orchestrator tuning
    #[serde(default)]
    pub sync: SyncConfig,

    /// Reachability probing
    #[serde(default)]
    pub reachability: ReachabilityConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,

    /// Level override for the sync orchestrator (`capturr_core::sync`)
    #[serde(default)]
    pub sync_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            sync_level: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Sync orchestrator configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between background ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Grace period before an `in_progress` record is treated as abandoned
    #[serde(default = "default_min_retry_gap")]
    pub min_retry_gap_secs: u64,

    /// Records dispatched per tick. 1 serializes all outbound calls.
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Append API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            min_retry_gap_secs: default_min_retry_gap(),
            max_concurrent_sends: default_max_concurrent_sends(),
            request_timeout_secs: default_request_timeout(),
            api_base_url: default_api_base_url(),
        }
    }
}

impl SyncConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(Error::Config(
                "sync.tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_sends == 0 {
            return Err(Error::Config(
                "sync.max_concurrent_sends must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "sync.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(Error::Config("sync.api_base_url is required".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn min_retry_gap(&self) -> Duration {
        Duration::from_secs(self.min_retry_gap_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_tick_interval() -> u64 {
    10
}

fn default_min_retry_gap() -> u64 {
    5
}

fn default_max_concurrent_sends() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_base_url() -> String {
    "https://append-api.roamresearch.com".to_string()
}

/// Reachability probe configuration
///
/// Without a `probe_url` the signal stays "reachable" unless the host updates it.
#[derive(Debug, Deserialize, Clone)]
pub struct ReachabilityConfig {
    /// URL polled to detect connectivity
    pub probe_url: Option<String>,

    /// Seconds between probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: default_probe_interval(),
        }
    }
}

impl ReachabilityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

fn default_probe_interval() -> u64 {
    15
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.sync.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/capturr/config.toml` (~/.config/capturr/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("capturr").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/capturr/` (~/.local/share/capturr/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("capturr")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/capturr/` (~/.local/state/capturr/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("capturr")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/capturr/captures.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("captures.db")
    }

    /// Returns the device identity file path
    ///
    /// `$XDG_DATA_HOME/capturr/device-id`
    pub fn device_id_path() -> PathBuf {
        Self::data_dir().join("device-id")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// For binaries that want explicit, stable path behavior before invoking
    /// other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
