//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/capsync/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/capsync/` (~/.config/capsync/)
//! - Data: `$XDG_DATA_HOME/capsync/` (~/.local/share/capsync/)
//! - State/Logs: `$XDG_STATE_HOME/capsync/` (~/.local/state/capsync/)
//!
//! Backend credentials are deliberately *not* part of this file: `apiUrl` and
//! `authToken` live in the shared state store so every execution context sees
//! the same login.

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
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Caption acquisition tuning
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Page agent observer tuning
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Remote backend client settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Caption acquisition configuration
///
/// Completion is confirmed by polling the shared store, so the bound and the
/// interval are configuration rather than constants.
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// Milliseconds between store polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Store polls before giving up with a timeout
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,

    /// Milliseconds to wait for a broadcast ack before directed fallback
    #[serde(default = "default_ack_grace_ms")]
    pub ack_grace_ms: u64,

    /// Tab URL substring for collect requests when the video's platform
    /// cannot be told from the current video or the id itself
    #[serde(default = "default_site_pattern")]
    pub site_pattern: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            ack_grace_ms: default_ack_grace_ms(),
            site_pattern: default_site_pattern(),
        }
    }
}

impl AcquisitionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ack_grace(&self) -> Duration {
        Duration::from_millis(self.ack_grace_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_attempts() -> u32 {
    10
}

fn default_ack_grace_ms() -> u64 {
    1500
}

fn default_site_pattern() -> String {
    "youtube.com".to_string()
}

/// Navigation observer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ObserverConfig {
    /// Milliseconds between direct location reads
    #[serde(default = "default_location_poll_ms")]
    pub location_poll_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            location_poll_ms: default_location_poll_ms(),
        }
    }
}

impl ObserverConfig {
    pub fn location_poll_interval(&self) -> Duration {
        Duration::from_millis(self.location_poll_ms)
    }
}

fn default_location_poll_ms() -> u64 {
    1000
}

/// Remote backend client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// HTTP request timeout in seconds (not applied to streaming bodies)
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Authorization scheme placed before the token ("Token" or "Bearer")
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout(),
            auth_scheme: default_auth_scheme(),
        }
    }
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_auth_scheme() -> String {
    "Token".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files; defaults to the XDG state directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(Config::state_dir)
    }
}

fn default_log_level() -> String {
    "info".to_string()
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

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.poll_interval_ms == 0 {
            return Err(Error::Config(
                "acquisition.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.acquisition.max_poll_attempts == 0 {
            return Err(Error::Config(
                "acquisition.max_poll_attempts must be greater than zero".to_string(),
            ));
        }
        if self.acquisition.site_pattern.trim().is_empty() {
            return Err(Error::Config(
                "acquisition.site_pattern must not be empty".to_string(),
            ));
        }
        if self.observer.location_poll_ms == 0 {
            return Err(Error::Config(
                "observer.location_poll_ms must be greater than zero".to_string(),
            ));
        }
        match self.backend.auth_scheme.as_str() {
            "Token" | "Bearer" => Ok(()),
            other => Err(Error::Config(format!(
                "backend.auth_scheme must be \"Token\" or \"Bearer\", got {:?}",
                other
            ))),
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/capsync/config.toml` (~/.config/capsync/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("capsync").join("config.toml")
    }

    /// Returns the data directory path (for the state store)
    ///
    /// `$XDG_DATA_HOME/capsync/` (~/.local/share/capsync/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("capsync")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/capsync/` (~/.local/state/capsync/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("capsync")
    }

    /// Returns the shared state store file path
    ///
    /// `$XDG_DATA_HOME/capsync/state.db` (~/.local/share/capsync/state.db)
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }
}
