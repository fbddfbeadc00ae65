//! Configuration system for converge
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/converge/config.{CONVERGE_ENV}.json
//! 3. Default values
//!
//! Where CONVERGE_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ```no_run
//! use converge::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! println!("Engine: {} every {}ms", config.engine_url, config.poll_interval_ms);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - CONVERGE_ENGINE_URL (falls back to DOCKER_HOST)
//! - CONVERGE_POLL_INTERVAL_MS
//! - CONVERGE_OUTPUT

use crate::progress::PollOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// How progress is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Live bars, one line per unit
    #[default]
    Terminal,
    /// One JSON object per event
    Json,
    /// No progress output, only the outcome
    Quiet,
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal => write!(f, "terminal"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

impl std::str::FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" => Ok(Self::Terminal),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown output mode: {}",
                s
            ))),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine API base URL
    #[serde(default = "default_engine_url")]
    pub engine_url: String,

    /// Pause between polls, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Stabilization window when the service does not set one, in seconds
    #[serde(default = "default_monitor")]
    pub default_monitor_secs: u64,

    /// Per-request timeout for engine queries, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Progress rendering
    #[serde(default)]
    pub output: OutputMode,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:2375".to_string()
}

fn default_poll_interval() -> u64 {
    200
}

fn default_monitor() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine_url: default_engine_url(),
            poll_interval_ms: default_poll_interval(),
            default_monitor_secs: default_monitor(),
            request_timeout_secs: default_request_timeout(),
            output: OutputMode::default(),
            debug: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/converge/config.{CONVERGE_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("CONVERGE_ENV").unwrap_or_else(|_| "production".to_string());

        if let Some(config_dir) = Self::config_dir() {
            let config_path = config_dir.join(format!("config.{}.json", env));

            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::debug!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("CONVERGE_ENGINE_URL") {
            self.engine_url = url;
        } else if let Ok(host) = std::env::var("DOCKER_HOST") {
            // unix sockets cannot be reached over HTTP; keep the configured URL
            if !host.starts_with("unix://") && !host.starts_with("npipe://") {
                self.engine_url = host;
            }
        }

        if let Ok(interval) = std::env::var("CONVERGE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = interval.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CONVERGE_POLL_INTERVAL_MS must be a number, got {}",
                    interval
                ))
            })?;
        }

        if let Ok(output) = std::env::var("CONVERGE_OUTPUT") {
            self.output = output.parse()?;
        }

        Ok(())
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "engine_url cannot be empty".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Polling knobs for a progress session
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            default_monitor: Duration::from_secs(self.default_monitor_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("converge"))
    }
}
