//! Emulator settings

use crate::core::logger::LogFormat;
use crate::core::session::DEFAULT_REQUEST_TIMEOUT;
use crate::core::rules::DEFAULT_SCENARIO;
use crate::core::task::TaskSettings;
use crate::core::transport::TransportSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Read or write failed
    #[error("Config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Serialization failed
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Emulator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Scenario files merged at start-up, in order
    pub scenario_files: Vec<PathBuf>,
    /// Session defaults
    pub session: SessionConfig,
    /// Transport settings
    pub transport: TransportSettings,
    /// Task timing and memory
    pub tasks: TaskSettings,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl EmulatorConfig {
    /// Load from the platform config dir, defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_file().ok_or(ConfigError::NoConfigDir)?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Session defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial scenario
    pub scenario: String,
    /// Response delay in milliseconds
    pub delay_ms: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scenario: DEFAULT_SCENARIO.to_string(),
            delay_ms: 0,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

/// Diagnostic log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogOutput,
    /// Log file instead of stderr
    pub file: Option<PathBuf>,
    /// Wire traffic log
    pub traffic_log: Option<PathBuf>,
    /// Wire traffic log format
    pub traffic_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogOutput::Text,
            file: None,
            traffic_log: None,
            traffic_format: LogFormat::Text,
        }
    }
}
