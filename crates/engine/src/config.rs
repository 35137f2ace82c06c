//! Configuration management for nbexec.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/nbexec/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("kernel program not found: {0}")]
    InvalidProgram(String),

    #[error("startup_timeout_secs must be between 1 and 600, got {0}")]
    InvalidStartupTimeout(u64),

    #[error("shutdown_grace_ms must be at most 10000, got {0}")]
    InvalidShutdownGrace(u64),

    #[error("interrupt_grace_ms must be at most 60000, got {0}")]
    InvalidInterruptGrace(u64),

    #[error("keep_len must be greater than 0, got {0}")]
    InvalidKeepLen(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for nbexec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Interpreter backend settings.
    pub kernel: KernelConfig,

    /// Cell execution settings.
    pub execution: ExecutionConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Interpreter backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    /// Interpreter executable, absolute or looked up in PATH.
    pub program: String,

    /// Extra interpreter arguments placed before the driver.
    pub args: Vec<String>,

    /// Working directory for the backend. Unset means inherit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the backend.
    pub env: BTreeMap<String, String>,

    /// How long to wait for the backend to report ready.
    pub startup_timeout_secs: u64,

    /// How long an orderly shutdown may take before the backend is killed.
    pub shutdown_grace_ms: u64,

    /// How long to wait for an interrupted cell to wind down after a timeout.
    pub interrupt_grace_ms: u64,
}

/// Cell execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Timeout applied when a run does not pass one (0 = wait forever).
    pub default_timeout_secs: u64,

    /// Maximum characters kept per output item.
    pub keep_len: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            startup_timeout_secs: 60,
            shutdown_grace_ms: 200,
            interrupt_grace_ms: 1000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600, // 10 minutes
            keep_len: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl KernelConfig {
    /// Startup window as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Shutdown grace period as a duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Interrupt grace period as a duration.
    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    /// Resolve the interpreter to a path.
    pub fn resolve_program(&self) -> Result<PathBuf, ConfigError> {
        let path = Path::new(&self.program);
        if path.is_absolute() {
            if path.exists() {
                Ok(path.to_path_buf())
            } else {
                Err(ConfigError::InvalidProgram(self.program.clone()))
            }
        } else {
            which::which(&self.program).map_err(|_| ConfigError::InvalidProgram(self.program.clone()))
        }
    }
}

impl ExecutionConfig {
    /// The default per-cell timeout, `None` when unbounded.
    pub fn default_timeout(&self) -> Option<Duration> {
        match self.default_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nbexec")
        .join("config.toml")
}

/// Returns the default interpreter for the current platform.
fn default_program() -> String {
    if cfg!(windows) {
        "python.exe".to_string()
    } else {
        "python3".to_string()
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - NBEXEC_PYTHON: Override the interpreter program
    /// - NBEXEC_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - NBEXEC_TIMEOUT: Override the default cell timeout in seconds
    pub fn apply_env_overrides(&mut self) {
        if let Ok(program) = std::env::var("NBEXEC_PYTHON") {
            if !program.is_empty() {
                tracing::info!("Overriding kernel program from environment: {}", program);
                self.kernel.program = program;
            }
        }

        if let Ok(level) = std::env::var("NBEXEC_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }

        if let Ok(timeout) = std::env::var("NBEXEC_TIMEOUT") {
            if !timeout.is_empty() {
                match timeout.parse::<u64>() {
                    Ok(secs) => {
                        tracing::info!("Overriding default timeout from environment: {}s", secs);
                        self.execution.default_timeout_secs = secs;
                    }
                    Err(e) => {
                        tracing::warn!(value = %timeout, error = %e, "Ignoring invalid NBEXEC_TIMEOUT");
                    }
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let startup = self.kernel.startup_timeout_secs;
        if !(1..=600).contains(&startup) {
            return Err(ConfigError::InvalidStartupTimeout(startup));
        }

        if self.kernel.shutdown_grace_ms > 10_000 {
            return Err(ConfigError::InvalidShutdownGrace(self.kernel.shutdown_grace_ms));
        }

        if self.kernel.interrupt_grace_ms > 60_000 {
            return Err(ConfigError::InvalidInterruptGrace(self.kernel.interrupt_grace_ms));
        }

        if self.execution.keep_len == 0 {
            return Err(ConfigError::InvalidKeepLen(self.execution.keep_len));
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        self.kernel.resolve_program()?;

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
