//! Configuration management for the FileVault daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filevault/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound accepted for `protocol.max_payload_size` (16 GiB).
pub const MAX_PAYLOAD_SIZE_LIMIT: u64 = 16 * 1024 * 1024 * 1024;

/// Default TCP port, shared with the client.
pub const DEFAULT_PORT: u16 = 16239;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_connections must be between 1 and 10000, got {0}")]
    InvalidMaxConnections(usize),

    #[error("max_payload_size must be between 1 byte and 16 GiB, got {0}")]
    InvalidMaxPayloadSize(u64),

    #[error("bind_address must be a socket address like 0.0.0.0:16239, got {0}")]
    InvalidBindAddress(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the FileVault daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Where files and users live.
    pub storage: StorageConfig,

    /// Wire protocol limits.
    pub protocol: ProtocolConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily-rolling log files. Unset means stderr only.
    pub log_dir: Option<PathBuf>,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address and port to listen on.
    pub bind_address: String,

    /// Maximum number of connections served at once.
    pub max_connections: usize,

    /// Close a connection after this many idle seconds (0 = never).
    pub idle_timeout_secs: u64,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory all client paths are resolved under.
    pub root: PathBuf,

    /// JSON file holding users, password hashes and permissions.
    pub users_file: PathBuf,
}

/// Wire protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest payload accepted or sent, in bytes (default: 1 GiB).
    pub max_payload_size: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_connections: 64,
            idle_timeout_secs: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_data_dir().join("files"),
            users_file: crate::auth::default_users_path(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload_size: protocol::DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filevault")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filevault")
}

/// A configuration value taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    pub variable: &'static str,
    pub value: String,
}

impl EnvOverride {
    fn new(variable: &'static str, value: String) -> Self {
        Self { variable, value }
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEVAULT_BIND_ADDRESS: Override the listen address
    /// - FILEVAULT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEVAULT_STORAGE_ROOT: Override the storage root directory
    ///
    /// Returns the overrides that were applied. This runs before logging is
    /// set up (the log level may come from here), so the caller logs them.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverride> {
        let mut applied = Vec::new();

        if let Some(addr) = non_empty_env("FILEVAULT_BIND_ADDRESS") {
            self.server.bind_address = addr.clone();
            applied.push(EnvOverride::new("FILEVAULT_BIND_ADDRESS", addr));
        }

        if let Some(level) = non_empty_env("FILEVAULT_LOG_LEVEL") {
            self.daemon.log_level = level.clone();
            applied.push(EnvOverride::new("FILEVAULT_LOG_LEVEL", level));
        }

        if let Some(root) = non_empty_env("FILEVAULT_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(&root);
            applied.push(EnvOverride::new("FILEVAULT_STORAGE_ROOT", root));
        }

        applied
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections < 1 || self.server.max_connections > 10_000 {
            return Err(ConfigError::InvalidMaxConnections(
                self.server.max_connections,
            ));
        }

        let max_payload = self.protocol.max_payload_size;
        if max_payload == 0 || max_payload > MAX_PAYLOAD_SIZE_LIMIT {
            return Err(ConfigError::InvalidMaxPayloadSize(max_payload));
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

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

    /// The idle timeout, if one is configured.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        match self.server.idle_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
