//! TOML-based configuration for connecting to a receiver.
//!
//! Example file:
//!
//! ```toml
//! host = "192.168.1.40"
//! port = 50000
//! request_timeout_ms = 3000
//! request_spacing_ms = 200
//! retry_attempts = 2
//! heartbeat_interval_ms = 5000
//! duplicate_policy = "reject"
//! log_level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]`, so a file
//! containing only `host = "..."` is complete.  A missing file yields
//! [`ClientConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::dispatch::DispatchConfig;
use crate::infrastructure::pending::DuplicatePolicy;
use crate::infrastructure::session::SessionConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Connection and behaviour settings for one receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Receiver host name or IP address.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP control port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a request waits for its response.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Minimum gap between two frames written to the device.
    #[serde(default = "default_request_spacing_ms")]
    pub request_spacing_ms: u64,
    /// Total attempts for a request that times out (1 = no retry).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Idle interval before a keep-alive query is sent.  `0` disables it.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// What to do when a request for an in-flight zone/command is issued.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    50000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_request_spacing_ms() -> u64 {
    200
}
fn default_retry_attempts() -> u32 {
    2
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            request_spacing_ms: default_request_spacing_ms(),
            retry_attempts: default_retry_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            duplicate_policy: DuplicatePolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// `host:port`, ready for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Runtime settings for [`crate::Session`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            request_spacing: Duration::from_millis(self.request_spacing_ms),
            heartbeat_interval: (self.heartbeat_interval_ms > 0)
                .then(|| Duration::from_millis(self.heartbeat_interval_ms)),
            duplicate_policy: self.duplicate_policy,
            ..SessionConfig::default()
        }
    }

    /// Runtime settings for [`crate::Dispatcher`].
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry_attempts: self.retry_attempts.max(1),
        }
    }
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Loads a [`ClientConfig`] from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
