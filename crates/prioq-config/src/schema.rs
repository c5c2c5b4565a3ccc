//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Shared-secret authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Keys accepted in the `api_key` request field.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Persistent store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Task store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file, `~` is expanded. Required for the sqlite backend.
    #[serde(default = "default_store_path")]
    pub path: Option<String>,

    /// Tasks whose current status is older than this are purged.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl StoreConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            retention_secs: default_retention(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_store_path() -> Option<String> {
    Some("~/.prioq/queue.db".to_string())
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

fn default_purge_interval() -> u64 {
    60
}

/// Dispatch and dequeue tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Buffered arrival signals before the dispatcher falls back to a rescan.
    #[serde(default = "default_notifier_capacity")]
    pub notifier_capacity: usize,

    /// Used when a dequeue request omits its timeout or sends 0.
    #[serde(default = "default_dequeue_timeout")]
    pub default_dequeue_timeout_secs: u64,

    #[serde(default = "default_max_dequeue_timeout")]
    pub max_dequeue_timeout_secs: u64,
}

impl QueueConfig {
    /// Resolve a requested dequeue timeout in seconds.
    pub fn dequeue_timeout(&self, requested_secs: Option<u64>) -> Duration {
        let secs = match requested_secs {
            None | Some(0) => self.default_dequeue_timeout_secs,
            Some(secs) => secs.min(self.max_dequeue_timeout_secs),
        };
        Duration::from_secs(secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            notifier_capacity: default_notifier_capacity(),
            default_dequeue_timeout_secs: default_dequeue_timeout(),
            max_dequeue_timeout_secs: default_max_dequeue_timeout(),
        }
    }
}

fn default_notifier_capacity() -> usize {
    1024
}

fn default_dequeue_timeout() -> u64 {
    10
}

fn default_max_dequeue_timeout() -> u64 {
    300
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Directory for daily rolling log files.
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
