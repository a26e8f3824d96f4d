//! Configuration for the device client
//!
//! Tuning knobs for the connection manager live in an optional TOML file.
//! Every field has a default, so an empty file (or no file) yields 1s/32s/20s
//! backoff, a 10s connect timeout, a 5s operation timeout, an unlimited
//! offline queue and 2 Hz draining.

use crate::connection::{BackoffPolicy, OverflowPolicy, QueueLimit};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main client configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub queue: QueueSection,
}

/// Connection section - timeouts and initial connect retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Broker port (default: 8883)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for one connect or disconnect handshake in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for handing one message to the transport in seconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// MQTT keep-alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Attempts made by the initial connect before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Pause between initial connect attempts in milliseconds
    #[serde(default = "default_connect_retry_delay")]
    pub connect_retry_delay_ms: u64,
    /// Pause between drained offline messages in milliseconds
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
    /// How long disconnect waits for queued messages to drain, in seconds
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,
}

fn default_port() -> u16 {
    8883
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_operation_timeout() -> u64 {
    5
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_delay() -> u64 {
    1000
}

fn default_drain_interval() -> u64 {
    500 // draining frequency of 2 Hz
}

fn default_flush_timeout() -> u64 {
    5
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            keep_alive_secs: default_keep_alive(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay(),
            drain_interval_ms: default_drain_interval(),
            flush_timeout_secs: default_flush_timeout(),
        }
    }
}

/// Backoff section - reconnect timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    /// Connected time after which the attempt counter resets
    #[serde(default = "default_stable_after")]
    pub stable_after_secs: u64,
}

fn default_base_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    32
}

fn default_stable_after() -> u64 {
    20
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            stable_after_secs: default_stable_after(),
        }
    }
}

/// Queue section - offline publish queueing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Maximum queued messages; absent means unlimited, 0 disables queueing
    #[serde(default)]
    pub capacity: Option<usize>,
    /// What to do when a bounded queue is full
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            capacity: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the connection manager relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let connection = &self.connection;
        if connection.port == 0 {
            return Err(ConfigError::InvalidConfig("port must be non-zero".to_string()));
        }
        if connection.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if connection.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if connection.connect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_attempts must be at least 1".to_string(),
            ));
        }

        let backoff = &self.backoff;
        if backoff.base_delay_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "base_delay_secs must be greater than 0".to_string(),
            ));
        }
        if backoff.base_delay_secs > backoff.max_delay_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "base_delay_secs ({}) must not exceed max_delay_secs ({})",
                backoff.base_delay_secs, backoff.max_delay_secs
            )));
        }

        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_secs(self.backoff.base_delay_secs),
            max_delay: Duration::from_secs(self.backoff.max_delay_secs),
            stable_after: Duration::from_secs(self.backoff.stable_after_secs),
        }
    }

    pub fn queue_limit(&self) -> QueueLimit {
        match self.queue.capacity {
            None => QueueLimit::Unbounded,
            Some(0) => QueueLimit::Disabled,
            Some(capacity) => QueueLimit::Bounded(capacity),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.operation_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.connection.keep_alive_secs)
    }
}
