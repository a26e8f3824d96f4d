//! Error taxonomy for the device client
//!
//! Connection-establishment errors propagate to the caller as fatal. Everything
//! that goes wrong after a session is up is absorbed by the connection manager
//! and only ever shows up as a publish outcome.

use crate::transport::TransportError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for device client operations
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Bad or expired credential bundle. Never retried.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Connect timed out after {timeout:?}")]
    ConnectTimeout { timeout: Duration },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Offline queue full ({capacity} messages)")]
    QueueOverflow { capacity: usize },

    #[error("Connection has been closed")]
    Closed,

    #[error("{kind} file not found: {}", path.display())]
    MissingCredential { kind: CredentialKind, path: PathBuf },

    #[error("Failed to read {kind} from {}: {source}", path.display())]
    Credential {
        kind: CredentialKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid broker endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The three artifacts of a device credential bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Certificate,
    PrivateKey,
    RootCa,
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CredentialKind::Certificate => "Certificate",
            CredentialKind::PrivateKey => "Private key",
            CredentialKind::RootCa => "Root CA",
        };
        f.write_str(label)
    }
}

impl DeviceError {
    /// Create authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Whether a connect attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::ConnectTimeout { .. } | DeviceError::Network { .. }
        )
    }

    /// Whether this error should abort the owning process' run
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}

impl From<TransportError> for DeviceError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Authentication(message) => DeviceError::Authentication { message },
            TransportError::Timeout(timeout) => DeviceError::ConnectTimeout { timeout },
            TransportError::Network(message) => DeviceError::Network { message },
            TransportError::NotConnected => DeviceError::network("transport not connected"),
            TransportError::Publish(e) => DeviceError::network(e.to_string()),
        }
    }
}

/// Result type for device client operations
pub type DeviceResult<T> = Result<T, DeviceError>;
