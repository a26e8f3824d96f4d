//! Transport layer for device-to-broker communication
//!
//! This module provides the transport abstraction the connection manager
//! drives, and the MQTT implementation used against a real broker.

use crate::protocol::OutboundMessage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod mqtt;

/// Resolves once the session it was handed out for has died.
///
/// A closed channel (the transport dropped its sender) counts as a lost link.
pub type LinkLost = oneshot::Receiver<TransportError>;

/// Errors reported by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Authentication rejected: {0}")]
    Authentication(String),
    #[error("Network failure: {0}")]
    Network(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport has no live session")]
    NotConnected,
    #[error("Publishing failed")]
    Publish(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Authentication failures are the only non-retryable transport errors
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Authentication(_))
    }
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the session to the broker so the
/// reconnection, backoff and queueing logic can be driven against a mock.
/// Implementations hold at most one session; `connect` replaces any previous
/// one.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session. Returns once the broker has acknowledged it.
    async fn connect(&self) -> Result<LinkLost, TransportError>;

    /// Hand one message to the live session
    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Release the session. Safe to call with no session open.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
