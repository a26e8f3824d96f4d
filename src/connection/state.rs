//! Pure connection state rules
//!
//! This module contains the state machine of a device connection and the
//! publish outcomes it produces. No I/O happens here.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Connection state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial and terminal state
    Disconnected,
    /// Initial handshake in progress
    Connecting,
    /// Live session, offline queue empty
    Connected,
    /// Session lost; backoff loop running (attempt count so far)
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether a publish in this state goes straight to the transport
    pub fn can_publish(&self) -> bool {
        self.is_connected()
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnectStarted,
    /// Handshake done and the offline queue drained
    SessionReady,
    /// Initial connect gave up or was refused
    ConnectFailed(String),
    /// Live session died
    LinkLost(String),
    ReconnectAttempt(u32),
    Shutdown,
}

/// Pure transition rules
pub struct StateMachine;

impl StateMachine {
    /// Next state after `event`, or None when the event does not apply
    pub fn next(current: ConnectionState, event: &ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (current, event) {
            (_, ConnectionEvent::Shutdown) => Some(Disconnected),
            (Disconnected, ConnectionEvent::ConnectStarted) => Some(Connecting),
            (Connecting | Reconnecting { .. }, ConnectionEvent::SessionReady) => Some(Connected),
            (Connecting, ConnectionEvent::ConnectFailed(_)) => Some(Disconnected),
            (Connected, ConnectionEvent::LinkLost(_)) => Some(Reconnecting { attempt: 0 }),
            (Reconnecting { .. }, ConnectionEvent::ReconnectAttempt(attempt)) => {
                Some(Reconnecting { attempt: *attempt })
            }
            _ => None,
        }
    }

    /// Log a state transition
    pub fn log_transition(from: ConnectionState, to: ConnectionState, event: &ConnectionEvent) {
        match (from, to, event) {
            (ConnectionState::Connecting, ConnectionState::Connected, _) => {
                info!("Connection established");
            }
            (ConnectionState::Reconnecting { attempt }, ConnectionState::Connected, _) => {
                info!(attempt, "Reconnection successful");
            }
            (_, ConnectionState::Reconnecting { attempt: 0 }, ConnectionEvent::LinkLost(reason)) => {
                warn!(%reason, "Connection lost");
            }
            (_, ConnectionState::Disconnected, ConnectionEvent::ConnectFailed(reason)) => {
                error!(%reason, "Connection failed");
            }
            _ => {
                info!("Connection state: {} -> {}", from, to);
            }
        }
    }
}

/// Why a publish was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Bounded queue full under the reject-new policy
    QueueFull,
    /// Offline queueing disabled
    QueueDisabled,
    /// Connection already torn down
    Closed,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => f.write_str("offline queue full"),
            RejectReason::QueueDisabled => f.write_str("offline queueing disabled"),
            RejectReason::Closed => f.write_str("connection closed"),
        }
    }
}

/// What happened to one publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Handed to the live session
    Accepted,
    /// Held in the offline queue until the session is restored
    QueuedOffline,
    Rejected(RejectReason),
}

impl PublishOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PublishOutcome::Accepted)
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Accepted => f.write_str("Published successfully"),
            PublishOutcome::QueuedOffline => f.write_str("Queued offline"),
            PublishOutcome::Rejected(reason) => write!(f, "Rejected ({reason})"),
        }
    }
}
