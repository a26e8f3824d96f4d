//! Mock implementations for testing
//!
//! Provides a scriptable mock Transport so the connection manager and the
//! telemetry publisher can be exercised without a broker.

use crate::protocol::OutboundMessage;
use crate::transport::{LinkLost, Transport, TransportError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Failure modes the mock can be told to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Credentials rejected
    Authentication,
    /// Broker unreachable or link reset
    Network,
    /// Never completes
    Hang,
}

/// One call made against the mock, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Publish(OutboundMessage),
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    connect_failure: Option<MockFailure>,
    publish_failure: Option<MockFailure>,
    drop_link_after: Option<usize>,
    link: Option<oneshot::Sender<TransportError>>,
    calls: Vec<TransportCall>,
    delivered: Vec<OutboundMessage>,
}

impl MockState {
    fn fire_link_lost(&mut self, reason: &str) {
        if let Some(link) = self.link.take() {
            let _ = link.send(TransportError::Network(reason.to_string()));
        }
    }
}

/// Mock transport for testing
///
/// Clones share state, so a test keeps one handle while the connection
/// manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every connect attempt fail (None to succeed again)
    pub fn fail_connects(&self, failure: Option<MockFailure>) {
        self.state().connect_failure = failure;
    }

    /// Make every publish fail (None to succeed again)
    pub fn fail_publishes(&self, failure: Option<MockFailure>) {
        self.state().publish_failure = failure;
    }

    /// Kill the live session; the broker stays reachable
    pub fn drop_link(&self) {
        self.state().fire_link_lost("connection reset by peer");
    }

    /// Take the broker away: the live session dies and reconnects fail
    pub fn go_offline(&self) {
        let mut state = self.state();
        state.connect_failure = Some(MockFailure::Network);
        state.fire_link_lost("broker went away");
    }

    /// Go offline right after the `n`th message (counted over the whole run)
    /// has been delivered
    pub fn go_offline_after(&self, n: usize) {
        self.state().drop_link_after = Some(n);
    }

    /// Clear every scripted failure
    pub fn restore(&self) {
        let mut state = self.state();
        state.connect_failure = None;
        state.publish_failure = None;
        state.drop_link_after = None;
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.state().delivered.clone()
    }

    pub fn delivered_payloads(&self) -> Vec<String> {
        self.state()
            .delivered
            .iter()
            .map(|m| m.payload_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, TransportCall::Connect))
    }

    pub fn publish_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, TransportCall::Publish(_)))
    }

    pub fn disconnect_calls(&self) -> usize {
        self.count_calls(|call| matches!(call, TransportCall::Disconnect))
    }

    pub fn has_session(&self) -> bool {
        self.state().link.is_some()
    }

    fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<LinkLost, TransportError> {
        let failure = {
            let mut state = self.state();
            state.calls.push(TransportCall::Connect);
            state.connect_failure
        };

        match failure {
            Some(MockFailure::Authentication) => Err(TransportError::Authentication(
                "mock broker rejected the certificate".to_string(),
            )),
            Some(MockFailure::Network) => {
                Err(TransportError::Network("mock broker unreachable".to_string()))
            }
            Some(MockFailure::Hang) => std::future::pending().await,
            None => {
                let (link, link_lost) = oneshot::channel();
                self.state().link = Some(link);
                Ok(link_lost)
            }
        }
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let failure = {
            let mut state = self.state();
            state.calls.push(TransportCall::Publish(message.clone()));
            if state.link.is_none() {
                return Err(TransportError::NotConnected);
            }
            state.publish_failure
        };

        match failure {
            Some(MockFailure::Authentication) => Err(TransportError::Authentication(
                "mock broker revoked the session".to_string(),
            )),
            Some(MockFailure::Network) => {
                self.state().fire_link_lost("write failed");
                Err(TransportError::Network("mock write failed".to_string()))
            }
            Some(MockFailure::Hang) => std::future::pending().await,
            None => {
                let mut state = self.state();
                state.delivered.push(message.clone());
                if state.drop_link_after == Some(state.delivered.len()) {
                    state.drop_link_after = None;
                    state.connect_failure = Some(MockFailure::Network);
                    state.fire_link_lost("broker went away");
                }
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::Disconnect);
        state.link = None;
        Ok(())
    }
}
