//! Test helpers and utilities for integration tests

use devicelink::connection::{BackoffPolicy, ConnectionManager, ConnectionSettings, ConnectionState};
use devicelink::protocol::{DeliveryQos, OutboundMessage};
use devicelink::testing::MockTransport;
use std::time::Duration;
use tokio::time::timeout;

pub const THING_NAME: &str = "test-device-001";
pub const TELEMETRY_TOPIC: &str = "device/test-device-001/telemetry";

/// Settings with the production defaults
#[allow(dead_code)]
pub fn default_settings() -> ConnectionSettings {
    ConnectionSettings::new(THING_NAME)
}

/// Settings with short delays for tests that do not assert timing
#[allow(dead_code)]
pub fn fast_settings() -> ConnectionSettings {
    let mut settings = default_settings();
    settings.connect_retry_delay = Duration::from_millis(10);
    settings.drain_interval = Duration::from_millis(10);
    settings.backoff = BackoffPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        stable_after: Duration::from_secs(20),
    };
    settings
}

#[allow(dead_code)]
pub fn connection(transport: &MockTransport, settings: ConnectionSettings) -> ConnectionManager<MockTransport> {
    ConnectionManager::new(transport.clone(), settings)
}

#[allow(dead_code)]
pub fn numbered_message(n: u32) -> OutboundMessage {
    OutboundMessage::new(TELEMETRY_TOPIC, n.to_string(), DeliveryQos::AtLeastOnce)
}

/// Wait (in paused test time) until the connection reaches a matching state
#[allow(dead_code)]
pub async fn wait_for_state(
    connection: &ConnectionManager<MockTransport>,
    wanted: impl Fn(&ConnectionState) -> bool,
) {
    let mut state_rx = connection.watch_state();
    timeout(Duration::from_secs(300), state_rx.wait_for(|state| wanted(state)))
        .await
        .expect("connection did not reach the expected state in time")
        .expect("state channel closed");
}
