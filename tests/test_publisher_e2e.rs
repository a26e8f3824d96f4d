//! End-to-end telemetry runs against a scripted transport
//!
//! Covers a clean run, a run that loses the broker mid-way and recovers before
//! teardown, and a run whose credentials are rejected.

mod test_helpers;

use devicelink::connection::{ConnectionState, PublishOutcome};
use devicelink::error::DeviceError;
use devicelink::publisher::TelemetryPublisher;
use devicelink::testing::{MockFailure, MockTransport, TransportCall};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{connection, default_settings, TELEMETRY_TOPIC};

#[tokio::test(start_paused = true)]
async fn test_clean_run_publishes_every_message_once() {
    // Arrange
    let transport = MockTransport::new();
    let connection = connection(&transport, default_settings());
    let publisher = TelemetryPublisher::new(TELEMETRY_TOPIC, 5, Duration::from_secs(2));

    // Act
    let report = publisher.run(&connection).await.unwrap();

    // Assert: five accepted messages, one session, one teardown, nothing after it
    assert_eq!(report.accepted(), 5);
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(transport.disconnect_calls(), 1);

    let calls = transport.calls();
    assert_eq!(calls.first(), Some(&TransportCall::Connect));
    assert_eq!(calls.last(), Some(&TransportCall::Disconnect));
    assert_eq!(calls.len(), 7);

    let delivered_ids: Vec<_> = transport.delivered().iter().map(|m| m.id).collect();
    let reported_ids: Vec<_> = report.outcomes.iter().map(|m| m.message_id).collect();
    assert_eq!(delivered_ids, reported_ids);

    for message in transport.delivered() {
        let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert!(body["timestamp"].is_i64());
    }
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_outage_mid_run_is_queued_and_drained_in_order() {
    // Arrange: the broker disappears right after message 2 and is back by the
    // time message 5 has been handed over
    let transport = MockTransport::new();
    transport.go_offline_after(2);
    let connection = connection(&transport, default_settings());

    let broker = transport.clone();
    let publisher = TelemetryPublisher::new(TELEMETRY_TOPIC, 5, Duration::from_secs(2))
        .with_observer(move |outcome| {
            if outcome.sequence == 5 {
                broker.restore();
            }
        });

    // Act
    let report = publisher.run(&connection).await.unwrap();

    // Assert: 1-2 went straight out, 3-5 waited offline
    let outcomes: Vec<PublishOutcome> = report.outcomes.iter().map(|m| m.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            PublishOutcome::Accepted,
            PublishOutcome::Accepted,
            PublishOutcome::QueuedOffline,
            PublishOutcome::QueuedOffline,
            PublishOutcome::QueuedOffline,
        ]
    );

    // Every message reached the broker, in publish order, before teardown
    let delivered_ids: Vec<_> = transport.delivered().iter().map(|m| m.id).collect();
    let reported_ids: Vec<_> = report.outcomes.iter().map(|m| m.message_id).collect();
    assert_eq!(delivered_ids, reported_ids);
    assert!(matches!(transport.calls().last(), Some(TransportCall::Disconnect)));

    let metrics = connection.metrics();
    assert_eq!(metrics.reconnects, 1);
    assert_eq!(metrics.messages_drained, 3);
    assert_eq!(metrics.messages_dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_credentials_abort_before_any_publish() {
    // Arrange
    let transport = MockTransport::new();
    transport.fail_connects(Some(MockFailure::Authentication));
    let connection = connection(&transport, default_settings());
    let observed = Arc::new(Mutex::new(0));
    let counter = observed.clone();
    let publisher = TelemetryPublisher::new(TELEMETRY_TOPIC, 5, Duration::from_secs(2))
        .with_observer(move |_| *counter.lock().unwrap() += 1);

    // Act
    let result = publisher.run(&connection).await;

    // Assert: fatal, not retried, nothing sent
    assert!(matches!(result, Err(DeviceError::Authentication { .. })));
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(transport.publish_calls(), 0);
    assert_eq!(*observed.lock().unwrap(), 0);
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_gives_up_after_bounded_attempts() {
    let transport = MockTransport::new();
    transport.fail_connects(Some(MockFailure::Network));
    let connection = connection(&transport, default_settings());

    let result = TelemetryPublisher::new(TELEMETRY_TOPIC, 5, Duration::from_secs(2))
        .run(&connection)
        .await;

    assert!(matches!(result, Err(DeviceError::Network { .. })));
    assert_eq!(transport.connect_calls(), 3);
    assert_eq!(transport.publish_calls(), 0);
}
