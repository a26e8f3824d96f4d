//! Telemetry publisher: a fixed-size, paced run of timestamp messages
//!
//! The publisher owns the connection for the duration of a run. It connects,
//! sends `count` messages `interval` apart and always disconnects afterwards,
//! whether the run finished, failed or was cancelled.

use crate::connection::{ConnectionManager, PublishOutcome};
use crate::error::{DeviceError, DeviceResult};
use crate::protocol::{validate_publish_topic, DeliveryQos, OutboundMessage, TelemetryPayload};
use crate::transport::Transport;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Outcome of one message in a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    /// 1-based position in the run
    pub sequence: u32,
    pub message_id: Uuid,
    pub topic: String,
    pub payload: String,
    pub outcome: PublishOutcome,
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishReport {
    pub outcomes: Vec<MessageOutcome>,
    /// The run was cancelled before all messages were sent
    pub aborted: bool,
}

impl PublishReport {
    fn count(&self, predicate: impl Fn(&PublishOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|m| predicate(&m.outcome)).count()
    }

    pub fn accepted(&self) -> usize {
        self.count(|o| matches!(o, PublishOutcome::Accepted))
    }

    pub fn queued(&self) -> usize {
        self.count(|o| matches!(o, PublishOutcome::QueuedOffline))
    }

    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, PublishOutcome::Rejected(_)))
    }
}

/// Callback invoked after every publish call
pub type OutcomeObserver = Box<dyn Fn(&MessageOutcome) + Send + Sync>;

/// Publishes `count` telemetry messages, `interval` apart
pub struct TelemetryPublisher {
    topic: String,
    count: u32,
    interval: Duration,
    qos: DeliveryQos,
    observer: Option<OutcomeObserver>,
}

impl TelemetryPublisher {
    pub fn new(topic: impl Into<String>, count: u32, interval: Duration) -> Self {
        Self {
            topic: topic.into(),
            count,
            interval,
            qos: DeliveryQos::AtLeastOnce,
            observer: None,
        }
    }

    pub fn with_qos(mut self, qos: DeliveryQos) -> Self {
        self.qos = qos;
        self
    }

    /// Report each message outcome as soon as it is known
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&MessageOutcome) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Run to completion
    pub async fn run<T: Transport>(
        &self,
        connection: &ConnectionManager<T>,
    ) -> DeviceResult<PublishReport> {
        self.run_until(connection, std::future::pending()).await
    }

    /// Run until done or until `shutdown` resolves.
    ///
    /// A connect failure ends the run before anything is sent. The connection
    /// is torn down on every path out of this function.
    pub async fn run_until<T, F>(
        &self,
        connection: &ConnectionManager<T>,
        shutdown: F,
    ) -> DeviceResult<PublishReport>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        validate_publish_topic(&self.topic).map_err(|e| DeviceError::InvalidTopic {
            topic: self.topic.clone(),
            reason: e.to_string(),
        })?;

        let span = crate::publish_span!(
            client_id = %connection.client_id(),
            topic = %self.topic,
            count = self.count
        );
        self.run_session(connection, shutdown).instrument(span).await
    }

    async fn run_session<T, F>(
        &self,
        connection: &ConnectionManager<T>,
        shutdown: F,
    ) -> DeviceResult<PublishReport>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut report = PublishReport::default();

        let finished = self
            .connect_and_publish(connection, &mut report, shutdown.as_mut())
            .await;

        if let Err(e) = connection.disconnect().await {
            warn!(error = %e, "Connection did not close cleanly");
        }

        match finished {
            Ok(true) => {
                info!(
                    accepted = report.accepted(),
                    queued = report.queued(),
                    rejected = report.rejected(),
                    "Telemetry run finished"
                );
                Ok(report)
            }
            Ok(false) => {
                warn!(sent = report.outcomes.len(), "Telemetry run cancelled");
                report.aborted = true;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns false when `shutdown` fired first.
    ///
    /// Shutdown is only observed while connecting or between messages; a
    /// publish in progress always completes and is reported.
    async fn connect_and_publish<T, F>(
        &self,
        connection: &ConnectionManager<T>,
        report: &mut PublishReport,
        mut shutdown: Pin<&mut F>,
    ) -> DeviceResult<bool>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        tokio::select! {
            connected = connection.connect() => connected?,
            _ = &mut shutdown => return Ok(false),
        }

        for sequence in 1..=self.count {
            let message = OutboundMessage::json(&self.topic, &TelemetryPayload::capture(), self.qos)?;
            let message_id = message.id;
            let payload = message.payload_str().unwrap_or_default().to_string();

            let outcome = connection.publish(message).await;
            info!(sequence, total = self.count, %message_id, %outcome, "Telemetry published");

            let record = MessageOutcome {
                sequence,
                message_id,
                topic: self.topic.clone(),
                payload,
                outcome,
            };
            if let Some(observer) = &self.observer {
                observer(&record);
            }
            report.outcomes.push(record);

            if sequence < self.count {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval) => {}
                    _ = &mut shutdown => return Ok(false),
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionSettings, RejectReason};
    use crate::testing::mocks::{MockFailure, MockTransport};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    const TOPIC: &str = "device/test-device-001/telemetry";

    fn connection(transport: &MockTransport) -> ConnectionManager<MockTransport> {
        ConnectionManager::new(transport.clone(), ConnectionSettings::new("test-device-001"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_count_messages_with_timestamps() {
        // Arrange
        let transport = MockTransport::new();
        let connection = connection(&transport);
        let publisher = TelemetryPublisher::new(TOPIC, 3, Duration::from_secs(2));

        // Act
        let report = publisher.run(&connection).await.unwrap();

        // Assert
        assert_eq!(report.accepted(), 3);
        assert!(!report.aborted);
        for message in transport.delivered() {
            assert_eq!(message.topic, TOPIC);
            assert_eq!(message.qos, DeliveryQos::AtLeastOnce);
            let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
            assert!(body["timestamp"].as_i64().unwrap() > 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_between_messages_but_not_after_last() {
        let transport = MockTransport::new();
        let connection = connection(&transport);
        let publisher = TelemetryPublisher::new(TOPIC, 3, Duration::from_secs(2));

        let started = Instant::now();
        publisher.run(&connection).await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "finished early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "slept after last message: {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_count_still_connects_and_disconnects() {
        let transport = MockTransport::new();
        let connection = connection(&transport);

        let report = TelemetryPublisher::new(TOPIC, 0, Duration::from_secs(2))
            .run(&connection)
            .await
            .unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_sends_nothing_and_tears_down() {
        let transport = MockTransport::new();
        transport.fail_connects(Some(MockFailure::Authentication));
        let connection = connection(&transport);

        let result = TelemetryPublisher::new(TOPIC, 5, Duration::from_secs(2))
            .run(&connection)
            .await;

        assert!(matches!(result, Err(DeviceError::Authentication { .. })));
        assert_eq!(transport.publish_calls(), 0);
        assert!(connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_topic_is_rejected_before_connecting() {
        let transport = MockTransport::new();
        let connection = connection(&transport);

        let result = TelemetryPublisher::new("device/+/telemetry", 1, Duration::ZERO)
            .run(&connection)
            .await;

        assert!(matches!(result, Err(DeviceError::InvalidTopic { .. })));
        assert_eq!(transport.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_every_outcome() {
        let transport = MockTransport::new();
        let connection = connection(&transport);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let publisher = TelemetryPublisher::new(TOPIC, 2, Duration::from_secs(1))
            .with_observer(move |outcome| sink.lock().unwrap().push(outcome.sequence));
        publisher.run(&connection).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_still_disconnects() {
        let transport = MockTransport::new();
        let connection = connection(&transport);
        let publisher = TelemetryPublisher::new(TOPIC, 10, Duration::from_secs(2));

        let report = publisher
            .run_until(&connection, tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();

        assert!(report.aborted);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(
            connection.publish(OutboundMessage::new(TOPIC, "{}", DeliveryQos::AtLeastOnce)).await,
            PublishOutcome::Rejected(RejectReason::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_waits_for_publish_in_progress() {
        // Arrange: the first publish stalls until the operation timeout
        let transport = MockTransport::new();
        transport.fail_publishes(Some(MockFailure::Hang));
        let connection = connection(&transport);
        let broker = transport.clone();
        let publisher = TelemetryPublisher::new(TOPIC, 3, Duration::from_secs(2))
            .with_observer(move |_| broker.restore());

        // Act: shutdown fires while that publish is still pending
        let report = publisher
            .run_until(&connection, tokio::time::sleep(Duration::from_secs(1)))
            .await
            .unwrap();

        // Assert: its outcome is still reported, nothing after it is sent
        assert!(report.aborted);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].outcome, PublishOutcome::QueuedOffline);
        assert!(!transport.has_session());
    }
}
