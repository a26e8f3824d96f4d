//! devicelink - device-side MQTT telemetry client
//!
//! Publishes telemetry from a device to an MQTT broker over mutual TLS and
//! keeps doing so through network loss: a connection manager reconnects with
//! capped exponential backoff and holds messages in an offline queue while the
//! session is down, draining them in order once it is back.
//!
//! # Overview
//!
//! - [`connection`] - state machine, backoff, offline queue and the [`ConnectionManager`]
//! - [`transport`] - the [`Transport`] seam and its rumqttc implementation
//! - [`publisher`] - paced telemetry runs
//! - [`sink`] - rule event sink for broker-side rule output
//! - [`config`] - TOML tuning with defaults for every field
//!
//! # Quick Start
//!
//! ```rust
//! use devicelink::connection::{ConnectionManager, ConnectionSettings};
//! use devicelink::publisher::TelemetryPublisher;
//! use devicelink::testing::MockTransport;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let transport = MockTransport::new();
//! let connection = ConnectionManager::new(transport.clone(), ConnectionSettings::new("test-device-001"));
//!
//! let report = TelemetryPublisher::new("device/test-device-001/telemetry", 2, Duration::from_millis(10))
//!     .run(&connection)
//!     .await?;
//!
//! assert_eq!(report.accepted(), 2);
//! assert_eq!(transport.delivered().len(), 2);
//! # Ok::<(), devicelink::DeviceError>(())
//! # });
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod sink;
pub mod testing;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectionManager, ConnectionSettings, ConnectionState, PublishOutcome, RejectReason};
pub use error::{CredentialKind, DeviceError, DeviceResult};
pub use protocol::*;
pub use publisher::{MessageOutcome, PublishReport, TelemetryPublisher};
pub use sink::{EventSink, RecordedEvent, TracingEventSink};
pub use transport::mqtt::{CredentialBundle, MqttTransport};
pub use transport::{Transport, TransportError};
