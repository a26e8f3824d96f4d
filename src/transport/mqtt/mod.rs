//! MQTT-over-TLS transport for device sessions
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`credentials`] - Credential bundle existence checks and loading
//! - [`connection`] - Pure endpoint parsing and rumqttc option construction
//! - [`events`] - Pure event routing and error classification
//! - [`client`] - Impure session I/O behind the [`Transport`](crate::transport::Transport) trait
//!
//! # Usage
//!
//! ```rust,no_run
//! use devicelink::transport::mqtt::{BrokerEndpoint, CredentialBundle, MqttSettings, MqttTransport};
//! use std::time::Duration;
//!
//! let bundle = CredentialBundle::new(
//!     "certs/device.cert.pem",
//!     "certs/device.private.key",
//!     "certs/AmazonRootCA1.pem",
//! );
//! let transport = MqttTransport::new(MqttSettings {
//!     client_id: "test-device-001".to_string(),
//!     endpoint: BrokerEndpoint::parse("abc123-ats.iot.us-east-1.amazonaws.com", 8883)?,
//!     keep_alive: Duration::from_secs(30),
//!     credentials: bundle.load()?,
//! });
//! # Ok::<(), devicelink::DeviceError>(())
//! ```

pub mod client;
pub mod connection;
pub mod credentials;
pub mod events;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, BrokerEndpoint, MqttSettings, DEFAULT_TLS_PORT};
pub use credentials::{CredentialBundle, TlsCredentials};
pub use events::{classify_connection_error, route_event, EventRoute};
