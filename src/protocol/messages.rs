//! Message types for device telemetry
//!
//! This module defines the outbound message unit handed to the connection
//! manager and the telemetry payload carried on the wire.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery-quality requirement of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeliveryQos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for DeliveryQos {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(DeliveryQos::AtMostOnce),
            1 => Ok(DeliveryQos::AtLeastOnce),
            2 => Ok(DeliveryQos::ExactlyOnce),
            other => Err(format!("QoS level must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<DeliveryQos> for u8 {
    fn from(qos: DeliveryQos) -> Self {
        match qos {
            DeliveryQos::AtMostOnce => 0,
            DeliveryQos::AtLeastOnce => 1,
            DeliveryQos::ExactlyOnce => 2,
        }
    }
}

/// A unit of telemetry to deliver
///
/// Created at send time. Only lives in the offline queue while the transport
/// is down and is dropped after its terminal delivery attempt.
///
/// # Examples
/// ```
/// use devicelink::protocol::{DeliveryQos, OutboundMessage};
///
/// let message = OutboundMessage::new(
///     "device/test-device-001/telemetry",
///     r#"{"timestamp":1700000000000}"#,
///     DeliveryQos::AtLeastOnce,
/// );
/// assert_eq!(message.payload_str(), Some(r#"{"timestamp":1700000000000}"#));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Identifier used to trace a message through queue and drain
    pub id: Uuid,
    /// Destination topic
    pub topic: String,
    /// Serialized payload (UTF-8 JSON)
    pub payload: Bytes,
    pub qos: DeliveryQos,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: DeliveryQos) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload: payload.into(),
            qos,
            created_at: Utc::now(),
        }
    }

    /// Serialize a value as the JSON payload of a new message
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        body: &T,
        qos: DeliveryQos,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(body)?;
        Ok(Self::new(topic, payload, qos))
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.id, self.topic)
    }
}

/// Telemetry body published by the device: `{"timestamp": <epoch-ms>}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelemetryPayload {
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl TelemetryPayload {
    /// Capture a payload stamped with the current time
    pub fn capture() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(time: DateTime<Utc>) -> Self {
        Self {
            timestamp: time.timestamp_millis(),
        }
    }
}
