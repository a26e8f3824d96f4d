//! Pure connection configuration for the MQTT transport
//!
//! This module contains pure functions for broker endpoint parsing and
//! rumqttc option construction.

use super::credentials::TlsCredentials;
use crate::error::{DeviceError, DeviceResult};
use rumqttc::v5::MqttOptions;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Default MQTT-over-TLS port
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Pending requests rumqttc buffers between the client and its event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Broker host and port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// Parse `host`, `host:port` or an `mqtts://host[:port]` URL
    pub fn parse(endpoint: &str, default_port: u16) -> DeviceResult<Self> {
        let endpoint = endpoint.trim();
        let invalid = |reason: &str| DeviceError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if endpoint.is_empty() {
            return Err(invalid("endpoint is empty"));
        }

        if endpoint.contains("://") {
            let url = Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
            if !matches!(url.scheme(), "mqtts" | "ssl" | "tls") {
                return Err(invalid("only TLS endpoints (mqtts://) are supported"));
            }
            let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
            return Ok(Self {
                host: host.to_string(),
                port: url.port().unwrap_or(default_port),
            });
        }

        match endpoint.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| invalid("port is not a number"))?;
                if host.is_empty() {
                    return Err(invalid("missing host"));
                }
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            None => Ok(Self {
                host: endpoint.to_string(),
                port: default_port,
            }),
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything needed to open a session
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub client_id: String,
    pub endpoint: BrokerEndpoint,
    pub keep_alive: Duration,
    pub credentials: TlsCredentials,
}

/// Pure function to build rumqttc options for one session
pub fn configure_mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.endpoint.host.clone(),
        settings.endpoint.port,
    );
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_start(true);
    options.set_transport(settings.credentials.to_transport());
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_uses_default_port() {
        let endpoint = BrokerEndpoint::parse("abc123-ats.iot.us-east-1.amazonaws.com", 8883).unwrap();
        assert_eq!(endpoint.host, "abc123-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(endpoint.port, 8883);
    }

    #[test]
    fn test_host_and_port() {
        let endpoint = BrokerEndpoint::parse("broker.local:8884", 8883).unwrap();
        assert_eq!(endpoint.to_string(), "broker.local:8884");
    }

    #[test]
    fn test_mqtts_url() {
        let endpoint = BrokerEndpoint::parse("mqtts://broker.local", 8883).unwrap();
        assert_eq!(endpoint.port, 8883);
        let endpoint = BrokerEndpoint::parse("mqtts://broker.local:443", 8883).unwrap();
        assert_eq!(endpoint.port, 443);
    }

    #[test]
    fn test_invalid_endpoints() {
        for bad in ["", "   ", "mqtt://plain.local:1883", "broker.local:notaport", ":8883"] {
            assert!(
                matches!(BrokerEndpoint::parse(bad, 8883), Err(DeviceError::InvalidEndpoint { .. })),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let settings = MqttSettings {
            client_id: "test-device-001".to_string(),
            endpoint: BrokerEndpoint::parse("broker.local", DEFAULT_TLS_PORT).unwrap(),
            keep_alive: Duration::from_secs(30),
            credentials: TlsCredentials {
                ca: b"ca".to_vec(),
                client_cert: b"cert".to_vec(),
                client_key: b"key".to_vec(),
            },
        };

        let options = configure_mqtt_options(&settings);

        assert_eq!(options.client_id(), "test-device-001");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }
}
