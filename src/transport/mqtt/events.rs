//! Pure routing and classification of rumqttc events and errors

use crate::protocol::DeliveryQos;
use crate::transport::TransportError;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{ConnectionError, Event};
use rumqttc::Outgoing;

/// What the session driver should do with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    /// Broker acknowledged a QoS 1 publish
    PublishAcknowledged(u16),
    /// Broker ended the session
    Disconnected,
    /// We sent DISCONNECT; the session is over
    ClientDisconnected,
    Other,
}

/// Route an event (pure routing decision)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::PubAck(ack) => EventRoute::PublishAcknowledged(ack.pkid),
            Packet::Disconnect(_) => EventRoute::Disconnected,
            _ => EventRoute::Other,
        },
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::ClientDisconnected,
        Event::Outgoing(_) => EventRoute::Other,
    }
}

/// Map a rumqttc connection error onto the transport taxonomy.
///
/// Refused credentials and TLS handshake failures are authentication errors;
/// everything else is a retryable network error.
pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::BadAuthenticationMethod
            | ConnectReturnCode::Banned => {
                TransportError::Authentication(format!("broker refused connection: {code:?}"))
            }
            other => TransportError::Network(format!("broker refused connection: {other:?}")),
        },
        ConnectionError::Tls(e) => TransportError::Authentication(format!("TLS handshake failed: {e}")),
        other => TransportError::Network(other.to_string()),
    }
}

pub fn to_mqtt_qos(qos: DeliveryQos) -> QoS {
    match qos {
        DeliveryQos::AtMostOnce => QoS::AtMostOnce,
        DeliveryQos::AtLeastOnce => QoS::AtLeastOnce,
        DeliveryQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode};

    #[test]
    fn test_connack_routes_to_acknowledged() {
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(route_event(&event), EventRoute::ConnectionAcknowledged);
    }

    #[test]
    fn test_broker_disconnect_routes_to_disconnected() {
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(route_event(&event), EventRoute::Disconnected);
    }

    #[test]
    fn test_outgoing_disconnect_ends_session() {
        assert_eq!(
            route_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::ClientDisconnected
        );
        assert_eq!(route_event(&Event::Outgoing(Outgoing::PingReq)), EventRoute::Other);
    }

    #[test]
    fn test_refused_credentials_are_authentication_errors() {
        for code in [
            ConnectReturnCode::NotAuthorized,
            ConnectReturnCode::BadUserNamePassword,
            ConnectReturnCode::Banned,
        ] {
            let error = classify_connection_error(&ConnectionError::ConnectionRefused(code));
            assert!(!error.is_retryable(), "{code:?} should not be retried");
        }
    }

    #[test]
    fn test_unavailable_broker_is_retryable() {
        let refused = classify_connection_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServerUnavailable,
        ));
        assert!(refused.is_retryable());

        let io = classify_connection_error(&ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(matches!(io, TransportError::Network(_)));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(DeliveryQos::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(DeliveryQos::AtMostOnce), QoS::AtMostOnce);
    }
}
