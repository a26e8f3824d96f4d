//! Impure I/O operations for the MQTT transport
//!
//! Each `connect` builds a fresh rumqttc client and event loop, waits for the
//! broker's ConnAck and then hands the event loop to a background task that
//! reports when the session dies. Reconnection policy lives in the connection
//! manager, not here.

use super::connection::{configure_mqtt_options, MqttSettings, REQUEST_CHANNEL_CAPACITY};
use super::events::{classify_connection_error, route_event, to_mqtt_qos, EventRoute};
use crate::protocol::OutboundMessage;
use crate::transport::{LinkLost, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Time allowed for the event loop to flush DISCONNECT and exit
const EVENT_LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Session {
    client: AsyncClient,
    event_loop_handle: JoinHandle<()>,
}

/// MQTT-over-TLS transport using rumqttc
pub struct MqttTransport {
    settings: MqttSettings,
    session: Mutex<Option<Session>>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            session: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Poll until the broker acknowledges the session
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| classify_connection_error(&e))?;
            match route_event(&event) {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                route => trace!(?route, "Event before ConnAck"),
            }
        }
    }

    /// Drive the event loop of a live session until it ends
    async fn drive_event_loop(
        client_id: String,
        mut event_loop: EventLoop,
        link_lost: oneshot::Sender<TransportError>,
    ) {
        let reason = loop {
            match event_loop.poll().await {
                Ok(event) => match route_event(&event) {
                    EventRoute::PublishAcknowledged(pkid) => trace!(pkid, "PubAck received"),
                    EventRoute::Disconnected => {
                        break TransportError::Network("broker closed the session".to_string());
                    }
                    EventRoute::ClientDisconnected => {
                        debug!(%client_id, "Session closed by client");
                        return;
                    }
                    EventRoute::ConnectionAcknowledged | EventRoute::Other => {
                        trace!(?event, "MQTT event");
                    }
                },
                Err(e) => break classify_connection_error(&e),
            }
        };

        warn!(%client_id, error = %reason, "MQTT session ended");
        // The receiver is gone if the manager already gave up on this session
        let _ = link_lost.send(reason);
    }

    async fn close_session(session: Session) {
        let Session {
            client,
            mut event_loop_handle,
        } = session;

        if let Err(e) = client.disconnect().await {
            debug!("Disconnect request not delivered: {}", e);
        }

        match tokio::time::timeout(EVENT_LOOP_SHUTDOWN_GRACE, &mut event_loop_handle).await {
            Ok(_) => debug!("Event loop stopped"),
            Err(_) => {
                warn!("Event loop did not stop in time, aborting");
                event_loop_handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<LinkLost, TransportError> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            Self::close_session(previous).await;
        }

        let options = configure_mqtt_options(&self.settings);
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        info!(
            client_id = %self.settings.client_id,
            endpoint = %self.settings.endpoint,
            "Opening MQTT session"
        );
        Self::wait_for_connack(&mut event_loop).await?;

        let (link_lost_tx, link_lost_rx) = oneshot::channel();
        let event_loop_handle = tokio::spawn(Self::drive_event_loop(
            self.settings.client_id.clone(),
            event_loop,
            link_lost_tx,
        ));

        *session = Some(Session {
            client,
            event_loop_handle,
        });
        Ok(link_lost_rx)
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;

        session
            .client
            .publish(
                message.topic.clone(),
                to_mqtt_qos(message.qos),
                false,
                message.payload.clone(),
            )
            .await
            .map_err(|e| TransportError::Publish(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            Self::close_session(session).await;
        }
        Ok(())
    }
}
