//! Connection manager: one logical broker session per device
//!
//! The manager owns the transport, the offline queue and the state machine.
//! A background supervisor task watches the live session and runs the backoff
//! loop when it dies. Publishing never waits for that loop: while no session is
//! live, messages go to the offline queue and are drained in enqueue order once
//! the supervisor has restored the session.
//!
//! The offline queue mutex is also the single-writer lock for the state
//! transitions that decide where a message goes (`Connected -> Reconnecting`
//! and `-> Connected` after a drain), so a publish can never slip a message past
//! messages queued before it.

use super::backoff::{Backoff, BackoffPolicy};
use super::queue::{EnqueueOutcome, OfflineQueue, OverflowPolicy, QueueLimit};
use super::state::{ConnectionEvent, ConnectionState, PublishOutcome, RejectReason, StateMachine};
use crate::config::ClientConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::observability::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::protocol::OutboundMessage;
use crate::transport::{LinkLost, Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// Time allowed for the supervisor to stop after shutdown is signalled
const SUPERVISOR_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Tuning for one connection
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Client identity, unique per device
    pub client_id: String,
    /// Bound on one connect handshake (and on releasing a session)
    pub connect_timeout: Duration,
    /// Bound on handing one message to the transport
    pub operation_timeout: Duration,
    /// Attempts made by `connect()` before it gives up
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    /// Pause between drained offline messages
    pub drain_interval: Duration,
    /// How long `disconnect()` waits for queued messages to drain
    pub flush_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub queue_limit: QueueLimit,
    pub overflow: OverflowPolicy,
}

impl ConnectionSettings {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::from_config(client_id, &ClientConfig::default())
    }

    pub fn from_config(client_id: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            client_id: client_id.into(),
            connect_timeout: config.connect_timeout(),
            operation_timeout: config.operation_timeout(),
            connect_attempts: config.connection.connect_attempts.max(1),
            connect_retry_delay: Duration::from_millis(config.connection.connect_retry_delay_ms),
            drain_interval: Duration::from_millis(config.connection.drain_interval_ms),
            flush_timeout: Duration::from_secs(config.connection.flush_timeout_secs),
            backoff: config.backoff_policy(),
            queue_limit: config.queue_limit(),
            overflow: config.queue.overflow,
        }
    }
}

/// State shared between the manager handle and its supervisor task
struct Shared<T: Transport> {
    settings: ConnectionSettings,
    transport: T,
    state_tx: watch::Sender<ConnectionState>,
    queue: Mutex<OfflineQueue>,
    backoff: Mutex<Backoff>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    /// A publish hit a transport failure and flipped the state
    send_failed: Notify,
    /// Skip the current backoff wait
    retry_now: Notify,
    metrics: ConnectionMetrics,
}

/// Owns the broker session of one device
///
/// # Examples
/// ```no_run
/// use devicelink::connection::{ConnectionManager, ConnectionSettings};
/// use devicelink::protocol::{DeliveryQos, OutboundMessage};
/// use devicelink::testing::mocks::MockTransport;
///
/// # tokio_test::block_on(async {
/// let connection = ConnectionManager::new(
///     MockTransport::new(),
///     ConnectionSettings::new("test-device-001"),
/// );
/// connection.connect().await?;
/// let outcome = connection
///     .publish(OutboundMessage::new("device/test-device-001/telemetry", "{}", DeliveryQos::AtLeastOnce))
///     .await;
/// assert!(outcome.is_accepted());
/// connection.disconnect().await?;
/// # Ok::<(), devicelink::DeviceError>(())
/// # });
/// ```
pub struct ConnectionManager<T: Transport> {
    shared: Arc<Shared<T>>,
    connect_lock: tokio::sync::Mutex<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let queue = OfflineQueue::new(settings.queue_limit, settings.overflow);
        let backoff = Backoff::new(settings.backoff);

        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                state_tx,
                queue: Mutex::new(queue),
                backoff: Mutex::new(backoff),
                closed: AtomicBool::new(false),
                shutdown_tx,
                send_failed: Notify::new(),
                retry_now: Notify::new(),
                metrics: ConnectionMetrics::new(),
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.shared.settings.client_id
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Messages currently held in the offline queue
    pub fn queued_len(&self) -> usize {
        self.shared.lock_queue().len()
    }

    /// Consecutive failed reconnect attempts since the last reset
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock_backoff().attempts()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Establish the session.
    ///
    /// Makes up to `connect_attempts` attempts, each bounded by the connect
    /// timeout. Authentication failures end the call at once. Messages
    /// published before the session came up are drained before this returns.
    pub async fn connect(&self) -> DeviceResult<()> {
        let _guard = self.connect_lock.lock().await;
        let shared = &self.shared;

        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        if self.supervisor_running() {
            debug!(client_id = %shared.settings.client_id, "Session already established");
            return Ok(());
        }

        shared.apply(ConnectionEvent::ConnectStarted);
        let max_attempts = shared.settings.connect_attempts;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if self.is_closed() {
                return Err(DeviceError::Closed);
            }
            shared.metrics.record_connect_attempt();
            info!(
                client_id = %shared.settings.client_id,
                attempt,
                max_attempts,
                "Connecting to broker"
            );

            match timeout(shared.settings.connect_timeout, shared.transport.connect()).await {
                Ok(Ok(link)) => {
                    if self.is_closed() {
                        debug!("Disconnected while connecting, releasing new session");
                        shared.release_session().await;
                        return Err(DeviceError::Closed);
                    }
                    shared.metrics.record_connection_established(false);
                    {
                        let mut backoff = shared.lock_backoff();
                        backoff.reset();
                        backoff.connected(Instant::now());
                    }

                    let mut shutdown_rx = shared.shutdown_tx.subscribe();
                    match shared.drain_offline_queue(&mut shutdown_rx).await {
                        Ok(drained) => {
                            if drained > 0 {
                                info!(drained, "Drained messages queued before connect");
                            }
                            if self.is_closed() {
                                return Err(DeviceError::Closed);
                            }
                            self.spawn_supervisor(link);
                            return Ok(());
                        }
                        Err(_) if self.is_closed() => {
                            shared.release_session().await;
                            return Err(DeviceError::Closed);
                        }
                        Err(e) => {
                            warn!(error = %e, "Session failed while draining offline queue");
                            shared.metrics.record_connection_failure();
                            shared.release_session().await;
                            last_error = Some(DeviceError::from(e));
                        }
                    }
                }
                Ok(Err(e)) => {
                    shared.metrics.record_connection_failure();
                    if !e.is_retryable() {
                        error!(error = %e, "Broker rejected device credentials");
                        shared.apply(ConnectionEvent::ConnectFailed(e.to_string()));
                        return Err(e.into());
                    }
                    warn!(attempt, error = %e, "Connect attempt failed");
                    last_error = Some(e.into());
                }
                Err(_) => {
                    shared.metrics.record_connection_failure();
                    warn!(
                        attempt,
                        timeout_ms = shared.settings.connect_timeout.as_millis() as u64,
                        "Connect attempt timed out"
                    );
                    shared.release_session().await;
                    last_error = Some(DeviceError::ConnectTimeout {
                        timeout: shared.settings.connect_timeout,
                    });
                }
            }

            if attempt < max_attempts {
                sleep(shared.settings.connect_retry_delay).await;
            }
        }

        let error = last_error
            .unwrap_or_else(|| DeviceError::network("no connect attempt was made"));
        shared.apply(ConnectionEvent::ConnectFailed(error.to_string()));
        Err(error)
    }

    /// Submit a message for delivery.
    ///
    /// Never waits for reconnection; bounded by the operation timeout.
    pub async fn publish(&self, message: OutboundMessage) -> PublishOutcome {
        let shared = &self.shared;
        {
            let mut queue = shared.lock_queue();
            if self.is_closed() {
                shared.metrics.record_rejected();
                debug!(message_id = %message.id, "Publish after disconnect rejected");
                return PublishOutcome::Rejected(RejectReason::Closed);
            }
            if !shared.state().can_publish() {
                return shared.enqueue(&mut queue, message);
            }
        }

        let operation_timeout = shared.settings.operation_timeout;
        match timeout(operation_timeout, shared.transport.publish(&message)).await {
            Ok(Ok(())) => {
                shared.metrics.record_accepted();
                debug!(message_id = %message.id, topic = %message.topic, "Message accepted");
                PublishOutcome::Accepted
            }
            Ok(Err(e)) => shared.handle_send_failure(message, e.to_string()),
            Err(_) => shared.handle_send_failure(
                message,
                format!("publish timed out after {operation_timeout:?}"),
            ),
        }
    }

    /// Tear the connection down.
    ///
    /// Idempotent: only the first call does anything. If messages are queued
    /// while the supervisor is still working, they get up to the flush timeout
    /// to drain; then any pending reconnect wait is cancelled, the session is
    /// released and leftovers are discarded.
    pub async fn disconnect(&self) -> DeviceResult<()> {
        let shared = &self.shared;
        let pending = {
            let queue = shared.lock_queue();
            if shared.closed.swap(true, Ordering::AcqRel) {
                debug!(client_id = %shared.settings.client_id, "Already disconnected");
                return Ok(());
            }
            queue.len()
        };

        info!(client_id = %shared.settings.client_id, "Disconnecting");

        if pending > 0 && self.supervisor_running() && !shared.settings.flush_timeout.is_zero() {
            self.flush(pending).await;
        }

        shared.shutdown_tx.send_replace(true);
        self.stop_supervisor().await;

        let released = timeout(shared.settings.connect_timeout, shared.transport.disconnect()).await;

        let discarded = shared.lock_queue().clear();
        if discarded > 0 {
            shared.metrics.record_dropped(discarded as u64);
            warn!(discarded, "Discarded undelivered offline messages");
        }
        shared.metrics.record_link_lost();
        shared.apply(ConnectionEvent::Shutdown);

        match released {
            Ok(Ok(())) => {
                info!(client_id = %shared.settings.client_id, "Disconnected");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Transport reported an error while closing");
                Err(e.into())
            }
            Err(_) => {
                warn!("Transport did not close within the connect timeout");
                Err(DeviceError::ConnectTimeout {
                    timeout: shared.settings.connect_timeout,
                })
            }
        }
    }

    async fn flush(&self, pending: usize) {
        let shared = &self.shared;
        info!(pending, "Waiting for offline queue to drain before disconnect");
        shared.retry_now.notify_one();

        let mut state_rx = shared.state_tx.subscribe();
        let drained = timeout(
            shared.settings.flush_timeout,
            state_rx.wait_for(ConnectionState::is_connected),
        )
        .await;

        match drained {
            Ok(Ok(_)) => info!("Offline queue drained"),
            _ => warn!(
                remaining = shared.lock_queue().len(),
                "Offline queue not drained before disconnect"
            ),
        }
    }

    fn supervisor_running(&self) -> bool {
        self.supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn spawn_supervisor(&self, link: LinkLost) {
        let shared = self.shared.clone();
        let span = crate::connection_span!(client_id = %shared.settings.client_id);
        let handle = tokio::spawn(supervise(shared, link).instrument(span));
        *self.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn stop_supervisor(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(mut handle) = handle {
            match timeout(SUPERVISOR_SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Supervisor ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Supervisor did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        // Background work must not outlive the manager. Releasing the session
        // needs async; callers are expected to have called disconnect().
        self.shared.shutdown_tx.send_replace(true);
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<T: Transport> Shared<T> {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn lock_queue(&self) -> MutexGuard<'_, OfflineQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_backoff(&self) -> MutexGuard<'_, Backoff> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state machine event. Returns true when the state changed.
    fn apply(&self, event: ConnectionEvent) -> bool {
        let mut transition = None;
        self.state_tx.send_if_modified(|state| {
            match StateMachine::next(*state, &event) {
                Some(next) if next != *state => {
                    transition = Some((*state, next));
                    *state = next;
                    true
                }
                _ => false,
            }
        });

        match transition {
            Some((from, to)) => {
                StateMachine::log_transition(from, to, &event);
                true
            }
            None => false,
        }
    }

    fn enqueue(&self, queue: &mut OfflineQueue, message: OutboundMessage) -> PublishOutcome {
        let message_id = message.id;
        match queue.enqueue(message) {
            EnqueueOutcome::Queued => {
                self.metrics.record_queued();
                debug!(%message_id, queued = queue.len(), "Message queued offline");
                PublishOutcome::QueuedOffline
            }
            EnqueueOutcome::QueuedDroppingOldest(evicted) => {
                self.metrics.record_queued();
                self.metrics.record_dropped(1);
                warn!(
                    %message_id,
                    dropped = %evicted.id,
                    "Offline queue full, dropped oldest message"
                );
                PublishOutcome::QueuedOffline
            }
            EnqueueOutcome::Rejected(_) => {
                self.metrics.record_rejected();
                let reason = match queue.limit() {
                    QueueLimit::Disabled => RejectReason::QueueDisabled,
                    _ => RejectReason::QueueFull,
                };
                warn!(%message_id, %reason, "Message rejected");
                PublishOutcome::Rejected(reason)
            }
        }
    }

    fn handle_send_failure(&self, message: OutboundMessage, reason: String) -> PublishOutcome {
        self.metrics.record_publish_failure();
        warn!(message_id = %message.id, %reason, "Publish failed on live session");

        let outcome = {
            let mut queue = self.lock_queue();
            if self.closed.load(Ordering::Acquire) {
                self.metrics.record_rejected();
                return PublishOutcome::Rejected(RejectReason::Closed);
            }
            if self.apply(ConnectionEvent::LinkLost(reason)) {
                self.metrics.record_link_lost();
            }
            self.enqueue(&mut queue, message)
        };

        self.send_failed.notify_one();
        outcome
    }

    /// Deliver queued messages oldest first, then go `Connected`.
    ///
    /// The state flips only once the queue is seen empty under the queue lock,
    /// so anything published meanwhile lands behind the drained messages. A
    /// message whose delivery fails, or whose drain is abandoned, goes back to
    /// the head of the queue.
    async fn drain_offline_queue(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<usize, TransportError> {
        let mut drained = 0usize;
        loop {
            let in_flight = {
                let mut queue = self.lock_queue();
                match queue.pop_front() {
                    Some(message) => InFlight::new(self, message),
                    None => {
                        self.apply(ConnectionEvent::SessionReady);
                        return Ok(drained);
                    }
                }
            };

            if drained > 0 && !self.settings.drain_interval.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.wait_for(|stop| *stop) => return Err(TransportError::NotConnected),
                    _ = sleep(self.settings.drain_interval) => {}
                }
            }

            let operation_timeout = self.settings.operation_timeout;
            match timeout(operation_timeout, self.transport.publish(in_flight.message())).await {
                Ok(Ok(())) => {
                    let message_id = in_flight.delivered();
                    drained += 1;
                    self.metrics.record_drained();
                    debug!(%message_id, drained, "Drained offline message");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(TransportError::Timeout(operation_timeout)),
            }
        }
    }

    fn requeue_front(&self, message: OutboundMessage) {
        let mut queue = self.lock_queue();
        if *self.shutdown_tx.borrow() {
            self.metrics.record_dropped(1);
            warn!(dropped = %message.id, "Connection closed, discarded undelivered offline message");
            return;
        }
        if let Some(dropped) = queue.requeue_front(message) {
            self.metrics.record_dropped(1);
            warn!(dropped = %dropped.id, "Offline queue full, dropped oldest message instead of requeueing it");
        }
    }

    /// Best-effort release of a dead or half-open session
    async fn release_session(&self) {
        match timeout(self.settings.connect_timeout, self.transport.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Releasing session failed"),
            Err(_) => debug!("Releasing session timed out"),
        }
    }

    /// Backoff loop. Returns the new session's link, or None on shutdown.
    async fn reconnect(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Option<LinkLost> {
        self.release_session().await;

        loop {
            let (delay, attempt) = {
                let mut backoff = self.lock_backoff();
                let delay = backoff.next_delay();
                (delay, backoff.attempts())
            };
            self.apply(ConnectionEvent::ReconnectAttempt(attempt));
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                queued = self.lock_queue().len(),
                "Reconnecting after backoff"
            );

            tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => return None,
                _ = self.retry_now.notified() => debug!("Backoff wait cut short"),
                _ = sleep(delay) => {}
            }

            self.metrics.record_connect_attempt();
            let result = tokio::select! {
                biased;
                _ = shutdown_rx.wait_for(|stop| *stop) => return None,
                result = timeout(self.settings.connect_timeout, self.transport.connect()) => result,
            };

            match result {
                Ok(Ok(link)) => {
                    self.metrics.record_connection_established(true);
                    self.lock_backoff().connected(Instant::now());
                    match self.drain_offline_queue(shutdown_rx).await {
                        Ok(drained) => {
                            info!(attempt, drained, "Session restored");
                            return Some(link);
                        }
                        Err(e) => {
                            if *shutdown_rx.borrow() {
                                return None;
                            }
                            warn!(error = %e, "Session failed while draining offline queue");
                            self.metrics.record_link_lost();
                            self.lock_backoff().link_lost(Instant::now());
                            self.release_session().await;
                        }
                    }
                }
                Ok(Err(e)) => {
                    self.metrics.record_connection_failure();
                    if e.is_retryable() {
                        warn!(attempt, error = %e, "Reconnect attempt failed");
                    } else {
                        error!(attempt, error = %e, "Broker rejected credentials, will keep retrying");
                    }
                }
                Err(_) => {
                    self.metrics.record_connection_failure();
                    warn!(attempt, "Reconnect attempt timed out");
                    self.release_session().await;
                }
            }
        }
    }
}

/// A message taken off the offline queue for delivery.
///
/// Unless marked delivered, it is put back at the head of the queue when
/// dropped, including when the draining future is cancelled.
struct InFlight<'a, T: Transport> {
    shared: &'a Shared<T>,
    message: OutboundMessage,
    delivered: bool,
}

impl<'a, T: Transport> InFlight<'a, T> {
    fn new(shared: &'a Shared<T>, message: OutboundMessage) -> Self {
        Self {
            shared,
            message,
            delivered: false,
        }
    }

    fn message(&self) -> &OutboundMessage {
        &self.message
    }

    /// The broker has the message; returns its id
    fn delivered(mut self) -> uuid::Uuid {
        self.delivered = true;
        self.message.id
    }
}

impl<T: Transport> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if !self.delivered {
            self.shared.requeue_front(self.message.clone());
        }
    }
}

/// Supervisor task: waits for the live session to die, then reconnects.
async fn supervise<T: Transport>(shared: Arc<Shared<T>>, mut link: LinkLost) {
    let mut shutdown_rx = shared.shutdown_tx.subscribe();

    loop {
        let reason = tokio::select! {
            biased;
            _ = shutdown_rx.wait_for(|stop| *stop) => break,
            lost = &mut link => match lost {
                Ok(error) => error.to_string(),
                Err(_) => "session closed by transport".to_string(),
            },
            _ = shared.send_failed.notified() => {
                if shared.state().is_connected() {
                    continue;
                }
                "publish failed".to_string()
            }
        };

        {
            let _queue = shared.lock_queue();
            shared.apply(ConnectionEvent::LinkLost(reason));
        }
        shared.metrics.record_link_lost();
        if shared.lock_backoff().link_lost(Instant::now()) {
            debug!("Session was stable, backoff reset");
        }

        match shared.reconnect(&mut shutdown_rx).await {
            Some(new_link) => link = new_link,
            None => break,
        }
    }

    debug!("Supervisor exiting");
}
