//! Thread-safe connection metrics
//!
//! Atomic counters tracking publish outcomes and connection churn. Each
//! connection owns its own collector; nothing is process-global, so device
//! connections running side by side never share counters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-connection metrics collector
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    reconnects: AtomicU64,
    messages_accepted: AtomicU64,
    messages_queued: AtomicU64,
    messages_rejected: AtomicU64,
    messages_dropped: AtomicU64,
    messages_drained: AtomicU64,
    publish_failures: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self, reconnect: bool) {
        self.connected.store(true, Ordering::Relaxed);
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if reconnect {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_link_lost(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.messages_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages evicted by the drop-oldest policy or discarded at teardown
    pub fn record_dropped(&self, count: u64) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_drained(&self) {
        self.messages_drained.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages_accepted: self.messages_accepted.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            messages_drained: self.messages_drained.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connected: bool,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub reconnects: u64,
    pub messages_accepted: u64,
    pub messages_queued: u64,
    pub messages_rejected: u64,
    pub messages_dropped: u64,
    pub messages_drained: u64,
    pub publish_failures: u64,
}
