//! Offline publish queue
//!
//! Holds messages produced while no live session exists, in enqueue order.
//! The queue is bounded or unbounded; what happens on overflow is an explicit
//! policy and every eviction or rejection is reported to the caller.

use crate::protocol::OutboundMessage;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Depth limit of the offline queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLimit {
    Unbounded,
    Bounded(usize),
    /// No offline queueing; messages produced while offline are rejected
    Disabled,
}

impl QueueLimit {
    pub fn capacity(&self) -> Option<usize> {
        match self {
            QueueLimit::Unbounded => None,
            QueueLimit::Bounded(capacity) => Some(*capacity),
            QueueLimit::Disabled => Some(0),
        }
    }
}

/// What a full bounded queue does with a new message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room
    #[default]
    DropOldest,
    /// Refuse the new message
    RejectNew,
}

/// Result of offering a message to the queue
#[derive(Debug, PartialEq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queued after evicting the oldest message
    QueuedDroppingOldest(OutboundMessage),
    /// Not queued; the message is handed back
    Rejected(OutboundMessage),
}

/// Ordered buffer of pending outbound messages
#[derive(Debug)]
pub struct OfflineQueue {
    limit: QueueLimit,
    overflow: OverflowPolicy,
    messages: VecDeque<OutboundMessage>,
}

impl OfflineQueue {
    pub fn new(limit: QueueLimit, overflow: OverflowPolicy) -> Self {
        Self {
            limit,
            overflow,
            messages: VecDeque::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(QueueLimit::Unbounded, OverflowPolicy::DropOldest)
    }

    pub fn limit(&self) -> QueueLimit {
        self.limit
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message at the back, applying the overflow policy
    pub fn enqueue(&mut self, message: OutboundMessage) -> EnqueueOutcome {
        match self.limit {
            QueueLimit::Unbounded => {
                self.messages.push_back(message);
                EnqueueOutcome::Queued
            }
            QueueLimit::Disabled | QueueLimit::Bounded(0) => EnqueueOutcome::Rejected(message),
            QueueLimit::Bounded(capacity) if self.messages.len() < capacity => {
                self.messages.push_back(message);
                EnqueueOutcome::Queued
            }
            QueueLimit::Bounded(_) => match self.overflow {
                OverflowPolicy::RejectNew => EnqueueOutcome::Rejected(message),
                OverflowPolicy::DropOldest => match self.messages.pop_front() {
                    Some(evicted) => {
                        self.messages.push_back(message);
                        EnqueueOutcome::QueuedDroppingOldest(evicted)
                    }
                    None => EnqueueOutcome::Rejected(message),
                },
            },
        }
    }

    /// Take the oldest message for delivery
    pub fn pop_front(&mut self) -> Option<OutboundMessage> {
        self.messages.pop_front()
    }

    /// Put back a message whose drain attempt failed so it stays first in line.
    ///
    /// The message is the oldest one pending. If concurrent enqueues have
    /// filled the queue meanwhile, it is handed back as dropped under either
    /// policy: messages already reported as queued are never evicted for it.
    pub fn requeue_front(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        match self.limit.capacity() {
            Some(capacity) if self.messages.len() >= capacity => Some(message),
            _ => {
                self.messages.push_front(message);
                None
            }
        }
    }

    /// Drop everything still queued, returning how many messages were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.messages.len();
        self.messages.clear();
        discarded
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.messages.iter()
    }
}
