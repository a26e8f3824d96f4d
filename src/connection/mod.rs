//! Device connection: state machine, reconnect backoff and offline queue
//!
//! The pure pieces (`state`, `backoff`, `queue`) hold no I/O; `manager` wires
//! them to a [`Transport`](crate::transport::Transport).

pub mod backoff;
pub mod manager;
pub mod queue;
pub mod state;

pub use backoff::{Backoff, BackoffPolicy};
pub use manager::{ConnectionManager, ConnectionSettings};
pub use queue::{EnqueueOutcome, OfflineQueue, OverflowPolicy, QueueLimit};
pub use state::{ConnectionEvent, ConnectionState, PublishOutcome, RejectReason, StateMachine};
