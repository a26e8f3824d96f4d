//! Wire-level message types and topic rules
//!
//! This module implements the outbound message unit, the telemetry payload
//! and the topic conventions used by devices.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
