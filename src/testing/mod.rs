//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for exercising the device client
//! without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
