//! Observability: structured logging and per-connection metrics

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{ConnectionMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{connection_span, publish_span};
