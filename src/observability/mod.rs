//! Observability for the listener
//!
//! Structured logging through `tracing` and a process-wide set of atomic
//! counters describing connection health and event delivery.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, ListenerMetrics, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{connection_span, frame_span, listener_span};
