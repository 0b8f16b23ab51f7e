//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! Structured logs go through `tracing` at the call sites; counters go
//! through `MetricsEvent` so tests can observe them without a subscriber.

pub mod metrics;
pub mod sink;

// re-exports
pub use metrics::{EventOps, EventReport};
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all};
