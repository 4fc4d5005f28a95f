//! Observability Module
//!
//! - `tracing`: subscriber setup with optional OTLP export
//! - `metrics`: Prometheus metrics for placements, commands and updates
//! - `events`: structured events with a fixed `event_type` field

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
