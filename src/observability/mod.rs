//! Observability: forwarding metrics

pub mod metrics;

pub use metrics::{ForwardMetrics, MetricsSnapshot};
