//! Metrics module.
//!
//! Provides the injected metrics handle shared by status transitions and
//! the dispatcher, plus a Prometheus text-format exporter over it:
//!
//! - Notification/command/webhook outcome counters
//! - Per-service update-available gauge
//! - Aggregate pending-update gauge by classification

mod collector;
mod prometheus;

pub use collector::{MetricsCollector, MetricsSnapshot, SenderKey, ServiceKey, UpdateClass};
pub use prometheus::PrometheusExporter;
