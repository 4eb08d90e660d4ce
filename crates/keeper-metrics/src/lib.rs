//! Prometheus metrics registry and exposition endpoint

pub mod handlers;
pub mod metrics;
pub mod plugin;

pub use metrics::{BackupRunMetrics, KeeperMetrics, FULL, INCREMENTAL};
pub use plugin::MetricsPlugin;
