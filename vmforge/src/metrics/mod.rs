//! Manager-wide counters.

mod runtime_metrics;

pub use runtime_metrics::{RuntimeMetrics, RuntimeMetricsStorage};
