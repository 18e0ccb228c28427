//! Code for interacting with our metrics logging.
//!
//! Metrics are declared with the `register_logbull_*!` macros, live in a
//! process-wide registry, and are exposed in Prometheus text format by the
//! HTTP layer's `/metrics` endpoint.

use std::{
    env,
    sync::LazyLock,
};

mod labels;
mod macros;
mod registry;
mod reporting;
mod timer;

// Re-exported for the `register_logbull_*!` macro expansions.
pub use paste::paste;
pub use prometheus;

pub use crate::{
    labels::{
        IntoLabel,
        MetricLabel,
        STATUS_LABEL,
    },
    registry::LOGBULL_METRICS_REGISTRY,
    reporting::{
        get_desc,
        log_counter,
        log_counter_with_labels,
        log_distribution,
        log_distribution_with_labels,
        log_gauge,
        log_gauge_with_labels,
        log_invalid_metric,
    },
    timer::{
        StatusTimer,
        Timer,
    },
};

/// Name of the running binary, used to tag HTTP request metrics.
pub static SERVICE_NAME: LazyLock<String> = LazyLock::new(|| {
    env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "logbull".to_owned())
});
