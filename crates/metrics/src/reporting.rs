use std::collections::HashMap;

use prometheus::{
    core::Collector,
    Gauge,
    GaugeVec,
    Histogram,
    HistogramVec,
    IntCounter,
    IntCounterVec,
};

use crate::labels::MetricLabel;

pub fn log_counter(counter: &IntCounter, increment: u64) {
    counter.inc_by(increment);
}

pub fn log_counter_with_labels(counter: &IntCounterVec, increment: u64, labels: Vec<MetricLabel>) {
    match counter.get_metric_with(&label_map(&labels)) {
        Ok(metric) => metric.inc_by(increment),
        Err(e) => log_invalid_metric(get_desc(counter), e),
    }
}

pub fn log_gauge(gauge: &Gauge, value: f64) {
    gauge.set(value);
}

pub fn log_gauge_with_labels(gauge: &GaugeVec, value: f64, labels: Vec<MetricLabel>) {
    match gauge.get_metric_with(&label_map(&labels)) {
        Ok(metric) => metric.set(value),
        Err(e) => log_invalid_metric(get_desc(gauge), e),
    }
}

pub fn log_distribution(histogram: &Histogram, value: f64) {
    histogram.observe(value);
}

pub fn log_distribution_with_labels(
    histogram: &HistogramVec,
    value: f64,
    labels: Vec<MetricLabel>,
) {
    match histogram.get_metric_with(&label_map(&labels)) {
        Ok(metric) => metric.observe(value),
        Err(e) => log_invalid_metric(get_desc(histogram), e),
    }
}

pub fn get_desc<M: Collector>(metric: &M) -> String {
    metric
        .desc()
        .first()
        .map(|d| d.fq_name.clone())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Mislabeled observations are dropped with a log line rather than
/// propagated: metrics must never fail the operation they observe.
pub fn log_invalid_metric(desc: String, e: prometheus::Error) {
    tracing::error!("Failed to record metric {desc}: {e}");
}

fn label_map<'a>(labels: &'a [MetricLabel]) -> HashMap<&'a str, &'a str> {
    labels.iter().map(MetricLabel::split_key_value).collect()
}
