use std::{
    mem,
    time::{
        Duration,
        Instant,
    },
};

use prometheus::{
    Histogram,
    HistogramVec,
};

use crate::{
    get_desc,
    labels::MetricLabel,
    log_distribution,
    log_distribution_with_labels,
};

/// Observes the elapsed wall time into its histogram when dropped.
pub struct Timer {
    start: Instant,
    histogram: &'static Histogram,
}

impl Timer {
    pub fn new(histogram: &'static Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        tracing::debug!("{elapsed:?} for timer {:?}", get_desc(self.histogram));
        log_distribution(self.histogram, elapsed.as_secs_f64());
    }
}

/// Status timer that records with `status="error"` unless `.finish()` is
/// explicitly called upon success.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    labels: Vec<MetricLabel>,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            labels: vec![MetricLabel::STATUS_ERROR],
        }
    }

    pub fn add_label(&mut self, label: MetricLabel) {
        self.labels.push(label);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish the timer with status success.
    pub fn finish(mut self) -> Duration {
        self.labels[0] = MetricLabel::STATUS_SUCCESS;
        self.elapsed()
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed();
        let labels = mem::take(&mut self.labels);
        log_distribution_with_labels(self.histogram, elapsed.as_secs_f64(), labels);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        register_logbull_histogram,
        StatusTimer,
        Timer,
        STATUS_LABEL,
    };

    register_logbull_histogram!(TIMER_TEST_SECONDS, "Test histogram");
    register_logbull_histogram!(
        STATUS_TIMER_TEST_SECONDS,
        "Test status histogram",
        &STATUS_LABEL
    );

    #[test]
    fn test_timer_records_on_drop() {
        let before = TIMER_TEST_SECONDS.get_sample_count();
        drop(Timer::new(&TIMER_TEST_SECONDS));
        assert_eq!(TIMER_TEST_SECONDS.get_sample_count(), before + 1);
    }

    #[test]
    fn test_status_timer_defaults_to_error() {
        drop(StatusTimer::new(&STATUS_TIMER_TEST_SECONDS));
        let errored = STATUS_TIMER_TEST_SECONDS.with_label_values(&["error"]);
        assert_eq!(errored.get_sample_count(), 1);

        StatusTimer::new(&STATUS_TIMER_TEST_SECONDS).finish();
        let succeeded = STATUS_TIMER_TEST_SECONDS.with_label_values(&["success"]);
        assert_eq!(succeeded.get_sample_count(), 1);
    }
}
