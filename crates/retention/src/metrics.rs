use metrics::{
    log_counter_with_labels,
    register_logbull_counter,
    register_logbull_histogram,
    MetricLabel,
    Timer,
};

register_logbull_histogram!(
    RETENTION_SWEEP_SECONDS,
    "Time for one retention sweep over all projects"
);

register_logbull_counter!(
    RETENTION_LOGS_DELETED_TOTAL,
    "Logs deleted by retention enforcement, by dimension",
    &["dimension"]
);

pub fn sweep_timer() -> Timer {
    Timer::new(&RETENTION_SWEEP_SECONDS)
}

pub fn log_deleted(dimension: &'static str, count: u64) {
    log_counter_with_labels(
        &RETENTION_LOGS_DELETED_TOTAL,
        count,
        vec![MetricLabel::new_const("dimension", dimension)],
    );
}
