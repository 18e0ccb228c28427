use metrics::{
    log_counter,
    register_logbull_counter,
    register_logbull_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_logbull_histogram!(
    INGEST_BATCH_SECONDS,
    "Time to validate and enqueue one ingest batch",
    &STATUS_LABEL
);

register_logbull_counter!(
    INGEST_EVENTS_ACCEPTED_TOTAL,
    "Events accepted and handed to the worker engine"
);

register_logbull_counter!(
    INGEST_EVENTS_REJECTED_TOTAL,
    "Events rejected by per-event validation"
);

register_logbull_counter!(
    INGEST_EVENTS_RATE_LIMITED_TOTAL,
    "Events rejected by the per-project rate limiter"
);

register_logbull_counter!(
    INGEST_ENQUEUE_FAILURES_TOTAL,
    "Accepted events that could not be buffered in the worker engine"
);

pub fn ingest_batch_timer() -> StatusTimer {
    StatusTimer::new(&INGEST_BATCH_SECONDS)
}

pub fn log_events_accepted(count: usize) {
    log_counter(&INGEST_EVENTS_ACCEPTED_TOTAL, count as u64);
}

pub fn log_events_rejected(count: usize) {
    log_counter(&INGEST_EVENTS_REJECTED_TOTAL, count as u64);
}

pub fn log_rate_limited(count: usize) {
    log_counter(&INGEST_EVENTS_RATE_LIMITED_TOTAL, count as u64);
}

pub fn log_enqueue_failure() {
    log_counter(&INGEST_ENQUEUE_FAILURES_TOTAL, 1);
}
