use metrics::{
    log_counter,
    register_logbull_counter,
    register_logbull_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_logbull_histogram!(
    QUERY_EXECUTE_SECONDS,
    "End-to-end time to serve one structured query",
    &STATUS_LABEL
);

register_logbull_counter!(
    QUERY_CONCURRENCY_REJECTIONS_TOTAL,
    "Queries rejected because the caller held the maximum concurrent slots"
);

register_logbull_counter!(
    QUERY_FIELD_DISCOVERY_FALLBACKS_TOTAL,
    "Field discovery failures served from the predefined field set"
);

pub fn execute_query_timer() -> StatusTimer {
    StatusTimer::new(&QUERY_EXECUTE_SECONDS)
}

pub fn log_concurrent_query_rejected() {
    log_counter(&QUERY_CONCURRENCY_REJECTIONS_TOTAL, 1);
}

pub fn log_field_discovery_fallback() {
    log_counter(&QUERY_FIELD_DISCOVERY_FALLBACKS_TOTAL, 1);
}
