use metrics::{
    log_counter,
    register_logbull_counter,
    register_logbull_histogram,
    StatusTimer,
    STATUS_LABEL,
};

register_logbull_histogram!(
    STORAGE_STORE_BATCH_SECONDS,
    "Time to bulk write one batch to the search backend, including retries",
    &STATUS_LABEL
);

register_logbull_histogram!(
    STORAGE_EXECUTE_QUERY_SECONDS,
    "Time to execute one structured query against the search backend",
    &STATUS_LABEL
);

register_logbull_counter!(
    STORAGE_DOCUMENTS_STORED_TOTAL,
    "Number of log documents acknowledged by the search backend"
);

register_logbull_counter!(
    STORAGE_DOCUMENTS_DELETED_TOTAL,
    "Number of log documents deleted by retention or project deletion"
);

pub fn store_batch_timer() -> StatusTimer {
    StatusTimer::new(&STORAGE_STORE_BATCH_SECONDS)
}

pub fn execute_query_timer() -> StatusTimer {
    StatusTimer::new(&STORAGE_EXECUTE_QUERY_SECONDS)
}

pub fn log_documents_stored(count: usize) {
    log_counter(&STORAGE_DOCUMENTS_STORED_TOTAL, count as u64);
}

pub fn log_documents_deleted(count: u64) {
    log_counter(&STORAGE_DOCUMENTS_DELETED_TOTAL, count);
}
