use metrics::{
    log_counter,
    register_logbull_counter,
};

register_logbull_counter!(
    WORKER_EVENTS_ENQUEUED_TOTAL,
    "Events bulk-enqueued to the durable queue by shard flushers"
);

register_logbull_counter!(
    WORKER_EVENTS_STORED_TOTAL,
    "Events written to the storage adapter by writer workers"
);

register_logbull_counter!(
    WORKER_FLUSH_BATCHES_LOST_TOTAL,
    "Events dropped because the enqueue RPC for their flush batch failed"
);

register_logbull_counter!(
    WORKER_SHARD_OVERFLOWS_TOTAL,
    "Enqueues rejected because the shard buffer hit its soft cap"
);

pub fn log_events_enqueued(count: usize) {
    log_counter(&WORKER_EVENTS_ENQUEUED_TOTAL, count as u64);
}

pub fn log_events_stored(count: usize) {
    log_counter(&WORKER_EVENTS_STORED_TOTAL, count as u64);
}

pub fn log_flush_batch_lost(count: usize) {
    log_counter(&WORKER_FLUSH_BATCHES_LOST_TOTAL, count as u64);
}

pub fn log_shard_overflow() {
    log_counter(&WORKER_SHARD_OVERFLOWS_TOTAL, 1);
}
