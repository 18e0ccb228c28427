//! Tunable limits and parameters for the backend.
//!
//! Every knob can be overridden with an environment variable of the same
//! name. Each knob has a comment explaining what it's for so an oncall
//! engineer can adjust it safely if needed.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::env_config;

/// Set a consistent thread stack size regardless of environment. This is
/// 2x Rust's default.
pub static RUNTIME_STACK_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_STACK_SIZE", 4 * 1024 * 1024));

/// 0 -> default (number of cores).
pub static RUNTIME_WORKER_THREADS: LazyLock<usize> =
    LazyLock::new(|| env_config("RUNTIME_WORKER_THREADS", 0));

/// How often each accumulation shard flushes its buffer to the durable
/// queue.
pub static LOG_QUEUE_FLUSH_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("LOG_QUEUE_FLUSH_INTERVAL_MS", 1000)));

/// How many queued payloads a writer worker pops per tick.
pub static LOG_QUEUE_DEQUEUE_BATCH_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("LOG_QUEUE_DEQUEUE_BATCH_SIZE", 1000));

/// How often each writer worker polls the durable queue.
pub static LOG_QUEUE_WORKER_TICK: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("LOG_QUEUE_WORKER_TICK_MS", 1000)));

/// Number of bulk-storage writer workers. 0 -> max(nCPU/4, 1).
pub static LOG_QUEUE_WORKERS: LazyLock<usize> = LazyLock::new(|| {
    let configured = env_config("LOG_QUEUE_WORKERS", 0);
    if configured > 0 {
        return configured;
    }
    (num_cpus::get() / 4).max(1)
});

/// Number of in-memory accumulation shards (one flusher each).
/// 0 -> max(nCPU/4, 1).
pub static LOG_QUEUE_SHARDS: LazyLock<usize> = LazyLock::new(|| {
    let configured = env_config("LOG_QUEUE_SHARDS", 0);
    if configured > 0 {
        return configured;
    }
    (num_cpus::get() / 4).max(1)
});

/// Soft cap on events buffered per shard between flushes. Enqueues beyond
/// this fail (and are logged by the ingest path) rather than grow memory
/// without bound.
pub static LOG_QUEUE_SHARD_BUFFER_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("LOG_QUEUE_SHARD_BUFFER_LIMIT", 100_000));

/// Deadline for any single shared-cache call.
pub static CACHE_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CACHE_REQUEST_TIMEOUT_SECS", 5)));

/// Deadline for the startup cleanup of the concurrent-query namespace.
pub static CACHE_CLEANUP_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CACHE_CLEANUP_TIMEOUT_SECS", 30)));

/// Overall ceiling on query execution, enforced by the storage adapter.
/// Exceeding it surfaces as `QUERY_TIMEOUT`.
pub static QUERY_EXECUTION_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("QUERY_EXECUTION_TIMEOUT_SECS", 30)));

/// Hard cap on simultaneously executing queries per user.
pub static MAX_CONCURRENT_QUERIES_PER_USER: LazyLock<i64> =
    LazyLock::new(|| env_config("MAX_CONCURRENT_QUERIES_PER_USER", 3));

/// TTL armed on a user's query-slot counter at acquire time, so crashed
/// callers eventually stop blocking new queries.
pub static CONCURRENT_QUERY_SLOT_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("CONCURRENT_QUERY_SLOT_TTL_SECS", 30 * 60)));

/// Maximum number of events in one ingest request.
pub static MAX_LOGS_PER_BATCH: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_LOGS_PER_BATCH", 1000));

/// Maximum aggregate serialized size of one ingest request.
pub static MAX_BATCH_SIZE_BYTES: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_BATCH_SIZE_BYTES", 10 * 1024 * 1024));

/// Maximum length of a log message in characters.
pub static MAX_LOG_MESSAGE_CHARS: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_LOG_MESSAGE_CHARS", 10_000));

/// Maximum depth of a query tree.
pub static QUERY_MAX_TREE_DEPTH: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_TREE_DEPTH", 10));

/// Maximum total nodes in a query tree.
pub static QUERY_MAX_TREE_NODES: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_TREE_NODES", 50));

/// Maximum children of a logical node.
pub static QUERY_MAX_LOGICAL_CHILDREN: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_LOGICAL_CHILDREN", 20));

/// Maximum length of a condition's string value.
pub static QUERY_MAX_VALUE_LENGTH: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_VALUE_LENGTH", 1000));

/// Maximum array length for `IN`/`NOT_IN` values.
pub static QUERY_MAX_ARRAY_VALUES: LazyLock<usize> =
    LazyLock::new(|| env_config("QUERY_MAX_ARRAY_VALUES", 100));

/// Default page size for queries when the request omits `limit`.
pub static DEFAULT_QUERY_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("DEFAULT_QUERY_LIMIT", 100));

/// Largest page size a query may request.
pub static MAX_QUERY_LIMIT: LazyLock<usize> = LazyLock::new(|| env_config("MAX_QUERY_LIMIT", 1000));

/// Largest offset a query may request.
pub static MAX_QUERY_OFFSET: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_QUERY_OFFSET", 10_000));

/// How many distinct custom-field tokens field discovery fetches.
pub static FIELD_DISCOVERY_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("FIELD_DISCOVERY_LIMIT", 1000));

/// Burst multiplier for the per-project rate limiter: a project with steady
/// rate `r` may burst up to `multiplier * r` within one bucket window.
pub static RATE_LIMIT_BURST_MULTIPLIER: LazyLock<u64> =
    LazyLock::new(|| env_config("RATE_LIMIT_BURST_MULTIPLIER", 5));

/// How often the retention enforcer sweeps all projects.
pub static RETENTION_SWEEP_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("RETENTION_SWEEP_INTERVAL_SECS", 300)));

/// Count quotas at or below this use the small cleanup fraction.
pub static RETENTION_COUNT_QUOTA_SMALL_LIMIT: LazyLock<u64> =
    LazyLock::new(|| env_config("RETENTION_COUNT_QUOTA_SMALL_LIMIT", 10_000));

/// Size quotas (MB) at or below this use the small cleanup fraction.
pub static RETENTION_SIZE_QUOTA_SMALL_MB: LazyLock<u64> =
    LazyLock::new(|| env_config("RETENTION_SIZE_QUOTA_SMALL_MB", 10));

/// Post-cleanup target fraction of a small quota.
pub static RETENTION_CLEANUP_FRACTION_SMALL: LazyLock<f64> =
    LazyLock::new(|| env_config("RETENTION_CLEANUP_FRACTION_SMALL", 0.85));

/// Post-cleanup target fraction of a large quota.
pub static RETENTION_CLEANUP_FRACTION_LARGE: LazyLock<f64> =
    LazyLock::new(|| env_config("RETENTION_CLEANUP_FRACTION_LARGE", 0.90));

/// TTL for cached project settings (both positive and not-exists entries).
pub static PROJECT_CACHE_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("PROJECT_CACHE_TTL_SECS", 60)));

/// TTL for the cached per-project stats used by the ingest quota gate.
pub static PROJECT_STATS_CACHE_TTL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("PROJECT_STATS_CACHE_TTL_SECS", 30)));

/// First retry delay for transient bulk-write failures.
pub static STORE_INITIAL_BACKOFF: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_millis(env_config("STORE_INITIAL_BACKOFF_MS", 50)));

/// Ceiling on the bulk-write retry delay.
pub static STORE_MAX_BACKOFF: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("STORE_MAX_BACKOFF_SECS", 10)));

/// Bulk-write attempts before giving up on a batch.
pub static STORE_MAX_ATTEMPTS: LazyLock<u32> = LazyLock::new(|| env_config("STORE_MAX_ATTEMPTS", 5));
