//! Per-project token bucket over the shared cache.
//!
//! A project with steady rate `r` gets a bucket of `burst = 5·r` tokens per
//! burst window; one atomic increment-with-expiry against the shared cache
//! admits or rejects the batch. The bucket key rotates with the window, so
//! state is self-expiring. Not strictly consistent across instances:
//! transient over-admission of a small multiple of the burst is acceptable.

use std::{
    sync::Arc,
    time::Duration,
};

use common::{
    cache::{
        with_cache_deadline,
        SharedCache,
    },
    knobs::{
        CACHE_REQUEST_TIMEOUT,
        RATE_LIMIT_BURST_MULTIPLIER,
    },
    runtime::Runtime,
    types::ProjectId,
};

use crate::metrics::log_rate_limited;

#[derive(Clone)]
pub struct ProjectRateLimiter<RT: Runtime> {
    rt: RT,
    cache: Arc<dyn SharedCache>,
}

impl<RT: Runtime> ProjectRateLimiter<RT> {
    pub fn new(rt: RT, cache: Arc<dyn SharedCache>) -> Self {
        Self { rt, cache }
    }

    /// Check whether `event_count` more events fit the project's budget.
    /// Returns `None` when admitted, or the time until enough tokens refill
    /// (for the `Retry-After` header) when rejected. A zero limit admits
    /// everything.
    pub async fn check(
        &self,
        project_id: ProjectId,
        logs_per_second_limit: u64,
        event_count: usize,
    ) -> anyhow::Result<Option<Duration>> {
        if logs_per_second_limit == 0 {
            return Ok(None);
        }
        let window_secs = *RATE_LIMIT_BURST_MULTIPLIER;
        let burst = logs_per_second_limit * window_secs;

        let now_secs = self.rt.unix_timestamp().as_secs();
        let window_index = now_secs / window_secs;
        let key = format!("logbull:rate_limit:{project_id}:{window_index}");
        let admitted = with_cache_deadline(
            *CACHE_REQUEST_TIMEOUT,
            self.cache.incr_with_expiry(
                &key,
                event_count as i64,
                Duration::from_secs(window_secs * 2),
            ),
        )
        .await?;

        if admitted as u64 <= burst {
            return Ok(None);
        }
        log_rate_limited(event_count);
        let retry_after = window_secs - (now_secs % window_secs);
        Ok(Some(Duration::from_secs(retry_after.max(1))))
    }
}
