//! Per-user concurrent-query slots over the shared cache.
//!
//! Acquire is one atomic increment-with-expiry; exceeding the cap
//! decrements back and fails. The TTL armed at acquire time reclaims slots
//! held by crashed callers.

use std::sync::Arc;

use common::{
    cache::{
        with_cache_deadline,
        SharedCache,
    },
    knobs::{
        CACHE_CLEANUP_TIMEOUT,
        CACHE_REQUEST_TIMEOUT,
        CONCURRENT_QUERY_SLOT_TTL,
        MAX_CONCURRENT_QUERIES_PER_USER,
    },
    types::UserId,
};
use errors::ErrorMetadata;

use crate::metrics::log_concurrent_query_rejected;

pub const TOO_MANY_CONCURRENT_QUERIES: &str = "TOO_MANY_CONCURRENT_QUERIES";

const SLOT_KEY_PREFIX: &str = "logbull:query_slots:";

#[derive(Clone)]
pub struct ConcurrentQueryLimiter {
    cache: Arc<dyn SharedCache>,
}

impl ConcurrentQueryLimiter {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    fn slot_key(user_id: UserId) -> String {
        format!("{SLOT_KEY_PREFIX}{user_id}")
    }

    pub async fn acquire(&self, user_id: UserId) -> anyhow::Result<()> {
        let key = Self::slot_key(user_id);
        let held = with_cache_deadline(
            *CACHE_REQUEST_TIMEOUT,
            self.cache.incr_with_expiry(&key, 1, *CONCURRENT_QUERY_SLOT_TTL),
        )
        .await?;
        if held > *MAX_CONCURRENT_QUERIES_PER_USER {
            // Give the slot back before failing; if this decrement is lost
            // the TTL will still reclaim it.
            if let Err(e) =
                with_cache_deadline(*CACHE_REQUEST_TIMEOUT, self.cache.decr(&key)).await
            {
                tracing::error!("Failed to return over-cap query slot for {user_id}: {e:#}");
            }
            log_concurrent_query_rejected();
            return Err(anyhow::anyhow!(ErrorMetadata::rate_limited(
                TOO_MANY_CONCURRENT_QUERIES,
                format!(
                    "You already have {} queries running. Wait for one to finish and retry.",
                    *MAX_CONCURRENT_QUERIES_PER_USER,
                ),
                None,
            )));
        }
        Ok(())
    }

    /// Release failures are logged, not surfaced: the query result must not
    /// depend on slot bookkeeping, and the TTL bounds any leak.
    pub async fn release(&self, user_id: UserId) {
        let key = Self::slot_key(user_id);
        if let Err(e) = with_cache_deadline(*CACHE_REQUEST_TIMEOUT, self.cache.decr(&key)).await {
            tracing::error!("Failed to release query slot for {user_id}: {e:#}");
        }
    }

    /// Drop every slot counter in the namespace. Run once at service start
    /// to defeat stale slots from prior runs.
    pub async fn clear_all_slots(&self) -> anyhow::Result<()> {
        with_cache_deadline(*CACHE_CLEANUP_TIMEOUT, async {
            let keys = self.cache.keys(&format!("{SLOT_KEY_PREFIX}*")).await?;
            let cleared = keys.len();
            for key in keys {
                self.cache.delete(&key).await?;
            }
            if cleared > 0 {
                tracing::info!("Cleared {cleared} stale concurrent-query slots");
            }
            Ok(())
        })
        .await
    }
}
