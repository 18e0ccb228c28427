//! The shared cache: a string-keyed external service (counters with expiry
//! plus batch queue operations) used for rate limiting, concurrent-query
//! slots, and the durable log queue.
//!
//! All calls are network I/O in production, so every call site wraps them in
//! [`with_cache_deadline`]; no lock is ever held across one.

use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    future::Future,
    time::{
        Duration,
        Instant,
    },
};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;

/// String-keyed commands the backend needs from the shared cache. Mirrors
/// the subset of a Redis-style API we use: INCR/DECR/EXPIRE/GET/KEYS/DEL
/// plus pipelined batch enqueue/dequeue on lists.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Atomically increment `key` by `delta` and (re)arm its TTL: one
    /// pipelined RPC. A missing key counts from zero.
    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl: Duration) -> anyhow::Result<i64>;

    /// Decrement `key`, creating it at -1 if absent. Does not touch the TTL.
    async fn decr(&self, key: &str) -> anyhow::Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Keys matching `pattern`. Only the trailing-`*` prefix form is used.
    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Append `items` to the named queue in one pipelined RPC, preserving
    /// their order.
    async fn enqueue_batch(&self, queue: &str, items: Vec<String>) -> anyhow::Result<()>;

    /// Non-blocking pop of up to `max_items` from the named queue.
    async fn dequeue_batch(&self, queue: &str, max_items: usize) -> anyhow::Result<Vec<String>>;

    async fn queue_len(&self, queue: &str) -> anyhow::Result<u64>;
}

/// Bound a cache call by the standard deadline. Timeouts surface as plain
/// internal errors: the cache is infrastructure, not user input.
pub async fn with_cache_deadline<T>(
    deadline: Duration,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .context("shared cache call timed out")?
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    queues: HashMap<String, VecDeque<String>>,
    #[cfg(any(test, feature = "testing"))]
    clock_skew: Duration,
}

/// Process-local [`SharedCache`] used for single-node deployments and
/// tests. Expiry is evaluated lazily on access.
pub struct InMemorySharedCache {
    inner: Mutex<Inner>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Shift the cache's notion of "now" forward, expiring entries as if
    /// the duration had elapsed.
    #[cfg(any(test, feature = "testing"))]
    pub fn advance_clock(&self, duration: Duration) {
        self.inner.lock().clock_skew += duration;
    }
}

impl Inner {
    fn now(&self) -> Instant {
        #[cfg(any(test, feature = "testing"))]
        {
            Instant::now() + self.clock_skew
        }
        #[cfg(not(any(test, feature = "testing")))]
        {
            Instant::now()
        }
    }

    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let now = self.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at.is_some_and(|deadline| deadline <= now) {
                self.entries.remove(key);
                return None;
            }
        }
        self.entries.get_mut(key)
    }

    fn parse_counter(entry: Option<&Entry>) -> anyhow::Result<i64> {
        match entry {
            None => Ok(0),
            Some(entry) => entry
                .value
                .parse()
                .with_context(|| format!("cache value {:?} is not a counter", entry.value)),
        }
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut inner = self.inner.lock();
        Ok(inner.live_entry(key).map(|e| e.value.clone()))
    }

    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl: Duration) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock();
        let current = Inner::parse_counter(inner.live_entry(key).map(|e| &*e))?;
        let next = current + delta;
        let expires_at = Some(inner.now() + ttl);
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn decr(&self, key: &str) -> anyhow::Result<i64> {
        let mut inner = self.inner.lock();
        let (current, expires_at) = match inner.live_entry(key) {
            Some(entry) => (
                Inner::parse_counter(Some(&*entry))?,
                entry.expires_at,
            ),
            None => (0, None),
        };
        let next = current - 1;
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let deadline = inner.now() + ttl;
        if let Some(entry) = inner.live_entry(key) {
            entry.expires_at = Some(deadline);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let now = inner.now();
        inner
            .entries
            .retain(|_, entry| !entry.expires_at.is_some_and(|deadline| deadline <= now));
        let matches = |key: &str| match pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == pattern,
        };
        Ok(inner
            .entries
            .keys()
            .filter(|k| matches(k))
            .cloned()
            .collect())
    }

    async fn enqueue_batch(&self, queue: &str, items: Vec<String>) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner
            .queues
            .entry(queue.to_owned())
            .or_default()
            .extend(items);
        Ok(())
    }

    async fn dequeue_batch(&self, queue: &str, max_items: usize) -> anyhow::Result<Vec<String>> {
        let mut inner = self.inner.lock();
        let Some(q) = inner.queues.get_mut(queue) else {
            return Ok(vec![]);
        };
        let n = max_items.min(q.len());
        Ok(q.drain(..n).collect())
    }

    async fn queue_len(&self, queue: &str) -> anyhow::Result<u64> {
        let inner = self.inner.lock();
        Ok(inner.queues.get(queue).map_or(0, |q| q.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        InMemorySharedCache,
        SharedCache,
    };

    #[tokio::test]
    async fn test_counter_expiry() -> anyhow::Result<()> {
        let cache = InMemorySharedCache::new();
        assert_eq!(
            cache
                .incr_with_expiry("k", 1, Duration::from_secs(60))
                .await?,
            1
        );
        assert_eq!(
            cache
                .incr_with_expiry("k", 1, Duration::from_secs(60))
                .await?,
            2
        );
        cache.advance_clock(Duration::from_secs(61));
        assert_eq!(
            cache
                .incr_with_expiry("k", 1, Duration::from_secs(60))
                .await?,
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_preserves_order() -> anyhow::Result<()> {
        let cache = InMemorySharedCache::new();
        cache
            .enqueue_batch("q", vec!["a".into(), "b".into()])
            .await?;
        cache.enqueue_batch("q", vec!["c".into()]).await?;
        assert_eq!(cache.queue_len("q").await?, 3);
        assert_eq!(cache.dequeue_batch("q", 2).await?, vec!["a", "b"]);
        assert_eq!(cache.dequeue_batch("q", 10).await?, vec!["c"]);
        assert!(cache.dequeue_batch("q", 10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_keys_prefix_match() -> anyhow::Result<()> {
        let cache = InMemorySharedCache::new();
        cache
            .incr_with_expiry("slots:u1", 1, Duration::from_secs(60))
            .await?;
        cache
            .incr_with_expiry("slots:u2", 1, Duration::from_secs(60))
            .await?;
        cache
            .incr_with_expiry("other:u3", 1, Duration::from_secs(60))
            .await?;
        let mut keys = cache.keys("slots:*").await?;
        keys.sort();
        assert_eq!(keys, vec!["slots:u1", "slots:u2"]);
        Ok(())
    }
}
