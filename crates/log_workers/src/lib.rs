//! The sharded queue/worker engine between ingestion and storage.
//!
//! Accepted events land in one of `S` in-memory shard buffers (stable hash
//! of the project id, as a load-spread hint). A flusher per shard
//! periodically swaps the buffer out and bulk-enqueues it to the durable
//! queue in one pipelined call; a pool of writer workers bulk-dequeues and
//! writes to the storage adapter.
//!
//! Designed for a single-writer-node deployment: any instance may enqueue,
//! exactly one calls `start_workers`. Delivery is best-effort by design: a
//! swapped-out batch whose enqueue RPC fails is lost with an error log.

use std::{
    collections::BTreeMap,
    mem,
    sync::Arc,
};

use common::{
    backoff::Backoff,
    cache::{
        with_cache_deadline,
        SharedCache,
    },
    errors::report_error,
    knobs::{
        CACHE_REQUEST_TIMEOUT,
        LOG_QUEUE_DEQUEUE_BATCH_SIZE,
        LOG_QUEUE_FLUSH_INTERVAL,
        LOG_QUEUE_SHARDS,
        LOG_QUEUE_SHARD_BUFFER_LIMIT,
        LOG_QUEUE_WORKERS,
        LOG_QUEUE_WORKER_TICK,
        STORE_INITIAL_BACKOFF,
        STORE_MAX_BACKOFF,
    },
    runtime::{
        Runtime,
        SpawnHandle,
    },
    shutdown::{
        ShutdownReceiver,
        ShutdownSignal,
    },
    types::{
        LogItem,
        ProjectId,
    },
};
use futures::FutureExt;
use parking_lot::Mutex;
use storage::LogStorage;

mod metrics;

/// Durable queue the flushers append to and the writer workers drain.
pub const LOG_QUEUE_KEY: &str = "logbull:queue:logs";

struct Shard {
    buffer: Mutex<Vec<LogItem>>,
}

pub struct LogQueueEngine<RT: Runtime> {
    rt: RT,
    cache: Arc<dyn SharedCache>,
    storage: Arc<LogStorage<RT>>,
    shards: Vec<Shard>,
    num_workers: usize,
    shutdown: ShutdownSignal,
    handles: Mutex<Vec<Box<dyn SpawnHandle>>>,
}

/// Poly-31 rolling hash over the project id bytes. Stability across
/// processes or restarts is not required; this only spreads load.
fn shard_for_project(project_id: &ProjectId, num_shards: usize) -> usize {
    let mut hash: u32 = 0;
    for byte in project_id.as_bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(*byte as u32);
    }
    hash as usize % num_shards
}

impl<RT: Runtime> LogQueueEngine<RT> {
    /// Construction takes shard/worker counts so tests can instantiate
    /// bounded variants; production wiring uses [`Self::with_defaults`].
    pub fn new(
        rt: RT,
        cache: Arc<dyn SharedCache>,
        storage: Arc<LogStorage<RT>>,
        num_shards: usize,
        num_workers: usize,
    ) -> Arc<Self> {
        assert!(num_shards > 0, "need at least one shard");
        assert!(num_workers > 0, "need at least one worker");
        let shards = (0..num_shards)
            .map(|_| Shard {
                buffer: Mutex::new(Vec::new()),
            })
            .collect();
        Arc::new(Self {
            rt,
            cache,
            storage,
            shards,
            num_workers,
            shutdown: ShutdownSignal::new(),
            handles: Mutex::new(vec![]),
        })
    }

    /// CPU-derived defaults: `max(nCPU/4, 1)` shards and workers.
    pub fn with_defaults(
        rt: RT,
        cache: Arc<dyn SharedCache>,
        storage: Arc<LogStorage<RT>>,
    ) -> Arc<Self> {
        Self::new(rt, cache, storage, *LOG_QUEUE_SHARDS, *LOG_QUEUE_WORKERS)
    }

    /// Non-blocking single-event enqueue into the caller's shard buffer.
    /// Fails only when the shard buffer is at its soft cap.
    pub fn enqueue(&self, item: LogItem) -> anyhow::Result<()> {
        let shard_index = shard_for_project(&item.project_id, self.shards.len());
        let mut buffer = self.shards[shard_index].buffer.lock();
        if buffer.len() >= *LOG_QUEUE_SHARD_BUFFER_LIMIT {
            metrics::log_shard_overflow();
            anyhow::bail!(
                "shard {shard_index} buffer is full ({} events)",
                buffer.len(),
            );
        }
        buffer.push(item);
        Ok(())
    }

    /// Spawn the per-shard flushers and the writer worker pool. Call once
    /// per deployment.
    pub fn start_workers(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        assert!(handles.is_empty(), "workers already started");
        for shard_index in 0..self.shards.len() {
            let engine = self.clone();
            let receiver = self.shutdown.subscribe();
            handles.push(self.rt.spawn("log_queue_flusher", async move {
                engine.flusher_loop(shard_index, receiver).await;
            }));
        }
        for worker_index in 0..self.num_workers {
            let engine = self.clone();
            let receiver = self.shutdown.subscribe();
            handles.push(self.rt.spawn("log_queue_worker", async move {
                engine.worker_loop(worker_index, receiver).await;
            }));
        }
        tracing::info!(
            "Started {} flushers and {} writer workers",
            self.shards.len(),
            self.num_workers,
        );
    }

    /// Signal shutdown and join every task. Flushers perform one final
    /// flush before returning.
    pub async fn shutdown(&self) {
        self.shutdown.signal();
        let handles: Vec<_> = mem::take(&mut *self.handles.lock());
        for mut handle in handles {
            if let Err(e) = handle.join().await {
                tracing::error!("Worker exited abnormally during shutdown: {e}");
            }
        }
    }

    async fn flusher_loop(self: Arc<Self>, shard_index: usize, mut shutdown: ShutdownReceiver) {
        loop {
            futures::select_biased! {
                _ = shutdown.wait_for_shutdown().fuse() => {
                    self.flush_shard(shard_index).await;
                    return;
                },
                _ = self.rt.wait(*LOG_QUEUE_FLUSH_INTERVAL) => {
                    self.flush_shard(shard_index).await;
                },
            }
        }
    }

    /// Swap the shard's buffer under its lock, then serialize and enqueue
    /// outside it. Single-event serialization failures are skipped; an
    /// enqueue RPC failure drops the swapped-out batch (the next tick
    /// flushes the freshly accumulating buffer).
    async fn flush_shard(&self, shard_index: usize) {
        let batch = {
            let mut buffer = self.shards[shard_index].buffer.lock();
            if buffer.is_empty() {
                return;
            }
            let capacity = (*LOG_QUEUE_DEQUEUE_BATCH_SIZE / self.shards.len()).max(1);
            mem::replace(&mut *buffer, Vec::with_capacity(capacity))
        };

        let mut payloads = Vec::with_capacity(batch.len());
        for item in &batch {
            match serde_json::to_string(item) {
                Ok(payload) => payloads.push(payload),
                Err(e) => tracing::error!("Dropping unserializable event {}: {e}", item.id),
            }
        }
        if payloads.is_empty() {
            return;
        }

        let count = payloads.len();
        match with_cache_deadline(
            *CACHE_REQUEST_TIMEOUT,
            self.cache.enqueue_batch(LOG_QUEUE_KEY, payloads),
        )
        .await
        {
            Ok(()) => metrics::log_events_enqueued(count),
            Err(e) => {
                metrics::log_flush_batch_lost(count);
                tracing::error!(
                    "Failed to enqueue {count} events from shard {shard_index}; batch lost: {e:#}",
                );
            },
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_index: usize, mut shutdown: ShutdownReceiver) {
        let mut backoff = Backoff::new(*STORE_INITIAL_BACKOFF, *STORE_MAX_BACKOFF);
        loop {
            futures::select_biased! {
                _ = shutdown.wait_for_shutdown().fuse() => return,
                _ = self.rt.wait(*LOG_QUEUE_WORKER_TICK) => {},
            }
            match self.drain_queue_once().await {
                Ok(..) => backoff.reset(),
                Err(mut e) => {
                    report_error(&mut e).await;
                    let delay = backoff.fail(&mut self.rt.rng());
                    tracing::error!(
                        "Writer worker {worker_index} failed {} times, backing off {}ms",
                        backoff.failures(),
                        delay.as_millis(),
                    );
                    self.rt.wait(delay).await;
                },
            }
        }
    }

    /// One bulk dequeue + grouped store cycle. Returns the number of events
    /// written.
    async fn drain_queue_once(&self) -> anyhow::Result<usize> {
        let payloads = with_cache_deadline(
            *CACHE_REQUEST_TIMEOUT,
            self.cache
                .dequeue_batch(LOG_QUEUE_KEY, *LOG_QUEUE_DEQUEUE_BATCH_SIZE),
        )
        .await?;
        if payloads.is_empty() {
            return Ok(0);
        }
        let started = self.rt.monotonic_now();

        let mut batches: BTreeMap<ProjectId, Vec<LogItem>> = BTreeMap::new();
        let mut events = 0usize;
        for payload in &payloads {
            match serde_json::from_str::<LogItem>(payload) {
                Ok(item) => {
                    events += 1;
                    batches.entry(item.project_id).or_default().push(item);
                },
                Err(e) => tracing::error!("Dropping undecodable queue payload: {e}"),
            }
        }
        let projects = batches.len();
        self.storage.store_batch(batches).await?;

        metrics::log_events_stored(events);
        tracing::debug!(
            "Stored {events} events across {projects} projects in {:?}",
            self.rt.monotonic_now() - started,
        );
        Ok(events)
    }

    /// Test hook: flush every shard once, then run one dequeue+store cycle
    /// synchronously. No behavioural differences otherwise.
    pub async fn run_background_tasks_for_test(&self) -> anyhow::Result<()> {
        for shard_index in 0..self.shards.len() {
            self.flush_shard(shard_index).await;
        }
        self.drain_queue_once().await?;
        Ok(())
    }
}
