//! Composition root: wires the ingestion pipeline, worker engine, query
//! engine, and retention enforcement against concrete cache/search/auth
//! collaborators, and owns the background task lifecycle.

use std::sync::Arc;

use common::{
    auth::{
        AccessChecker,
        ApiKeyValidator,
        AuditLogWriter,
        Identity,
    },
    cache::SharedCache,
    projects::{
        ProjectProvider,
        ProjectStore,
    },
    query::{
        LogQueryRequest,
        LogQueryResponse,
        QueryableField,
    },
    runtime::{
        shutdown_and_join,
        Runtime,
        SpawnHandle,
    },
    search::SearchBackend,
    types::{
        ProjectId,
        ProjectLogStats,
    },
};
use ingestion::{
    IncomingLogEvent,
    IngestOutcome,
    IngestionService,
    ProjectRateLimiter,
    QuotaGate,
};
use log_workers::LogQueueEngine;
use parking_lot::Mutex;
use query_engine::{
    ConcurrentQueryLimiter,
    QueryService,
};
use retention::RetentionWorker;
use storage::LogStorage;

pub mod local;
pub mod projects;
#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;

use crate::projects::CachedProjectProvider;

pub struct Application<RT: Runtime> {
    rt: RT,
    storage: Arc<LogStorage<RT>>,
    engine: Arc<LogQueueEngine<RT>>,
    projects: Arc<dyn ProjectProvider>,
    ingestion: IngestionService<RT>,
    queries: QueryService<RT>,
    limiter: ConcurrentQueryLimiter,
    handles: Mutex<Vec<Box<dyn SpawnHandle>>>,
}

impl<RT: Runtime> Application<RT> {
    /// Production wiring: CPU-derived shard and worker counts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rt: RT,
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn SharedCache>,
        project_store: Arc<dyn ProjectStore>,
        api_keys: Arc<dyn ApiKeyValidator>,
        access: Arc<dyn AccessChecker>,
        audit: Arc<dyn AuditLogWriter>,
    ) -> Self {
        Self::with_engine_size(
            rt, backend, cache, project_store, api_keys, access, audit, None,
        )
    }

    /// Tests pass `Some((num_shards, num_workers))` to bound the engine.
    #[allow(clippy::too_many_arguments)]
    pub fn with_engine_size(
        rt: RT,
        backend: Arc<dyn SearchBackend>,
        cache: Arc<dyn SharedCache>,
        project_store: Arc<dyn ProjectStore>,
        api_keys: Arc<dyn ApiKeyValidator>,
        access: Arc<dyn AccessChecker>,
        audit: Arc<dyn AuditLogWriter>,
        engine_size: Option<(usize, usize)>,
    ) -> Self {
        let storage = Arc::new(LogStorage::new(rt.clone(), backend));
        let engine = match engine_size {
            Some((num_shards, num_workers)) => LogQueueEngine::new(
                rt.clone(),
                cache.clone(),
                storage.clone(),
                num_shards,
                num_workers,
            ),
            None => LogQueueEngine::with_defaults(rt.clone(), cache.clone(), storage.clone()),
        };
        let projects: Arc<dyn ProjectProvider> =
            Arc::new(CachedProjectProvider::new(project_store));
        let ingestion = IngestionService::new(
            rt.clone(),
            projects.clone(),
            api_keys,
            ProjectRateLimiter::new(rt.clone(), cache.clone()),
            QuotaGate::new(storage.clone()),
            engine.clone(),
            audit.clone(),
        );
        let limiter = ConcurrentQueryLimiter::new(cache);
        let queries = QueryService::new(storage.clone(), limiter.clone(), access, audit);
        Self {
            rt,
            storage,
            engine,
            projects,
            ingestion,
            queries,
            limiter,
            handles: Mutex::new(vec![]),
        }
    }

    /// Startup hygiene plus the background fleet: stale query slots are
    /// cleared, then the worker engine and the retention sweep start.
    pub async fn start_system_workers(&self) -> anyhow::Result<()> {
        self.limiter.clear_all_slots().await?;
        self.engine.start_workers();
        let retention_worker = RetentionWorker::new(
            self.rt.clone(),
            self.projects.clone(),
            self.storage.clone(),
        );
        let handle = self.rt.spawn("retention_worker", retention_worker.start());
        self.handles.lock().push(handle);
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = shutdown_and_join(handle).await {
                tracing::error!("Background worker exited abnormally: {e:#}");
            }
        }
        tracing::info!("Application shut down");
    }

    pub async fn ingest(
        &self,
        project_id: ProjectId,
        events: Vec<IncomingLogEvent>,
        client_ip: String,
        api_key: Option<&str>,
        origin: Option<&str>,
    ) -> anyhow::Result<IngestOutcome> {
        self.ingestion
            .ingest(project_id, events, client_ip, api_key, origin)
            .await
    }

    pub async fn execute_query(
        &self,
        identity: &Identity,
        project_id: ProjectId,
        request: LogQueryRequest,
    ) -> anyhow::Result<LogQueryResponse> {
        self.queries
            .execute_query(identity, project_id, request)
            .await
    }

    pub async fn queryable_fields(
        &self,
        identity: &Identity,
        project_id: ProjectId,
        name_filter: Option<&str>,
    ) -> anyhow::Result<Vec<QueryableField>> {
        self.queries
            .queryable_fields(identity, project_id, name_filter)
            .await
    }

    /// Called by the projects collaborator when a project is deleted.
    /// In-flight worker writes for the project may still land afterwards;
    /// callers that need certainty flush and re-check stats.
    pub async fn delete_project_logs(&self, project_id: ProjectId) -> anyhow::Result<()> {
        self.projects.invalidate(project_id);
        self.storage.delete_logs_by_project(project_id).await?;
        self.storage.force_flush().await?;
        Ok(())
    }

    pub async fn project_log_stats(&self, project_id: ProjectId) -> anyhow::Result<ProjectLogStats> {
        self.storage.project_log_stats(project_id).await
    }

    pub fn projects(&self) -> &Arc<dyn ProjectProvider> {
        &self.projects
    }

    pub fn storage(&self) -> &Arc<LogStorage<RT>> {
        &self.storage
    }

    /// Test hook: one synchronous flush + dequeue/store cycle through the
    /// worker engine, followed by a visibility barrier.
    #[cfg(any(test, feature = "testing"))]
    pub async fn run_background_tasks_for_test(&self) -> anyhow::Result<()> {
        self.engine.run_background_tasks_for_test().await?;
        self.storage.force_flush().await
    }
}
