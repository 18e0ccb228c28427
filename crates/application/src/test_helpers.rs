//! Harness for exercising a fully wired application against in-memory
//! collaborators.

use std::sync::Arc;

use common::{
    cache::InMemorySharedCache,
    projects::Project,
    runtime::Runtime,
};
use ingestion::IncomingLogEvent;
use storage::memory::MemorySearchBackend;

use crate::{
    local::{
        AllowAllAccessChecker,
        StaticApiKeyValidator,
        TracingAuditLogWriter,
    },
    projects::StaticProjectStore,
    Application,
};

pub struct TestApplication<RT: Runtime> {
    pub application: Arc<Application<RT>>,
    pub backend: Arc<MemorySearchBackend>,
    pub cache: Arc<InMemorySharedCache>,
    pub project_store: Arc<StaticProjectStore>,
    pub api_keys: Arc<StaticApiKeyValidator>,
}

impl<RT: Runtime> TestApplication<RT> {
    /// A bounded (2 shards, 1 worker) application over in-memory
    /// collaborators.
    pub fn new(rt: RT) -> Self {
        let backend = Arc::new(MemorySearchBackend::new());
        let cache = Arc::new(InMemorySharedCache::new());
        let project_store = Arc::new(StaticProjectStore::new([]));
        let api_keys = Arc::new(StaticApiKeyValidator::new());
        let application = Arc::new(Application::with_engine_size(
            rt,
            backend.clone(),
            cache.clone(),
            project_store.clone(),
            api_keys.clone(),
            Arc::new(AllowAllAccessChecker),
            Arc::new(TracingAuditLogWriter),
            Some((2, 1)),
        ));
        Self {
            application,
            backend,
            cache,
            project_store,
            api_keys,
        }
    }

    pub fn seed_project(&self, project: Project) {
        self.project_store.upsert(project);
    }
}

pub fn info_event(message: &str) -> IncomingLogEvent {
    IncomingLogEvent {
        level: "INFO".to_owned(),
        message: message.to_owned(),
        timestamp: None,
        fields: None,
    }
}
