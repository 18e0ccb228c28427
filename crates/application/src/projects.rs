//! The cached project provider and the static store used by single-node
//! deployments.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
};

use async_trait::async_trait;
use common::{
    knobs::PROJECT_CACHE_TTL,
    projects::{
        Project,
        ProjectProvider,
        ProjectStore,
    },
    types::ProjectId,
};
use parking_lot::Mutex;

/// TTL'd read-through cache over the authoritative project store.
///
/// Both positive and not-exists results are cached, so bursts of writes
/// against a missing project do not hammer the store. The CRUD collaborator
/// must call `invalidate` on update and delete: a stale positive entry
/// would keep admitting writes with the old settings until the TTL fires.
pub struct CachedProjectProvider {
    store: Arc<dyn ProjectStore>,
    cache: moka::sync::Cache<ProjectId, Option<Arc<Project>>>,
}

impl CachedProjectProvider {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self {
            store,
            cache: moka::sync::Cache::builder()
                .time_to_live(*PROJECT_CACHE_TTL)
                .build(),
        }
    }
}

#[async_trait]
impl ProjectProvider for CachedProjectProvider {
    async fn get_project_with_cache(
        &self,
        project_id: ProjectId,
    ) -> anyhow::Result<Option<Arc<Project>>> {
        if let Some(cached) = self.cache.get(&project_id) {
            return Ok(cached);
        }
        let loaded = self.store.load_project(project_id).await?.map(Arc::new);
        self.cache.insert(project_id, loaded.clone());
        Ok(loaded)
    }

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        self.store.list_projects().await
    }

    fn invalidate(&self, project_id: ProjectId) {
        self.cache.invalidate(&project_id);
    }
}

/// In-process [`ProjectStore`] backing single-node deployments (seeded from
/// a config file) and tests. Mutations go through the owning handle; reads
/// count loads so tests can assert cache behaviour.
pub struct StaticProjectStore {
    projects: Mutex<BTreeMap<ProjectId, Project>>,
    loads: AtomicUsize,
}

impl StaticProjectStore {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: Mutex::new(projects.into_iter().map(|p| (p.id, p)).collect()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn upsert(&self, project: Project) {
        self.projects.lock().insert(project.id, project);
    }

    pub fn remove(&self, project_id: ProjectId) {
        self.projects.lock().remove(&project_id);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProjectStore for StaticProjectStore {
    async fn load_project(&self, project_id: ProjectId) -> anyhow::Result<Option<Project>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.projects.lock().get(&project_id).cloned())
    }

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        Ok(self.projects.lock().values().cloned().collect())
    }
}
