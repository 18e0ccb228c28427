//! The HTTP backend binary: axum routes over a wired [`Application`].

use std::sync::Arc;

use application::{
    local::{
        AllowAllAccessChecker,
        StaticApiKeyValidator,
        TracingAuditLogWriter,
    },
    projects::StaticProjectStore,
    Application,
};
use common::{
    cache::InMemorySharedCache,
    runtime::Runtime,
    search::SearchBackend,
};
use runtime::prod::ProdRuntime;
use storage::{
    http_backend::HttpSearchBackend,
    memory::MemorySearchBackend,
};

pub mod config;
pub mod logs;
pub mod parse;
pub mod router;

use crate::config::LocalConfig;

pub struct LocalAppState<RT: Runtime> {
    pub application: Arc<Application<RT>>,
}

impl<RT: Runtime> Clone for LocalAppState<RT> {
    fn clone(&self) -> Self {
        Self {
            application: self.application.clone(),
        }
    }
}

/// Wire the application from the local configuration and start its
/// background workers.
pub async fn make_app(
    runtime: ProdRuntime,
    config: &LocalConfig,
) -> anyhow::Result<LocalAppState<ProdRuntime>> {
    let backend: Arc<dyn SearchBackend> = match &config.search_url {
        Some(url) => Arc::new(HttpSearchBackend::new(url.clone())?),
        None => {
            tracing::warn!(
                "No --search-url configured; logs are stored in the in-memory backend and do \
                 not survive restarts"
            );
            Arc::new(MemorySearchBackend::new())
        },
    };
    let cache = Arc::new(InMemorySharedCache::new());
    let project_store = Arc::new(StaticProjectStore::new([]));
    let api_keys = Arc::new(StaticApiKeyValidator::new());
    if let Some(path) = &config.projects_file {
        let seeds = config::load_project_seeds(path)?;
        tracing::info!("Loaded {} projects from {}", seeds.len(), path.display());
        for seed in seeds {
            if let Some(api_key) = seed.api_key {
                api_keys.set_key(seed.project.id, api_key);
            }
            project_store.upsert(seed.project);
        }
    }

    let application = Application::new(
        runtime,
        backend,
        cache,
        project_store,
        api_keys,
        Arc::new(AllowAllAccessChecker),
        Arc::new(TracingAuditLogWriter),
    );
    application.start_system_workers().await?;
    Ok(LocalAppState {
        application: Arc::new(application),
    })
}

#[cfg(test)]
mod tests;
