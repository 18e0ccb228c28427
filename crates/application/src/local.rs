//! Collaborator implementations for single-node deployments, where the
//! external user/project services are not running.

use std::collections::HashMap;

use async_trait::async_trait;
use common::{
    auth::{
        AccessChecker,
        ApiKeyValidator,
        AuditLogEntry,
        AuditLogWriter,
        Identity,
    },
    types::ProjectId,
};
use parking_lot::RwLock;

/// Grants every identity access to every project. Single-node deployments
/// front the backend with their own auth proxy.
pub struct AllowAllAccessChecker;

#[async_trait]
impl AccessChecker for AllowAllAccessChecker {
    async fn can_access_project(
        &self,
        _identity: &Identity,
        _project_id: ProjectId,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// API keys registered per project at startup.
pub struct StaticApiKeyValidator {
    keys: RwLock<HashMap<ProjectId, String>>,
}

impl StaticApiKeyValidator {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_key(&self, project_id: ProjectId, api_key: impl Into<String>) {
        self.keys.write().insert(project_id, api_key.into());
    }
}

#[async_trait]
impl ApiKeyValidator for StaticApiKeyValidator {
    async fn validate(&self, project_id: ProjectId, api_key: &str) -> anyhow::Result<bool> {
        Ok(self
            .keys
            .read()
            .get(&project_id)
            .is_some_and(|key| key == api_key))
    }
}

/// Audit entries as structured log lines; a real deployment points this at
/// the audit service instead.
pub struct TracingAuditLogWriter;

impl AuditLogWriter for TracingAuditLogWriter {
    fn write(&self, entry: AuditLogEntry) {
        tracing::info!(
            target: "logbull::audit",
            user_id = entry.user_id.map(|u| u.to_string()),
            project_id = entry.project_id.map(|p| p.to_string()),
            "{}",
            entry.message,
        );
    }
}
