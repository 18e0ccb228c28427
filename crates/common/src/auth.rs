//! Caller identity and the seams to the external auth collaborators.

use async_trait::async_trait;

use crate::types::{
    ProjectId,
    UserId,
};

/// Who is making a request. Sessions and memberships are owned by the
/// external user service; the core only carries the resolved identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    /// Internal callers (workers, tests). Skips access checks.
    System,
    User(UserId),
}

impl Identity {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::System => None,
            Identity::User(user_id) => Some(*user_id),
        }
    }
}

/// Validates project API keys on ingest when `is_api_key_required` is set.
#[async_trait]
pub trait ApiKeyValidator: Send + Sync + 'static {
    async fn validate(&self, project_id: ProjectId, api_key: &str) -> anyhow::Result<bool>;
}

/// Membership check consumed by the query paths.
#[async_trait]
pub trait AccessChecker: Send + Sync + 'static {
    async fn can_access_project(
        &self,
        identity: &Identity,
        project_id: ProjectId,
    ) -> anyhow::Result<bool>;
}

#[derive(Clone, Debug)]
pub struct AuditLogEntry {
    pub message: String,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
}

/// Fire-and-forget audit sink. Implementations must not block the caller;
/// failures are their own to log.
pub trait AuditLogWriter: Send + Sync + 'static {
    fn write(&self, entry: AuditLogEntry);
}
