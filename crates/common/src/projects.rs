//! Project settings and the read-side seam to the project CRUD service.
//!
//! The core never creates or mutates projects; it reads settings to make
//! admission and retention decisions.

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};

use crate::types::ProjectId;

/// Per-project settings, owned by the external project CRUD service.
///
/// Quota fields use zero (or non-positive, for `max_logs_life_days`) to mean
/// "disabled", never "delete everything".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_api_key_required: bool,
    #[serde(default)]
    pub is_filter_by_domain: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub is_filter_by_ip: bool,
    /// Dotted IPs or CIDR blocks.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Steady admission rate in events/second. 0 = unlimited.
    #[serde(default)]
    pub logs_per_second_limit: u64,
    /// Count quota. 0 = no count quota.
    #[serde(default)]
    pub max_logs_amount: u64,
    /// Size quota in megabytes. 0 = no size quota.
    #[serde(default)]
    pub max_logs_size_mb: u64,
    /// Age retention in days. <= 0 = no age retention.
    #[serde(default)]
    pub max_logs_life_days: i64,
    /// Per-event serialized size cap in KiB.
    #[serde(default = "default_max_log_size_kb")]
    pub max_log_size_kb: u64,
}

fn default_max_log_size_kb() -> u64 {
    64
}

impl Project {
    pub fn new(id: ProjectId) -> Self {
        Self {
            id,
            name: String::new(),
            is_api_key_required: false,
            is_filter_by_domain: false,
            allowed_domains: vec![],
            is_filter_by_ip: false,
            allowed_ips: vec![],
            logs_per_second_limit: 0,
            max_logs_amount: 0,
            max_logs_size_mb: 0,
            max_logs_life_days: 0,
            max_log_size_kb: default_max_log_size_kb(),
        }
    }
}

/// Read access to the authoritative project store (the external CRUD
/// service's database).
#[async_trait]
pub trait ProjectStore: Send + Sync + 'static {
    async fn load_project(&self, project_id: ProjectId) -> anyhow::Result<Option<Project>>;

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>>;
}

/// Cached read access to projects, as consumed by the hot paths. Lookups
/// populate TTL'd positive and not-exists entries so bursts against missing
/// projects don't hammer the store; the CRUD service calls `invalidate` on
/// update and delete.
#[async_trait]
pub trait ProjectProvider: Send + Sync + 'static {
    async fn get_project_with_cache(
        &self,
        project_id: ProjectId,
    ) -> anyhow::Result<Option<std::sync::Arc<Project>>>;

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>>;

    fn invalidate(&self, project_id: ProjectId);
}
