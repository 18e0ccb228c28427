//! Ingest-time quota gate.
//!
//! Retention enforcement (the authoritative mechanism) prunes oversized
//! projects on its own schedule; this gate just stops a project that is
//! already at or over a configured quota from growing further between
//! sweeps. Stats are sampled through a short-TTL cache so the gate costs no
//! per-request stats round-trip.

use std::sync::Arc;

use common::{
    knobs::PROJECT_STATS_CACHE_TTL,
    projects::Project,
    runtime::Runtime,
    types::{
        ProjectId,
        ProjectLogStats,
    },
};
use errors::ErrorMetadata;
use storage::LogStorage;

pub const PROJECT_QUOTA_EXCEEDED: &str = "PROJECT_QUOTA_EXCEEDED";

pub struct QuotaGate<RT: Runtime> {
    storage: Arc<LogStorage<RT>>,
    stats_cache: moka::sync::Cache<ProjectId, Arc<ProjectLogStats>>,
}

impl<RT: Runtime> QuotaGate<RT> {
    pub fn new(storage: Arc<LogStorage<RT>>) -> Self {
        Self {
            storage,
            stats_cache: moka::sync::Cache::builder()
                .time_to_live(*PROJECT_STATS_CACHE_TTL)
                .build(),
        }
    }

    pub async fn check(&self, project: &Project) -> anyhow::Result<()> {
        if project.max_logs_amount == 0 && project.max_logs_size_mb == 0 {
            return Ok(());
        }
        let stats = match self.cached_stats(project.id).await {
            Ok(stats) => stats,
            Err(e) => {
                // The gate is advisory; never fail ingest on a stats probe.
                tracing::warn!("Skipping quota gate for {}: {e:#}", project.id);
                return Ok(());
            },
        };
        if project.max_logs_amount > 0 && stats.total_logs >= project.max_logs_amount as i64 {
            anyhow::bail!(ErrorMetadata::payload_too_large(
                PROJECT_QUOTA_EXCEEDED,
                format!(
                    "Project holds {} logs, at or over its quota of {}.",
                    stats.total_logs, project.max_logs_amount,
                ),
            ));
        }
        if project.max_logs_size_mb > 0 && stats.total_size_mb >= project.max_logs_size_mb as f64 {
            anyhow::bail!(ErrorMetadata::payload_too_large(
                PROJECT_QUOTA_EXCEEDED,
                format!(
                    "Project holds {:.1} MB of logs, at or over its quota of {} MB.",
                    stats.total_size_mb, project.max_logs_size_mb,
                ),
            ));
        }
        Ok(())
    }

    async fn cached_stats(&self, project_id: ProjectId) -> anyhow::Result<Arc<ProjectLogStats>> {
        if let Some(stats) = self.stats_cache.get(&project_id) {
            return Ok(stats);
        }
        let stats = Arc::new(self.storage.project_log_stats(project_id).await?);
        self.stats_cache.insert(project_id, stats.clone());
        Ok(stats)
    }
}
