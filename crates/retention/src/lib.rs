//! Periodic retention and quota enforcement.
//!
//! Every sweep visits all projects and, per project: deletes logs past the
//! age threshold, then prunes count and size quota overruns down to a
//! target fraction of the quota. Quota pruning picks a cutoff timestamp by
//! linear interpolation over the observed `[oldest, newest]` interval, so
//! on non-uniform distributions it may delete *more* than the target
//! fraction; it never deletes logs newer than the interpolated cutoff, and
//! it never touches other projects.

use std::{
    sync::Arc,
    time::Duration,
};

use common::{
    backoff::Backoff,
    errors::report_error,
    knobs::{
        RETENTION_CLEANUP_FRACTION_LARGE,
        RETENTION_CLEANUP_FRACTION_SMALL,
        RETENTION_COUNT_QUOTA_SMALL_LIMIT,
        RETENTION_SIZE_QUOTA_SMALL_MB,
        RETENTION_SWEEP_INTERVAL,
        STORE_INITIAL_BACKOFF,
        STORE_MAX_BACKOFF,
    },
    projects::{
        Project,
        ProjectProvider,
    },
    runtime::Runtime,
    types::LogTimestamp,
};
use storage::LogStorage;

mod metrics;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub struct RetentionWorker<RT: Runtime> {
    rt: RT,
    projects: Arc<dyn ProjectProvider>,
    storage: Arc<LogStorage<RT>>,
}

impl<RT: Runtime> RetentionWorker<RT> {
    pub fn new(rt: RT, projects: Arc<dyn ProjectProvider>, storage: Arc<LogStorage<RT>>) -> Self {
        Self {
            rt,
            projects,
            storage,
        }
    }

    /// The long-running enforcement loop: sweep, sleep, repeat, with
    /// jittered backoff after a failed sweep.
    pub fn start(self) -> impl std::future::Future<Output = ()> + Send {
        let mut backoff = Backoff::new(*STORE_INITIAL_BACKOFF, *STORE_MAX_BACKOFF);
        async move {
            loop {
                match self.sweep_all_projects().await {
                    Ok(()) => {
                        backoff.reset();
                        self.rt.wait(*RETENTION_SWEEP_INTERVAL).await;
                    },
                    Err(mut e) => {
                        report_error(&mut e).await;
                        let delay = backoff.fail(&mut self.rt.rng());
                        tracing::error!(
                            "Retention sweep failed {} times, backing off {}ms",
                            backoff.failures(),
                            delay.as_millis(),
                        );
                        self.rt.wait(delay).await;
                    },
                }
            }
        }
    }

    /// One pass over every project. Per-project failures are logged and do
    /// not abort the sweep.
    pub async fn sweep_all_projects(&self) -> anyhow::Result<()> {
        let _timer = metrics::sweep_timer();
        let projects = self.projects.list_projects().await?;
        for project in &projects {
            if let Err(e) = self.enforce_project(project).await {
                let mut e = e.context(format!("retention enforcement failed for {}", project.id));
                report_error(&mut e).await;
            }
        }
        Ok(())
    }

    pub async fn enforce_project(&self, project: &Project) -> anyhow::Result<()> {
        self.enforce_age(project).await?;
        self.enforce_count_quota(project).await?;
        self.enforce_size_quota(project).await?;
        Ok(())
    }

    /// Age retention: delete logs older than `max_logs_life_days`. Zero or
    /// negative means disabled.
    async fn enforce_age(&self, project: &Project) -> anyhow::Result<()> {
        if project.max_logs_life_days <= 0 {
            return Ok(());
        }
        let now = self.rt.generate_log_timestamp()?;
        let cutoff = now.saturating_sub(DAY * project.max_logs_life_days as u32);
        let deleted = self.storage.delete_old_logs(project.id, cutoff).await?;
        self.storage.force_flush().await?;
        if deleted > 0 {
            metrics::log_deleted("age", deleted);
            tracing::info!(
                "Deleted {deleted} logs older than {} days from {}",
                project.max_logs_life_days,
                project.id,
            );
        }
        Ok(())
    }

    async fn enforce_count_quota(&self, project: &Project) -> anyhow::Result<()> {
        if project.max_logs_amount == 0 {
            return Ok(());
        }
        let stats = self.storage.project_log_stats(project.id).await?;
        if stats.total_logs <= project.max_logs_amount as i64 {
            return Ok(());
        }
        let fraction = if project.max_logs_amount <= *RETENTION_COUNT_QUOTA_SMALL_LIMIT {
            *RETENTION_CLEANUP_FRACTION_SMALL
        } else {
            *RETENTION_CLEANUP_FRACTION_LARGE
        };
        let target = (project.max_logs_amount as f64 * fraction).round();
        let delete_fraction = (stats.total_logs as f64 - target) / stats.total_logs as f64;
        let Some(cutoff) =
            interpolated_cutoff(stats.oldest_log_time, stats.newest_log_time, delete_fraction)
        else {
            return Ok(());
        };
        let deleted = self.storage.delete_old_logs(project.id, cutoff).await?;
        self.storage.force_flush().await?;
        metrics::log_deleted("count_quota", deleted);
        tracing::info!(
            "Count quota: deleted {deleted} of {} logs from {} (quota {}, target {target})",
            stats.total_logs,
            project.id,
            project.max_logs_amount,
        );
        Ok(())
    }

    async fn enforce_size_quota(&self, project: &Project) -> anyhow::Result<()> {
        if project.max_logs_size_mb == 0 {
            return Ok(());
        }
        // Refetch: the count pass may just have deleted.
        let stats = self.storage.project_log_stats(project.id).await?;
        if stats.total_size_mb <= project.max_logs_size_mb as f64 {
            return Ok(());
        }
        let fraction = if project.max_logs_size_mb <= *RETENTION_SIZE_QUOTA_SMALL_MB {
            *RETENTION_CLEANUP_FRACTION_SMALL
        } else {
            *RETENTION_CLEANUP_FRACTION_LARGE
        };
        let target_mb = project.max_logs_size_mb as f64 * fraction;
        let delete_fraction = (stats.total_size_mb - target_mb) / stats.total_size_mb;
        let Some(cutoff) =
            interpolated_cutoff(stats.oldest_log_time, stats.newest_log_time, delete_fraction)
        else {
            return Ok(());
        };
        let deleted = self.storage.delete_old_logs(project.id, cutoff).await?;
        self.storage.force_flush().await?;
        metrics::log_deleted("size_quota", deleted);
        tracing::info!(
            "Size quota: deleted {deleted} logs from {} ({:.1} MB over quota {} MB, target {target_mb:.1} MB)",
            project.id,
            stats.total_size_mb,
            project.max_logs_size_mb,
        );
        Ok(())
    }
}

/// Pick the timestamp such that deleting logs strictly older than it
/// removes approximately `delete_fraction` of the project, assuming a
/// uniform distribution over `[oldest, newest]`.
fn interpolated_cutoff(
    oldest: Option<LogTimestamp>,
    newest: Option<LogTimestamp>,
    delete_fraction: f64,
) -> Option<LogTimestamp> {
    let (oldest, newest) = (oldest?, newest?);
    let span = (newest.as_micros() - oldest.as_micros()).max(0);
    let offset = (span as f64 * delete_fraction.clamp(0.0, 1.0)) as i64;
    Some(LogTimestamp::from_micros(oldest.as_micros() + offset))
}
