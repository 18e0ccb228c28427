//! The ingestion service: per-request admission checks, per-event
//! validation, and handoff to the worker engine.
//!
//! Batch-level failures (missing project, filters, rate limit, oversized
//! batch) fail the whole request; per-event failures land in `errors[]`
//! while the remaining events proceed. Acceptance means the event entered
//! the worker engine's shard buffers: durability from there is best-effort
//! by design, and enqueue failures do not fail the response.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use common::{
    auth::{
        ApiKeyValidator,
        AuditLogEntry,
        AuditLogWriter,
    },
    knobs::{
        MAX_BATCH_SIZE_BYTES,
        MAX_LOGS_PER_BATCH,
        MAX_LOG_MESSAGE_CHARS,
    },
    projects::{
        Project,
        ProjectProvider,
    },
    runtime::Runtime,
    types::{
        LogItem,
        LogLevel,
        ProjectId,
    },
};
use errors::ErrorMetadata;
use log_workers::LogQueueEngine;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::{
    filters::{
        domain_allowed,
        ip_allowed,
    },
    metrics,
    quota::QuotaGate,
    rate_limiter::ProjectRateLimiter,
};

pub const PROJECT_NOT_FOUND: &str = "PROJECT_NOT_FOUND";
pub const API_KEY_REQUIRED: &str = "API_KEY_REQUIRED";
pub const API_KEY_INVALID: &str = "API_KEY_INVALID";
pub const DOMAIN_NOT_ALLOWED: &str = "DOMAIN_NOT_ALLOWED";
pub const IP_NOT_ALLOWED: &str = "IP_NOT_ALLOWED";
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
pub const BATCH_TOO_LARGE: &str = "BATCH_TOO_LARGE";
pub const LOG_TOO_LARGE: &str = "LOG_TOO_LARGE";
pub const INVALID_LOG_LEVEL: &str = "INVALID_LOG_LEVEL";
pub const MESSAGE_EMPTY: &str = "MESSAGE_EMPTY";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// One event as submitted by a client. The client-supplied `timestamp` is
/// accepted in the payload but ignored: `id`, `timestamp`, and `client_ip`
/// are stamped server-side on acceptance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncomingLogEvent {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, JsonValue>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEventError {
    pub index: usize,
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub accepted: u32,
    pub rejected: u32,
    pub errors: Vec<IngestEventError>,
}

pub struct IngestionService<RT: Runtime> {
    rt: RT,
    projects: Arc<dyn ProjectProvider>,
    api_keys: Arc<dyn ApiKeyValidator>,
    rate_limiter: ProjectRateLimiter<RT>,
    quota: QuotaGate<RT>,
    engine: Arc<LogQueueEngine<RT>>,
    audit: Arc<dyn AuditLogWriter>,
}

impl<RT: Runtime> IngestionService<RT> {
    pub fn new(
        rt: RT,
        projects: Arc<dyn ProjectProvider>,
        api_keys: Arc<dyn ApiKeyValidator>,
        rate_limiter: ProjectRateLimiter<RT>,
        quota: QuotaGate<RT>,
        engine: Arc<LogQueueEngine<RT>>,
        audit: Arc<dyn AuditLogWriter>,
    ) -> Self {
        Self {
            rt,
            projects,
            api_keys,
            rate_limiter,
            quota,
            engine,
            audit,
        }
    }

    pub async fn ingest(
        &self,
        project_id: ProjectId,
        events: Vec<IncomingLogEvent>,
        client_ip: String,
        api_key: Option<&str>,
        origin: Option<&str>,
    ) -> anyhow::Result<IngestOutcome> {
        let timer = metrics::ingest_batch_timer();

        if events.is_empty() {
            anyhow::bail!(ErrorMetadata::bad_request(
                INVALID_REQUEST,
                "the logs array must contain at least one event",
            ));
        }
        if events.len() > *MAX_LOGS_PER_BATCH {
            anyhow::bail!(ErrorMetadata::bad_request(
                BATCH_TOO_LARGE,
                format!(
                    "batch of {} events exceeds the maximum of {}",
                    events.len(),
                    *MAX_LOGS_PER_BATCH,
                ),
            ));
        }

        let Some(project) = self.projects.get_project_with_cache(project_id).await? else {
            anyhow::bail!(ErrorMetadata::not_found(
                PROJECT_NOT_FOUND,
                format!("project {project_id} does not exist"),
            ));
        };

        self.check_filters(&project, &client_ip, origin)?;
        self.check_api_key(&project, api_key).await?;

        if let Some(retry_after) = self
            .rate_limiter
            .check(project_id, project.logs_per_second_limit, events.len())
            .await?
        {
            anyhow::bail!(ErrorMetadata::rate_limited(
                RATE_LIMIT_EXCEEDED,
                format!(
                    "project exceeds its limit of {} logs/second",
                    project.logs_per_second_limit,
                ),
                Some(retry_after),
            ));
        }

        self.quota.check(&project).await?;

        let outcome = self.accept_events(&project, events, &client_ip)?;

        metrics::log_events_accepted(outcome.accepted as usize);
        metrics::log_events_rejected(outcome.rejected as usize);
        self.audit.write(AuditLogEntry {
            message: format!(
                "Ingested batch: {} accepted, {} rejected",
                outcome.accepted, outcome.rejected,
            ),
            user_id: None,
            project_id: Some(project_id),
        });
        timer.finish();
        Ok(outcome)
    }

    fn check_filters(
        &self,
        project: &Project,
        client_ip: &str,
        origin: Option<&str>,
    ) -> anyhow::Result<()> {
        if project.is_filter_by_domain && !domain_allowed(origin, &project.allowed_domains) {
            anyhow::bail!(ErrorMetadata::forbidden(
                DOMAIN_NOT_ALLOWED,
                "request origin is not in the project's allowed domains",
            ));
        }
        if project.is_filter_by_ip && !ip_allowed(client_ip, &project.allowed_ips) {
            anyhow::bail!(ErrorMetadata::forbidden(
                IP_NOT_ALLOWED,
                "client address is not in the project's allowed IPs",
            ));
        }
        Ok(())
    }

    async fn check_api_key(&self, project: &Project, api_key: Option<&str>) -> anyhow::Result<()> {
        if !project.is_api_key_required {
            return Ok(());
        }
        let Some(api_key) = api_key.map(str::trim).filter(|k| !k.is_empty()) else {
            anyhow::bail!(ErrorMetadata::unauthenticated(
                API_KEY_REQUIRED,
                "this project requires an API key",
            ));
        };
        if !self.api_keys.validate(project.id, api_key).await? {
            anyhow::bail!(ErrorMetadata::unauthenticated(
                API_KEY_INVALID,
                "the provided API key is not valid for this project",
            ));
        }
        Ok(())
    }

    /// Per-event validation and handoff. The aggregate size is accumulated
    /// during this loop; crossing it fails the whole batch.
    fn accept_events(
        &self,
        project: &Project,
        events: Vec<IncomingLogEvent>,
        client_ip: &str,
    ) -> anyhow::Result<IngestOutcome> {
        let max_event_bytes = (project.max_log_size_kb as usize).saturating_mul(1024);
        let mut outcome = IngestOutcome::default();
        let mut total_bytes = 0usize;

        for (index, event) in events.into_iter().enumerate() {
            let serialized_len = serde_json::to_vec(&event).map(|b| b.len()).unwrap_or(0);
            total_bytes += serialized_len;
            if total_bytes > *MAX_BATCH_SIZE_BYTES {
                anyhow::bail!(ErrorMetadata::bad_request(
                    BATCH_TOO_LARGE,
                    format!(
                        "batch exceeds the aggregate size limit of {} bytes",
                        *MAX_BATCH_SIZE_BYTES,
                    ),
                ));
            }

            match self.accept_event(project, event, serialized_len, max_event_bytes, client_ip) {
                Ok(item) => {
                    outcome.accepted += 1;
                    // Best-effort from here: a full shard buffer drops the
                    // event with a log line, not a client error.
                    if let Err(e) = self.engine.enqueue(item) {
                        metrics::log_enqueue_failure();
                        tracing::warn!("Failed to buffer accepted event: {e:#}");
                    }
                },
                Err((code, message)) => {
                    outcome.rejected += 1;
                    outcome.errors.push(IngestEventError {
                        index,
                        code: code.to_owned(),
                        message,
                    });
                },
            }
        }
        Ok(outcome)
    }

    fn accept_event(
        &self,
        project: &Project,
        event: IncomingLogEvent,
        serialized_len: usize,
        max_event_bytes: usize,
        client_ip: &str,
    ) -> Result<LogItem, (&'static str, String)> {
        let level: LogLevel = event
            .level
            .trim()
            .parse()
            .map_err(|_| (INVALID_LOG_LEVEL, format!("unknown log level {:?}", event.level)))?;

        let message = event.message.trim();
        if message.is_empty() {
            return Err((MESSAGE_EMPTY, "log message must not be empty".to_owned()));
        }
        if message.chars().count() > *MAX_LOG_MESSAGE_CHARS {
            return Err((
                LOG_TOO_LARGE,
                format!(
                    "message exceeds the maximum of {} characters",
                    *MAX_LOG_MESSAGE_CHARS,
                ),
            ));
        }
        if max_event_bytes > 0 && serialized_len > max_event_bytes {
            return Err((
                LOG_TOO_LARGE,
                format!("event of {serialized_len} bytes exceeds the project limit of {max_event_bytes}"),
            ));
        }

        let fields = event
            .fields
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_owned(), value))
            })
            .collect();

        Ok(LogItem {
            id: self.rt.new_uuid_v4(),
            project_id: project.id,
            timestamp: self
                .rt
                .generate_log_timestamp()
                .map_err(|e| (INVALID_REQUEST, e.to_string()))?,
            level,
            message: prettify_json_message(message),
            fields,
            client_ip: client_ip.to_owned(),
        })
    }
}

/// Messages that parse as JSON objects or arrays are stored pretty-printed
/// for readability in the UI.
fn prettify_json_message(message: &str) -> String {
    if message.starts_with('{') || message.starts_with('[') {
        if let Ok(value @ (JsonValue::Object(..) | JsonValue::Array(..))) =
            serde_json::from_str::<JsonValue>(message)
        {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return pretty;
            }
        }
    }
    message.to_owned()
}
