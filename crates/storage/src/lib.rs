//! The storage adapter: everything the rest of the backend needs from the
//! full-text search backend, behind one typed surface.
//!
//! [`LogStorage`] guarantees tenancy isolation on reads (a returned log's
//! `project_id` always equals the requested one), retries transient bulk
//! write failures with jittered backoff, and enforces the overall query
//! execution ceiling.

use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::Arc,
};

use anyhow::Context;
use common::{
    backoff::Backoff,
    knobs::{
        FIELD_DISCOVERY_LIMIT,
        QUERY_EXECUTION_TIMEOUT,
        STORE_INITIAL_BACKOFF,
        STORE_MAX_ATTEMPTS,
        STORE_MAX_BACKOFF,
    },
    query::LogQueryResponse,
    runtime::Runtime,
    search::{
        SearchBackend,
        SearchDocument,
        SearchFilter,
        SearchRequest,
    },
    types::{
        LogItem,
        LogTimestamp,
        ProjectId,
        ProjectLogStats,
    },
};
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

pub mod http_backend;
pub mod memory;
mod metrics;

/// Flatten a custom-field value into its `key=value` token form. Strings
/// are used verbatim; other scalars use their JSON rendering; array
/// elements each get their own token.
fn token_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn attrs_tokens(fields: &BTreeMap<String, JsonValue>) -> Vec<String> {
    let mut tokens = vec![];
    for (key, value) in fields {
        match value {
            JsonValue::Array(elements) => {
                for element in elements {
                    tokens.push(format!("{key}={}", token_value(element)));
                }
            },
            other => tokens.push(format!("{key}={}", token_value(other))),
        }
    }
    tokens
}

pub fn log_item_to_document(item: &LogItem) -> SearchDocument {
    SearchDocument {
        id: item.id,
        project_id: item.project_id,
        timestamp: item.timestamp.as_micros(),
        level: item.level,
        message: item.message.clone(),
        client_ip: item.client_ip.clone(),
        created_at: item.timestamp.as_micros(),
        attrs_tokens: attrs_tokens(&item.fields),
        attrs: item.fields.clone(),
    }
}

/// Reconstruct a `LogItem` from its stored form. The client IP is folded
/// into the returned `fields` map (as `client_ip`) so callers need not
/// special-case it.
pub fn document_to_log_item(doc: SearchDocument) -> LogItem {
    let mut fields = doc.attrs;
    fields.insert("client_ip".to_owned(), JsonValue::String(doc.client_ip.clone()));
    LogItem {
        id: doc.id,
        project_id: doc.project_id,
        timestamp: LogTimestamp::from_micros(doc.timestamp),
        level: doc.level,
        message: doc.message,
        fields,
        client_ip: doc.client_ip,
    }
}

pub struct LogStorage<RT: Runtime> {
    rt: RT,
    backend: Arc<dyn SearchBackend>,
}

impl<RT: Runtime> LogStorage<RT> {
    pub fn new(rt: RT, backend: Arc<dyn SearchBackend>) -> Self {
        Self { rt, backend }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Bulk write a batch of accepted events, grouped by project. Transient
    /// backend errors are retried with jittered backoff; an error return
    /// means the batch could not be written at all.
    pub async fn store_batch(
        &self,
        batches: BTreeMap<ProjectId, Vec<LogItem>>,
    ) -> anyhow::Result<()> {
        let documents: Vec<SearchDocument> = batches
            .values()
            .flat_map(|items| items.iter().map(log_item_to_document))
            .collect();
        if documents.is_empty() {
            return Ok(());
        }

        let timer = metrics::store_batch_timer();
        let mut backoff = Backoff::new(*STORE_INITIAL_BACKOFF, *STORE_MAX_BACKOFF);
        loop {
            match self.backend.bulk_index(documents.clone()).await {
                Ok(()) => {
                    metrics::log_documents_stored(documents.len());
                    timer.finish();
                    return Ok(());
                },
                Err(e) if backoff.failures() + 1 < *STORE_MAX_ATTEMPTS => {
                    let delay = backoff.fail(&mut self.rt.rng());
                    tracing::warn!(
                        "Transient bulk write failure (attempt {}), retrying in {}ms: {e:#}",
                        backoff.failures(),
                        delay.as_millis(),
                    );
                    self.rt.wait(delay).await;
                },
                Err(e) => {
                    return Err(e.context(format!(
                        "bulk write of {} documents failed after {} attempts",
                        documents.len(),
                        *STORE_MAX_ATTEMPTS,
                    )));
                },
            }
        }
    }

    /// Run a compiled search for one project. Every returned log is
    /// guaranteed to belong to `project_id` regardless of query content;
    /// exceeding the execution ceiling surfaces as `QUERY_TIMEOUT`.
    pub async fn execute_query_for_project(
        &self,
        project_id: ProjectId,
        request: SearchRequest,
    ) -> anyhow::Result<LogQueryResponse> {
        let timer = metrics::execute_query_timer();
        let started = self.rt.monotonic_now();
        let response = tokio::time::timeout(
            *QUERY_EXECUTION_TIMEOUT,
            self.backend.search(project_id, &request),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(ErrorMetadata::request_timeout(
                "QUERY_TIMEOUT",
                "The query did not complete within the execution time limit.",
            ))
        })??;
        let executed_in_ms = (self.rt.monotonic_now() - started).as_millis() as u64;

        let mut logs = Vec::with_capacity(response.hits.len());
        for doc in response.hits {
            if doc.project_id != project_id {
                // The compiled request pins the tenancy filter, so this
                // indicates a misbehaving backend. Drop the document rather
                // than leak it.
                tracing::error!(
                    "Search backend returned document {} for project {} in a query for {}",
                    doc.id,
                    doc.project_id,
                    project_id,
                );
                continue;
            }
            logs.push(document_to_log_item(doc));
        }

        timer.finish();
        Ok(LogQueryResponse {
            logs,
            total: response.total,
            limit: request.size,
            offset: request.from,
            executed_in_ms,
        })
    }

    /// The set of custom field names seen for this project. Errors are
    /// surfaced (not mapped to an empty set) so callers can decide to
    /// degrade to the predefined fields.
    pub async fn discover_fields(&self, project_id: ProjectId) -> anyhow::Result<Vec<String>> {
        let tokens = self
            .backend
            .discover_tokens(project_id, *FIELD_DISCOVERY_LIMIT)
            .await
            .context("failed to execute field discovery search")?;
        let names: BTreeSet<String> = tokens
            .iter()
            .filter_map(|token| token.split_once('=').map(|(key, _)| key.to_owned()))
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Delete logs with `timestamp < cutoff`.
    pub async fn delete_old_logs(
        &self,
        project_id: ProjectId,
        cutoff: LogTimestamp,
    ) -> anyhow::Result<u64> {
        let deleted = self
            .backend
            .delete_by_query(
                project_id,
                &SearchFilter::Range {
                    field: common::search::fields::TIMESTAMP.to_owned(),
                    gte: None,
                    gt: None,
                    lte: None,
                    lt: Some(cutoff.as_micros()),
                },
            )
            .await?;
        metrics::log_documents_deleted(deleted);
        Ok(deleted)
    }

    /// Remove every log for the project. Idempotent: succeeds on projects
    /// with no data. In-flight worker writes racing this call may land
    /// afterwards; callers that need certainty poll stats after a flush.
    pub async fn delete_logs_by_project(&self, project_id: ProjectId) -> anyhow::Result<()> {
        let deleted = self
            .backend
            .delete_by_query(project_id, &SearchFilter::MatchAll)
            .await?;
        metrics::log_documents_deleted(deleted);
        Ok(())
    }

    pub async fn project_log_stats(&self, project_id: ProjectId) -> anyhow::Result<ProjectLogStats> {
        let stats = self.backend.project_stats(project_id).await?;
        Ok(ProjectLogStats {
            total_logs: stats.doc_count as i64,
            total_size_mb: stats.size_bytes as f64 / (1024.0 * 1024.0),
            oldest_log_time: stats.oldest_timestamp.map(LogTimestamp::from_micros),
            newest_log_time: stats.newest_timestamp.map(LogTimestamp::from_micros),
        })
    }

    /// Make previously acknowledged writes visible to subsequent reads.
    /// Used as a barrier between retention deletes and the stats probes
    /// that follow them, and by tests.
    pub async fn force_flush(&self) -> anyhow::Result<()> {
        self.backend.refresh().await
    }
}

#[cfg(test)]
mod tests;
