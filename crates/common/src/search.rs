//! Typed requests against the full-text search backend.
//!
//! The backend itself is an opaque capability (send a search body, delete by
//! query, refresh); this module defines the document schema and the filter
//! AST the storage adapter compiles queries into. Concrete backends (the
//! HTTP client and the in-memory test double) live in the `storage` crate.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::types::{
    LogLevel,
    ProjectId,
    SortOrder,
};

/// Attribute names of the stored document schema. Timestamps are stored as
/// 64-bit microseconds.
pub mod fields {
    pub const ID: &str = "id";
    pub const PROJECT_ID: &str = "project_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const LEVEL: &str = "level";
    pub const MESSAGE: &str = "message";
    pub const CLIENT_IP: &str = "client_ip";
    pub const CREATED_AT: &str = "created_at";
    /// Side index of `"key=value"` entries for custom fields.
    pub const ATTRS_TOKENS: &str = "attrs_tokens";
}

/// One persisted log event, in storage form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: Uuid,
    pub project_id: ProjectId,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    pub client_ip: String,
    /// Microseconds since the Unix epoch.
    pub created_at: i64,
    pub attrs_tokens: Vec<String>,
    /// The original custom-field map, for reconstructing query results.
    #[serde(default)]
    pub attrs: BTreeMap<String, JsonValue>,
}

/// Filter AST compiled from the query DSL. Backends translate this to their
/// native query language; the in-memory backend interprets it directly.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchFilter {
    Term {
        field: String,
        value: JsonValue,
    },
    Terms {
        field: String,
        values: Vec<JsonValue>,
    },
    /// `pattern` may contain `*` wildcards.
    Wildcard {
        field: String,
        pattern: String,
    },
    Prefix {
        field: String,
        value: String,
    },
    /// Numeric range, only ever emitted against timestamp attributes.
    Range {
        field: String,
        gte: Option<i64>,
        gt: Option<i64>,
        lte: Option<i64>,
        lt: Option<i64>,
    },
    Exists {
        field: String,
    },
    MatchAll,
    MatchNone,
    Bool(BoolFilter),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoolFilter {
    pub must: Vec<SearchFilter>,
    pub should: Vec<SearchFilter>,
    pub must_not: Vec<SearchFilter>,
    pub minimum_should_match: Option<u32>,
}

impl SearchFilter {
    pub fn term(field: &str, value: impl Into<JsonValue>) -> Self {
        SearchFilter::Term {
            field: field.to_owned(),
            value: value.into(),
        }
    }

    pub fn all_of(filters: Vec<SearchFilter>) -> Self {
        SearchFilter::Bool(BoolFilter {
            must: filters,
            ..BoolFilter::default()
        })
    }

    pub fn none_of(filters: Vec<SearchFilter>) -> Self {
        SearchFilter::Bool(BoolFilter {
            must_not: filters,
            ..BoolFilter::default()
        })
    }

    pub fn any_of(filters: Vec<SearchFilter>) -> Self {
        SearchFilter::Bool(BoolFilter {
            should: filters,
            minimum_should_match: Some(1),
            ..BoolFilter::default()
        })
    }
}

/// A compiled search request. Results always sort by `timestamp`; the total
/// hit count is always tracked.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub filter: SearchFilter,
    pub sort: SortOrder,
    pub from: usize,
    pub size: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchDocument>,
    pub total: u64,
}

/// Aggregate statistics for one project's slice of the index.
///
/// `size_bytes` is whatever the backend reports for the primary store; some
/// backends report 0 for small indexes, and callers must tolerate that.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IndexStats {
    pub doc_count: u64,
    pub size_bytes: u64,
    pub oldest_timestamp: Option<i64>,
    pub newest_timestamp: Option<i64>,
}

/// The opaque search backend capability, tenant-keyed by `project_id`.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    /// Bulk write. An `Ok` return means the backend acknowledged the batch,
    /// not that it is already visible to searches; see `refresh`.
    async fn bulk_index(&self, documents: Vec<SearchDocument>) -> anyhow::Result<()>;

    async fn search(
        &self,
        project_id: ProjectId,
        request: &SearchRequest,
    ) -> anyhow::Result<SearchResponse>;

    /// Delete everything matching `filter` within the project. Returns the
    /// number of deleted documents where the backend reports it.
    async fn delete_by_query(
        &self,
        project_id: ProjectId,
        filter: &SearchFilter,
    ) -> anyhow::Result<u64>;

    /// Distinct `attrs_tokens` entries seen for the project, for field
    /// discovery.
    async fn discover_tokens(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> anyhow::Result<Vec<String>>;

    async fn project_stats(&self, project_id: ProjectId) -> anyhow::Result<IndexStats>;

    /// Make previously acknowledged writes visible to subsequent searches.
    async fn refresh(&self) -> anyhow::Result<()>;
}
