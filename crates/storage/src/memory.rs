//! In-memory [`SearchBackend`] used by tests and single-node dev setups.
//!
//! Documents are held per project, so tenancy isolation is structural.
//! Writes are visible immediately; `refresh` is a no-op. Stats report real
//! serialized byte sizes, which production backends may round down to zero
//! for small indexes.

use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    sync::atomic::{
        AtomicU32,
        Ordering,
    },
};

use async_trait::async_trait;
use common::{
    search::{
        fields,
        BoolFilter,
        IndexStats,
        SearchBackend,
        SearchDocument,
        SearchFilter,
        SearchRequest,
        SearchResponse,
    },
    types::{
        ProjectId,
        SortOrder,
    },
};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

pub struct MemorySearchBackend {
    state: Mutex<BTreeMap<ProjectId, Vec<SearchDocument>>>,
    bulk_failures_remaining: AtomicU32,
}

impl MemorySearchBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
            bulk_failures_remaining: AtomicU32::new(0),
        }
    }

    /// Make the next `count` bulk writes fail, for exercising retry paths.
    pub fn fail_next_bulk_writes(&self, count: u32) {
        self.bulk_failures_remaining.store(count, Ordering::SeqCst);
    }

    fn matches(filter: &SearchFilter, doc: &SearchDocument) -> bool {
        match filter {
            SearchFilter::Term { field, value } => {
                field_values(doc, field).iter().any(|v| v == value)
            },
            SearchFilter::Terms { field, values } => {
                let candidates = field_values(doc, field);
                values.iter().any(|v| candidates.contains(v))
            },
            SearchFilter::Wildcard { field, pattern } => field_values(doc, field)
                .iter()
                .filter_map(JsonValue::as_str)
                .any(|text| wildcard_match(pattern, text)),
            SearchFilter::Prefix { field, value } => field_values(doc, field)
                .iter()
                .filter_map(JsonValue::as_str)
                .any(|text| text.starts_with(value.as_str())),
            SearchFilter::Range {
                field,
                gte,
                gt,
                lte,
                lt,
            } => field_values(doc, field)
                .iter()
                .filter_map(JsonValue::as_i64)
                .any(|candidate| {
                    gte.is_none_or(|bound| candidate >= bound)
                        && gt.is_none_or(|bound| candidate > bound)
                        && lte.is_none_or(|bound| candidate <= bound)
                        && lt.is_none_or(|bound| candidate < bound)
                }),
            SearchFilter::Exists { field } => !field_values(doc, field).is_empty(),
            SearchFilter::MatchAll => true,
            SearchFilter::MatchNone => false,
            SearchFilter::Bool(BoolFilter {
                must,
                should,
                must_not,
                minimum_should_match,
            }) => {
                if !must.iter().all(|f| Self::matches(f, doc)) {
                    return false;
                }
                if must_not.iter().any(|f| Self::matches(f, doc)) {
                    return false;
                }
                if !should.is_empty() {
                    let matched = should.iter().filter(|f| Self::matches(f, doc)).count();
                    if matched < minimum_should_match.unwrap_or(1) as usize {
                        return false;
                    }
                }
                true
            },
        }
    }
}

#[async_trait]
impl SearchBackend for MemorySearchBackend {
    async fn bulk_index(&self, documents: Vec<SearchDocument>) -> anyhow::Result<()> {
        let remaining = self.bulk_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.bulk_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("injected bulk write failure");
        }
        let mut state = self.state.lock();
        for doc in documents {
            state.entry(doc.project_id).or_default().push(doc);
        }
        Ok(())
    }

    async fn search(
        &self,
        project_id: ProjectId,
        request: &SearchRequest,
    ) -> anyhow::Result<SearchResponse> {
        let state = self.state.lock();
        let mut hits: Vec<SearchDocument> = state
            .get(&project_id)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| Self::matches(&request.filter, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Tie-break equal timestamps by id so pagination is stable.
        match request.sort {
            SortOrder::Asc => hits.sort_by_key(|doc| (doc.timestamp, doc.id)),
            SortOrder::Desc => {
                hits.sort_by_key(|doc| (std::cmp::Reverse(doc.timestamp), doc.id))
            },
        }
        let total = hits.len() as u64;
        let hits = hits
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .collect();
        Ok(SearchResponse { hits, total })
    }

    async fn delete_by_query(
        &self,
        project_id: ProjectId,
        filter: &SearchFilter,
    ) -> anyhow::Result<u64> {
        let mut state = self.state.lock();
        let Some(docs) = state.get_mut(&project_id) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !Self::matches(filter, doc));
        Ok((before - docs.len()) as u64)
    }

    async fn discover_tokens(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock();
        let tokens: BTreeSet<String> = state
            .get(&project_id)
            .map(|docs| {
                docs.iter()
                    .flat_map(|doc| doc.attrs_tokens.iter().cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(tokens.into_iter().take(limit).collect())
    }

    async fn project_stats(&self, project_id: ProjectId) -> anyhow::Result<IndexStats> {
        let state = self.state.lock();
        let Some(docs) = state.get(&project_id) else {
            return Ok(IndexStats::default());
        };
        let size_bytes: u64 = docs
            .iter()
            .map(|doc| serde_json::to_vec(doc).map(|b| b.len() as u64).unwrap_or(0))
            .sum();
        Ok(IndexStats {
            doc_count: docs.len() as u64,
            size_bytes,
            oldest_timestamp: docs.iter().map(|doc| doc.timestamp).min(),
            newest_timestamp: docs.iter().map(|doc| doc.timestamp).max(),
        })
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Values a document exposes for a field name. `attrs_tokens` fans out to
/// every token; unknown fields resolve through the custom-attribute map.
fn field_values(doc: &SearchDocument, field: &str) -> Vec<JsonValue> {
    match field {
        fields::ID => vec![JsonValue::String(doc.id.to_string())],
        fields::PROJECT_ID => vec![JsonValue::String(doc.project_id.to_string())],
        fields::TIMESTAMP => vec![JsonValue::from(doc.timestamp)],
        fields::CREATED_AT => vec![JsonValue::from(doc.created_at)],
        fields::LEVEL => vec![JsonValue::String(doc.level.to_string())],
        fields::MESSAGE => vec![JsonValue::String(doc.message.clone())],
        fields::CLIENT_IP => vec![JsonValue::String(doc.client_ip.clone())],
        fields::ATTRS_TOKENS => doc
            .attrs_tokens
            .iter()
            .map(|t| JsonValue::String(t.clone()))
            .collect(),
        other => doc.attrs.get(other).cloned().into_iter().collect(),
    }
}

/// Glob-style match where `*` spans any (possibly empty) substring.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == text;
    }
    let mut remaining = text;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match remaining.strip_prefix(segment) {
                Some(rest) => remaining = rest,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return remaining.ends_with(segment);
        } else {
            match remaining.find(segment) {
                Some(pos) => remaining = &remaining[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
