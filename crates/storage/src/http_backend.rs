//! HTTP [`SearchBackend`] speaking the OpenSearch/Elasticsearch wire
//! protocol. One index per project; the compiled filter AST serializes to
//! the standard bool-query JSON.

use std::time::Duration;

use anyhow::Context;
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
use reqwest::StatusCode;
use serde_json::{
    json,
    Value as JsonValue,
};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INDEX_PREFIX: &str = "logbull-logs";

pub struct HttpSearchBackend {
    client: reqwest::Client,
    base_url: Url,
}

/// `{key: value}` with a runtime key, which `json!` cannot express.
fn obj(key: &str, value: JsonValue) -> JsonValue {
    let mut map = serde_json::Map::new();
    map.insert(key.to_owned(), value);
    JsonValue::Object(map)
}

impl HttpSearchBackend {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build search backend client")?;
        Ok(Self { client, base_url })
    }

    fn index_name(project_id: ProjectId) -> String {
        format!("{INDEX_PREFIX}-{project_id}")
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid search backend path {path:?}"))
    }

    async fn post_json(&self, path: &str, body: &JsonValue) -> anyhow::Result<JsonValue> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await
            .with_context(|| format!("search backend request to {path} failed"))?;
        let status = response.status();
        let payload: JsonValue = response
            .json()
            .await
            .with_context(|| format!("search backend returned non-JSON from {path}"))?;
        anyhow::ensure!(
            status.is_success(),
            "search backend returned {status} from {path}: {payload}",
        );
        Ok(payload)
    }

    async fn index_exists(&self, index: &str) -> anyhow::Result<bool> {
        let response = self
            .client
            .head(self.endpoint(index)?)
            .send()
            .await
            .context("index existence check failed")?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }
}

/// Serialize a filter into the backend's native query JSON.
fn filter_to_query(filter: &SearchFilter) -> JsonValue {
    match filter {
        SearchFilter::Term { field, value } => obj("term", obj(field, value.clone())),
        SearchFilter::Terms { field, values } => {
            obj("terms", obj(field, JsonValue::Array(values.clone())))
        },
        SearchFilter::Wildcard { field, pattern } => {
            obj("wildcard", obj(field, json!({ "value": pattern })))
        },
        SearchFilter::Prefix { field, value } => {
            obj("prefix", obj(field, json!({ "value": value })))
        },
        SearchFilter::Range {
            field,
            gte,
            gt,
            lte,
            lt,
        } => {
            let mut bounds = serde_json::Map::new();
            if let Some(bound) = gte {
                bounds.insert("gte".to_owned(), json!(bound));
            }
            if let Some(bound) = gt {
                bounds.insert("gt".to_owned(), json!(bound));
            }
            if let Some(bound) = lte {
                bounds.insert("lte".to_owned(), json!(bound));
            }
            if let Some(bound) = lt {
                bounds.insert("lt".to_owned(), json!(bound));
            }
            obj("range", obj(field, JsonValue::Object(bounds)))
        },
        SearchFilter::Exists { field } => obj("exists", json!({ "field": field })),
        SearchFilter::MatchAll => json!({ "match_all": {} }),
        SearchFilter::MatchNone => json!({ "match_none": {} }),
        SearchFilter::Bool(BoolFilter {
            must,
            should,
            must_not,
            minimum_should_match,
        }) => {
            let mut bool_body = serde_json::Map::new();
            if !must.is_empty() {
                bool_body.insert("must".to_owned(), must.iter().map(filter_to_query).collect());
            }
            if !should.is_empty() {
                bool_body.insert(
                    "should".to_owned(),
                    should.iter().map(filter_to_query).collect(),
                );
            }
            if !must_not.is_empty() {
                bool_body.insert(
                    "must_not".to_owned(),
                    must_not.iter().map(filter_to_query).collect(),
                );
            }
            if let Some(msm) = minimum_should_match {
                bool_body.insert("minimum_should_match".to_owned(), json!(msm));
            }
            obj("bool", JsonValue::Object(bool_body))
        },
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn bulk_index(&self, documents: Vec<SearchDocument>) -> anyhow::Result<()> {
        let mut body = String::new();
        for doc in &documents {
            let action = obj(
                "index",
                json!({ "_index": Self::index_name(doc.project_id), "_id": doc.id }),
            );
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }
        let response = self
            .client
            .post(self.endpoint("_bulk")?)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("bulk request failed")?;
        let status = response.status();
        let payload: JsonValue = response.json().await.context("bulk response not JSON")?;
        anyhow::ensure!(
            status.is_success(),
            "bulk request returned {status}: {payload}",
        );
        anyhow::ensure!(
            !payload["errors"].as_bool().unwrap_or(false),
            "bulk request had item failures: {payload}",
        );
        Ok(())
    }

    async fn search(
        &self,
        project_id: ProjectId,
        request: &SearchRequest,
    ) -> anyhow::Result<SearchResponse> {
        let order = match request.sort {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        let body = json!({
            "query": filter_to_query(&request.filter),
            "sort": [
                obj(fields::TIMESTAMP, json!({ "order": order })),
                obj(fields::ID, json!({ "order": "asc" })),
            ],
            "from": request.from,
            "size": request.size,
            "track_total_hits": true,
        });
        let index = Self::index_name(project_id);
        let payload = match self.post_json(&format!("{index}/_search"), &body).await {
            Ok(payload) => payload,
            Err(e) => {
                // A project with no data yet has no index.
                if !self.index_exists(&index).await? {
                    return Ok(SearchResponse::default());
                }
                return Err(e);
            },
        };

        let total = payload["hits"]["total"]["value"].as_u64().unwrap_or(0);
        let mut hits = vec![];
        for hit in payload["hits"]["hits"].as_array().into_iter().flatten() {
            let doc: SearchDocument = serde_json::from_value(hit["_source"].clone())
                .context("malformed document in search response")?;
            hits.push(doc);
        }
        Ok(SearchResponse { hits, total })
    }

    async fn delete_by_query(
        &self,
        project_id: ProjectId,
        filter: &SearchFilter,
    ) -> anyhow::Result<u64> {
        let index = Self::index_name(project_id);
        if !self.index_exists(&index).await? {
            return Ok(0);
        }
        let body = obj("query", filter_to_query(filter));
        let payload = self
            .post_json(&format!("{index}/_delete_by_query"), &body)
            .await?;
        Ok(payload["deleted"].as_u64().unwrap_or(0))
    }

    async fn discover_tokens(
        &self,
        project_id: ProjectId,
        limit: usize,
    ) -> anyhow::Result<Vec<String>> {
        let index = Self::index_name(project_id);
        if !self.index_exists(&index).await? {
            return Ok(vec![]);
        }
        let body = json!({
            "size": 0,
            "aggs": {
                "tokens": {
                    "terms": { "field": fields::ATTRS_TOKENS, "size": limit }
                }
            },
        });
        let payload = self.post_json(&format!("{index}/_search"), &body).await?;
        let buckets = payload["aggregations"]["tokens"]["buckets"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(buckets
            .iter()
            .filter_map(|bucket| bucket["key"].as_str().map(str::to_owned))
            .collect())
    }

    async fn project_stats(&self, project_id: ProjectId) -> anyhow::Result<IndexStats> {
        let index = Self::index_name(project_id);
        if !self.index_exists(&index).await? {
            return Ok(IndexStats::default());
        }
        let body = json!({
            "size": 0,
            "track_total_hits": true,
            "aggs": {
                "oldest": { "min": { "field": fields::TIMESTAMP } },
                "newest": { "max": { "field": fields::TIMESTAMP } },
            },
        });
        let payload = self.post_json(&format!("{index}/_search"), &body).await?;
        let doc_count = payload["hits"]["total"]["value"].as_u64().unwrap_or(0);

        let stats = self
            .client
            .get(self.endpoint(&format!("{index}/_stats/store"))?)
            .send()
            .await
            .context("stats request failed")?
            .json::<JsonValue>()
            .await
            .context("stats response not JSON")?;
        let size_bytes = stats["_all"]["primaries"]["store"]["size_in_bytes"]
            .as_u64()
            .unwrap_or(0);

        Ok(IndexStats {
            doc_count,
            size_bytes,
            oldest_timestamp: payload["aggregations"]["oldest"]["value"]
                .as_f64()
                .map(|v| v as i64),
            newest_timestamp: payload["aggregations"]["newest"]["value"]
                .as_f64()
                .map(|v| v as i64),
        })
    }

    async fn refresh(&self) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint(&format!("{INDEX_PREFIX}-*/_refresh"))?)
            .send()
            .await
            .context("refresh request failed")?
            .error_for_status()
            .context("refresh request rejected")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::search::SearchFilter;
    use serde_json::json;

    use super::filter_to_query;

    #[test]
    fn test_bool_query_shape() {
        let filter = SearchFilter::all_of(vec![
            SearchFilter::term("project_id", "p1"),
            SearchFilter::any_of(vec![
                SearchFilter::term("level", "ERROR"),
                SearchFilter::term("level", "FATAL"),
            ]),
        ]);
        assert_eq!(
            filter_to_query(&filter),
            json!({
                "bool": {
                    "must": [
                        { "term": { "project_id": "p1" } },
                        {
                            "bool": {
                                "should": [
                                    { "term": { "level": "ERROR" } },
                                    { "term": { "level": "FATAL" } },
                                ],
                                "minimum_should_match": 1,
                            }
                        },
                    ]
                }
            })
        );
    }

    #[test]
    fn test_empty_in_compiles_to_match_none() {
        assert_eq!(
            filter_to_query(&SearchFilter::MatchNone),
            json!({ "match_none": {} })
        );
    }
}
