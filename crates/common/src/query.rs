//! The structured query DSL accepted by the query endpoints.
//!
//! A query is a tree of [`QueryNode`]s: `Condition` leaves and `Logical`
//! interior nodes. The encoding is a closed tagged union: a node document
//! must carry exactly one of the `condition`/`logical` payloads, anything
//! else is rejected at deserialization time.

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value as JsonValue;

use crate::types::{
    FieldType,
    LogItem,
    LogTimestamp,
    SortOrder,
};

/// Fields the query compiler treats specially; everything else is a custom
/// field resolved through the token side index.
pub const SYSTEM_FIELDS: [&str; 7] = [
    "timestamp",
    "project_id",
    "id",
    "level",
    "client_ip",
    "created_at",
    "message",
];

pub fn is_system_field(name: &str) -> bool {
    SYSTEM_FIELDS.contains(&name)
}

/// The type a field name resolves to for operator compatibility checks.
/// Custom fields default to string semantics.
pub fn field_type(name: &str) -> FieldType {
    match name {
        "timestamp" | "created_at" => FieldType::Timestamp,
        _ => FieldType::String,
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Exists,
    NotExists,
}

impl QueryOperator {
    /// `EXISTS`/`NOT_EXISTS` are the only operators that take no value.
    pub fn requires_value(&self) -> bool {
        !matches!(self, QueryOperator::Exists | QueryOperator::NotExists)
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            QueryOperator::Gt | QueryOperator::Gte | QueryOperator::Lt | QueryOperator::Lte
        )
    }

    pub fn takes_array(&self) -> bool {
        matches!(self, QueryOperator::In | QueryOperator::NotIn)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    pub field: String,
    pub operator: QueryOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<JsonValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogicalNode {
    pub operator: LogicalOperator,
    pub children: Vec<QueryNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawQueryNode", into = "RawQueryNode")]
pub enum QueryNode {
    Condition(ConditionNode),
    Logical(LogicalNode),
}

impl QueryNode {
    pub fn condition(
        field: impl Into<String>,
        operator: QueryOperator,
        value: Option<JsonValue>,
    ) -> Self {
        QueryNode::Condition(ConditionNode {
            field: field.into(),
            operator,
            value,
        })
    }

    pub fn logical(operator: LogicalOperator, children: Vec<QueryNode>) -> Self {
        QueryNode::Logical(LogicalNode { operator, children })
    }
}

/// Wire shape of a query node. Exactly one payload must be present.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RawQueryNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<ConditionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logical: Option<LogicalNode>,
}

impl TryFrom<RawQueryNode> for QueryNode {
    type Error = String;

    fn try_from(raw: RawQueryNode) -> Result<Self, Self::Error> {
        match (raw.condition, raw.logical) {
            (Some(condition), None) => Ok(QueryNode::Condition(condition)),
            (None, Some(logical)) => Ok(QueryNode::Logical(logical)),
            (Some(..), Some(..)) => {
                Err("query node must not have both condition and logical payloads".to_owned())
            },
            (None, None) => {
                Err("query node must have either a condition or a logical payload".to_owned())
            },
        }
    }
}

impl From<QueryNode> for RawQueryNode {
    fn from(node: QueryNode) -> Self {
        match node {
            QueryNode::Condition(condition) => RawQueryNode {
                condition: Some(condition),
                logical: None,
            },
            QueryNode::Logical(logical) => RawQueryNode {
                condition: None,
                logical: Some(logical),
            },
        }
    }
}

/// Half-open time window over the `timestamp` field: `from ≤ t < to`.
/// `to` is required by the query service; `from` is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<LogTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<LogTimestamp>,
}

/// A structured query request, as posted to `/logs/query/execute`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQueryRequest {
    #[serde(default)]
    pub query: Option<QueryNode>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQueryResponse {
    pub logs: Vec<LogItem>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub executed_in_ms: u64,
}

/// A field the query UI can offer for filtering: the predefined system set
/// plus one entry per discovered custom field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryableField {
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub operations: Vec<QueryOperator>,
    pub is_custom: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        LogicalOperator,
        QueryNode,
        QueryOperator,
    };

    #[test]
    fn test_node_roundtrip() {
        let node = QueryNode::logical(
            LogicalOperator::And,
            vec![
                QueryNode::condition("level", QueryOperator::Equals, Some(json!("ERROR"))),
                QueryNode::condition("message", QueryOperator::Contains, Some(json!("payment"))),
            ],
        );
        let encoded = serde_json::to_value(&node).unwrap();
        let decoded: QueryNode = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_node_requires_exactly_one_payload() {
        let neither = json!({});
        assert!(serde_json::from_value::<QueryNode>(neither).is_err());

        let both = json!({
            "condition": { "field": "level", "operator": "EQUALS", "value": "INFO" },
            "logical": { "operator": "AND", "children": [] },
        });
        assert!(serde_json::from_value::<QueryNode>(both).is_err());
    }

    #[test]
    fn test_operator_wire_format() {
        assert_eq!(
            serde_json::to_value(QueryOperator::NotContains).unwrap(),
            json!("NOT_CONTAINS")
        );
    }
}
