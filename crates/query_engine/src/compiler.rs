//! Compiles a validated DSL tree into a backend search request.
//!
//! The tenancy filter `project_id == <requested>` is AND-ed at the top
//! level and can never be shadowed: a user-supplied `project_id` condition
//! compiles beneath it, so cross-project references resolve to the (empty)
//! intersection. Timestamp values are normalized to integer microseconds
//! before handoff, so RFC3339Nano inputs match µs-precision storage.

use common::{
    query::{
        is_system_field,
        ConditionNode,
        LogicalNode,
        LogicalOperator,
        QueryNode,
        QueryOperator,
        TimeRange,
    },
    search::{
        fields,
        SearchFilter,
        SearchRequest,
    },
    types::{
        LogTimestamp,
        ProjectId,
        SortOrder,
    },
};
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

use crate::validator::INVALID_QUERY_STRUCTURE;

pub fn compile_query(
    project_id: ProjectId,
    query: Option<&QueryNode>,
    time_range: &TimeRange,
    limit: usize,
    offset: usize,
    sort: SortOrder,
) -> anyhow::Result<SearchRequest> {
    let mut must = vec![SearchFilter::term(
        fields::PROJECT_ID,
        project_id.to_string(),
    )];
    if time_range.from.is_some() || time_range.to.is_some() {
        must.push(SearchFilter::Range {
            field: fields::TIMESTAMP.to_owned(),
            gte: time_range.from.map(|ts| ts.as_micros()),
            gt: None,
            lte: None,
            lt: time_range.to.map(|ts| ts.as_micros()),
        });
    }
    if let Some(node) = query {
        must.push(compile_node(node)?);
    }
    Ok(SearchRequest {
        filter: SearchFilter::all_of(must),
        sort,
        from: offset,
        size: limit,
    })
}

fn compile_node(node: &QueryNode) -> anyhow::Result<SearchFilter> {
    match node {
        QueryNode::Condition(condition) => compile_condition(condition),
        QueryNode::Logical(logical) => compile_logical(logical),
    }
}

fn compile_logical(node: &LogicalNode) -> anyhow::Result<SearchFilter> {
    let children = node
        .children
        .iter()
        .map(compile_node)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(match node.operator {
        LogicalOperator::And => SearchFilter::all_of(children),
        LogicalOperator::Or => SearchFilter::any_of(children),
        LogicalOperator::Not => SearchFilter::none_of(children),
    })
}

fn compile_condition(condition: &ConditionNode) -> anyhow::Result<SearchFilter> {
    let field = condition.field.trim();
    if is_system_field(field) {
        compile_system_condition(field, condition)
    } else {
        compile_custom_condition(field, condition)
    }
}

/// System fields map to their keyword-form attribute directly.
fn compile_system_condition(
    field: &str,
    condition: &ConditionNode,
) -> anyhow::Result<SearchFilter> {
    use QueryOperator::*;
    let is_timestamp = matches!(field, "timestamp" | "created_at");
    let filter = match condition.operator {
        Equals if is_timestamp => SearchFilter::term(field, timestamp_micros(condition)?),
        NotEquals if is_timestamp => SearchFilter::none_of(vec![SearchFilter::term(
            field,
            timestamp_micros(condition)?,
        )]),
        Gt => timestamp_range(field, condition, |micros, r| r.2 = Some(micros))?,
        Gte => timestamp_range(field, condition, |micros, r| r.0 = Some(micros))?,
        Lt => timestamp_range(field, condition, |micros, r| r.3 = Some(micros))?,
        Lte => timestamp_range(field, condition, |micros, r| r.1 = Some(micros))?,
        Equals => SearchFilter::term(field, required_value(condition)?.clone()),
        NotEquals => SearchFilter::none_of(vec![SearchFilter::term(
            field,
            required_value(condition)?.clone(),
        )]),
        Contains => SearchFilter::Wildcard {
            field: field.to_owned(),
            pattern: format!("*{}*", string_value(condition)?),
        },
        NotContains => SearchFilter::none_of(vec![SearchFilter::Wildcard {
            field: field.to_owned(),
            pattern: format!("*{}*", string_value(condition)?),
        }]),
        In => match array_value(condition)? {
            [] => SearchFilter::MatchNone,
            values => SearchFilter::Terms {
                field: field.to_owned(),
                values: values.to_vec(),
            },
        },
        NotIn => match array_value(condition)? {
            [] => SearchFilter::MatchAll,
            values => SearchFilter::none_of(vec![SearchFilter::Terms {
                field: field.to_owned(),
                values: values.to_vec(),
            }]),
        },
        Exists => SearchFilter::Exists {
            field: field.to_owned(),
        },
        NotExists => SearchFilter::none_of(vec![SearchFilter::Exists {
            field: field.to_owned(),
        }]),
    };
    Ok(filter)
}

/// Custom fields resolve through the `attrs_tokens` side index of
/// `key=value` entries: equality and IN become exact token matches,
/// `EXISTS` is a `key=` prefix probe, and `CONTAINS` a `key=*v*` wildcard.
fn compile_custom_condition(
    field: &str,
    condition: &ConditionNode,
) -> anyhow::Result<SearchFilter> {
    use QueryOperator::*;
    let tokens_field = fields::ATTRS_TOKENS;
    let filter = match condition.operator {
        Equals => SearchFilter::term(
            tokens_field,
            format!("{field}={}", scalar_token(required_value(condition)?)),
        ),
        NotEquals => SearchFilter::none_of(vec![SearchFilter::term(
            tokens_field,
            format!("{field}={}", scalar_token(required_value(condition)?)),
        )]),
        Contains => SearchFilter::Wildcard {
            field: tokens_field.to_owned(),
            pattern: format!("{field}=*{}*", string_value(condition)?),
        },
        NotContains => SearchFilter::none_of(vec![SearchFilter::Wildcard {
            field: tokens_field.to_owned(),
            pattern: format!("{field}=*{}*", string_value(condition)?),
        }]),
        In => match array_value(condition)? {
            [] => SearchFilter::MatchNone,
            values => SearchFilter::Terms {
                field: tokens_field.to_owned(),
                values: values
                    .iter()
                    .map(|v| JsonValue::String(format!("{field}={}", scalar_token(v))))
                    .collect(),
            },
        },
        NotIn => match array_value(condition)? {
            [] => SearchFilter::MatchAll,
            values => SearchFilter::none_of(vec![SearchFilter::Terms {
                field: tokens_field.to_owned(),
                values: values
                    .iter()
                    .map(|v| JsonValue::String(format!("{field}={}", scalar_token(v))))
                    .collect(),
            }]),
        },
        Exists => SearchFilter::Prefix {
            field: tokens_field.to_owned(),
            value: format!("{field}="),
        },
        NotExists => SearchFilter::none_of(vec![SearchFilter::Prefix {
            field: tokens_field.to_owned(),
            value: format!("{field}="),
        }]),
        Gt | Gte | Lt | Lte => {
            // The validator rejects ranges on non-timestamp fields before
            // compilation.
            return Err(anyhow::anyhow!(ErrorMetadata::bad_request(
                INVALID_QUERY_STRUCTURE,
                format!("operator {} is not supported on field {field:?}", condition.operator),
            )));
        },
    };
    Ok(filter)
}

fn required_value(condition: &ConditionNode) -> anyhow::Result<&JsonValue> {
    condition
        .value
        .as_ref()
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            anyhow::anyhow!(ErrorMetadata::bad_request(
                INVALID_QUERY_STRUCTURE,
                format!("operator {} requires a value", condition.operator),
            ))
        })
}

fn string_value(condition: &ConditionNode) -> anyhow::Result<String> {
    Ok(scalar_token(required_value(condition)?))
}

fn array_value(condition: &ConditionNode) -> anyhow::Result<&[JsonValue]> {
    match required_value(condition)? {
        JsonValue::Array(values) => Ok(values),
        _ => Err(anyhow::anyhow!(ErrorMetadata::bad_request(
            INVALID_QUERY_STRUCTURE,
            format!("operator {} requires an array value", condition.operator),
        ))),
    }
}

fn scalar_token(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn timestamp_micros(condition: &ConditionNode) -> anyhow::Result<i64> {
    let value = required_value(condition)?;
    let JsonValue::String(raw) = value else {
        return Err(anyhow::anyhow!(ErrorMetadata::bad_request(
            INVALID_QUERY_STRUCTURE,
            "timestamp conditions take an RFC3339 string value",
        )));
    };
    let ts = LogTimestamp::parse_rfc3339(raw).map_err(|e| {
        anyhow::anyhow!(ErrorMetadata::bad_request(
            INVALID_QUERY_STRUCTURE,
            format!("invalid timestamp value: {e}"),
        ))
    })?;
    Ok(ts.as_micros())
}

/// Build a one-sided range on a timestamp field. The closure sets the
/// relevant bound of `(gte, lte, gt, lt)`.
fn timestamp_range(
    field: &str,
    condition: &ConditionNode,
    set_bound: impl FnOnce(i64, &mut (Option<i64>, Option<i64>, Option<i64>, Option<i64>)),
) -> anyhow::Result<SearchFilter> {
    let micros = timestamp_micros(condition)?;
    let mut bounds = (None, None, None, None);
    set_bound(micros, &mut bounds);
    let (gte, lte, gt, lt) = bounds;
    Ok(SearchFilter::Range {
        field: field.to_owned(),
        gte,
        gt,
        lte,
        lt,
    })
}
