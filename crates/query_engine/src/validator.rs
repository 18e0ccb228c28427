//! Structural, complexity, and typing checks on the query DSL tree.
//!
//! Structural violations surface as `INVALID_QUERY_STRUCTURE`, complexity
//! violations as `QUERY_TOO_COMPLEX`; both map to HTTP 400. A `null` query
//! is valid and means "match everything in the time range".

use common::{
    knobs::{
        QUERY_MAX_ARRAY_VALUES,
        QUERY_MAX_LOGICAL_CHILDREN,
        QUERY_MAX_TREE_DEPTH,
        QUERY_MAX_TREE_NODES,
        QUERY_MAX_VALUE_LENGTH,
    },
    query::{
        field_type,
        ConditionNode,
        LogicalNode,
        LogicalOperator,
        QueryNode,
        QueryOperator,
    },
    types::FieldType,
};
use errors::ErrorMetadata;
use serde_json::Value as JsonValue;

pub const INVALID_QUERY_STRUCTURE: &str = "INVALID_QUERY_STRUCTURE";
pub const QUERY_TOO_COMPLEX: &str = "QUERY_TOO_COMPLEX";

fn invalid_structure(msg: impl Into<std::borrow::Cow<'static, str>>) -> anyhow::Error {
    anyhow::anyhow!(ErrorMetadata::bad_request(INVALID_QUERY_STRUCTURE, msg))
}

fn too_complex(msg: impl Into<std::borrow::Cow<'static, str>>) -> anyhow::Error {
    anyhow::anyhow!(ErrorMetadata::bad_request(QUERY_TOO_COMPLEX, msg))
}

pub fn validate_query(query: Option<&QueryNode>) -> anyhow::Result<()> {
    let Some(node) = query else {
        return Ok(());
    };
    let mut node_count = 0;
    validate_node(node, 1, &mut node_count)
}

fn validate_node(node: &QueryNode, depth: usize, node_count: &mut usize) -> anyhow::Result<()> {
    if depth > *QUERY_MAX_TREE_DEPTH {
        return Err(too_complex(format!(
            "query tree exceeds the maximum depth of {}",
            *QUERY_MAX_TREE_DEPTH,
        )));
    }
    *node_count += 1;
    if *node_count > *QUERY_MAX_TREE_NODES {
        return Err(too_complex(format!(
            "query tree exceeds the maximum of {} nodes",
            *QUERY_MAX_TREE_NODES,
        )));
    }
    match node {
        QueryNode::Condition(condition) => validate_condition(condition),
        QueryNode::Logical(logical) => {
            validate_logical(logical)?;
            for child in &logical.children {
                validate_node(child, depth + 1, node_count)?;
            }
            Ok(())
        },
    }
}

fn validate_logical(node: &LogicalNode) -> anyhow::Result<()> {
    if node.children.is_empty() {
        return Err(invalid_structure(format!(
            "{} node must have at least one child",
            node.operator,
        )));
    }
    if node.operator == LogicalOperator::Not && node.children.len() != 1 {
        return Err(invalid_structure("NOT node must have exactly one child"));
    }
    if node.children.len() > *QUERY_MAX_LOGICAL_CHILDREN {
        return Err(too_complex(format!(
            "{} node exceeds the maximum of {} children",
            node.operator, *QUERY_MAX_LOGICAL_CHILDREN,
        )));
    }
    Ok(())
}

fn validate_condition(condition: &ConditionNode) -> anyhow::Result<()> {
    let field = condition.field.trim();
    if field.is_empty() {
        return Err(invalid_structure("condition field must not be empty"));
    }

    let field_ty = field_type(field);
    if !operator_supported(field_ty, condition.operator) {
        return Err(invalid_structure(format!(
            "operator {} is not supported on field {field:?}",
            condition.operator,
        )));
    }

    if !condition.operator.requires_value() {
        return Ok(());
    }
    let Some(value) = condition.value.as_ref().filter(|v| !v.is_null()) else {
        return Err(invalid_structure(format!(
            "operator {} requires a value",
            condition.operator,
        )));
    };

    if condition.operator.takes_array() {
        let JsonValue::Array(elements) = value else {
            return Err(invalid_structure(format!(
                "operator {} requires an array value",
                condition.operator,
            )));
        };
        if elements.len() > *QUERY_MAX_ARRAY_VALUES {
            return Err(too_complex(format!(
                "array value exceeds the maximum of {} entries",
                *QUERY_MAX_ARRAY_VALUES,
            )));
        }
        for element in elements {
            validate_scalar(element)?;
        }
        return Ok(());
    }

    if field_ty == FieldType::Timestamp && !value.is_string() {
        return Err(invalid_structure(format!(
            "field {field:?} takes an RFC3339 timestamp string",
        )));
    }
    validate_scalar(value)
}

fn validate_scalar(value: &JsonValue) -> anyhow::Result<()> {
    match value {
        JsonValue::String(s) => {
            if s.chars().count() > *QUERY_MAX_VALUE_LENGTH {
                return Err(too_complex(format!(
                    "string value exceeds the maximum length of {}",
                    *QUERY_MAX_VALUE_LENGTH,
                )));
            }
            Ok(())
        },
        JsonValue::Number(..) | JsonValue::Bool(..) => Ok(()),
        JsonValue::Null | JsonValue::Array(..) | JsonValue::Object(..) => Err(invalid_structure(
            "condition values must be strings, numbers, or booleans",
        )),
    }
}

/// Operator/field-type compatibility: string fields take string operators,
/// timestamp fields take equality, ordering, and existence. Range operators
/// on anything else are rejected.
fn operator_supported(field_ty: FieldType, operator: QueryOperator) -> bool {
    use QueryOperator::*;
    match field_ty {
        FieldType::Timestamp => matches!(operator, Equals | NotEquals | Gt | Gte | Lt | Lte
            | Exists | NotExists),
        FieldType::String => matches!(operator, Equals | NotEquals | Contains | NotContains
            | In | NotIn | Exists | NotExists),
        FieldType::Number | FieldType::Boolean | FieldType::Array => {
            !operator.is_range()
        },
    }
}
