use std::sync::Arc;

use common::{
    auth::{
        AccessChecker,
        AuditLogEntry,
        AuditLogWriter,
        Identity,
    },
    knobs::{
        DEFAULT_QUERY_LIMIT,
        MAX_QUERY_LIMIT,
        MAX_QUERY_OFFSET,
    },
    query::{
        LogQueryRequest,
        LogQueryResponse,
        QueryableField,
        QueryOperator,
    },
    runtime::Runtime,
    types::{
        FieldType,
        ProjectId,
    },
};
use errors::ErrorMetadata;
use storage::LogStorage;

use crate::{
    compiler::compile_query,
    limiter::ConcurrentQueryLimiter,
    metrics,
    validator::validate_query,
};

pub const MISSING_TIME_RANGE_TO: &str = "MISSING_TIME_RANGE_TO";
pub const ACCESS_DENIED: &str = "ACCESS_DENIED";

pub struct QueryService<RT: Runtime> {
    storage: Arc<LogStorage<RT>>,
    limiter: ConcurrentQueryLimiter,
    access: Arc<dyn AccessChecker>,
    audit: Arc<dyn AuditLogWriter>,
}

impl<RT: Runtime> QueryService<RT> {
    pub fn new(
        storage: Arc<LogStorage<RT>>,
        limiter: ConcurrentQueryLimiter,
        access: Arc<dyn AccessChecker>,
        audit: Arc<dyn AuditLogWriter>,
    ) -> Self {
        Self {
            storage,
            limiter,
            access,
            audit,
        }
    }

    /// Validate, compile, and execute one structured query. Slot accounting
    /// brackets only the storage call; validation failures never consume a
    /// slot.
    pub async fn execute_query(
        &self,
        identity: &Identity,
        project_id: ProjectId,
        request: LogQueryRequest,
    ) -> anyhow::Result<LogQueryResponse> {
        let timer = metrics::execute_query_timer();
        self.check_access(identity, project_id).await?;

        if request.time_range.to.is_none() {
            anyhow::bail!(ErrorMetadata::bad_request(
                MISSING_TIME_RANGE_TO,
                "timeRange.to is required",
            ));
        }
        validate_query(request.query.as_ref())?;

        let limit = request
            .limit
            .unwrap_or(*DEFAULT_QUERY_LIMIT)
            .min(*MAX_QUERY_LIMIT);
        let offset = request.offset.unwrap_or(0).min(*MAX_QUERY_OFFSET);
        let compiled = compile_query(
            project_id,
            request.query.as_ref(),
            &request.time_range,
            limit,
            offset,
            request.sort_order,
        )?;

        let response = match identity.user_id() {
            Some(user_id) => {
                self.limiter.acquire(user_id).await?;
                let result = self
                    .storage
                    .execute_query_for_project(project_id, compiled)
                    .await;
                self.limiter.release(user_id).await;
                result?
            },
            // Internal callers are not slot-limited.
            None => {
                self.storage
                    .execute_query_for_project(project_id, compiled)
                    .await?
            },
        };

        self.audit.write(AuditLogEntry {
            message: format!("Executed log query returning {} of {} results", response.logs.len(), response.total),
            user_id: identity.user_id(),
            project_id: Some(project_id),
        });
        timer.finish();
        Ok(response)
    }

    /// The fields available for filtering: the predefined set plus one per
    /// discovered custom field. Discovery failures degrade to the
    /// predefined set with a warning.
    pub async fn queryable_fields(
        &self,
        identity: &Identity,
        project_id: ProjectId,
        name_filter: Option<&str>,
    ) -> anyhow::Result<Vec<QueryableField>> {
        self.check_access(identity, project_id).await?;

        let mut fields = predefined_fields();
        match self.storage.discover_fields(project_id).await {
            Ok(custom) => fields.extend(custom.into_iter().map(custom_field)),
            Err(e) => {
                tracing::warn!(
                    "Field discovery failed for {project_id}, serving predefined fields: {e:#}",
                );
                metrics::log_field_discovery_fallback();
            },
        }
        if let Some(name_filter) = name_filter.map(str::trim).filter(|f| !f.is_empty()) {
            let needle = name_filter.to_lowercase();
            fields.retain(|field| field.name.to_lowercase().contains(&needle));
        }
        Ok(fields)
    }

    async fn check_access(
        &self,
        identity: &Identity,
        project_id: ProjectId,
    ) -> anyhow::Result<()> {
        if !self.access.can_access_project(identity, project_id).await? {
            anyhow::bail!(ErrorMetadata::forbidden(
                ACCESS_DENIED,
                "You do not have access to this project.",
            ));
        }
        Ok(())
    }
}

fn string_operations() -> Vec<QueryOperator> {
    use QueryOperator::*;
    vec![Equals, NotEquals, Contains, NotContains, In, NotIn, Exists, NotExists]
}

/// The fixed set of queryable system fields.
pub fn predefined_fields() -> Vec<QueryableField> {
    use QueryOperator::*;
    vec![
        QueryableField {
            name: "timestamp".to_owned(),
            display_name: "Timestamp".to_owned(),
            field_type: FieldType::Timestamp,
            operations: vec![Equals, NotEquals, Gt, Gte, Lt, Lte, Exists, NotExists],
            is_custom: false,
        },
        QueryableField {
            name: "level".to_owned(),
            display_name: "Level".to_owned(),
            field_type: FieldType::String,
            operations: string_operations(),
            is_custom: false,
        },
        QueryableField {
            name: "message".to_owned(),
            display_name: "Message".to_owned(),
            field_type: FieldType::String,
            operations: string_operations(),
            is_custom: false,
        },
        QueryableField {
            name: "client_ip".to_owned(),
            display_name: "Client IP".to_owned(),
            field_type: FieldType::String,
            operations: string_operations(),
            is_custom: false,
        },
    ]
}

fn custom_field(name: String) -> QueryableField {
    QueryableField {
        display_name: name.clone(),
        name,
        field_type: FieldType::String,
        operations: string_operations(),
        is_custom: true,
    }
}
