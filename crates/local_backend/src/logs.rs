//! Handlers for the log ingest and query endpoints.

use axum::{
    extract::State,
    response::IntoResponse,
};
use common::{
    http::{
        extract::{
            Json,
            Path,
            Query,
        },
        HttpResponseError,
    },
    query::{
        LogQueryRequest,
        QueryableField,
    },
    runtime::Runtime,
    types::ProjectId,
};
use http::{
    HeaderMap,
    StatusCode,
};
use ingestion::{
    IncomingLogEvent,
    IngestOutcome,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    parse::{
        api_key,
        request_origin,
        ExtractClientIp,
        ExtractIdentity,
    },
    LocalAppState,
};

#[derive(Deserialize)]
pub struct ReceiveLogsRequest {
    #[serde(default)]
    pub logs: Vec<IncomingLogEvent>,
}

/// `POST /logs/receiving/{project_id}`: returns 202 once accepted events
/// sit in the worker engine's buffers. Durability from there is
/// best-effort by design, so a 202 does not guarantee the events survive a
/// crash of this node.
pub async fn receive_logs<RT: Runtime>(
    State(st): State<LocalAppState<RT>>,
    Path(project_id): Path<ProjectId>,
    ExtractClientIp(client_ip): ExtractClientIp,
    headers: HeaderMap,
    Json(body): Json<ReceiveLogsRequest>,
) -> Result<impl IntoResponse, HttpResponseError> {
    let outcome: IngestOutcome = st
        .application
        .ingest(
            project_id,
            body.logs,
            client_ip,
            api_key(&headers).as_deref(),
            request_origin(&headers).as_deref(),
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// `POST /logs/query/execute/{project_id}`
pub async fn execute_query<RT: Runtime>(
    State(st): State<LocalAppState<RT>>,
    Path(project_id): Path<ProjectId>,
    ExtractIdentity(identity): ExtractIdentity,
    Json(request): Json<LogQueryRequest>,
) -> Result<impl IntoResponse, HttpResponseError> {
    let response = st
        .application
        .execute_query(&identity, project_id, request)
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct QueryFieldsArgs {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Serialize)]
pub struct QueryFieldsResponse {
    pub fields: Vec<QueryableField>,
}

/// `GET /logs/query/fields/{project_id}?query=`
pub async fn query_fields<RT: Runtime>(
    State(st): State<LocalAppState<RT>>,
    Path(project_id): Path<ProjectId>,
    ExtractIdentity(identity): ExtractIdentity,
    Query(args): Query<QueryFieldsArgs>,
) -> Result<impl IntoResponse, HttpResponseError> {
    let fields = st
        .application
        .queryable_fields(&identity, project_id, args.query.as_deref())
        .await?;
    Ok(Json(QueryFieldsResponse { fields }))
}
