use std::time::Instant;

use axum::{
    extract::{
        MatchedPath,
        Request,
    },
    middleware::{
        self,
        Next,
    },
    response::Response,
    routing::{
        get,
        post,
    },
    Router,
};
use common::{
    http::log_http_request,
    runtime::Runtime,
};
use tower_http::cors::CorsLayer;

use crate::{
    logs::{
        execute_query,
        query_fields,
        receive_logs,
    },
    LocalAppState,
};

pub fn router<RT: Runtime>(state: LocalAppState<RT>) -> Router {
    // Browser clients post logs directly, so the ingest route answers
    // preflights; the query routes sit behind the dashboard's own origin.
    let ingest_routes = Router::new()
        .route("/logs/receiving/{project_id}", post(receive_logs::<RT>))
        .layer(CorsLayer::permissive());
    let query_routes = Router::new()
        .route("/logs/query/execute/{project_id}", post(execute_query::<RT>))
        .route("/logs/query/fields/{project_id}", get(query_fields::<RT>));

    Router::new()
        .merge(ingest_routes)
        .merge(query_routes)
        .route("/metrics", get(common::http::metrics))
        .route("/version", get(version))
        .layer(middleware::from_fn(track_request_metrics))
        .with_state(state)
}

async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

async fn track_request_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unknown".to_owned());
    let method = request.method().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    log_http_request(
        &route,
        &method,
        response.status().as_str(),
        start.elapsed(),
    );
    response
}
