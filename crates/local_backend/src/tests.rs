use application::test_helpers::TestApplication;
use axum::Router;
use common::{
    projects::Project,
    runtime::Runtime,
    types::ProjectId,
};
use http::{
    header::RETRY_AFTER,
    Request,
    StatusCode,
};
use http_body_util::BodyExt;
use runtime::testing::TestRuntime;
use serde_json::{
    json,
    Value as JsonValue,
};
use tower::ServiceExt;

use crate::{
    router::router,
    LocalAppState,
};

const USER: &str = "8c4c1326-5bd8-41f7-86bb-8decb0b8e720";

fn test_router(rt: &TestRuntime) -> (Router, TestApplication<TestRuntime>) {
    let t = TestApplication::new(rt.clone());
    let state = LocalAppState {
        application: t.application.clone(),
    };
    (router(state), t)
}

fn project_id(seed: u128) -> ProjectId {
    ProjectId::new(uuid::Uuid::from_u128(seed))
}

fn ingest_request(project_id: ProjectId, body: &JsonValue) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/logs/receiving/{project_id}"))
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.50, 10.0.0.1")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn query_request(project_id: ProjectId, body: &JsonValue) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/logs/query/execute/{project_id}"))
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {USER}"))
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn events(count: usize) -> JsonValue {
    let logs: Vec<_> = (0..count)
        .map(|i| json!({ "level": "INFO", "message": format!("event {i}") }))
        .collect();
    json!({ "logs": logs })
}

#[tokio::test(start_paused = true)]
async fn test_ingest_and_query_over_http() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    t.seed_project(Project::new(p));

    let body = json!({
        "logs": [
            { "level": "ERROR", "message": "payment failed", "fields": { "region": "eu" } },
            // The client-supplied timestamp is ignored.
            { "level": "INFO", "message": "ok", "timestamp": "1999-01-01T00:00:00Z" },
        ]
    });
    let response = router.clone().oneshot(ingest_request(p, &body)).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let payload = body_json(response).await;
    assert_eq!(payload["accepted"], json!(2));
    assert_eq!(payload["rejected"], json!(0));

    t.application.run_background_tasks_for_test().await?;

    let to = (rt.generate_log_timestamp()?
        + std::time::Duration::from_secs(60))
    .to_rfc3339();
    let query = json!({
        "query": {
            "condition": { "field": "level", "operator": "EQUALS", "value": "ERROR" }
        },
        "timeRange": { "to": to },
        "limit": 10,
    });
    let response = router.clone().oneshot(query_request(p, &query)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    assert_eq!(payload["total"], json!(1));
    let log = &payload["logs"][0];
    assert_eq!(log["message"], json!("payment failed"));
    assert_eq!(log["fields"]["region"], json!("eu"));
    // The client IP rides in the fields map, resolved from the first
    // X-Forwarded-For entry.
    assert_eq!(log["fields"]["client_ip"], json!("203.0.113.50"));
    // No log predates the server acceptance time despite the 1999 client
    // timestamp.
    assert!(payload["logs"]
        .as_array()
        .unwrap()
        .iter()
        .all(|l| l["timestamp"].as_str().unwrap() > "2023"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_oversized_batch_is_a_400() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    t.seed_project(Project::new(p));

    let response = router.oneshot(ingest_request(p, &events(1001))).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = body_json(response).await;
    assert_eq!(payload["code"], json!("BATCH_TOO_LARGE"));
    assert!(payload["error"].is_string());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_domain_filter_over_http() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    let mut project = Project::new(p);
    project.is_filter_by_domain = true;
    project.allowed_domains = vec!["*.example.com".to_owned()];
    t.seed_project(project);

    let mut allowed = ingest_request(p, &events(1));
    allowed
        .headers_mut()
        .insert("origin", "https://api.example.com:8443".parse().unwrap());
    let response = router.clone().oneshot(allowed).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut rejected = ingest_request(p, &events(1));
    rejected
        .headers_mut()
        .insert("origin", "https://evil.com".parse().unwrap());
    let response = router.oneshot(rejected).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = body_json(response).await;
    assert_eq!(payload["code"], json!("DOMAIN_NOT_ALLOWED"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_project_is_a_404() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, _t) = test_router(&rt);

    let response = router
        .oneshot(ingest_request(project_id(9), &events(1)))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = body_json(response).await;
    assert_eq!(payload["code"], json!("PROJECT_NOT_FOUND"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_sets_retry_after() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    let mut project = Project::new(p);
    project.logs_per_second_limit = 2;
    t.seed_project(project);

    // Burst capacity is 10; the 11th event in the window is over.
    let response = router.clone().oneshot(ingest_request(p, &events(10))).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = router.oneshot(ingest_request(p, &events(1))).await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(RETRY_AFTER));
    let payload = body_json(response).await;
    assert_eq!(payload["code"], json!("RATE_LIMIT_EXCEEDED"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_query_requires_time_range_to() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    t.seed_project(Project::new(p));

    let response = router
        .oneshot(query_request(p, &json!({ "timeRange": {} })))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = body_json(response).await;
    assert_eq!(payload["code"], json!("MISSING_TIME_RANGE_TO"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_query_requires_identity() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    t.seed_project(Project::new(p));

    let request = Request::builder()
        .method("POST")
        .uri(format!("/logs/query/execute/{p}"))
        .header("content-type", "application/json")
        .body(axum::body::Body::from(json!({ "timeRange": {} }).to_string()))
        .unwrap();
    let response = router.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fields_endpoint() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, t) = test_router(&rt);
    let p = project_id(1);
    t.seed_project(Project::new(p));

    let body = json!({
        "logs": [{ "level": "INFO", "message": "m", "fields": { "region": "eu" } }]
    });
    router.clone().oneshot(ingest_request(p, &body)).await?;
    t.application.run_background_tasks_for_test().await?;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/logs/query/fields/{p}?query=reg"))
        .header("authorization", format!("Bearer {USER}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = body_json(response).await;
    let fields = payload["fields"].as_array().unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0]["name"], json!("region"));
    assert_eq!(fields[0]["isCustom"], json!(true));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_metrics_endpoint_renders() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (router, _t) = test_router(&rt);
    let request = Request::builder()
        .method("GET")
        .uri("/metrics")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = router.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
