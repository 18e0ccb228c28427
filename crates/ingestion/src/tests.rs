use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use common::{
    auth::{
        ApiKeyValidator,
        AuditLogEntry,
        AuditLogWriter,
    },
    cache::InMemorySharedCache,
    projects::{
        Project,
        ProjectProvider,
    },
    runtime::Runtime,
    types::ProjectId,
};
use errors::ErrorMetadataAnyhowExt;
use log_workers::LogQueueEngine;
use maplit::btreemap;
use parking_lot::Mutex;
use runtime::testing::TestRuntime;
use serde_json::json;
use storage::{
    memory::MemorySearchBackend,
    LogStorage,
};

use crate::{
    service::{
        API_KEY_INVALID,
        API_KEY_REQUIRED,
        BATCH_TOO_LARGE,
        DOMAIN_NOT_ALLOWED,
        INVALID_LOG_LEVEL,
        INVALID_REQUEST,
        IP_NOT_ALLOWED,
        MESSAGE_EMPTY,
        PROJECT_NOT_FOUND,
        RATE_LIMIT_EXCEEDED,
    },
    IncomingLogEvent,
    IngestionService,
    ProjectRateLimiter,
    QuotaGate,
};

struct StaticProjects {
    projects: Mutex<BTreeMap<ProjectId, Project>>,
}

#[async_trait]
impl ProjectProvider for StaticProjects {
    async fn get_project_with_cache(
        &self,
        project_id: ProjectId,
    ) -> anyhow::Result<Option<Arc<Project>>> {
        Ok(self.projects.lock().get(&project_id).cloned().map(Arc::new))
    }

    async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        Ok(self.projects.lock().values().cloned().collect())
    }

    fn invalidate(&self, _project_id: ProjectId) {}
}

struct StaticApiKeys {
    key: String,
}

#[async_trait]
impl ApiKeyValidator for StaticApiKeys {
    async fn validate(&self, _project_id: ProjectId, api_key: &str) -> anyhow::Result<bool> {
        Ok(api_key == self.key)
    }
}

struct NoopAudit;

impl AuditLogWriter for NoopAudit {
    fn write(&self, _entry: AuditLogEntry) {}
}

struct TestSetup {
    service: IngestionService<TestRuntime>,
    engine: Arc<LogQueueEngine<TestRuntime>>,
    storage: Arc<LogStorage<TestRuntime>>,
    cache: Arc<InMemorySharedCache>,
    rt: TestRuntime,
}

fn project_id(seed: u128) -> ProjectId {
    ProjectId::new(uuid::Uuid::from_u128(seed))
}

fn setup(projects: Vec<Project>) -> TestSetup {
    let rt = TestRuntime::new();
    let cache = Arc::new(InMemorySharedCache::new());
    let storage = Arc::new(LogStorage::new(
        rt.clone(),
        Arc::new(MemorySearchBackend::new()),
    ));
    let engine = LogQueueEngine::new(rt.clone(), cache.clone(), storage.clone(), 2, 1);
    let provider = Arc::new(StaticProjects {
        projects: Mutex::new(projects.into_iter().map(|p| (p.id, p)).collect()),
    });
    let service = IngestionService::new(
        rt.clone(),
        provider,
        Arc::new(StaticApiKeys {
            key: "secret".to_owned(),
        }),
        ProjectRateLimiter::new(rt.clone(), cache.clone()),
        QuotaGate::new(storage.clone()),
        engine.clone(),
        Arc::new(NoopAudit),
    );
    TestSetup {
        service,
        engine,
        storage,
        cache,
        rt,
    }
}

fn info_event(message: &str) -> IncomingLogEvent {
    IncomingLogEvent {
        level: "INFO".to_owned(),
        message: message.to_owned(),
        timestamp: None,
        fields: None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_accepted_events_reach_storage() -> anyhow::Result<()> {
    let p = project_id(1);
    let t = setup(vec![Project::new(p)]);

    let mut event = info_event("hello");
    event.fields = Some(btreemap! { "region".to_owned() => json!("eu") });
    let outcome = t
        .service
        .ingest(p, vec![event], "203.0.113.9".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 0);

    t.engine.run_background_tasks_for_test().await?;
    let stats = t.storage.project_log_stats(p).await?;
    assert_eq!(stats.total_logs, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_is_rejected() {
    let p = project_id(1);
    let t = setup(vec![Project::new(p)]);
    let err = t
        .service
        .ingest(p, vec![], "203.0.113.9".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), INVALID_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_batch_is_rejected() {
    let p = project_id(1);
    let t = setup(vec![Project::new(p)]);
    let events = (0..1001).map(|i| info_event(&format!("e{i}"))).collect();
    let err = t
        .service
        .ingest(p, events, "203.0.113.9".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), BATCH_TOO_LARGE);
    assert!(err.is_bad_request());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_project() {
    let t = setup(vec![]);
    let err = t
        .service
        .ingest(
            project_id(9),
            vec![info_event("x")],
            "203.0.113.9".to_owned(),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), PROJECT_NOT_FOUND);
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_domain_filter() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.is_filter_by_domain = true;
    project.allowed_domains = vec!["*.example.com".to_owned()];
    let t = setup(vec![project]);

    let outcome = t
        .service
        .ingest(
            p,
            vec![info_event("ok")],
            "203.0.113.9".to_owned(),
            None,
            Some("https://api.example.com:8443"),
        )
        .await?;
    assert_eq!(outcome.accepted, 1);

    let err = t
        .service
        .ingest(
            p,
            vec![info_event("nope")],
            "203.0.113.9".to_owned(),
            None,
            Some("https://evil.com"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), DOMAIN_NOT_ALLOWED);
    assert!(err.is_forbidden());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ip_filter() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.is_filter_by_ip = true;
    project.allowed_ips = vec!["10.0.0.0/8".to_owned()];
    let t = setup(vec![project]);

    let outcome = t
        .service
        .ingest(p, vec![info_event("ok")], "10.20.30.40".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 1);

    let err = t
        .service
        .ingest(p, vec![info_event("no")], "192.0.2.1".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), IP_NOT_ALLOWED);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_api_key_checks() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.is_api_key_required = true;
    let t = setup(vec![project]);

    let err = t
        .service
        .ingest(p, vec![info_event("x")], "203.0.113.9".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), API_KEY_REQUIRED);
    assert!(err.is_unauthenticated());

    let err = t
        .service
        .ingest(
            p,
            vec![info_event("x")],
            "203.0.113.9".to_owned(),
            Some("wrong"),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), API_KEY_INVALID);

    let outcome = t
        .service
        .ingest(
            p,
            vec![info_event("x")],
            "203.0.113.9".to_owned(),
            Some("secret"),
            None,
        )
        .await?;
    assert_eq!(outcome.accepted, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_with_burst() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.logs_per_second_limit = 10;
    let t = setup(vec![project]);

    // Burst capacity is 5·r per window.
    let events: Vec<_> = (0..50).map(|i| info_event(&format!("e{i}"))).collect();
    let outcome = t
        .service
        .ingest(p, events, "203.0.113.9".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 50);

    let err = t
        .service
        .ingest(p, vec![info_event("over")], "203.0.113.9".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), RATE_LIMIT_EXCEEDED);
    assert!(err.retry_after().is_some());

    // A fresh window readmits.
    t.cache.advance_clock(Duration::from_secs(11));
    t.rt.advance_system_time(Duration::from_secs(11));
    let outcome = t
        .service
        .ingest(p, vec![info_event("later")], "203.0.113.9".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_per_event_validation_is_not_fatal() -> anyhow::Result<()> {
    let p = project_id(1);
    let t = setup(vec![Project::new(p)]);

    let events = vec![
        info_event("good"),
        IncomingLogEvent {
            level: "SHOUTING".to_owned(),
            message: "bad level".to_owned(),
            timestamp: None,
            fields: None,
        },
        IncomingLogEvent {
            level: "INFO".to_owned(),
            message: "   ".to_owned(),
            timestamp: None,
            fields: None,
        },
        info_event("also good"),
    ];
    let outcome = t
        .service
        .ingest(p, events, "203.0.113.9".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 2);
    assert_eq!(outcome.rejected, 2);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[0].index, 1);
    assert_eq!(outcome.errors[0].code, INVALID_LOG_LEVEL);
    assert_eq!(outcome.errors[1].index, 2);
    assert_eq!(outcome.errors[1].code, MESSAGE_EMPTY);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_json_messages_are_pretty_printed() -> anyhow::Result<()> {
    let p = project_id(1);
    let t = setup(vec![Project::new(p)]);

    let outcome = t
        .service
        .ingest(
            p,
            vec![info_event(r#"{"a":1,"b":[2,3]}"#)],
            "203.0.113.9".to_owned(),
            None,
            None,
        )
        .await?;
    assert_eq!(outcome.accepted, 1);

    t.engine.run_background_tasks_for_test().await?;
    let results = t
        .storage
        .execute_query_for_project(
            p,
            query_engine_request(p),
        )
        .await?;
    assert_eq!(results.logs.len(), 1);
    assert!(results.logs[0].message.contains("\n"));
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&results.logs[0].message)?,
        json!({"a": 1, "b": [2, 3]}),
    );
    Ok(())
}

fn query_engine_request(p: ProjectId) -> common::search::SearchRequest {
    common::search::SearchRequest {
        filter: common::search::SearchFilter::term(
            common::search::fields::PROJECT_ID,
            p.to_string(),
        ),
        sort: common::types::SortOrder::Desc,
        from: 0,
        size: 10,
    }
}

#[tokio::test(start_paused = true)]
async fn test_oversized_event_is_rejected_per_event() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.max_log_size_kb = 1;
    let t = setup(vec![project]);

    let events = vec![info_event(&"x".repeat(2048)), info_event("small")];
    let outcome = t
        .service
        .ingest(p, events, "203.0.113.9".to_owned(), None, None)
        .await?;
    assert_eq!(outcome.accepted, 1);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.errors[0].index, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_quota_gate_blocks_full_projects() -> anyhow::Result<()> {
    let p = project_id(1);
    let mut project = Project::new(p);
    project.max_logs_amount = 2;
    let t = setup(vec![project]);

    // Seed the project at its quota directly, so the gate's first (fresh)
    // stats probe sees the full project.
    let seeded: Vec<_> = (0..2)
        .map(|i| common::types::LogItem {
            id: t.rt.new_uuid_v4(),
            project_id: p,
            timestamp: t.rt.generate_log_timestamp().unwrap(),
            level: common::types::LogLevel::Info,
            message: format!("seeded {i}"),
            fields: BTreeMap::new(),
            client_ip: "203.0.113.9".to_owned(),
        })
        .collect();
    t.storage.store_batch(btreemap! { p => seeded }).await?;

    let err = t
        .service
        .ingest(p, vec![info_event("over")], "203.0.113.9".to_owned(), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.short_msg(), crate::quota::PROJECT_QUOTA_EXCEEDED);
    assert_eq!(err.http_status(), http::StatusCode::PAYLOAD_TOO_LARGE);
    Ok(())
}
