use std::{
    collections::BTreeMap,
    sync::Arc,
};

use common::{
    runtime::Runtime,
    search::{
        fields,
        SearchFilter,
        SearchRequest,
    },
    types::{
        LogItem,
        LogLevel,
        LogTimestamp,
        ProjectId,
        SortOrder,
    },
};
use maplit::btreemap;
use runtime::testing::TestRuntime;
use serde_json::json;

use crate::{
    memory::MemorySearchBackend,
    LogStorage,
};

fn test_project(seed: u128) -> ProjectId {
    ProjectId::new(uuid::Uuid::from_u128(seed))
}

fn test_storage(rt: &TestRuntime) -> (LogStorage<TestRuntime>, Arc<MemorySearchBackend>) {
    let backend = Arc::new(MemorySearchBackend::new());
    (LogStorage::new(rt.clone(), backend.clone()), backend)
}

fn log_item(rt: &TestRuntime, project_id: ProjectId, message: &str) -> LogItem {
    LogItem {
        id: rt.new_uuid_v4(),
        project_id,
        timestamp: rt.generate_log_timestamp().unwrap(),
        level: LogLevel::Info,
        message: message.to_owned(),
        fields: BTreeMap::new(),
        client_ip: "10.0.0.1".to_owned(),
    }
}

fn match_all_request(project_id: ProjectId, limit: usize, offset: usize) -> SearchRequest {
    SearchRequest {
        filter: SearchFilter::all_of(vec![SearchFilter::term(
            fields::PROJECT_ID,
            project_id.to_string(),
        )]),
        sort: SortOrder::Desc,
        from: offset,
        size: limit,
    }
}

#[tokio::test(start_paused = true)]
async fn test_store_and_query_roundtrip() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(1);

    let mut item = log_item(&rt, project, "payment failed");
    item.fields = btreemap! {
        "user".to_owned() => json!("u-17"),
        "attempt".to_owned() => json!(3),
    };
    storage
        .store_batch(btreemap! { project => vec![item.clone()] })
        .await?;

    let results = storage
        .execute_query_for_project(project, match_all_request(project, 10, 0))
        .await?;
    assert_eq!(results.total, 1);
    assert_eq!(results.logs.len(), 1);
    let returned = &results.logs[0];
    assert_eq!(returned.id, item.id);
    assert_eq!(returned.message, "payment failed");
    // The client IP is folded into the fields map for callers.
    assert_eq!(returned.fields["client_ip"], json!("10.0.0.1"));
    assert_eq!(returned.fields["user"], json!("u-17"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_queries_never_leak_across_projects() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let (p1, p2) = (test_project(1), test_project(2));

    storage
        .store_batch(btreemap! {
            p1 => vec![log_item(&rt, p1, "from p1")],
            p2 => vec![log_item(&rt, p2, "from p2")],
        })
        .await?;

    // Even a request whose filter names the other project's id cannot
    // escape the requested project.
    let request = SearchRequest {
        filter: SearchFilter::all_of(vec![SearchFilter::term(
            fields::PROJECT_ID,
            p2.to_string(),
        )]),
        sort: SortOrder::Desc,
        from: 0,
        size: 10,
    };
    let results = storage.execute_query_for_project(p1, request).await?;
    assert!(results.logs.iter().all(|log| log.project_id == p1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timestamp_equality_after_truncation() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(3);

    let item = log_item(&rt, project, "probe me");
    storage
        .store_batch(btreemap! { project => vec![item.clone()] })
        .await?;

    // An RFC3339 string with extra (sub-µs) precision denotes the same
    // stored instant once truncated.
    let nanos_form = format!(
        "{}",
        item.timestamp.to_rfc3339().replace('Z', "999Z"),
    );
    let probe = LogTimestamp::parse_rfc3339(&nanos_form)?;
    assert_eq!(probe, item.timestamp);

    let request = SearchRequest {
        filter: SearchFilter::all_of(vec![
            SearchFilter::term(fields::PROJECT_ID, project.to_string()),
            SearchFilter::term(fields::TIMESTAMP, probe.as_micros()),
        ]),
        sort: SortOrder::Desc,
        from: 0,
        size: 10,
    };
    let results = storage.execute_query_for_project(project, request).await?;
    assert_eq!(results.total, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_pagination_pages_are_disjoint() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(4);

    let items: Vec<LogItem> = (0..10)
        .map(|i| {
            let mut item = log_item(&rt, project, &format!("event {i}"));
            rt.advance_system_time(std::time::Duration::from_millis(1));
            item.timestamp = rt.generate_log_timestamp().unwrap();
            item
        })
        .collect();
    storage.store_batch(btreemap! { project => items }).await?;

    let page1 = storage
        .execute_query_for_project(project, match_all_request(project, 4, 0))
        .await?;
    let page2 = storage
        .execute_query_for_project(project, match_all_request(project, 4, 4))
        .await?;
    assert_eq!(page1.total, 10);
    assert_eq!(page2.total, 10);

    let ids1: Vec<_> = page1.logs.iter().map(|l| l.id).collect();
    let ids2: Vec<_> = page2.logs.iter().map(|l| l.id).collect();
    assert!(ids1.iter().all(|id| !ids2.contains(id)));

    // Both pages are slices of one monotone (descending) order.
    let all = storage
        .execute_query_for_project(project, match_all_request(project, 10, 0))
        .await?;
    let all_ids: Vec<_> = all.logs.iter().map(|l| l.id).collect();
    assert_eq!(&all_ids[..4], &ids1[..]);
    assert_eq!(&all_ids[4..8], &ids2[..]);
    assert!(all
        .logs
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_old_logs_is_exact() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(5);

    let mut items = vec![];
    for i in 0..20 {
        let mut item = log_item(&rt, project, &format!("event {i}"));
        rt.advance_system_time(std::time::Duration::from_secs(60));
        item.timestamp = rt.generate_log_timestamp().unwrap();
        items.push(item);
    }
    let cutoff = items[12].timestamp;
    storage.store_batch(btreemap! { project => items.clone() }).await?;

    let deleted = storage.delete_old_logs(project, cutoff).await?;
    assert_eq!(deleted, 12);

    let results = storage
        .execute_query_for_project(project, match_all_request(project, 100, 0))
        .await?;
    let surviving: Vec<_> = results.logs.iter().map(|l| l.id).collect();
    for item in &items {
        let should_survive = item.timestamp >= cutoff;
        assert_eq!(surviving.contains(&item.id), should_survive);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delete_logs_by_project_is_idempotent() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(6);

    // No data at all: still succeeds.
    storage.delete_logs_by_project(project).await?;

    storage
        .store_batch(btreemap! { project => vec![log_item(&rt, project, "x")] })
        .await?;
    storage.delete_logs_by_project(project).await?;
    storage.delete_logs_by_project(project).await?;

    let stats = storage.project_log_stats(project).await?;
    assert_eq!(stats.total_logs, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_store_batch_retries_transient_failures() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, backend) = test_storage(&rt);
    let project = test_project(7);

    backend.fail_next_bulk_writes(2);
    storage
        .store_batch(btreemap! { project => vec![log_item(&rt, project, "retried")] })
        .await?;
    let stats = storage.project_log_stats(project).await?;
    assert_eq!(stats.total_logs, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_discover_fields_splits_tokens() -> anyhow::Result<()> {
    let rt = TestRuntime::new();
    let (storage, _) = test_storage(&rt);
    let project = test_project(8);

    let mut item = log_item(&rt, project, "tagged");
    item.fields = btreemap! {
        "region".to_owned() => json!("eu-west-1"),
        "attempt".to_owned() => json!(2),
        "tags".to_owned() => json!(["a", "b"]),
    };
    storage.store_batch(btreemap! { project => vec![item] }).await?;

    let fields = storage.discover_fields(project).await?;
    assert_eq!(fields, vec!["attempt", "region", "tags"]);
    Ok(())
}
