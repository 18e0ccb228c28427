use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use common::{
    auth::{
        AccessChecker,
        AuditLogEntry,
        AuditLogWriter,
        Identity,
    },
    cache::InMemorySharedCache,
    query::{
        LogicalOperator,
        LogQueryRequest,
        QueryNode,
        QueryOperator,
        TimeRange,
    },
    runtime::Runtime,
    search::{
        fields,
        SearchFilter,
    },
    types::{
        LogItem,
        LogLevel,
        LogTimestamp,
        ProjectId,
        SortOrder,
        UserId,
    },
};
use errors::ErrorMetadataAnyhowExt;
use maplit::btreemap;
use proptest::prelude::*;
use runtime::testing::TestRuntime;
use serde_json::json;
use storage::{
    memory::MemorySearchBackend,
    LogStorage,
};

use crate::{
    compile_query,
    limiter::TOO_MANY_CONCURRENT_QUERIES,
    service::MISSING_TIME_RANGE_TO,
    validate_query,
    validator::{
        INVALID_QUERY_STRUCTURE,
        QUERY_TOO_COMPLEX,
    },
    ConcurrentQueryLimiter,
    QueryService,
};

fn condition(field: &str, operator: QueryOperator, value: serde_json::Value) -> QueryNode {
    QueryNode::condition(field, operator, Some(value))
}

fn project(seed: u128) -> ProjectId {
    ProjectId::new(uuid::Uuid::from_u128(seed))
}

fn user(seed: u128) -> UserId {
    UserId::new(uuid::Uuid::from_u128(seed))
}

mod validator_tests {
    use super::*;

    #[test]
    fn test_null_query_is_valid() {
        assert!(validate_query(None).is_ok());
    }

    #[test]
    fn test_not_requires_exactly_one_child() {
        let node = QueryNode::logical(
            LogicalOperator::Not,
            vec![
                condition("level", QueryOperator::Equals, json!("INFO")),
                condition("level", QueryOperator::Equals, json!("WARN")),
            ],
        );
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), INVALID_QUERY_STRUCTURE);
    }

    #[test]
    fn test_empty_logical_node_is_rejected() {
        let node = QueryNode::logical(LogicalOperator::And, vec![]);
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), INVALID_QUERY_STRUCTURE);
    }

    #[test]
    fn test_blank_field_is_rejected() {
        let node = condition("   ", QueryOperator::Equals, json!("x"));
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), INVALID_QUERY_STRUCTURE);
    }

    #[test]
    fn test_range_on_string_field_is_rejected() {
        let node = condition("message", QueryOperator::Gt, json!("2024-01-01T00:00:00Z"));
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), INVALID_QUERY_STRUCTURE);
    }

    #[test]
    fn test_missing_value_is_rejected() {
        let node = QueryNode::condition("level", QueryOperator::Equals, None);
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), INVALID_QUERY_STRUCTURE);

        // EXISTS takes no value.
        let node = QueryNode::condition("level", QueryOperator::Exists, None);
        assert!(validate_query(Some(&node)).is_ok());
    }

    #[test]
    fn test_deep_tree_is_too_complex() {
        let mut node = condition("level", QueryOperator::Equals, json!("INFO"));
        for _ in 0..11 {
            node = QueryNode::logical(LogicalOperator::Not, vec![node]);
        }
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), QUERY_TOO_COMPLEX);
    }

    #[test]
    fn test_node_count_limit() {
        // 1 root + 3 inner AND nodes + 3*17 conditions = 55 nodes, while
        // respecting the per-node children cap.
        let inner = |_| {
            QueryNode::logical(
                LogicalOperator::And,
                (0..17)
                    .map(|i| condition("level", QueryOperator::Equals, json!(format!("L{i}"))))
                    .collect(),
            )
        };
        let node = QueryNode::logical(LogicalOperator::And, (0..3).map(inner).collect());
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), QUERY_TOO_COMPLEX);
    }

    #[test]
    fn test_wide_logical_node_is_too_complex() {
        let node = QueryNode::logical(
            LogicalOperator::Or,
            (0..21)
                .map(|i| condition("level", QueryOperator::Equals, json!(format!("L{i}"))))
                .collect(),
        );
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), QUERY_TOO_COMPLEX);
    }

    #[test]
    fn test_oversized_in_array() {
        let values: Vec<_> = (0..101).map(|i| json!(format!("v{i}"))).collect();
        let node = condition("level", QueryOperator::In, json!(values));
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), QUERY_TOO_COMPLEX);
    }

    #[test]
    fn test_oversized_string_value() {
        let node = condition("message", QueryOperator::Contains, json!("x".repeat(1001)));
        let err = validate_query(Some(&node)).unwrap_err();
        assert_eq!(err.short_msg(), QUERY_TOO_COMPLEX);
    }

    fn valid_leaf() -> impl Strategy<Value = QueryNode> {
        let field = prop_oneof![
            Just("level".to_owned()),
            Just("message".to_owned()),
            Just("client_ip".to_owned()),
            "[a-z]{1,8}",
        ];
        (field, 0..4usize, "[a-zA-Z0-9 ]{0,40}").prop_map(|(field, op, value)| match op {
            0 => QueryNode::condition(field, QueryOperator::Equals, Some(json!(value))),
            1 => QueryNode::condition(field, QueryOperator::Contains, Some(json!(value))),
            2 => QueryNode::condition(field, QueryOperator::In, Some(json!([value]))),
            _ => QueryNode::condition(field, QueryOperator::Exists, None),
        })
    }

    fn valid_tree() -> impl Strategy<Value = QueryNode> {
        valid_leaf().prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (
                    prop_oneof![Just(LogicalOperator::And), Just(LogicalOperator::Or)],
                    prop::collection::vec(inner.clone(), 1..=2),
                )
                    .prop_map(|(op, children)| QueryNode::logical(op, children)),
                inner.prop_map(|child| QueryNode::logical(LogicalOperator::Not, vec![child])),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig { failure_persistence: None, ..ProptestConfig::default() })]

        #[test]
        fn proptest_valid_trees_validate(tree in valid_tree()) {
            prop_assert!(validate_query(Some(&tree)).is_ok());
        }

        #[test]
        fn proptest_valid_trees_compile(tree in valid_tree()) {
            let compiled = compile_query(
                project(9),
                Some(&tree),
                &TimeRange::default(),
                10,
                0,
                SortOrder::Desc,
            );
            prop_assert!(compiled.is_ok());
        }
    }
}

mod compiler_tests {
    use super::*;

    #[test]
    fn test_tenancy_filter_is_always_pinned() {
        let requested = project(1);
        let other = project(2);
        // A user query that names another project's id still intersects
        // with the pinned tenancy filter.
        let query = condition(
            "project_id",
            QueryOperator::Equals,
            json!(other.to_string()),
        );
        let request = compile_query(
            requested,
            Some(&query),
            &TimeRange::default(),
            10,
            0,
            SortOrder::Desc,
        )
        .unwrap();
        let SearchFilter::Bool(bool_filter) = &request.filter else {
            panic!("expected a bool filter at top level");
        };
        assert_eq!(
            bool_filter.must[0],
            SearchFilter::term(fields::PROJECT_ID, requested.to_string()),
        );
    }

    #[test]
    fn test_time_range_is_half_open_in_micros() {
        let from = LogTimestamp::parse_rfc3339("2024-05-01T00:00:00Z").unwrap();
        let to = LogTimestamp::parse_rfc3339("2024-05-02T00:00:00Z").unwrap();
        let request = compile_query(
            project(1),
            None,
            &TimeRange {
                from: Some(from),
                to: Some(to),
            },
            10,
            0,
            SortOrder::Asc,
        )
        .unwrap();
        let SearchFilter::Bool(bool_filter) = &request.filter else {
            panic!("expected a bool filter at top level");
        };
        assert_eq!(
            bool_filter.must[1],
            SearchFilter::Range {
                field: fields::TIMESTAMP.to_owned(),
                gte: Some(from.as_micros()),
                gt: None,
                lte: None,
                lt: Some(to.as_micros()),
            },
        );
    }

    #[test]
    fn test_timestamp_condition_normalizes_nanos() {
        let query = condition(
            "timestamp",
            QueryOperator::Gte,
            json!("2024-05-01T10:20:30.123456789Z"),
        );
        let request = compile_query(
            project(1),
            Some(&query),
            &TimeRange::default(),
            10,
            0,
            SortOrder::Desc,
        )
        .unwrap();
        let SearchFilter::Bool(bool_filter) = &request.filter else {
            panic!("expected a bool filter at top level");
        };
        let expected = LogTimestamp::parse_rfc3339("2024-05-01T10:20:30.123456Z").unwrap();
        assert_eq!(
            bool_filter.must[1],
            SearchFilter::Range {
                field: "timestamp".to_owned(),
                gte: Some(expected.as_micros()),
                gt: None,
                lte: None,
                lt: None,
            },
        );
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let query = condition("level", QueryOperator::In, json!([]));
        let request = compile_query(
            project(1),
            Some(&query),
            &TimeRange::default(),
            10,
            0,
            SortOrder::Desc,
        )
        .unwrap();
        let SearchFilter::Bool(bool_filter) = &request.filter else {
            panic!("expected a bool filter at top level");
        };
        assert_eq!(bool_filter.must[1], SearchFilter::MatchNone);
    }

    #[test]
    fn test_custom_field_token_operations() {
        let exists = condition_filter(QueryNode::condition(
            "region",
            QueryOperator::Exists,
            None,
        ));
        assert_eq!(
            exists,
            SearchFilter::Prefix {
                field: fields::ATTRS_TOKENS.to_owned(),
                value: "region=".to_owned(),
            },
        );

        let contains = condition_filter(condition(
            "region",
            QueryOperator::Contains,
            json!("west"),
        ));
        assert_eq!(
            contains,
            SearchFilter::Wildcard {
                field: fields::ATTRS_TOKENS.to_owned(),
                pattern: "region=*west*".to_owned(),
            },
        );

        let equals = condition_filter(condition("attempt", QueryOperator::Equals, json!(3)));
        assert_eq!(
            equals,
            SearchFilter::term(fields::ATTRS_TOKENS, "attempt=3"),
        );
    }

    fn condition_filter(node: QueryNode) -> SearchFilter {
        let request = compile_query(
            project(1),
            Some(&node),
            &TimeRange::default(),
            10,
            0,
            SortOrder::Desc,
        )
        .unwrap();
        let SearchFilter::Bool(bool_filter) = request.filter else {
            panic!("expected a bool filter at top level");
        };
        bool_filter.must[1].clone()
    }
}

mod limiter_tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_cap_and_release() -> anyhow::Result<()> {
        let cache = Arc::new(InMemorySharedCache::new());
        let limiter = ConcurrentQueryLimiter::new(cache);
        let alice = user(1);
        let bob = user(2);

        for _ in 0..3 {
            limiter.acquire(alice).await?;
        }
        let err = limiter.acquire(alice).await.unwrap_err();
        assert_eq!(err.short_msg(), TOO_MANY_CONCURRENT_QUERIES);

        // Other users are unaffected.
        limiter.acquire(bob).await?;

        limiter.release(alice).await;
        limiter.acquire(alice).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_abandoned_slots_are_reclaimed_by_ttl() -> anyhow::Result<()> {
        let cache = Arc::new(InMemorySharedCache::new());
        let limiter = ConcurrentQueryLimiter::new(cache.clone());
        let alice = user(1);

        for _ in 0..3 {
            limiter.acquire(alice).await?;
        }
        assert!(limiter.acquire(alice).await.is_err());

        // Callers crashed without releasing; the armed TTL reclaims the
        // slots.
        cache.advance_clock(Duration::from_secs(31 * 60));
        limiter.acquire(alice).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_cleanup_clears_stale_slots() -> anyhow::Result<()> {
        let cache = Arc::new(InMemorySharedCache::new());
        let limiter = ConcurrentQueryLimiter::new(cache);
        let alice = user(1);

        for _ in 0..3 {
            limiter.acquire(alice).await?;
        }
        limiter.clear_all_slots().await?;
        for _ in 0..3 {
            limiter.acquire(alice).await?;
        }
        Ok(())
    }
}

mod service_tests {
    use super::*;

    struct AllowAll;

    #[async_trait::async_trait]
    impl AccessChecker for AllowAll {
        async fn can_access_project(
            &self,
            _identity: &Identity,
            _project_id: ProjectId,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    struct DenyAll;

    #[async_trait::async_trait]
    impl AccessChecker for DenyAll {
        async fn can_access_project(
            &self,
            _identity: &Identity,
            _project_id: ProjectId,
        ) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct NoopAudit;

    impl AuditLogWriter for NoopAudit {
        fn write(&self, _entry: AuditLogEntry) {}
    }

    fn service(
        rt: &TestRuntime,
        access: Arc<dyn AccessChecker>,
    ) -> (QueryService<TestRuntime>, Arc<LogStorage<TestRuntime>>) {
        let storage = Arc::new(LogStorage::new(
            rt.clone(),
            Arc::new(MemorySearchBackend::new()),
        ));
        let limiter = ConcurrentQueryLimiter::new(Arc::new(InMemorySharedCache::new()));
        (
            QueryService::new(storage.clone(), limiter, access, Arc::new(NoopAudit)),
            storage,
        )
    }

    fn log_item(rt: &TestRuntime, project_id: ProjectId, level: LogLevel, message: &str) -> LogItem {
        LogItem {
            id: rt.new_uuid_v4(),
            project_id,
            timestamp: rt.generate_log_timestamp().unwrap(),
            level,
            message: message.to_owned(),
            fields: BTreeMap::new(),
            client_ip: "10.1.2.3".to_owned(),
        }
    }

    fn request_with_to(rt: &TestRuntime, query: Option<QueryNode>) -> LogQueryRequest {
        LogQueryRequest {
            query,
            time_range: TimeRange {
                from: None,
                to: Some(rt.generate_log_timestamp().unwrap() + Duration::from_secs(60)),
            },
            limit: None,
            offset: None,
            sort_order: SortOrder::Desc,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_range_to_is_required() {
        let rt = TestRuntime::new();
        let (service, _) = service(&rt, Arc::new(AllowAll));
        let err = service
            .execute_query(
                &Identity::User(user(1)),
                project(1),
                LogQueryRequest::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.short_msg(), MISSING_TIME_RANGE_TO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_denied() {
        let rt = TestRuntime::new();
        let (service, _) = service(&rt, Arc::new(DenyAll));
        let err = service
            .execute_query(
                &Identity::User(user(1)),
                project(1),
                request_with_to(&rt, None),
            )
            .await
            .unwrap_err();
        assert!(err.is_forbidden());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_filters_and_sorts() -> anyhow::Result<()> {
        let rt = TestRuntime::new();
        let (service, storage) = service(&rt, Arc::new(AllowAll));
        let p = project(1);

        let mut items = vec![];
        for i in 0..5 {
            let level = if i % 2 == 0 {
                LogLevel::Error
            } else {
                LogLevel::Info
            };
            let message = if i == 2 { "payment failed" } else { "ok" };
            let mut item = log_item(&rt, p, level, message);
            rt.advance_system_time(Duration::from_secs(1));
            item.timestamp = rt.generate_log_timestamp()?;
            items.push(item);
        }
        storage.store_batch(btreemap! { p => items }).await?;

        let query = QueryNode::logical(
            LogicalOperator::And,
            vec![
                condition("level", QueryOperator::Equals, json!("ERROR")),
                condition("message", QueryOperator::Contains, json!("payment")),
            ],
        );
        let response = service
            .execute_query(&Identity::User(user(1)), p, request_with_to(&rt, Some(query)))
            .await?;
        assert_eq!(response.total, 1);
        assert_eq!(response.logs[0].message, "payment failed");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_queryable_fields_include_discovered_custom_fields() -> anyhow::Result<()> {
        let rt = TestRuntime::new();
        let (service, storage) = service(&rt, Arc::new(AllowAll));
        let p = project(1);

        let mut item = log_item(&rt, p, LogLevel::Info, "tagged");
        item.fields.insert("region".to_owned(), json!("eu"));
        storage.store_batch(btreemap! { p => vec![item] }).await?;

        let fields = service
            .queryable_fields(&Identity::User(user(1)), p, None)
            .await?;
        assert!(fields.iter().any(|f| f.name == "region" && f.is_custom));
        assert!(fields.iter().any(|f| f.name == "timestamp" && !f.is_custom));

        let filtered = service
            .queryable_fields(&Identity::User(user(1)), p, Some("reg"))
            .await?;
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "region");
        Ok(())
    }
}
