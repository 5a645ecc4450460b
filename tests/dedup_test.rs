//! Integration tests for request-scoped query deduplication.

use chrono::{TimeZone, Utc};
use db_pool_core::dedup::{
    ContextValue, DedupOptions, RequestContext, RequestScope, clear_query_cache, dedup_query,
    dedup_stats, invalidate_tables, query_cache,
};
use db_pool_core::models::QueryParam;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A context owned by some other request framework.
#[derive(Default)]
struct FrameworkLocals {
    values: Mutex<HashMap<String, ContextValue>>,
}

impl RequestContext for FrameworkLocals {
    fn get(&self, key: &str) -> Option<ContextValue> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: ContextValue) {
        self.values.lock().unwrap().insert(key.to_string(), value);
    }
}

async fn run<C: RequestContext>(
    ctx: &C,
    counter: &AtomicUsize,
    query: &str,
    params: Vec<QueryParam>,
    options: DedupOptions,
) -> bool {
    let result = dedup_query(
        ctx,
        query,
        &params,
        || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(vec![serde_json::json!({"id": 1, "name": "alice"})])
        },
        options,
    )
    .await
    .unwrap();
    result.from_cache
}

#[tokio::test]
async fn test_three_identical_reads_run_once() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);
    let query = "SELECT * FROM users WHERE id = ?";

    for _ in 0..3 {
        run(&ctx, &counter, query, vec![1.into()], DedupOptions::new()).await;
    }

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let stats = dedup_stats(&ctx);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.deduplicated, 2);
    assert_eq!(stats.unique, 1);
    assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_custom_context_holds_cache() {
    let ctx = FrameworkLocals::default();
    let counter = AtomicUsize::new(0);

    assert!(!run(&ctx, &counter, "SELECT 1", vec![], DedupOptions::new()).await);
    assert!(run(&ctx, &counter, "  SELECT   1 ", vec![], DedupOptions::new()).await);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.values.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_whitespace_only_differences_are_deduplicated() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);

    run(
        &ctx,
        &counter,
        "SELECT id, name\n  FROM users\n WHERE org = ?",
        vec!["acme".into()],
        DedupOptions::new(),
    )
    .await;
    let cached = run(
        &ctx,
        &counter,
        "SELECT id, name FROM users WHERE org = ?",
        vec!["acme".into()],
        DedupOptions::new(),
    )
    .await;

    assert!(cached);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_parameter_kinds_are_distinguished() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);
    let query = "SELECT * FROM events WHERE key = ?";

    let params: Vec<QueryParam> = vec![
        QueryParam::Int(1),
        QueryParam::from("1"),
        QueryParam::BigInt(1),
        QueryParam::Null,
        QueryParam::Undefined,
        QueryParam::Bool(true),
    ];
    for param in &params {
        run(&ctx, &counter, query, vec![param.clone()], DedupOptions::new()).await;
    }

    assert_eq!(counter.load(Ordering::SeqCst), params.len());
    assert_eq!(query_cache(&ctx).len(), params.len());
}

#[tokio::test]
async fn test_equal_dates_hit_the_cache() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);
    let query = "SELECT * FROM orders WHERE placed_at > ?";

    let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    run(&ctx, &counter, query, vec![first.into()], DedupOptions::new()).await;
    let cached = run(&ctx, &counter, query, vec![second.into()], DedupOptions::new()).await;

    assert!(cached);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_write_invalidates_only_matching_tables() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);

    run(
        &ctx,
        &counter,
        "SELECT * FROM users",
        vec![],
        DedupOptions::new().tables(["users"]),
    )
    .await;
    run(
        &ctx,
        &counter,
        "SELECT * FROM users u JOIN posts p ON p.user_id = u.id",
        vec![],
        DedupOptions::new().tables(["Users", "posts"]),
    )
    .await;
    run(
        &ctx,
        &counter,
        "SELECT * FROM posts",
        vec![],
        DedupOptions::new().tables(["posts"]),
    )
    .await;
    run(&ctx, &counter, "SELECT now()", vec![], DedupOptions::new()).await;

    assert_eq!(invalidate_tables(&ctx, &["USERS"]), 2);
    assert_eq!(query_cache(&ctx).len(), 2);

    assert!(run(&ctx, &counter, "SELECT * FROM posts", vec![], DedupOptions::new()).await);
    assert!(run(&ctx, &counter, "SELECT now()", vec![], DedupOptions::new()).await);
    assert!(!run(&ctx, &counter, "SELECT * FROM users", vec![], DedupOptions::new()).await);
}

#[tokio::test]
async fn test_clear_empties_cache_but_keeps_stats() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);
    run(&ctx, &counter, "SELECT 1", vec![], DedupOptions::new().tables(["t"])).await;
    run(&ctx, &counter, "SELECT 2", vec![], DedupOptions::new()).await;
    run(&ctx, &counter, "SELECT 2", vec![], DedupOptions::new()).await;

    clear_query_cache(&ctx);

    assert!(query_cache(&ctx).is_empty());
    let stats = dedup_stats(&ctx);
    assert_eq!((stats.total, stats.deduplicated, stats.unique), (3, 1, 2));
}

#[tokio::test]
async fn test_hit_rate_tracks_every_call() {
    let ctx = RequestScope::new();
    let counter = AtomicUsize::new(0);
    assert_eq!(dedup_stats(&ctx).hit_rate, 0.0);

    let sequence = [1, 1, 2, 1, 3, 3, 3, 2];
    for id in sequence {
        run(&ctx, &counter, "SELECT ?", vec![id.into()], DedupOptions::new()).await;
        let stats = dedup_stats(&ctx);
        let expected = stats.deduplicated as f64 / stats.total as f64;
        assert!((stats.hit_rate - expected).abs() < 1e-12);
        assert_eq!(stats.total, stats.deduplicated + stats.unique);
    }

    let stats = dedup_stats(&ctx);
    assert_eq!(stats.unique, 3);
    assert_eq!(stats.deduplicated, 5);
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let counter = Arc::new(AtomicUsize::new(0));

    let requests: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let ctx = RequestScope::new();
                for _ in 0..3 {
                    run(&ctx, &counter, "SELECT 1", vec![], DedupOptions::new()).await;
                }
                dedup_stats(&ctx)
            })
        })
        .collect();

    for request in requests {
        let stats = request.await.unwrap();
        assert_eq!((stats.total, stats.deduplicated, stats.unique), (3, 2, 1));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}
