//! End-to-end behaviour of the execution guard.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use execution_guard::config::ConfigUpdate;
use execution_guard::{CallContext, GuardError, RequestDescriptor};

mod common;
use common::{fast_config, guard_with, ScriptedUpstream};

fn message(session: &str, n: u32) -> CallContext {
    CallContext::new("anthropic").with_request(
        RequestDescriptor::post("/v1/messages")
            .with_body(json!({"model": "claude", "messages": [{"role": "user", "content": n}]}))
            .with_session(session),
    )
}

#[tokio::test(start_paused = true)]
async fn test_identical_requests_in_window_reach_upstream_once() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::always(200);

    let first = guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(900)).await;
        let again = guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();
        assert_eq!(again.body, first.body);
        assert_eq!(again, first);
    }

    assert_eq!(upstream.calls(), 1);
    assert_eq!(guard.get_stats().deduplication.duplicates_blocked_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_two_posts_same_session_within_five_seconds() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::always(200);

    let a = guard.guarded_execute(upstream.call(), message("s1", 7)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    let b = guard.guarded_execute(upstream.call(), message("s1", 7)).await.unwrap();

    assert_eq!(upstream.calls(), 1);
    assert_eq!(a, b);
}

#[tokio::test(start_paused = true)]
async fn test_two_concurrent_posts_share_one_upstream_call() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::always(200);

    let (a, b) = tokio::join!(
        guard.guarded_execute(upstream.call(), message("s1", 7)),
        guard.guarded_execute(upstream.call(), message("s1", 7)),
    );

    assert_eq!(upstream.calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_sequential_requests_outside_window_are_not_deduplicated() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::always(200);

    guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();

    assert_eq!(upstream.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cache_never_exceeds_max_and_evicts_oldest() {
    let mut config = fast_config();
    config.deduplication.max_cache_size = 3;
    let guard = guard_with(config);
    let upstream = ScriptedUpstream::always(200);

    for n in 0..4 {
        guard.guarded_execute(upstream.call(), message("s1", n)).await.unwrap();
        assert!(guard.get_stats().deduplication.cached_request_count <= 3);
    }
    assert_eq!(upstream.calls(), 4);

    // Entries 1..=3 survive, entry 0 was evicted.
    for n in 1..4 {
        guard.guarded_execute(upstream.call(), message("s1", n)).await.unwrap();
    }
    assert_eq!(upstream.calls(), 4);

    guard.guarded_execute(upstream.call(), message("s1", 0)).await.unwrap();
    assert_eq!(upstream.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_k_retryable_failures_then_success() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::new(&[429, 503, 502, 200]);

    let response = guard
        .guarded_execute(upstream.call(), message("s1", 1))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(upstream.calls(), 4);

    let retry = guard.get_stats().retry;
    assert_eq!(retry.total_retries, 3);
    assert_eq!(retry.success_after_retry, 1);
    assert_eq!(retry.final_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_500_exhausts_five_attempts() {
    let mut config = fast_config();
    config.retry.max_attempts = 5;
    let guard = guard_with(config);
    let upstream = ScriptedUpstream::always(500);

    let err = guard
        .guarded_execute(upstream.call(), message("s1", 1))
        .await
        .unwrap_err();

    assert_eq!(upstream.calls(), 5);
    assert!(matches!(
        err,
        GuardError::TransientUpstream { status: 500, attempts: 5, .. }
    ));
    assert_eq!(guard.get_stats().retry.final_failures, 1);
    assert_eq!(guard.get_stats().deduplication.cached_request_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_recovers_after_cooldown() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.recovery_time_ms = 30_000;
    let guard = guard_with(config);
    let failing = ScriptedUpstream::always(503);

    for n in 0..3 {
        assert!(guard.is_provider_healthy("anthropic"));
        let _ = guard.guarded_execute(failing.call(), message("s1", n)).await;
    }
    assert!(!guard.is_provider_healthy("anthropic"));

    let err = guard
        .guarded_execute(failing.call(), message("s1", 99))
        .await
        .unwrap_err();
    assert!(matches!(err, GuardError::ProviderUnavailable { .. }));
    assert_eq!(failing.calls(), 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    let healthy = ScriptedUpstream::always(200);
    guard
        .guarded_execute(healthy.call(), message("s1", 100))
        .await
        .unwrap();

    assert!(guard.is_provider_healthy("anthropic"));
    let stats = guard.get_stats();
    assert!(!stats.rate_limiting.providers["anthropic"].in_recovery);
    assert_eq!(stats.rate_limiting.providers["anthropic"].failure_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_queue_dispatches_fifo_with_min_delay() {
    let mut config = fast_config();
    config.queue.min_delay_ms = 1000;
    config.retry.min_interval_ms = 200;
    let guard = guard_with(config);
    let upstream = ScriptedUpstream::always(200);
    let start = Instant::now();

    let calls: Vec<_> = (0..5)
        .map(|n| {
            let ctx = CallContext::new("anthropic")
                .with_request(RequestDescriptor::post(format!("/v1/messages/{n}")))
                .skip_deduplication();
            guard.guarded_execute(upstream.call(), ctx)
        })
        .collect();
    let results = futures_util::future::join_all(calls).await;

    let bodies: Vec<String> = results.into_iter().map(|r| r.unwrap().body_text()).collect();
    assert_eq!(
        bodies,
        (0..5).map(|n| format!("response #{n}")).collect::<Vec<_>>()
    );

    let dispatches = upstream.dispatches();
    assert_eq!(dispatches[0], start);
    for pair in dispatches.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
    }

    let queue = guard.get_stats().queue;
    assert_eq!(queue.totals.total_processed, 5);
    assert_eq!(queue.totals.current_depth, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_update_applies_to_later_entries() {
    let mut config = fast_config();
    config.deduplication.time_bucket_secs = 0;
    let guard = guard_with(config);
    let update: ConfigUpdate =
        serde_json::from_value(json!({ "deduplication": { "ttl_seconds": 60 } })).unwrap();
    guard.update_config(update).unwrap();

    let upstream = ScriptedUpstream::always(200);
    let first = guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(59)).await;
    let cached = guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();
    assert_eq!(cached, first);
    assert_eq!(upstream.calls(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let fresh = guard.guarded_execute(upstream.call(), message("s1", 1)).await.unwrap();
    assert_ne!(fresh, first);
    assert_eq!(upstream.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_excluded_endpoint_always_reaches_upstream() {
    let guard = guard_with(fast_config());
    let upstream = ScriptedUpstream::always(200);
    let ctx = || {
        CallContext::new("anthropic")
            .with_request(RequestDescriptor::get("/api/analytics/summary").with_session("s1"))
    };

    guard.guarded_execute(upstream.call(), ctx()).await.unwrap();
    guard.guarded_execute(upstream.call(), ctx()).await.unwrap();

    assert_eq!(upstream.calls(), 2);
    assert_eq!(guard.get_stats().deduplication.cached_request_count, 0);
}

#[tokio::test]
async fn test_retry_against_http_backend() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let hits = Arc::new(AtomicU32::new(0));
    let counter = hits.clone();
    let addr = common::start_programmable_backend(move || {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                (503, "Service Unavailable".to_string())
            } else {
                (200, "Success".to_string())
            }
        }
    })
    .await;

    let mut config = fast_config();
    config.retry.initial_backoff_ms = 10;
    let guard = guard_with(config);
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap();

    let response = guard
        .guarded_execute(
            common::http_call(client, format!("http://{addr}/v1/messages")),
            CallContext::new("local").skip_deduplication(),
        )
        .await
        .unwrap();

    assert_eq!(response.body_text(), "Success");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(guard.get_stats().retry.success_after_retry, 1);
}
