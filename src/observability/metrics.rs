//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_cache_lookups_total` (counter): cache lookups by result (hit, miss)
//! - `guard_cache_entries` (gauge): live cache entries
//! - `guard_breaker_transitions_total` (counter): by provider, target state
//! - `guard_retries_total` (counter): retried attempts by status
//! - `guard_final_failures_total` (counter): final failures by error kind
//! - `guard_queue_depth` (gauge): pending items per lane
//! - `guard_queue_wait_seconds` (histogram): enqueue to dispatch, per lane
//! - `guard_requests_total` (counter): guarded calls by provider, outcome
//!
//! # Design Decisions
//! - Free functions over the metrics facade; no handles threaded through
//! - Labels are low-cardinality identifiers only (never fingerprints)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("guard_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("guard_cache_entries").set(entries as f64);
}

pub fn record_breaker_transition(provider: &str, state: &'static str) {
    counter!(
        "guard_breaker_transitions_total",
        "provider" => provider.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_retry(status: Option<u16>) {
    let status = status.map(|s| s.to_string()).unwrap_or_else(|| "none".to_string());
    counter!("guard_retries_total", "status" => status).increment(1);
}

pub fn record_final_failure(kind: &'static str) {
    counter!("guard_final_failures_total", "kind" => kind).increment(1);
}

pub fn record_queue_depth(lane: &str, depth: usize) {
    gauge!("guard_queue_depth", "lane" => lane.to_string()).set(depth as f64);
}

pub fn record_queue_wait(lane: &str, wait: Duration) {
    histogram!("guard_queue_wait_seconds", "lane" => lane.to_string()).record(wait.as_secs_f64());
}

pub fn record_guarded_request(provider: &str, outcome: &'static str) {
    counter!(
        "guard_requests_total",
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
