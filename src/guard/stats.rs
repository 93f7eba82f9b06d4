//! Aggregated statistics snapshot and health summary.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dedup::CacheStats;
use crate::queue::QueueSummary;
use crate::resilience::{BreakerState, ProviderSnapshot, RetryStats, RuleUsage};

/// Queue depth above which the guard reports a warning.
pub const QUEUE_DEPTH_WARNING: usize = 50;

/// Average queue wait above which the guard reports a warning.
pub const QUEUE_WAIT_WARNING_MS: f64 = 10_000.0;

/// Breaker and rate-limit view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingStats {
    /// Breaker state per provider.
    pub breaker_state: BTreeMap<String, BreakerState>,
    /// Full counters per provider.
    pub providers: BTreeMap<String, ProviderSnapshot>,
    /// Call outcomes recorded by the breaker.
    pub total_requests_tracked: u64,
    /// Usage of each sliding-window rule by the busiest session.
    pub rules: BTreeMap<String, RuleUsage>,
    pub tracked_sessions: usize,
}

/// Read-only projection of every guard component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStats {
    pub deduplication: CacheStats,
    pub rate_limiting: RateLimitingStats,
    pub queue: QueueSummary,
    pub retry: RetryStats,
    /// Distinct fingerprints currently executing upstream.
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
}

impl GuardStats {
    /// Summarize the snapshot as healthy, warning or critical.
    pub fn health(&self) -> HealthReport {
        let mut issues = Vec::new();

        let open: Vec<&str> = self
            .rate_limiting
            .breaker_state
            .iter()
            .filter(|(_, state)| **state == BreakerState::Open)
            .map(|(provider, _)| provider.as_str())
            .collect();
        let critical = !open.is_empty();
        if critical {
            issues.push(format!("circuit breaker open for: {}", open.join(", ")));
        }

        let depth = self.queue.totals.current_depth;
        if depth > QUEUE_DEPTH_WARNING {
            issues.push(format!("queue depth {depth} exceeds {QUEUE_DEPTH_WARNING}"));
        }
        let wait = self.queue.totals.average_wait_time_ms;
        if wait > QUEUE_WAIT_WARNING_MS {
            issues.push(format!("average queue wait {wait:.0}ms exceeds {QUEUE_WAIT_WARNING_MS:.0}ms"));
        }

        let status = if critical {
            HealthStatus::Critical
        } else if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        HealthReport { status, issues }
    }
}
