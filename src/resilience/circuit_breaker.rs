//! Per-provider circuit breaker.
//!
//! # States
//! - Closed: provider serving normally, calls pass through
//! - Open: provider presumed unhealthy, calls fail fast
//! - Half-Open: cooldown elapsed, the next outcome decides
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery_time elapsed (observed lazily on read)
//! Half-Open → Closed: next call succeeds
//! Half-Open → Open: next call fails
//! ```
//!
//! # Design Decisions
//! - One entry per provider, created on first recorded outcome
//! - Total success/failure counts only grow; reset is the only way down
//! - Disabled breaker reports every provider healthy but keeps counting

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::observability::metrics;

/// Breaker state of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct ProviderHealth {
    state: BreakerState,
    failure_count: u64,
    success_count: u64,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

impl ProviderHealth {
    fn cooled_down(&self, now: Instant, recovery: std::time::Duration) -> bool {
        self.state == BreakerState::Open
            && self
                .opened_at
                .is_some_and(|opened| now.saturating_duration_since(opened) >= recovery)
    }
}

/// Read-only view of one provider's breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSnapshot {
    pub state: BreakerState,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_failures: u32,
    pub in_recovery: bool,
}

/// Tracks call outcomes per provider and derives breaker state.
#[derive(Debug)]
pub struct ProviderHealthTracker {
    providers: DashMap<String, ProviderHealth>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    outcomes_recorded: AtomicU64,
}

impl ProviderHealthTracker {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            providers: DashMap::new(),
            config,
            clock,
            outcomes_recorded: AtomicU64::new(0),
        }
    }

    fn transition(provider: &str, health: &mut ProviderHealth, to: BreakerState, now: Instant) {
        let from = health.state;
        health.state = to;
        match to {
            BreakerState::Open => {
                health.opened_at = Some(now);
                tracing::warn!(
                    provider = %provider,
                    from = %from,
                    consecutive_failures = health.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            BreakerState::HalfOpen => {
                tracing::info!(provider = %provider, "Circuit breaker half-open, probing recovery");
            }
            BreakerState::Closed => {
                health.opened_at = None;
                health.consecutive_failures = 0;
                tracing::info!(provider = %provider, "Circuit breaker closed");
            }
        }
        metrics::record_breaker_transition(provider, to.as_str());
    }

    /// True unless the provider's breaker is open.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open here.
    pub fn is_provider_healthy(&self, provider: &str) -> bool {
        let (enabled, recovery) = {
            let config = self.config.load();
            (config.circuit_breaker.enabled, config.circuit_breaker.recovery_time())
        };
        if !enabled {
            return true;
        }

        let Some(mut health) = self.providers.get_mut(provider) else {
            return true;
        };
        let now = self.clock.now();
        if health.cooled_down(now, recovery) {
            Self::transition(provider, &mut health, BreakerState::HalfOpen, now);
        }
        health.state != BreakerState::Open
    }

    /// Record the outcome of one upstream call.
    pub fn record_outcome(&self, provider: &str, success: bool) {
        let (enabled, threshold, recovery) = {
            let config = self.config.load();
            let breaker = &config.circuit_breaker;
            (breaker.enabled, breaker.failure_threshold.max(1), breaker.recovery_time())
        };
        let now = self.clock.now();
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);

        let mut health = self.providers.entry(provider.to_string()).or_default();
        if success {
            health.success_count += 1;
            health.consecutive_failures = 0;
        } else {
            health.failure_count += 1;
            health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        }

        if !enabled {
            return;
        }

        if health.cooled_down(now, recovery) {
            Self::transition(provider, &mut health, BreakerState::HalfOpen, now);
        }

        match (health.state, success) {
            (BreakerState::HalfOpen, true) => {
                Self::transition(provider, &mut health, BreakerState::Closed, now)
            }
            (BreakerState::HalfOpen, false) => {
                Self::transition(provider, &mut health, BreakerState::Open, now)
            }
            (BreakerState::Closed, false) if health.consecutive_failures >= threshold => {
                Self::transition(provider, &mut health, BreakerState::Open, now)
            }
            _ => {}
        }
    }

    /// Current state of a provider (closed if never seen).
    pub fn state(&self, provider: &str) -> BreakerState {
        let recovery = self.config.load().circuit_breaker.recovery_time();
        let now = self.clock.now();
        self.providers
            .get(provider)
            .map(|health| {
                if health.cooled_down(now, recovery) {
                    BreakerState::HalfOpen
                } else {
                    health.state
                }
            })
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot of every tracked provider, ordered by id.
    pub fn snapshot(&self) -> BTreeMap<String, ProviderSnapshot> {
        let recovery = self.config.load().circuit_breaker.recovery_time();
        let now = self.clock.now();
        self.providers
            .iter()
            .map(|entry| {
                let health = entry.value();
                let state = if health.cooled_down(now, recovery) {
                    BreakerState::HalfOpen
                } else {
                    health.state
                };
                let snapshot = ProviderSnapshot {
                    state,
                    failure_count: health.failure_count,
                    success_count: health.success_count,
                    consecutive_failures: health.consecutive_failures,
                    in_recovery: state != BreakerState::Closed,
                };
                (entry.key().clone(), snapshot)
            })
            .collect()
    }

    /// Outcomes recorded since start or last reset.
    pub fn total_requests_tracked(&self) -> u64 {
        self.outcomes_recorded.load(Ordering::Relaxed)
    }

    /// Number of providers whose breaker is currently open.
    pub fn open_count(&self) -> usize {
        self.snapshot()
            .values()
            .filter(|s| s.state == BreakerState::Open)
            .count()
    }

    /// Force every provider back to closed with zero counters.
    pub fn reset_all(&self) {
        self.providers.clear();
        self.outcomes_recorded.store(0, Ordering::Relaxed);
        tracing::info!("All circuit breakers reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{shared, GuardConfig};
    use std::time::Duration;

    fn tracker(threshold: u32, recovery_ms: u64) -> (ProviderHealthTracker, Arc<ManualClock>) {
        let mut config = GuardConfig::default();
        config.circuit_breaker.failure_threshold = threshold;
        config.circuit_breaker.recovery_time_ms = recovery_ms;
        let clock = Arc::new(ManualClock::new(0));
        (ProviderHealthTracker::new(shared(config), clock.clone()), clock)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_outcomes_are_all_counted() {
        let (tracker, _) = tracker(u32::MAX, 1000);
        let tracker = Arc::new(tracker);

        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    for n in 0..250 {
                        tracker.record_outcome("anthropic", (worker + n) % 2 == 0);
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = &tracker.snapshot()["anthropic"];
        assert_eq!(snapshot.success_count + snapshot.failure_count, 2000);
        assert_eq!(snapshot.success_count, 1000);
        assert_eq!(tracker.total_requests_tracked(), 2000);
        assert_eq!(snapshot.state, BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold_consecutive_failures() {
        let (tracker, _) = tracker(3, 1000);

        tracker.record_outcome("anthropic", false);
        tracker.record_outcome("anthropic", false);
        assert!(tracker.is_provider_healthy("anthropic"));

        tracker.record_outcome("anthropic", false);
        assert!(!tracker.is_provider_healthy("anthropic"));
        assert_eq!(tracker.state("anthropic"), BreakerState::Open);
        assert!(tracker.is_provider_healthy("openai"));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let (tracker, _) = tracker(3, 1000);

        tracker.record_outcome("p", false);
        tracker.record_outcome("p", false);
        tracker.record_outcome("p", true);
        tracker.record_outcome("p", false);
        tracker.record_outcome("p", false);

        assert!(tracker.is_provider_healthy("p"));
        let snap = &tracker.snapshot()["p"];
        assert_eq!(snap.failure_count, 4);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.consecutive_failures, 2);
    }

    #[test]
    fn test_recovers_after_cooldown_and_success() {
        let (tracker, clock) = tracker(2, 5000);
        tracker.record_outcome("p", false);
        tracker.record_outcome("p", false);

        clock.advance(Duration::from_millis(4999));
        assert!(!tracker.is_provider_healthy("p"));

        clock.advance(Duration::from_millis(1));
        assert!(tracker.is_provider_healthy("p"));
        assert_eq!(tracker.state("p"), BreakerState::HalfOpen);
        assert!(tracker.snapshot()["p"].in_recovery);

        tracker.record_outcome("p", true);
        assert_eq!(tracker.state("p"), BreakerState::Closed);
        assert!(!tracker.snapshot()["p"].in_recovery);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (tracker, clock) = tracker(1, 1000);
        tracker.record_outcome("p", false);
        clock.advance(Duration::from_secs(1));
        assert!(tracker.is_provider_healthy("p"));

        tracker.record_outcome("p", false);
        assert!(!tracker.is_provider_healthy("p"));

        // Cooldown restarts from the reopen.
        clock.advance(Duration::from_millis(999));
        assert!(!tracker.is_provider_healthy("p"));
    }

    #[test]
    fn test_disabled_breaker_reports_healthy() {
        let mut config = GuardConfig::default();
        config.circuit_breaker.enabled = false;
        config.circuit_breaker.failure_threshold = 1;
        let tracker = ProviderHealthTracker::new(shared(config), Arc::new(ManualClock::new(0)));

        tracker.record_outcome("p", false);
        tracker.record_outcome("p", false);

        assert!(tracker.is_provider_healthy("p"));
        assert_eq!(tracker.snapshot()["p"].failure_count, 2);
    }

    #[test]
    fn test_reset_all() {
        let (tracker, _) = tracker(1, 60_000);
        tracker.record_outcome("a", false);
        tracker.record_outcome("b", true);
        assert_eq!(tracker.total_requests_tracked(), 2);
        assert_eq!(tracker.open_count(), 1);

        tracker.reset_all();

        assert!(tracker.is_provider_healthy("a"));
        assert!(tracker.snapshot().is_empty());
        assert_eq!(tracker.total_requests_tracked(), 0);
    }
}
