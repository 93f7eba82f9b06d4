//! Multi-tier sliding-window rate limiting per session.
//!
//! # Responsibilities
//! - Keep admitted-request timestamps per session key
//! - Reject a call when any rule (burst, minute, hour, day) is saturated
//! - Report how close the busiest session is to each limit
//!
//! # Design Decisions
//! - Rules evaluated in order burst → per_minute → per_hour → per_day; the
//!   first saturated rule is reported
//! - Only admitted calls are recorded, so rejected retries do not extend
//!   the penalty
//! - Timestamps older than the longest window are pruned by the sweep

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::error::GuardError;

/// Usage of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUsage {
    pub current: u32,
    pub limit: u32,
    pub percentage: f64,
}

/// Sliding-window limiter keyed by session.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
}

fn count_within(timestamps: &VecDeque<Instant>, now: Instant, window: Duration) -> (u32, Option<Instant>) {
    let mut count = 0;
    let mut oldest = None;
    for &ts in timestamps.iter().rev() {
        if now.saturating_duration_since(ts) >= window {
            break;
        }
        count += 1;
        oldest = Some(ts);
    }
    (count, oldest)
}

impl SlidingWindowLimiter {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Admit and record one call for `key`, or reject it.
    ///
    /// Always admits when rate limiting is disabled.
    pub fn check(&self, key: &str) -> Result<(), GuardError> {
        let limits = self.config.load().rate_limiting.clone();
        if !limits.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamps = windows.entry(key.to_string()).or_default();

        for (name, rule) in limits.rules() {
            let (count, oldest) = count_within(timestamps, now, rule.window());
            if count >= rule.requests {
                let retry_after = oldest
                    .and_then(|ts| ts.checked_add(rule.window()))
                    .map(|until| until.saturating_duration_since(now))
                    .unwrap_or(rule.window());
                let retry_after_secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
                tracing::warn!(key_id = %key, rule = name, retry_after_secs, "Rate limit exceeded");
                return Err(GuardError::RateLimited {
                    rule: name.to_string(),
                    retry_after_secs,
                });
            }
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Usage of every rule for the session closest to its limit.
    pub fn usage(&self) -> BTreeMap<String, RuleUsage> {
        let limits = self.config.load().rate_limiting.clone();
        let now = self.clock.now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        limits
            .rules()
            .into_iter()
            .map(|(name, rule)| {
                let current = windows
                    .values()
                    .map(|ts| count_within(ts, now, rule.window()).0)
                    .max()
                    .unwrap_or(0);
                let percentage = if rule.requests > 0 {
                    f64::from(current) / f64::from(rule.requests) * 100.0
                } else {
                    0.0
                };
                (
                    name.to_string(),
                    RuleUsage {
                        current,
                        limit: rule.requests,
                        percentage,
                    },
                )
            })
            .collect()
    }

    /// Drop timestamps older than the longest window. Returns sessions removed.
    pub fn prune(&self) -> usize {
        let horizon = self.config.load().rate_limiting.longest_window();
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        for timestamps in windows.values_mut() {
            while timestamps
                .front()
                .is_some_and(|ts| now.saturating_duration_since(*ts) >= horizon)
            {
                timestamps.pop_front();
            }
        }
        let before = windows.len();
        windows.retain(|_, timestamps| !timestamps.is_empty());
        before - windows.len()
    }

    pub fn tracked_sessions(&self) -> usize {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn reset(&self) {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
