//! Partial configuration updates applied at runtime.
//!
//! Every field is optional; absent fields keep their current value. An
//! update is merged into a copy of the live config, validated, and only then
//! swapped in.

use serde::{Deserialize, Serialize};

use crate::config::schema::{GuardConfig, RateLimitRule};

/// Partial update of [`GuardConfig`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigUpdate {
    pub deduplication: Option<DeduplicationUpdate>,
    #[serde(alias = "circuitBreaker")]
    pub circuit_breaker: Option<CircuitBreakerUpdate>,
    pub queue: Option<QueueUpdate>,
    pub retry: Option<RetryUpdate>,
    #[serde(alias = "rateLimiting")]
    pub rate_limiting: Option<RateLimitUpdate>,
    pub maintenance: Option<MaintenanceUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeduplicationUpdate {
    pub enabled: Option<bool>,
    #[serde(alias = "ttlSeconds")]
    pub ttl_seconds: Option<u64>,
    #[serde(alias = "maxCacheSize")]
    pub max_cache_size: Option<usize>,
    #[serde(alias = "excludeEndpoints")]
    pub exclude_endpoints: Option<Vec<String>>,
    #[serde(alias = "timeBucketSecs")]
    pub time_bucket_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerUpdate {
    pub enabled: Option<bool>,
    #[serde(alias = "failureThreshold")]
    pub failure_threshold: Option<u32>,
    #[serde(alias = "recoveryTimeMs")]
    pub recovery_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueUpdate {
    pub enabled: Option<bool>,
    #[serde(alias = "minDelayMs")]
    pub min_delay_ms: Option<u64>,
    #[serde(alias = "maxQueueSize")]
    pub max_queue_size: Option<usize>,
    #[serde(alias = "dedicatedKeys")]
    pub dedicated_keys: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryUpdate {
    pub enabled: Option<bool>,
    #[serde(alias = "max_retries", alias = "maxRetries", alias = "maxAttempts")]
    pub max_attempts: Option<u32>,
    #[serde(alias = "initialBackoffMs")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(alias = "maxBackoffMs")]
    pub max_backoff_ms: Option<u64>,
    #[serde(alias = "jitterMs")]
    pub jitter_ms: Option<u64>,
    #[serde(alias = "retryableStatusCodes")]
    pub retryable_status_codes: Option<Vec<u16>>,
    #[serde(alias = "retryConnectionErrors")]
    pub retry_connection_errors: Option<bool>,
    #[serde(alias = "minIntervalMs")]
    pub min_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitUpdate {
    pub enabled: Option<bool>,
    #[serde(alias = "perMinute")]
    pub per_minute: Option<RateLimitRule>,
    #[serde(alias = "perHour")]
    pub per_hour: Option<RateLimitRule>,
    #[serde(alias = "perDay")]
    pub per_day: Option<RateLimitRule>,
    pub burst: Option<RateLimitRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceUpdate {
    #[serde(alias = "sweepIntervalSecs")]
    pub sweep_interval_secs: Option<u64>,
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl ConfigUpdate {
    /// Produce a new config with this update layered over `base`.
    pub fn apply_to(&self, base: &GuardConfig) -> GuardConfig {
        let mut next = base.clone();

        if let Some(update) = self.deduplication.clone() {
            let section = &mut next.deduplication;
            merge(&mut section.enabled, update.enabled);
            merge(&mut section.ttl_seconds, update.ttl_seconds);
            merge(&mut section.max_cache_size, update.max_cache_size);
            merge(&mut section.exclude_endpoints, update.exclude_endpoints);
            merge(&mut section.time_bucket_secs, update.time_bucket_secs);
        }

        if let Some(update) = self.circuit_breaker.clone() {
            let section = &mut next.circuit_breaker;
            merge(&mut section.enabled, update.enabled);
            merge(&mut section.failure_threshold, update.failure_threshold);
            merge(&mut section.recovery_time_ms, update.recovery_time_ms);
        }

        if let Some(update) = self.queue.clone() {
            let section = &mut next.queue;
            merge(&mut section.enabled, update.enabled);
            merge(&mut section.min_delay_ms, update.min_delay_ms);
            merge(&mut section.max_queue_size, update.max_queue_size);
            merge(&mut section.dedicated_keys, update.dedicated_keys);
        }

        if let Some(update) = self.retry.clone() {
            let section = &mut next.retry;
            merge(&mut section.enabled, update.enabled);
            merge(&mut section.max_attempts, update.max_attempts);
            merge(&mut section.initial_backoff_ms, update.initial_backoff_ms);
            merge(&mut section.max_backoff_ms, update.max_backoff_ms);
            merge(&mut section.jitter_ms, update.jitter_ms);
            merge(&mut section.retryable_status_codes, update.retryable_status_codes);
            merge(&mut section.retry_connection_errors, update.retry_connection_errors);
            merge(&mut section.min_interval_ms, update.min_interval_ms);
        }

        if let Some(update) = self.rate_limiting.clone() {
            let section = &mut next.rate_limiting;
            merge(&mut section.enabled, update.enabled);
            merge(&mut section.per_minute, update.per_minute);
            merge(&mut section.per_hour, update.per_hour);
            merge(&mut section.per_day, update.per_day);
            merge(&mut section.burst, update.burst);
        }

        if let Some(update) = self.maintenance.clone() {
            merge(
                &mut next.maintenance.sweep_interval_secs,
                update.sweep_interval_secs,
            );
        }

        next
    }
}
