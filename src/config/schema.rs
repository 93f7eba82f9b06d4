//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files and
//! from admin update payloads.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the execution guard.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Fingerprint cache settings.
    pub deduplication: DeduplicationConfig,

    /// Per-provider breaker settings.
    #[serde(alias = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Request queue pacing.
    pub queue: QueueConfig,

    /// Retrying transport settings.
    pub retry: RetryConfig,

    /// Per-session sliding-window limits.
    #[serde(alias = "rateLimiting")]
    pub rate_limiting: RateLimitConfig,

    /// Background sweep settings.
    pub maintenance: MaintenanceConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin surface settings.
    pub admin: AdminConfig,
}

/// Deduplication (fingerprint cache) configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Enable response deduplication.
    pub enabled: bool,

    /// Lifetime of a cached response in seconds.
    #[serde(alias = "ttlSeconds")]
    pub ttl_seconds: u64,

    /// Maximum number of cached responses.
    #[serde(alias = "maxCacheSize")]
    pub max_cache_size: usize,

    /// Endpoint path prefixes that are never deduplicated.
    #[serde(alias = "excludeEndpoints")]
    pub exclude_endpoints: Vec<String>,

    /// Width of the fingerprint time window in seconds (0 disables bucketing).
    #[serde(alias = "timeBucketSecs")]
    pub time_bucket_secs: u64,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 30,
            max_cache_size: 1000,
            exclude_endpoints: vec![
                "/api/analytics".to_string(),
                "/ui/".to_string(),
                "/api/test".to_string(),
            ],
            time_bucket_secs: 5,
        }
    }
}

impl DeduplicationConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker; when disabled every provider reports healthy.
    pub enabled: bool,

    /// Consecutive failures that open the breaker.
    #[serde(alias = "failureThreshold")]
    pub failure_threshold: u32,

    /// Cooldown before an open breaker lets a probe through, in milliseconds.
    #[serde(alias = "recoveryTimeMs")]
    pub recovery_time_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_time_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_time(&self) -> Duration {
        Duration::from_millis(self.recovery_time_ms)
    }
}

/// Request queue configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Route calls through the queue.
    pub enabled: bool,

    /// Minimum spacing between dispatches on one lane, in milliseconds.
    #[serde(alias = "minDelayMs")]
    pub min_delay_ms: u64,

    /// Maximum pending items per lane.
    #[serde(alias = "maxQueueSize")]
    pub max_queue_size: usize,

    /// Keys that get their own lane instead of the shared default lane.
    #[serde(alias = "dedicatedKeys")]
    pub dedicated_keys: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay_ms: 1000,
            max_queue_size: 100,
            dedicated_keys: Vec::new(),
        }
    }
}

impl QueueConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries; when disabled each call gets a single attempt.
    pub enabled: bool,

    /// Total attempts per call, the first one included.
    #[serde(alias = "max_retries", alias = "maxRetries", alias = "maxAttempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    #[serde(alias = "initialBackoffMs")]
    pub initial_backoff_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    #[serde(alias = "maxBackoffMs")]
    pub max_backoff_ms: u64,

    /// Upper bound of the uniform random jitter in milliseconds.
    #[serde(alias = "jitterMs")]
    pub jitter_ms: u64,

    /// Statuses treated as transient.
    #[serde(alias = "retryableStatusCodes")]
    pub retryable_status_codes: Vec<u16>,

    /// Retry failures that produced no status at all.
    #[serde(alias = "retryConnectionErrors")]
    pub retry_connection_errors: bool,

    /// Process-wide minimum spacing between upstream calls, in milliseconds.
    #[serde(alias = "minIntervalMs")]
    pub min_interval_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            jitter_ms: 500,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
            retry_connection_errors: false,
            min_interval_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Attempts actually allowed under the current switches.
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

/// A single sliding-window rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitRule {
    /// Requests allowed inside the window.
    pub requests: u32,

    /// Window length in milliseconds.
    #[serde(alias = "windowMs")]
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(requests: u32, window_ms: u64) -> Self {
        Self { requests, window_ms }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    #[serde(alias = "perMinute")]
    pub per_minute: RateLimitRule,
    #[serde(alias = "perHour")]
    pub per_hour: RateLimitRule,
    #[serde(alias = "perDay")]
    pub per_day: RateLimitRule,
    pub burst: RateLimitRule,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_minute: RateLimitRule::new(60, 60_000),
            per_hour: RateLimitRule::new(500, 3_600_000),
            per_day: RateLimitRule::new(5000, 86_400_000),
            burst: RateLimitRule::new(10, 10_000),
        }
    }
}

impl RateLimitConfig {
    /// Rules in evaluation order, tagged with their names.
    pub fn rules(&self) -> [(&'static str, RateLimitRule); 4] {
        [
            ("burst", self.burst),
            ("per_minute", self.per_minute),
            ("per_hour", self.per_hour),
            ("per_day", self.per_day),
        ]
    }

    /// Longest window across all rules.
    pub fn longest_window(&self) -> Duration {
        self.rules()
            .iter()
            .map(|(_, rule)| rule.window())
            .max()
            .unwrap_or_default()
    }
}

/// Background maintenance configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between expired-entry sweeps, in seconds.
    #[serde(alias = "sweepIntervalSecs")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(alias = "logLevel")]
    pub log_level: String,

    /// Enable metrics endpoint.
    #[serde(alias = "metricsEnabled")]
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    #[serde(alias = "metricsAddress")]
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Serve the admin router.
    pub enabled: bool,

    /// Admin bind address.
    #[serde(alias = "bindAddress")]
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config, GuardConfig::default());
        assert_eq!(config.retry.retryable_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.deduplication.time_bucket_secs, 5);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: GuardConfig = toml::from_str(
            r#"
            [retry]
            max_retries = 3

            [queue]
            min_delay_ms = 250
            dedicated_keys = ["gemini-key-a"]
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
        assert_eq!(config.queue.min_delay(), Duration::from_millis(250));
        assert_eq!(config.queue.dedicated_keys, vec!["gemini-key-a".to_string()]);
    }

    #[test]
    fn test_camel_case_keys_accepted() {
        let config: GuardConfig = toml::from_str(
            r#"
            [circuitBreaker]
            failureThreshold = 3
            recoveryTimeMs = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.recovery_time_ms, 5000);
    }

    #[test]
    fn test_effective_attempts() {
        let mut retry = RetryConfig::default();
        assert_eq!(retry.effective_attempts(), 5);
        retry.enabled = false;
        assert_eq!(retry.effective_attempts(), 1);
    }

    #[test]
    fn test_longest_window() {
        let limits = RateLimitConfig::default();
        assert_eq!(limits.longest_window(), Duration::from_secs(86_400));
    }
}
