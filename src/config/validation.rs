//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTLs, thresholds, delays > 0, delays and
//!   windows below upper bounds)
//! - Validate status codes and bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, both at load and on
//!   every runtime update

use std::net::SocketAddr;

use crate::config::schema::GuardConfig;

/// Longest pacing delay, throttle interval, backoff or jitter accepted.
pub const MAX_DELAY_MS: u64 = 3_600_000;

/// Widest fingerprint time window accepted.
pub const MAX_TIME_BUCKET_SECS: u64 = 86_400;

/// Longest rate-limit window accepted.
pub const MAX_RATE_WINDOW_MS: u64 = 7 * 86_400_000;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut require = |ok: bool, field: &str, reason: &str| {
        if !ok {
            errors.push(ValidationError::new(field, reason));
        }
    };

    let dedup = &config.deduplication;
    require(dedup.ttl_seconds > 0, "deduplication.ttl_seconds", "must be greater than zero");
    require(dedup.max_cache_size > 0, "deduplication.max_cache_size", "must be greater than zero");
    require(
        dedup.exclude_endpoints.iter().all(|e| !e.trim().is_empty()),
        "deduplication.exclude_endpoints",
        "entries must not be empty",
    );
    require(
        dedup.time_bucket_secs <= MAX_TIME_BUCKET_SECS,
        "deduplication.time_bucket_secs",
        "must not exceed one day",
    );

    let breaker = &config.circuit_breaker;
    require(
        breaker.failure_threshold > 0,
        "circuit_breaker.failure_threshold",
        "must be greater than zero",
    );
    require(
        breaker.recovery_time_ms > 0,
        "circuit_breaker.recovery_time_ms",
        "must be greater than zero",
    );

    require(config.queue.max_queue_size > 0, "queue.max_queue_size", "must be greater than zero");
    require(
        config.queue.min_delay_ms <= MAX_DELAY_MS,
        "queue.min_delay_ms",
        "must not exceed one hour",
    );

    let retry = &config.retry;
    require(retry.max_attempts >= 1, "retry.max_attempts", "must be at least 1");
    require(
        retry.initial_backoff_ms <= retry.max_backoff_ms,
        "retry.initial_backoff_ms",
        "must not exceed retry.max_backoff_ms",
    );
    for (field, value) in [
        ("retry.max_backoff_ms", retry.max_backoff_ms),
        ("retry.jitter_ms", retry.jitter_ms),
        ("retry.min_interval_ms", retry.min_interval_ms),
    ] {
        require(value <= MAX_DELAY_MS, field, "must not exceed one hour");
    }
    require(
        retry.retryable_status_codes.iter().all(|code| (100..=599).contains(code)),
        "retry.retryable_status_codes",
        "must be HTTP status codes (100-599)",
    );

    for (name, rule) in config.rate_limiting.rules() {
        require(
            rule.requests > 0,
            &format!("rate_limiting.{name}.requests"),
            "must be greater than zero",
        );
        require(
            rule.window_ms > 0,
            &format!("rate_limiting.{name}.window_ms"),
            "must be greater than zero",
        );
        require(
            rule.window_ms <= MAX_RATE_WINDOW_MS,
            &format!("rate_limiting.{name}.window_ms"),
            "must not exceed seven days",
        );
    }

    require(
        config.maintenance.sweep_interval_secs > 0,
        "maintenance.sweep_interval_secs",
        "must be greater than zero",
    );

    if config.observability.metrics_enabled {
        require(
            config.observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            "must be a socket address",
        );
    }
    if config.admin.enabled {
        require(
            config.admin.bind_address.parse::<SocketAddr>().is_ok(),
            "admin.bind_address",
            "must be a socket address",
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
