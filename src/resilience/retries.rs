//! Retrying transport.
//!
//! # Responsibilities
//! - Apply the global throttle before every attempt, retries included
//! - Classify failures as retryable (configured statuses) or final
//! - Wait with exponential backoff + jitter between attempts
//! - Count retries, successes after retry and final failures
//!
//! # Design Decisions
//! - `max_attempts` counts the first attempt
//! - A response with status >= 400 is a failure even if the call returned it
//! - Connection errors (no status) retry only when configured to

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::{RetryConfig, SharedConfig};
use crate::error::GuardError;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::throttle::Throttle;
use crate::upstream::{UpstreamError, UpstreamResponse};

/// Retry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    pub total_retries: u64,
    pub success_after_retry: u64,
    pub final_failures: u64,
}

/// Check whether a failed attempt may be retried.
pub fn is_retryable(error: &UpstreamError, retry: &RetryConfig) -> bool {
    match error.status {
        Some(status) => retry.retryable_status_codes.contains(&status),
        None => retry.retry_connection_errors,
    }
}

/// Executes upstream calls with throttling and retry.
#[derive(Debug)]
pub struct RetryingTransport {
    config: SharedConfig,
    throttle: Throttle,
    total_retries: AtomicU64,
    success_after_retry: AtomicU64,
    final_failures: AtomicU64,
}

impl RetryingTransport {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            config,
            throttle: Throttle::new(),
            total_retries: AtomicU64::new(0),
            success_after_retry: AtomicU64::new(0),
            final_failures: AtomicU64::new(0),
        }
    }

    /// Run `call` until it succeeds, fails non-retryably, or attempts run out.
    pub async fn execute<F, Fut>(&self, call: F) -> Result<UpstreamResponse, GuardError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<UpstreamResponse, UpstreamError>>,
    {
        let retry = self.config.load().retry.clone();
        let max_attempts = retry.effective_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.throttle.acquire(retry.min_interval()).await;

            let outcome = match call().await {
                Ok(response) if response.is_success() => Ok(response),
                Ok(response) => Err(UpstreamError::from(response)),
                Err(error) => Err(error),
            };

            let error = match outcome {
                Ok(response) => {
                    if attempt > 1 {
                        self.success_after_retry.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(attempt, "Upstream call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            if !is_retryable(&error, &retry) {
                self.final_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(attempt, status = ?error.status, error = %error, "Upstream call failed, not retryable");
                let failure = GuardError::NonRetryableUpstream {
                    status: error.status,
                    message: error.message,
                };
                metrics::record_final_failure(failure.kind());
                return Err(failure);
            }

            if attempt >= max_attempts {
                self.final_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(attempts = attempt, status = ?error.status, error = %error, "Upstream call failed, retries exhausted");
                let failure = GuardError::TransientUpstream {
                    status: error.status.unwrap_or(502),
                    attempts: attempt,
                    message: error.message,
                };
                metrics::record_final_failure(failure.kind());
                return Err(failure);
            }

            let delay = calculate_backoff(
                attempt,
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
                retry.jitter_ms,
            );
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            metrics::record_retry(error.status);
            tracing::warn!(
                attempt,
                max_attempts,
                status = ?error.status,
                delay = ?delay,
                "Retryable upstream failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            total_retries: self.total_retries.load(Ordering::Relaxed),
            success_after_retry: self.success_after_retry.load(Ordering::Relaxed),
            final_failures: self.final_failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.total_retries.store(0, Ordering::Relaxed);
        self.success_after_retry.store(0, Ordering::Relaxed);
        self.final_failures.store(0, Ordering::Relaxed);
    }
}
