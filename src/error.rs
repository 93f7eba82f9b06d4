//! Error taxonomy surfaced to callers of the guard.

use crate::config::validation::ValidationError;

/// Every failure the guard hands back to its caller.
///
/// `Clone` so the result of one upstream call can be delivered to all
/// coalesced callers waiting on the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    /// Retryable status that persisted through every attempt.
    #[error("upstream returned retryable status {status} after {attempts} attempts: {message}")]
    TransientUpstream {
        status: u16,
        attempts: u32,
        message: String,
    },

    /// Status outside the retryable set, surfaced without retrying.
    #[error("upstream failed without retry{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    NonRetryableUpstream { status: Option<u16>, message: String },

    /// Breaker is open for the target provider.
    #[error("provider '{provider}' is unavailable: circuit breaker open")]
    ProviderUnavailable { provider: String },

    /// A rate-limit rule is saturated for the caller.
    #[error("rate limit exceeded: {rule}, retry after {retry_after_secs}s")]
    RateLimited { rule: String, retry_after_secs: u64 },

    /// Queued work could not be delivered (queue full, reset, or work panicked).
    #[error("queue failure: {reason}")]
    QueueFailure { reason: String },

    /// Administrative update rejected; previous configuration stays active.
    #[error("invalid configuration: {}", join(.0))]
    Configuration(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl GuardError {
    pub fn queue(reason: impl Into<String>) -> Self {
        GuardError::QueueFailure {
            reason: reason.into(),
        }
    }

    /// HTTP-like status a router can relay to its own client.
    pub fn status(&self) -> u16 {
        match self {
            GuardError::TransientUpstream { status, .. } => *status,
            GuardError::NonRetryableUpstream { status, .. } => status.unwrap_or(502),
            GuardError::ProviderUnavailable { .. } => 503,
            GuardError::RateLimited { .. } => 429,
            GuardError::QueueFailure { .. } => 503,
            GuardError::Configuration(_) => 400,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::TransientUpstream { .. } => "transient_upstream",
            GuardError::NonRetryableUpstream { .. } => "non_retryable_upstream",
            GuardError::ProviderUnavailable { .. } => "provider_unavailable",
            GuardError::RateLimited { .. } => "rate_limited",
            GuardError::QueueFailure { .. } => "queue_failure",
            GuardError::Configuration(_) => "configuration",
        }
    }

    /// True when the failure came back from the provider itself.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            GuardError::TransientUpstream { .. } | GuardError::NonRetryableUpstream { .. }
        )
    }
}
