//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded call:
//!     → circuit_breaker.rs (fail fast if the provider's breaker is open)
//!     → rate_limit.rs (reject if the session exhausted a window)
//!     → retries.rs
//!         → throttle.rs (process-wide spacing, before every attempt)
//!         → call
//!         → backoff.rs (delay before the next attempt on retryable failure)
//!     → circuit_breaker.rs (record the final outcome)
//! ```
//!
//! # Design Decisions
//! - Breaker state is per provider, never global
//! - Retries re-enter the throttle; nothing bypasses the baseline spacing
//! - Only upstream failures feed the breaker; local rejections do not

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retries;
pub mod throttle;

pub use circuit_breaker::{BreakerState, ProviderHealthTracker, ProviderSnapshot};
pub use rate_limit::{RuleUsage, SlidingWindowLimiter};
pub use retries::{is_retryable, RetryStats, RetryingTransport};
pub use throttle::Throttle;
