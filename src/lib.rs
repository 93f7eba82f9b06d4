//! Execution guard library.
//!
//! Protects upstream AI-provider APIs from duplicate requests, bursts and
//! transient failures. A router hands each upstream call to
//! [`ExecutionGuard::guarded_execute`] together with a [`CallContext`].

pub mod admin;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod upstream;

pub use config::schema::GuardConfig;
pub use dedup::RequestDescriptor;
pub use error::GuardError;
pub use guard::{ExecutionGuard, GuardStats, ResetTarget};
pub use lifecycle::Shutdown;
pub use upstream::{CallContext, UpstreamError, UpstreamResponse};
