//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated)
//!     → shared via ArcSwap to all guard components
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<GuardConfig>
//!
//! On admin update:
//!     update.rs merges a ConfigUpdate over the live config
//!     → validation.rs validates
//!     → atomic swap, or rejection with the old config left in place
//! ```
//!
//! # Design Decisions
//! - Components read the live config on every decision; nothing caches a copy
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod update;
pub mod validation;
pub mod watcher;

use std::sync::Arc;
use arc_swap::ArcSwap;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, DeduplicationConfig, GuardConfig, MaintenanceConfig,
    ObservabilityConfig, QueueConfig, RateLimitConfig, RateLimitRule, RetryConfig,
};
pub use update::ConfigUpdate;
pub use validation::{validate_config, ValidationError};

/// Live configuration handle shared by every guard component.
pub type SharedConfig = Arc<ArcSwap<GuardConfig>>;

/// Wrap a configuration for sharing.
pub fn shared(config: GuardConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}
