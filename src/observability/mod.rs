//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guard components produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Metrics endpoint (Prometheus scrape)
//!     → GuardStats snapshot (admin surface, dashboard)
//! ```
//!
//! # Design Decisions
//! - Metric calls are no-ops until a recorder is installed, so library users
//!   and tests pay nothing
//! - Log fields are named consistently: provider, key_id, fingerprint, attempt

pub mod logging;
pub mod metrics;
