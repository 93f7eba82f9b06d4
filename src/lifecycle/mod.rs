//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown_signal() resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger() → maintenance sweep, config watcher loop and admin server
//!     observe the broadcast → exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every background task subscribes
//! - Queued work is not cancelled; it drains with the runtime

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
