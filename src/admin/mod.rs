//! Admin and observability HTTP surface.
//!
//! # Responsibilities
//! - Expose the guard's statistics and health summary as JSON
//! - Read and patch the live configuration
//! - Run administrative resets
//!
//! # Design Decisions
//! - Thin handlers over `ExecutionGuard`; no state of its own
//! - Malformed or invalid bodies are 400 with a JSON error body
//! - No authentication; bind to a private address

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::guard::ExecutionGuard;
use self::handlers::*;

/// Build the admin router over `guard`.
pub fn router(guard: ExecutionGuard) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/health", get(get_health))
        .route("/admin/config", get(get_config).patch(patch_config))
        .route("/admin/reset", post(post_reset))
        .layer(TraceLayer::new_for_http())
        .with_state(guard)
}

/// Serve the admin router until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    guard: ExecutionGuard,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, router(guard))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Admin API shutting down");
        })
        .await
}
