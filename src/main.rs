//! Execution guard host process.
//!
//! # Architecture Overview
//!
//! ```text
//!     Router call             ┌──────────────────────────────────────────────┐
//!     ────────────────────────┼─▶ ExecutionGuard::guarded_execute            │
//!                             │     │                                        │
//!                             │     ├─▶ dedup (fingerprint cache, in-flight) │
//!                             │     ├─▶ resilience (breaker, rate limit)     │
//!                             │     ├─▶ queue (per-key lanes)                │
//!                             │     └─▶ resilience (throttle, retry)  ───────┼──▶ Provider
//!                             │                                              │
//!     Admin / dashboard       │  admin router ◀── GuardStats / health        │
//!     ────────────────────────┼─▶ /admin/*                                   │
//!                             │                                              │
//!                             │  config watcher ─▶ replace_config            │
//!                             │  maintenance sweep ─▶ invalidate_expired     │
//!                             └──────────────────────────────────────────────┘
//! ```
//!
//! The host process owns one guard, its background tasks and the admin
//! surface. Routers embedding the library construct their own guard.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use execution_guard::config::{load_config, watcher::ConfigWatcher, GuardConfig};
use execution_guard::lifecycle::{shutdown_signal, Shutdown};
use execution_guard::observability::{logging, metrics};
use execution_guard::{admin, ExecutionGuard};

#[derive(Parser)]
#[command(name = "execution-guard")]
#[command(about = "Deduplicating, rate-smoothing, retrying guard for upstream AI providers", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!("execution-guard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        ttl_seconds = config.deduplication.ttl_seconds,
        failure_threshold = config.circuit_breaker.failure_threshold,
        min_delay_ms = config.queue.min_delay_ms,
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let guard = ExecutionGuard::new(config.clone())?;
    let shutdown = Shutdown::new();
    let sweep = guard.spawn_maintenance(shutdown.subscribe());

    // The watcher handle must stay alive for reloads to keep arriving.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let reload_guard = guard.clone();
            let mut reload_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(next) = updates.recv() => {
                            if let Err(e) = reload_guard.replace_config(next) {
                                tracing::error!(error = %e, "Reloaded configuration rejected");
                            }
                        }
                        _ = reload_shutdown.recv() => break,
                    }
                }
            });
            match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        Some(tokio::spawn(admin::serve(listener, guard.clone(), shutdown.subscribe())))
    } else {
        None
    };

    shutdown_signal().await;
    shutdown.trigger();

    if let Err(e) = sweep.await {
        tracing::error!(error = %e, "Maintenance task ended abnormally");
    }
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
            Err(e) => tracing::error!(error = %e, "Admin API task ended abnormally"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!(stats = ?guard.get_stats().retry, "Shutdown complete");
    Ok(())
}
