//! Execution guard orchestrator.
//!
//! # Responsibilities
//! - Public entry point for every upstream call the router makes
//! - Compose cache, breaker, rate limiter, queue and retrying transport
//! - Coalesce identical in-flight requests onto one upstream call
//! - Apply runtime config updates and administrative resets
//! - Run the periodic expiry sweep until shutdown
//!
//! # Data Flow
//! ```text
//! guarded_execute(call, ctx)
//!     → FingerprintCache (hit → return copy)
//!     → in-flight table (same fingerprint running → await its result)
//!     → ProviderHealthTracker (open → ProviderUnavailable)
//!     → SlidingWindowLimiter (saturated → RateLimited)
//!     → QueueLanes (wait for the key's lane)
//!     → RetryingTransport (throttle, call, backoff)
//!     → record outcome, store on success, return
//! ```
//!
//! # Design Decisions
//! - One explicitly constructed instance, cloned cheaply (`Arc` inside)
//! - A leader's pipeline runs in its own task; followers and the original
//!   caller all await a shared result
//! - Only upstream failures are recorded against a provider

pub mod stats;

pub use stats::{GuardStats, HealthReport, HealthStatus, RateLimitingStats};

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::clock::{Clock, TokioClock};
use crate::config::{self, validate_config, ConfigUpdate, GuardConfig, SharedConfig};
use crate::dedup::{CacheLookup, Fingerprint, FingerprintCache};
use crate::error::GuardError;
use crate::observability::metrics;
use crate::queue::{Job, JobResult, QueueLanes};
use crate::resilience::{ProviderHealthTracker, RetryingTransport, SlidingWindowLimiter};
use crate::upstream::{CallContext, UpstreamError, UpstreamResponse};

type SharedResult = Shared<BoxFuture<'static, JobResult>>;

/// Which component an administrative reset targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetTarget {
    Cache,
    CircuitBreaker,
    Queue,
    All,
}

struct Inner {
    config: SharedConfig,
    update_lock: Mutex<()>,
    cache: FingerprintCache,
    breaker: ProviderHealthTracker,
    limiter: SlidingWindowLimiter,
    queue: QueueLanes,
    transport: RetryingTransport,
    in_flight: DashMap<Fingerprint, SharedResult>,
}

/// Protects upstream providers from duplicate, bursty and failing traffic.
#[derive(Clone)]
pub struct ExecutionGuard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("cached", &self.inner.cache.len())
            .field("in_flight", &self.inner.in_flight.len())
            .finish()
    }
}

impl ExecutionGuard {
    /// Create a guard on the tokio clock.
    pub fn new(config: GuardConfig) -> Result<Self, GuardError> {
        Self::with_clock(config, Arc::new(TokioClock::new()))
    }

    /// Create a guard reading time from `clock`.
    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Result<Self, GuardError> {
        validate_config(&config).map_err(GuardError::Configuration)?;
        let config = config::shared(config);

        Ok(Self {
            inner: Arc::new(Inner {
                cache: FingerprintCache::new(config.clone(), clock.clone()),
                breaker: ProviderHealthTracker::new(config.clone(), clock.clone()),
                limiter: SlidingWindowLimiter::new(config.clone(), clock),
                queue: QueueLanes::new(config.clone()),
                transport: RetryingTransport::new(config.clone()),
                in_flight: DashMap::new(),
                update_lock: Mutex::new(()),
                config,
            }),
        })
    }

    /// Run `call` under deduplication, breaker, queue and retry protection.
    ///
    /// `call` may be invoked several times (once per attempt). Must be called
    /// from within a tokio runtime.
    pub async fn guarded_execute<F, Fut>(
        &self,
        call: F,
        ctx: CallContext,
    ) -> Result<UpstreamResponse, GuardError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'static,
    {
        let inner = &self.inner;
        let dedup_enabled = inner.config.load().deduplication.enabled && !ctx.skip_deduplication;

        let fingerprint = match (&ctx.request, dedup_enabled) {
            (Some(request), true) => match inner.cache.should_serve_from_cache(request) {
                CacheLookup::Hit(response) => {
                    metrics::record_guarded_request(&ctx.provider_id, "cache_hit");
                    return Ok(response);
                }
                CacheLookup::Miss(fingerprint) => Some(fingerprint),
                CacheLookup::Excluded => None,
            },
            _ => None,
        };

        let Some(fingerprint) = fingerprint else {
            return Inner::execute(inner.clone(), call, ctx).await;
        };

        let shared = match inner.in_flight.entry(fingerprint.clone()) {
            Entry::Occupied(running) => {
                let shared = running.get().clone();
                drop(running);
                inner.cache.record_coalesced();
                tracing::debug!(fingerprint = %fingerprint.short(), provider = %ctx.provider_id, "Joining in-flight identical request");
                metrics::record_guarded_request(&ctx.provider_id, "coalesced");
                shared
            }
            Entry::Vacant(slot) => {
                // The previous leader may have stored and left between our
                // lookup and taking the slot.
                if let Some(response) = inner.cache.peek(&fingerprint) {
                    drop(slot);
                    inner.cache.record_late_hit();
                    metrics::record_guarded_request(&ctx.provider_id, "cache_hit");
                    return Ok(response);
                }

                let (tx, rx) = oneshot::channel::<JobResult>();
                let shared: SharedResult = async move {
                    rx.await
                        .unwrap_or_else(|_| Err(GuardError::queue("guarded call was aborted")))
                }
                .boxed()
                .shared();
                slot.insert(shared.clone());

                let leader = inner.clone();
                tokio::spawn(async move {
                    let result = Inner::execute(leader.clone(), call, ctx).await;
                    if let Ok(response) = &result {
                        leader.cache.insert(fingerprint.clone(), response);
                    }
                    leader.in_flight.remove(&fingerprint);
                    let _ = tx.send(result);
                });
                shared
            }
        };

        shared.await
    }

    /// Replace the live configuration with a merged, validated update.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), GuardError> {
        let _guard = self.inner.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let candidate = update.apply_to(&self.inner.config.load());
        self.install(candidate)
    }

    /// Replace the live configuration wholesale (file reload).
    pub fn replace_config(&self, config: GuardConfig) -> Result<(), GuardError> {
        let _guard = self.inner.update_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.install(config)
    }

    fn install(&self, candidate: GuardConfig) -> Result<(), GuardError> {
        if let Err(errors) = validate_config(&candidate) {
            tracing::warn!(errors = errors.len(), "Configuration update rejected");
            return Err(GuardError::Configuration(errors));
        }
        self.inner.config.store(Arc::new(candidate));
        tracing::info!("Configuration updated");
        Ok(())
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<GuardConfig> {
        self.inner.config.load_full()
    }

    pub fn get_stats(&self) -> GuardStats {
        let inner = &self.inner;
        let providers = inner.breaker.snapshot();

        GuardStats {
            deduplication: inner.cache.stats(),
            rate_limiting: RateLimitingStats {
                breaker_state: providers
                    .iter()
                    .map(|(id, snapshot)| (id.clone(), snapshot.state))
                    .collect(),
                providers,
                total_requests_tracked: inner.breaker.total_requests_tracked(),
                rules: inner.limiter.usage(),
                tracked_sessions: inner.limiter.tracked_sessions(),
            },
            queue: inner.queue.stats(),
            retry: inner.transport.stats(),
            in_flight: inner.in_flight.len(),
        }
    }

    pub fn health(&self) -> HealthReport {
        self.get_stats().health()
    }

    pub fn is_provider_healthy(&self, provider: &str) -> bool {
        self.inner.breaker.is_provider_healthy(provider)
    }

    /// Drop every cached response. In-flight calls are unaffected.
    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        tracing::info!("Deduplication cache cleared");
    }

    /// Close every breaker and zero provider counters.
    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker.reset_all();
    }

    /// Fail pending queue items and zero queue and retry statistics.
    pub fn reset_queue(&self) {
        self.inner.queue.reset();
        self.inner.transport.reset_stats();
    }

    pub fn reset(&self, target: ResetTarget) {
        match target {
            ResetTarget::Cache => self.clear_cache(),
            ResetTarget::CircuitBreaker => self.reset_circuit_breaker(),
            ResetTarget::Queue => self.reset_queue(),
            ResetTarget::All => {
                self.clear_cache();
                self.reset_circuit_breaker();
                self.reset_queue();
                self.inner.limiter.reset();
            }
        }
    }

    /// Remove expired cache entries and stale rate-limit timestamps.
    pub fn invalidate_expired(&self) -> usize {
        let removed = self.inner.cache.invalidate_expired();
        let sessions = self.inner.limiter.prune();
        tracing::debug!(removed, sessions_pruned = sessions, "Expired entries swept");
        removed
    }

    /// Sweep expired entries on the configured interval until shutdown.
    pub fn spawn_maintenance(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = guard.config().maintenance.sweep_interval_secs,
                "Maintenance sweep starting"
            );
            loop {
                let interval = Duration::from_secs(guard.config().maintenance.sweep_interval_secs);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        guard.invalidate_expired();
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Maintenance sweep received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

impl Inner {
    /// Breaker, limiter, queue and transport, without the cache.
    async fn execute<F, Fut>(self: Arc<Self>, call: F, ctx: CallContext) -> JobResult
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UpstreamResponse, UpstreamError>> + Send + 'static,
    {
        let provider = ctx.provider_id.clone();

        if !self.breaker.is_provider_healthy(&provider) {
            tracing::warn!(provider = %provider, "Provider unavailable, failing fast");
            metrics::record_guarded_request(&provider, "provider_unavailable");
            return Err(GuardError::ProviderUnavailable { provider });
        }

        let session = ctx
            .request
            .as_ref()
            .and_then(|r| r.session_id.clone())
            .unwrap_or_else(|| ctx.key_id.clone());
        if let Err(err) = self.limiter.check(&session) {
            metrics::record_guarded_request(&provider, "rate_limited");
            return Err(err);
        }

        let use_queue = self.config.load().queue.enabled && !ctx.skip_queue;
        let result = if use_queue {
            let worker = self.clone();
            let job: Job = async move { worker.transport.execute(call).await }.boxed();
            self.queue.enqueue(job, &ctx.key_id).await
        } else {
            self.transport.execute(call).await
        };

        match &result {
            Ok(_) => {
                self.breaker.record_outcome(&provider, true);
                metrics::record_guarded_request(&provider, "success");
            }
            Err(err) => {
                if err.is_upstream() {
                    self.breaker.record_outcome(&provider, false);
                }
                tracing::warn!(provider = %provider, key_id = %ctx.key_id, kind = err.kind(), error = %err, "Guarded call failed");
                metrics::record_guarded_request(&provider, err.kind());
            }
        }
        result
    }
}
