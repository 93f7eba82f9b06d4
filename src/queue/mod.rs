//! Minimum-delay request queue.
//!
//! # Responsibilities
//! - Serialize outbound calls per lane, strictly FIFO
//! - Keep at least `min_delay` between consecutive dispatches on a lane
//! - Deliver each item's result (or failure) to its own caller
//! - Report depth, throughput and wait time
//!
//! # Data Flow
//! ```text
//! enqueue(job, key_id)
//!     → lanes.rs (pick the key's dedicated lane or the default lane)
//!     → RequestQueue::enqueue (push, start worker if idle)
//!     → worker: pop head → wait for min_delay → run job → reply
//! ```
//!
//! # Design Decisions
//! - Push happens synchronously inside `enqueue`, so submission order is
//!   the order `enqueue` was called, not the order futures are polled
//! - One worker task per lane at most, spawned lazily and exiting when the
//!   lane drains
//! - Jobs run in their own task so a panic becomes a `QueueFailure` for that
//!   caller only
//! - Queued work is not cancelled when its caller goes away

pub mod lanes;

pub use lanes::{QueueLanes, QueueSummary, DEFAULT_LANE};

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::SharedConfig;
use crate::error::GuardError;
use crate::observability::metrics;
use crate::upstream::UpstreamResponse;

/// Deferred upstream work.
pub type Job = BoxFuture<'static, Result<UpstreamResponse, GuardError>>;

/// Result delivered to the caller of `enqueue`.
pub type JobResult = Result<UpstreamResponse, GuardError>;

struct QueueItem {
    id: Uuid,
    enqueued_at: Instant,
    key_id: String,
    job: Job,
    reply: oneshot::Sender<JobResult>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    processing: bool,
    last_dispatch: Option<Instant>,
}

/// Statistics of one lane (or the sum of all lanes).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub current_depth: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub average_wait_time_ms: f64,
    pub is_processing: bool,
    #[serde(skip)]
    pub(crate) dispatched: u64,
    #[serde(skip)]
    pub(crate) total_wait_ms: f64,
}

/// A single dispatch lane.
pub struct RequestQueue {
    lane: String,
    state: Mutex<QueueState>,
    config: SharedConfig,
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    total_wait_us: AtomicU64,
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("lane", &self.lane)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RequestQueue {
    pub fn new(lane: impl Into<String>, config: SharedConfig) -> Self {
        Self {
            lane: lane.into(),
            state: Mutex::new(QueueState::default()),
            config,
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            total_wait_us: AtomicU64::new(0),
        }
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `job` to the lane and return a future for its result.
    ///
    /// Must be called from within a tokio runtime. The item is queued before
    /// this returns; the returned future only waits for the reply.
    pub fn enqueue(
        self: &Arc<Self>,
        job: Job,
        key_id: &str,
    ) -> impl Future<Output = JobResult> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let max_queue_size = self.config.load().queue.max_queue_size;

        let (rejection, start_worker, depth) = {
            let mut state = self.lock();
            if state.pending.len() >= max_queue_size {
                (Some(state.pending.len()), false, state.pending.len())
            } else {
                let id = Uuid::new_v4();
                tracing::debug!(lane = %self.lane, key_id = %key_id, item = %id, depth = state.pending.len() + 1, "Request queued");
                state.pending.push_back(QueueItem {
                    id,
                    enqueued_at: Instant::now(),
                    key_id: key_id.to_string(),
                    job,
                    reply,
                });
                let start = !state.processing;
                state.processing = true;
                (None, start, state.pending.len())
            }
        };

        let rejection = rejection.map(|depth| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(lane = %self.lane, key_id = %key_id, depth, "Queue full, rejecting request");
            GuardError::queue(format!("queue '{}' is full ({depth} pending)", self.lane))
        });
        if rejection.is_none() {
            self.enqueued.fetch_add(1, Ordering::Relaxed);
            metrics::record_queue_depth(&self.lane, depth);
        }
        if start_worker {
            tokio::spawn(self.clone().run_worker());
        }

        async move {
            if let Some(err) = rejection {
                return Err(err);
            }
            rx.await
                .unwrap_or_else(|_| Err(GuardError::queue("queue worker dropped the request")))
        }
    }

    async fn run_worker(self: Arc<Self>) {
        tracing::debug!(lane = %self.lane, "Queue worker started");
        loop {
            let (item, last_dispatch, depth) = {
                let mut state = self.lock();
                match state.pending.pop_front() {
                    Some(item) => (item, state.last_dispatch, state.pending.len()),
                    None => {
                        state.processing = false;
                        tracing::debug!(lane = %self.lane, "Queue drained, worker stopping");
                        return;
                    }
                }
            };
            metrics::record_queue_depth(&self.lane, depth);

            if let Some(ready_at) =
                last_dispatch.and_then(|last| last.checked_add(self.config.load().queue.min_delay()))
            {
                if ready_at > Instant::now() {
                    tokio::time::sleep_until(ready_at).await;
                }
            }

            let started = Instant::now();
            self.lock().last_dispatch = Some(started);

            let wait = started.saturating_duration_since(item.enqueued_at);
            self.dispatched.fetch_add(1, Ordering::Relaxed);
            self.total_wait_us
                .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
            metrics::record_queue_wait(&self.lane, wait);
            tracing::debug!(lane = %self.lane, key_id = %item.key_id, item = %item.id, wait = ?wait, "Dispatching queued request");

            let result = match tokio::spawn(item.job).await {
                Ok(result) => result,
                Err(join_error) => {
                    tracing::error!(lane = %self.lane, item = %item.id, error = %join_error, "Queued work aborted");
                    Err(GuardError::queue(format!("queued work aborted: {join_error}")))
                }
            };

            self.processed.fetch_add(1, Ordering::Relaxed);
            if result.is_err() {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            if item.reply.send(result).is_err() {
                tracing::debug!(lane = %self.lane, item = %item.id, "Caller went away before the result was delivered");
            }
        }
    }

    /// Fail every pending item and zero the statistics.
    ///
    /// An item already dispatched runs to completion.
    pub fn reset(&self) {
        let drained: Vec<QueueItem> = self.lock().pending.drain(..).collect();
        let count = drained.len();
        for item in drained {
            let _ = item
                .reply
                .send(Err(GuardError::queue("queue was reset before dispatch")));
        }

        self.enqueued.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.total_wait_us.store(0, Ordering::Relaxed);
        metrics::record_queue_depth(&self.lane, 0);

        tracing::info!(lane = %self.lane, failed_pending = count, "Queue reset");
    }

    pub fn stats(&self) -> QueueStats {
        let (depth, processing) = {
            let state = self.lock();
            (state.pending.len(), state.processing)
        };
        let dispatched = self.dispatched.load(Ordering::Relaxed);
        let total_wait_ms = self.total_wait_us.load(Ordering::Relaxed) as f64 / 1000.0;

        QueueStats {
            current_depth: depth,
            total_enqueued: self.enqueued.load(Ordering::Relaxed),
            total_processed: self.processed.load(Ordering::Relaxed),
            total_failed: self.failed.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            average_wait_time_ms: if dispatched > 0 {
                total_wait_ms / dispatched as f64
            } else {
                0.0
            },
            is_processing: processing,
            dispatched,
            total_wait_ms,
        }
    }
}
