//! Time source shared by the cache, breaker and rate limiter.
//!
//! # Design Decisions
//! - Monotonic readings use `tokio::time::Instant` so paused-runtime tests
//!   (`start_paused = true`) move every component forward together
//! - Wall-clock milliseconds are derived from a fixed anchor plus monotonic
//!   elapsed time; fingerprint buckets therefore follow virtual time too
//! - Sleeping is never done through the clock, only reading

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Source of "now" for guard components.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant.
    fn now(&self) -> Instant;

    /// Milliseconds since the UNIX epoch.
    fn epoch_millis(&self) -> u64;
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: Instant,
    origin_epoch_ms: u64,
}

impl TokioClock {
    /// Anchor the clock to the current system time.
    pub fn new() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self::anchored_at(origin_epoch_ms)
    }

    /// Anchor the clock to a fixed epoch timestamp.
    pub fn anchored_at(origin_epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> u64 {
        self.origin_epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for synchronous tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_epoch_ms: u64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(origin_epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn epoch_millis(&self) -> u64 {
        self.origin_epoch_ms + self.offset().as_millis() as u64
    }
}
