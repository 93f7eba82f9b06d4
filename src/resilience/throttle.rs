//! Process-wide minimum spacing between upstream calls.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Global call throttle.
///
/// Each caller reserves the next free slot under the lock and then sleeps
/// until it, so concurrent callers are spaced by at least the interval
/// without holding the lock across the sleep.
#[derive(Debug, Default)]
pub struct Throttle {
    last_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot `interval` after the previous one and wait for it.
    pub async fn acquire(&self, interval: Duration) {
        let slot = {
            let mut last = self.last_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = match *last {
                Some(prev) => prev.checked_add(interval).unwrap_or(prev).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };

        if slot > Instant::now() {
            tracing::trace!(wait = ?(slot - Instant::now()), "Throttling upstream call");
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_spaced() {
        let throttle = Arc::new(Throttle::new());
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move {
                    throttle.acquire(Duration::from_millis(200)).await;
                    Instant::now()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap() - start);
        }
        times.sort();

        assert_eq!(
            times,
            vec![
                Duration::ZERO,
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(600),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_needs_no_wait() {
        let throttle = Throttle::new();
        throttle.acquire(Duration::from_millis(200)).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        let before = Instant::now();
        throttle.acquire(Duration::from_millis(200)).await;
        assert_eq!(Instant::now(), before);
    }
}
