//! Per-key queue lanes.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::config::SharedConfig;
use crate::queue::{Job, JobResult, QueueStats, RequestQueue};

/// Lane shared by every key without a dedicated lane.
pub const DEFAULT_LANE: &str = "default";

/// Queue statistics summed over lanes, with the per-lane breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    #[serde(flatten)]
    pub totals: QueueStats,
    pub lanes: BTreeMap<String, QueueStats>,
}

/// Routes keys to lanes, creating lanes on first use.
///
/// Keys listed in `queue.dedicated_keys` get independent pacing; all other
/// traffic shares the default lane.
#[derive(Debug)]
pub struct QueueLanes {
    lanes: DashMap<String, Arc<RequestQueue>>,
    config: SharedConfig,
}

impl QueueLanes {
    pub fn new(config: SharedConfig) -> Self {
        Self {
            lanes: DashMap::new(),
            config,
        }
    }

    /// Name of the lane serving `key_id`.
    pub fn lane_name(&self, key_id: &str) -> String {
        let config = self.config.load();
        if config.queue.dedicated_keys.iter().any(|k| k == key_id) {
            key_id.to_string()
        } else {
            DEFAULT_LANE.to_string()
        }
    }

    fn lane(&self, key_id: &str) -> Arc<RequestQueue> {
        let name = self.lane_name(key_id);
        self.lanes
            .entry(name.clone())
            .or_insert_with(|| Arc::new(RequestQueue::new(name, self.config.clone())))
            .clone()
    }

    /// Queue `job` on the lane for `key_id`.
    pub fn enqueue(&self, job: Job, key_id: &str) -> impl Future<Output = JobResult> + Send + 'static {
        self.lane(key_id).enqueue(job, key_id)
    }

    pub fn stats(&self) -> QueueSummary {
        let lanes: BTreeMap<String, QueueStats> = self
            .lanes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();

        let mut totals = lanes.values().fold(QueueStats::default(), |mut acc, lane| {
            acc.current_depth += lane.current_depth;
            acc.total_enqueued += lane.total_enqueued;
            acc.total_processed += lane.total_processed;
            acc.total_failed += lane.total_failed;
            acc.total_rejected += lane.total_rejected;
            acc.is_processing |= lane.is_processing;
            acc.dispatched += lane.dispatched;
            acc.total_wait_ms += lane.total_wait_ms;
            acc
        });
        if totals.dispatched > 0 {
            totals.average_wait_time_ms = totals.total_wait_ms / totals.dispatched as f64;
        }

        QueueSummary { totals, lanes }
    }

    /// Reset every lane.
    pub fn reset(&self) {
        for lane in self.lanes.iter() {
            lane.value().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{shared, GuardConfig};
    use crate::error::GuardError;
    use crate::upstream::UpstreamResponse;
    use futures_util::FutureExt;
    use std::time::Duration;
    use tokio::time::Instant;

    fn lanes() -> QueueLanes {
        let mut config = GuardConfig::default();
        config.queue.min_delay_ms = 1000;
        config.queue.dedicated_keys = vec!["key-b".to_string()];
        QueueLanes::new(shared(config))
    }

    fn stamp() -> Job {
        async { Ok::<_, GuardError>(UpstreamResponse::new(200, "")) }.boxed()
    }

    #[test]
    fn test_lane_selection() {
        let lanes = lanes();
        assert_eq!(lanes.lane_name("key-a"), DEFAULT_LANE);
        assert_eq!(lanes.lane_name("key-b"), "key-b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedicated_lane_paces_independently() {
        let lanes = lanes();
        let start = Instant::now();

        let a1 = lanes.enqueue(stamp(), "key-a");
        let a2 = lanes.enqueue(stamp(), "key-c");
        let b1 = lanes.enqueue(stamp(), "key-b");
        let b2 = lanes.enqueue(stamp(), "key-b");

        let (ra1, ra2, rb1, rb2) = tokio::join!(a1, a2, b1, b2);
        for result in [ra1, ra2, rb1, rb2] {
            result.unwrap();
        }

        // Two lanes of two items each: one min_delay in total, not three.
        assert_eq!(Instant::now() - start, Duration::from_secs(1));

        let summary = lanes.stats();
        assert_eq!(summary.lanes.len(), 2);
        assert_eq!(summary.totals.total_processed, 4);
        assert_eq!(summary.lanes[DEFAULT_LANE].total_processed, 2);
        assert_eq!(summary.totals.average_wait_time_ms, 500.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_covers_every_lane() {
        let lanes = lanes();
        let a = lanes.enqueue(stamp(), "key-a");
        let b = lanes.enqueue(stamp(), "key-b");

        lanes.reset();

        assert!(a.await.is_err());
        assert!(b.await.is_err());
    }
}
