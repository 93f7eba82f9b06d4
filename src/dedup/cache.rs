//! TTL-bounded, insertion-ordered response cache keyed by fingerprint.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::config::SharedConfig;
use crate::dedup::fingerprint::{Fingerprint, RequestDescriptor};
use crate::observability::metrics;
use crate::upstream::UpstreamResponse;

/// A stored response.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: UpstreamResponse,
    created_at: Instant,
    ttl: Duration,
    /// Times this entry was served as a duplicate.
    hits: u64,
    /// Insertion sequence, matches the entry's slot in the order queue.
    seq: u64,
    size: usize,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

/// Entries plus insertion order, guarded together.
///
/// `order` may hold stale `(fingerprint, seq)` pairs for entries that were
/// replaced or swept; they are skipped during eviction and compacted away.
#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    order: VecDeque<(Fingerprint, u64)>,
    next_seq: u64,
    memory: usize,
}

impl CacheState {
    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(fingerprint)?;
        self.memory = self.memory.saturating_sub(entry.size);
        Some(entry)
    }

    /// Evict the oldest-inserted live entry.
    fn evict_oldest(&mut self) -> Option<Fingerprint> {
        while let Some((fingerprint, seq)) = self.order.pop_front() {
            let current = self.entries.get(&fingerprint).map(|e| e.seq);
            if current == Some(seq) {
                self.remove(&fingerprint);
                return Some(fingerprint);
            }
        }
        None
    }

    fn compact_order(&mut self) {
        if self.order.len() > self.entries.len() * 2 + 16 {
            let entries = &self.entries;
            self.order
                .retain(|(fp, seq)| entries.get(fp).map(|e| e.seq) == Some(*seq));
        }
    }
}

/// Outcome of a cache consultation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Endpoint is excluded from deduplication; no fingerprint was computed.
    Excluded,
    /// No live entry; carries the fingerprint for a later store.
    Miss(Fingerprint),
    /// Live entry found; carries a fresh copy of the stored response.
    Hit(UpstreamResponse),
}

impl CacheLookup {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn cached_value(self) -> Option<UpstreamResponse> {
        match self {
            CacheLookup::Hit(response) => Some(response),
            _ => None,
        }
    }
}

/// Deduplication statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub cached_request_count: usize,
    pub duplicates_blocked_count: u64,
    pub cache_hit_rate: f64,
    pub approximate_memory_usage: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Content-addressed response cache.
#[derive(Debug)]
pub struct FingerprintCache {
    state: Mutex<CacheState>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    duplicates_blocked: AtomicU64,
}

impl FingerprintCache {
    pub fn new(config: SharedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            duplicates_blocked: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fingerprint `request` in the current time window.
    pub fn fingerprint(&self, request: &RequestDescriptor) -> Fingerprint {
        let bucket_ms = self.config.load().deduplication.time_bucket_secs.saturating_mul(1000);
        Fingerprint::compute(request, self.clock.epoch_millis(), bucket_ms)
    }

    /// True when `request` targets an excluded endpoint.
    pub fn is_excluded(&self, request: &RequestDescriptor) -> bool {
        request.is_excluded(&self.config.load().deduplication.exclude_endpoints)
    }

    /// Check whether `request` can be answered from the cache.
    pub fn should_serve_from_cache(&self, request: &RequestDescriptor) -> CacheLookup {
        if self.is_excluded(request) {
            return CacheLookup::Excluded;
        }

        let fingerprint = self.fingerprint(request);
        match self.lookup(&fingerprint) {
            Some(response) => CacheLookup::Hit(response),
            None => CacheLookup::Miss(fingerprint),
        }
    }

    /// Look up a fingerprint, counting the hit or miss.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<UpstreamResponse> {
        let now = self.clock.now();
        let mut state = self.lock();

        let live = match state.entries.get_mut(fingerprint) {
            Some(entry) if entry.is_live(now) => {
                entry.hits += 1;
                Some(entry.response.clone())
            }
            Some(_) => {
                state.remove(fingerprint);
                None
            }
            None => None,
        };
        drop(state);

        match live {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.duplicates_blocked.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(true);
                tracing::debug!(fingerprint = %fingerprint.short(), "Serving duplicate request from cache");
                Some(response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(false);
                None
            }
        }
    }

    /// Live entry for `fingerprint`, without counting a lookup.
    pub fn peek(&self, fingerprint: &Fingerprint) -> Option<UpstreamResponse> {
        let now = self.clock.now();
        self.lock()
            .entries
            .get(fingerprint)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.response.clone())
    }

    /// Store a response for `request`, fingerprinted in the current window.
    pub fn store(&self, request: &RequestDescriptor, response: &UpstreamResponse) {
        if self.is_excluded(request) {
            return;
        }
        let fingerprint = self.fingerprint(request);
        self.insert(fingerprint, response);
    }

    /// Store a copy of `response` under `fingerprint`, replacing any prior entry.
    pub fn insert(&self, fingerprint: Fingerprint, response: &UpstreamResponse) {
        let (ttl, max_size) = {
            let config = self.config.load();
            (config.deduplication.ttl(), config.deduplication.max_cache_size.max(1))
        };
        let now = self.clock.now();
        let response = response.clone();
        let size = response.approximate_size() + fingerprint.as_str().len();

        let mut state = self.lock();
        if state.remove(&fingerprint).is_none() {
            while state.entries.len() >= max_size {
                match state.evict_oldest() {
                    Some(evicted) => {
                        tracing::debug!(fingerprint = %evicted.short(), "Evicted oldest cache entry")
                    }
                    None => break,
                }
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.push_back((fingerprint.clone(), seq));
        state.entries.insert(
            fingerprint,
            CacheEntry {
                response,
                created_at: now,
                ttl,
                hits: 0,
                seq,
                size,
            },
        );
        state.memory += size;
        state.compact_order();

        metrics::record_cache_size(state.entries.len());
    }

    /// Count a request answered by joining an in-flight identical request.
    pub fn record_coalesced(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.duplicates_blocked.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(true);
    }

    /// Turn the miss counted for a request into a hit.
    ///
    /// Used when the response landed in the cache between the lookup and
    /// the caller claiming the in-flight slot.
    pub fn record_late_hit(&self) {
        let _ = self
            .misses
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.duplicates_blocked.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(true);
    }

    /// Remove every entry whose TTL has elapsed. Returns the number removed.
    pub fn invalidate_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();

        let expired: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(fp, _)| fp.clone())
            .collect();
        for fingerprint in &expired {
            state.remove(fingerprint);
        }
        state.compact_order();
        metrics::record_cache_size(state.entries.len());

        expired.len()
    }

    /// Drop all entries and duplicate counters.
    pub fn clear(&self) {
        *self.lock() = CacheState::default();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.duplicates_blocked.store(0, Ordering::Relaxed);
        metrics::record_cache_size(0);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Times the entry for `fingerprint` was served as a duplicate.
    pub fn duplicate_count(&self, fingerprint: &Fingerprint) -> Option<u64> {
        self.lock().entries.get(fingerprint).map(|e| e.hits)
    }

    pub fn stats(&self) -> CacheStats {
        let (cached, memory) = {
            let state = self.lock();
            (state.entries.len(), state.memory)
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            cached_request_count: cached,
            duplicates_blocked_count: self.duplicates_blocked.load(Ordering::Relaxed),
            cache_hit_rate: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
            approximate_memory_usage: memory,
            hits,
            misses,
        }
    }
}
