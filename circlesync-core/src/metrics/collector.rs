//! Metrics collector implementation

use super::record_counter;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-session counters mirrored into the `metrics` facade
#[derive(Debug, Default)]
pub struct MetricsCollector {
    cache_hits: AtomicU64,
    fetches_started: AtomicU64,
    fetches_joined: AtomicU64,
    fetches_failed: AtomicU64,
    fetches_discarded: AtomicU64,
    transforms_applied: AtomicU64,
    transforms_cleared: AtomicU64,
    transforms_expired: AtomicU64,
    mutations_committed: AtomicU64,
    mutations_rolled_back: AtomicU64,
    mutations_coalesced: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        record_counter("cache.hit", 1);
    }

    pub fn inc_fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
        record_counter("cache.fetch.started", 1);
    }

    pub fn inc_fetch_joined(&self) {
        self.fetches_joined.fetch_add(1, Ordering::Relaxed);
        record_counter("cache.fetch.joined", 1);
    }

    pub fn inc_fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        record_counter("cache.fetch.failed", 1);
    }

    pub fn inc_fetch_discarded(&self) {
        self.fetches_discarded.fetch_add(1, Ordering::Relaxed);
        record_counter("cache.fetch.discarded", 1);
    }

    pub fn inc_transform_applied(&self) {
        self.transforms_applied.fetch_add(1, Ordering::Relaxed);
        record_counter("overlay.applied", 1);
    }

    pub fn add_transforms_cleared(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.transforms_cleared.fetch_add(count, Ordering::Relaxed);
        record_counter("overlay.cleared", count);
    }

    pub fn inc_transform_expired(&self) {
        self.transforms_expired.fetch_add(1, Ordering::Relaxed);
        record_counter("overlay.expired", 1);
    }

    pub fn inc_committed(&self) {
        self.mutations_committed.fetch_add(1, Ordering::Relaxed);
        record_counter("sync.committed", 1);
    }

    pub fn inc_rolled_back(&self) {
        self.mutations_rolled_back.fetch_add(1, Ordering::Relaxed);
        record_counter("sync.rolled_back", 1);
    }

    pub fn inc_coalesced(&self) {
        self.mutations_coalesced.fetch_add(1, Ordering::Relaxed);
        record_counter("sync.coalesced", 1);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_joined: self.fetches_joined.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            fetches_discarded: self.fetches_discarded.load(Ordering::Relaxed),
            transforms_applied: self.transforms_applied.load(Ordering::Relaxed),
            transforms_cleared: self.transforms_cleared.load(Ordering::Relaxed),
            transforms_expired: self.transforms_expired.load(Ordering::Relaxed),
            mutations_committed: self.mutations_committed.load(Ordering::Relaxed),
            mutations_rolled_back: self.mutations_rolled_back.load(Ordering::Relaxed),
            mutations_coalesced: self.mutations_coalesced.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub fetches_started: u64,
    pub fetches_joined: u64,
    pub fetches_failed: u64,
    pub fetches_discarded: u64,
    pub transforms_applied: u64,
    pub transforms_cleared: u64,
    pub transforms_expired: u64,
    pub mutations_committed: u64,
    pub mutations_rolled_back: u64,
    pub mutations_coalesced: u64,
}
