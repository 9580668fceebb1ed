//! Metrics for cache and mutation observability
//!
//! Every event is reported twice: to the global `metrics` facade (for
//! whatever recorder the host installs) and to a per-session
//! [`MetricsCollector`] whose snapshot is cheap to inspect in tests and
//! diagnostics.

use ::metrics::{counter, describe_counter};

mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Cache metrics
    describe_counter!("cache.hit", "Reads served from a fresh cache entry");
    describe_counter!("cache.fetch.started", "Fetches issued to a remote or derivation source");
    describe_counter!("cache.fetch.joined", "Reads that attached to an in-flight fetch");
    describe_counter!("cache.fetch.failed", "Fetches that completed with an error");
    describe_counter!("cache.fetch.discarded", "Fetch results dropped because a newer commit landed first");

    // Overlay metrics
    describe_counter!("overlay.applied", "Optimistic transforms pushed onto an overlay");
    describe_counter!("overlay.cleared", "Transforms removed explicitly or by supersession");
    describe_counter!("overlay.expired", "Transforms removed by the expiry sweeper");

    // Mutation metrics
    describe_counter!("sync.committed", "Mutations reconciled with a server result");
    describe_counter!("sync.rolled_back", "Mutations rolled back after a failure");
    describe_counter!("sync.coalesced", "Mutation requests merged into an existing ticket");
}

/// Record a counter metric
pub fn record_counter(name: &'static str, value: u64) {
    counter!(name).increment(value);
}
