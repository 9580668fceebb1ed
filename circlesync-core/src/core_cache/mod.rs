//! Cache store
//!
//! Per-key TTL cache of remotely fetched values with single-flight fetches,
//! an optimistic transform overlay, explicit authoritative commits and an
//! optional durable backing store. Each key is served through a multicast
//! [`ValueStream`](crate::core_stream::ValueStream) carrying the visible value
//! (base plus overlay).
//!
//! All state transitions for a key happen under that key's lock and publish
//! before the lock is released, so observers never see a torn value and per
//! key ordering of apply / fetch commit / clear is total.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core_store::DurableStore;
use crate::errors::SyncResult;

mod observation;
mod slot;
mod store;

pub use observation::{Observation, PendingFetch};
pub use store::CacheStore;

/// Bounds for cache keys
pub trait CacheKey: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + Sync + 'static {}

/// Bounds for cached values
pub trait CacheValue: Clone + std::fmt::Debug + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + std::fmt::Debug + Send + Sync + 'static {}

/// Source of authoritative values for a cache
#[async_trait]
pub trait Fetcher<K, V>: Send + Sync + 'static {
    async fn fetch(&self, key: &K) -> SyncResult<V>;
}

/// Adapter turning an async closure into a [`Fetcher`]
pub struct FnFetcher<F>(F);

/// Build a fetcher from `Fn(K) -> impl Future<Output = SyncResult<V>>`
pub fn fetch_fn<F>(f: F) -> FnFetcher<F> {
    FnFetcher(f)
}

#[async_trait]
impl<K, V, F, Fut> Fetcher<K, V> for FnFetcher<F>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SyncResult<V>> + Send + 'static,
{
    async fn fetch(&self, key: &K) -> SyncResult<V> {
        (self.0)(key.clone()).await
    }
}

/// Change notifications emitted by a cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    /// A fetch or explicit commit replaced the base value
    Committed(K),
    /// The entry was marked stale
    Invalidated(K),
    /// Every entry was dropped
    Reset,
}

/// Construction options for a [`CacheStore`]
pub struct CacheOptions<K, V> {
    pub(crate) name: String,
    pub(crate) ttl: Duration,
    pub(crate) durable: Option<Arc<dyn DurableStore<K, V>>>,
}

impl<K, V> CacheOptions<K, V> {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            durable: None,
        }
    }

    /// Seed first reads from, and write commits back to, `store`
    pub fn with_durable(mut self, store: Arc<dyn DurableStore<K, V>>) -> Self {
        self.durable = Some(store);
        self
    }
}
