use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::slot::SharedFetch;
use crate::core_stream::Subscription;
use crate::errors::SyncResult;

/// A started or joined fetch. Dropping it does not cancel the fetch.
#[derive(Clone)]
pub struct PendingFetch {
    inner: SharedFetch,
}

impl PendingFetch {
    pub(crate) fn new(inner: SharedFetch) -> Self {
        Self { inner }
    }
}

impl Future for PendingFetch {
    type Output = SyncResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Stream returned by [`CacheStore::get`](super::CacheStore::get).
///
/// Yields the current value (fresh or stale) first, then every later
/// publish. If the read started or joined a fetch that fails, the error is
/// yielded once, to this observation only.
pub struct Observation<V> {
    subscription: Subscription<V>,
    pending: Option<PendingFetch>,
}

impl<V> Observation<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(subscription: Subscription<V>, pending: Option<PendingFetch>) -> Self {
        Self {
            subscription,
            pending,
        }
    }

    /// Next value or fetch error. `None` once the cache entry is gone.
    pub async fn next(&mut self) -> Option<SyncResult<V>> {
        loop {
            let Some(pending) = self.pending.as_mut() else {
                return self.subscription.next().await.map(Ok);
            };

            if let Some(value) = self.subscription.try_next() {
                return Some(Ok(value));
            }

            tokio::select! {
                biased;
                result = pending => {
                    self.pending = None;
                    if let Err(e) = result {
                        return Some(Err(e));
                    }
                }
                value = self.subscription.next() => {
                    return value.map(Ok);
                }
            }
        }
    }

    /// Whether the fetch this read triggered is still outstanding
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop error delivery and keep only the value stream
    pub fn into_subscription(self) -> Subscription<V> {
        self.subscription
    }
}
