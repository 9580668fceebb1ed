use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::observation::{Observation, PendingFetch};
use super::slot::{InFlight, SharedFetch, Slot, SlotState, StoreShared};
use super::{CacheEvent, CacheKey, CacheOptions, CacheValue, Fetcher};
use crate::context::SyncContext;
use crate::core_overlay::{Expiry, TransformHandle, TransformId};
use crate::core_stream::Subscription;
use crate::errors::{SyncError, SyncResult};
use crate::util::lock;

const EVENT_CAPACITY: usize = 64;

/// Keyed cache of remotely owned values.
///
/// Cloning is cheap and shares the same entries. Methods that may start a
/// fetch spawn it on the current tokio runtime, so they must be called from
/// within one. A started fetch always runs to completion and commits, even
/// if every observer has gone away.
pub struct CacheStore<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

struct StoreInner<K, V> {
    shared: Arc<StoreShared<K, V>>,
    fetcher: Arc<dyn Fetcher<K, V>>,
    slots: Mutex<HashMap<K, Arc<Slot<K, V>>>>,
}

impl<K, V> Clone for CacheStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: CacheKey, V: CacheValue> CacheStore<K, V> {
    pub fn new<F>(options: CacheOptions<K, V>, fetcher: F, context: &SyncContext) -> Self
    where
        F: Fetcher<K, V>,
    {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                shared: Arc::new(StoreShared {
                    name: options.name,
                    ttl: options.ttl,
                    durable: options.durable,
                    context: context.clone(),
                    events,
                }),
                fetcher: Arc::new(fetcher),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.name
    }

    /// Observe `key`.
    ///
    /// A fresh entry is emitted immediately. Otherwise the last stale value
    /// (if any) is emitted first, then the result of a started or joined
    /// fetch. A fetch error is delivered to this observation only.
    pub fn get(&self, key: &K) -> Observation<V> {
        let slot = self.slot(key);
        let pending = {
            let mut state = slot.state();
            if state.entry.as_ref().is_some_and(|entry| entry.is_fresh()) {
                self.inner.shared.context.metrics().inc_cache_hit();
                debug!(cache = %self.name(), ?key, "Cache hit");
                None
            } else {
                Some(self.start_or_join(&slot, &mut state))
            }
        };
        Observation::new(slot.stream().subscribe(), pending.map(PendingFetch::new))
    }

    /// Like [`get`](Self::get), but errors are only logged.
    pub fn observe(&self, key: &K) -> Subscription<V> {
        self.get(key).into_subscription()
    }

    /// Best fresh visible value.
    ///
    /// Fetches when the entry is missing or stale. If that fetch fails the
    /// stale value is returned when there is one.
    pub async fn value(&self, key: &K) -> SyncResult<V> {
        let slot = self.slot(key);
        let pending = {
            let mut state = slot.state();
            if state.entry.as_ref().is_some_and(|entry| entry.is_fresh()) {
                self.inner.shared.context.metrics().inc_cache_hit();
                if let Some(value) = state.visible() {
                    return Ok(value);
                }
            }
            self.start_or_join(&slot, &mut state)
        };

        let result = pending.await;
        let visible = slot.state().visible();
        match (result, visible) {
            (_, Some(value)) => Ok(value),
            (Err(e), None) => Err(e),
            (Ok(()), None) => Err(SyncError::Internal(format!(
                "{}: no value after fetch for {:?}",
                self.name(),
                key
            ))),
        }
    }

    /// Visible value right now, without fetching
    pub fn current_value(&self, key: &K) -> Option<V> {
        self.existing_slot(key)
            .and_then(|slot| slot.state().visible())
    }

    /// Whether `key` has a fresh entry
    pub fn is_fresh(&self, key: &K) -> bool {
        self.existing_slot(key)
            .is_some_and(|slot| slot.state().entry.as_ref().is_some_and(|e| e.is_fresh()))
    }

    /// Whether a fetch for `key` is outstanding
    pub fn is_fetching(&self, key: &K) -> bool {
        self.existing_slot(key)
            .is_some_and(|slot| slot.state().in_flight.is_some())
    }

    /// Mark `key` stale without fetching
    pub fn invalidate(&self, key: &K) {
        if let Some(slot) = self.existing_slot(key) {
            slot.invalidate();
        }
    }

    /// Mark every entry stale
    pub fn invalidate_all(&self) {
        for slot in self.all_slots() {
            slot.invalidate();
        }
    }

    /// Start (or join) a fetch regardless of freshness. Awaiting the result
    /// is optional.
    pub fn refresh(&self, key: &K) -> PendingFetch {
        let slot = self.slot(key);
        let mut state = slot.state();
        PendingFetch::new(self.start_or_join(&slot, &mut state))
    }

    /// Refresh `key` only if it has been loaded before
    pub fn refresh_if_present(&self, key: &K) -> Option<PendingFetch> {
        let slot = self.existing_slot(key)?;
        let mut state = slot.state();
        state.entry.as_ref()?;
        Some(PendingFetch::new(self.start_or_join(&slot, &mut state)))
    }

    /// Like [`refresh_if_present`](Self::refresh_if_present), but an
    /// outstanding fetch is superseded instead of joined, so the result
    /// reflects inputs that changed after that fetch started. The superseded
    /// fetch still completes for its callers but does not commit.
    pub fn restart_if_present(&self, key: &K) -> Option<PendingFetch> {
        let slot = self.existing_slot(key)?;
        let mut state = slot.state();
        state.entry.as_ref()?;
        if state.in_flight.take().is_some() {
            debug!(cache = %self.name(), ?key, "Superseding in-flight fetch");
        }
        Some(PendingFetch::new(self.start_or_join(&slot, &mut state)))
    }

    /// Authoritative write: replace the base, retire `retiring` and publish once.
    pub fn commit(&self, key: &K, value: V, retiring: &[TransformId]) {
        self.slot(key).commit_base(|_| Some(value), retiring);
    }

    /// Authoritative write derived from the current base. Does nothing to the
    /// base (but still retires) when no base has been loaded.
    pub fn commit_with<F>(&self, key: &K, update: F, retiring: &[TransformId]) -> bool
    where
        F: FnOnce(&V) -> V,
    {
        match self.existing_slot(key) {
            Some(slot) => slot.commit_base(|base| base.map(update), retiring),
            None => false,
        }
    }

    /// Fill `key` with `value` only when it has never been loaded.
    ///
    /// Used to prime entries from list fetches without overwriting state a
    /// commit or a newer fetch already established.
    pub fn seed(&self, key: &K, value: V) -> bool {
        self.slot(key)
            .commit_base(|base| base.is_none().then_some(value), &[])
    }

    /// Layer an optimistic transform over `key` and publish immediately.
    pub fn apply<F>(&self, key: &K, transform: F, expiry: Expiry) -> TransformHandle
    where
        F: Fn(&V) -> V + Send + Sync + 'static,
    {
        let slot = self.slot(key);
        let (id, generation) = slot.push_transform(Arc::new(transform), expiry);
        debug!(cache = %self.name(), ?key, transform = id, "Applied transform");
        let handle = slot.handle(id, generation);
        match expiry {
            Expiry::After(after) => handle.expire(after),
            Expiry::Permanent => handle,
        }
    }

    /// Drop every entry, transform and pending fetch.
    pub fn reset(&self) {
        let slots: Vec<_> = lock(&self.inner.slots).drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            slot.reset();
        }
        debug!(cache = %self.name(), entries = slots.len(), "Cache reset");
        let _ = self.inner.shared.events.send(CacheEvent::Reset);
    }

    /// [`reset`](Self::reset), then erase the attached durable store so no
    /// entry is seeded back from it.
    pub fn purge(&self) {
        self.reset();
        if let Some(durable) = &self.inner.shared.durable {
            match durable.clear() {
                Ok(()) => debug!(cache = %self.name(), "Durable entries erased"),
                Err(e) => warn!(cache = %self.name(), error = %e, "Durable clear failed"),
            }
        }
    }

    /// Subscribe to commit / invalidate / reset notifications
    pub fn events(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.inner.shared.events.subscribe()
    }

    fn slot(&self, key: &K) -> Arc<Slot<K, V>> {
        lock(&self.inner.slots)
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::new(key.clone(), self.inner.shared.clone())))
            .clone()
    }

    fn existing_slot(&self, key: &K) -> Option<Arc<Slot<K, V>>> {
        lock(&self.inner.slots).get(key).cloned()
    }

    fn all_slots(&self) -> Vec<Arc<Slot<K, V>>> {
        lock(&self.inner.slots).values().cloned().collect()
    }

    /// Join the outstanding fetch, or spawn a new one. Called with the slot locked.
    fn start_or_join(&self, slot: &Arc<Slot<K, V>>, state: &mut SlotState<V>) -> SharedFetch {
        let metrics = self.inner.shared.context.metrics();
        if let Some(in_flight) = &state.in_flight {
            metrics.inc_fetch_joined();
            debug!(cache = %self.name(), key = ?slot.key(), "Joined in-flight fetch");
            return in_flight.shared.clone();
        }

        let context = &self.inner.shared.context;
        let start_seq = context.next_sequence();
        let timeout = context.call_timeout();
        let fetcher = self.inner.fetcher.clone();
        let task_slot = slot.clone();

        let task = tokio::spawn(async move {
            let key = task_slot.key().clone();
            let result = match tokio::time::timeout(timeout, fetcher.fetch(&key)).await {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            };
            task_slot.complete_fetch(start_seq, result)
        });

        let shared = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::from(e)),
            }
        }
        .boxed()
        .shared();

        metrics.inc_fetch_started();
        debug!(cache = %self.name(), key = ?slot.key(), start_seq, "Fetch started");
        state.in_flight = Some(InFlight {
            start_seq,
            shared: shared.clone(),
        });
        shared
    }
}
