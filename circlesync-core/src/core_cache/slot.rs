use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CacheEvent, CacheKey, CacheValue};
use crate::context::SyncContext;
use crate::core_overlay::{
    Expiry, OverlayHost, Removal, Sequence, Transform, TransformFn, TransformHandle, TransformId,
    TransformStack,
};
use crate::core_store::DurableStore;
use crate::core_stream::ValueStream;
use crate::errors::SyncResult;
use crate::util::lock;

pub(crate) type SharedFetch = Shared<BoxFuture<'static, SyncResult<()>>>;

/// State shared by every slot of one store
pub(crate) struct StoreShared<K, V> {
    pub name: String,
    pub ttl: Duration,
    pub durable: Option<Arc<dyn DurableStore<K, V>>>,
    pub context: SyncContext,
    pub events: broadcast::Sender<CacheEvent<K>>,
}

impl<K: CacheKey, V> StoreShared<K, V> {
    fn emit(&self, event: CacheEvent<K>) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

pub(crate) struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
    pub ttl: Duration,
    pub stale: bool,
}

impl<V> CacheEntry<V> {
    fn fresh(value: V, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            ttl,
            stale: false,
        }
    }

    fn seeded(value: V, ttl: Duration) -> Self {
        Self {
            stale: true,
            ..Self::fresh(value, ttl)
        }
    }

    pub fn is_fresh(&self) -> bool {
        !self.stale && self.fetched_at.elapsed() < self.ttl
    }
}

pub(crate) struct InFlight {
    pub start_seq: Sequence,
    pub shared: SharedFetch,
}

pub(crate) struct SlotState<V> {
    pub entry: Option<CacheEntry<V>>,
    pub overlay: TransformStack<V>,
    pub in_flight: Option<InFlight>,
    /// Sequence at which the current base was committed
    pub base_seq: Sequence,
    /// Bumped on every base commit and reset
    pub generation: u64,
}

impl<V: Clone> SlotState<V> {
    pub fn visible(&self) -> Option<V> {
        self.entry
            .as_ref()
            .map(|entry| self.overlay.visible(&entry.value))
    }
}

/// One key of a cache store
pub(crate) struct Slot<K, V> {
    key: K,
    shared: Arc<StoreShared<K, V>>,
    state: Mutex<SlotState<V>>,
    stream: ValueStream<V>,
}

impl<K: CacheKey, V: CacheValue> Slot<K, V> {
    /// New slot, seeded from the durable store when it has a value
    pub fn new(key: K, shared: Arc<StoreShared<K, V>>) -> Self {
        let seeded = shared.durable.as_ref().and_then(|durable| {
            durable.read(&key).unwrap_or_else(|e| {
                warn!(cache = %shared.name, ?key, error = %e, "Durable read failed");
                None
            })
        });

        let stream = match &seeded {
            Some(value) => ValueStream::with_value(value.clone()),
            None => ValueStream::new(),
        };
        if seeded.is_some() {
            debug!(cache = %shared.name, ?key, "Seeded entry from durable store");
        }

        let entry = seeded.map(|value| CacheEntry::seeded(value, shared.ttl));
        Self {
            key,
            state: Mutex::new(SlotState {
                entry,
                overlay: TransformStack::new(),
                in_flight: None,
                base_seq: 0,
                generation: 0,
            }),
            stream,
            shared,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn stream(&self) -> &ValueStream<V> {
        &self.stream
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, SlotState<V>> {
        lock(&self.state)
    }

    fn metrics(&self) -> &crate::metrics::MetricsCollector {
        self.shared.context.metrics()
    }

    fn publish(&self, state: &SlotState<V>) {
        if let Some(value) = state.visible() {
            self.stream.publish(value);
        }
    }

    fn persist(&self, value: &V) {
        if let Some(durable) = &self.shared.durable {
            if let Err(e) = durable.write(&self.key, value) {
                warn!(cache = %self.shared.name, key = ?self.key, error = %e, "Durable write failed");
            }
        }
    }

    fn cancel_expiries(&self, ids: &[TransformId]) {
        for id in ids {
            self.shared.context.sweeper().cancel(*id);
        }
    }

    /// Fetch completion, run on the fetch task.
    pub fn complete_fetch(&self, start_seq: Sequence, result: SyncResult<V>) -> SyncResult<()> {
        let mut state = self.state();
        let ours = matches!(&state.in_flight, Some(f) if f.start_seq == start_seq);
        if !ours {
            // dropped by reset() or superseded by a restarted fetch
            self.metrics().inc_fetch_discarded();
            debug!(cache = %self.shared.name, key = ?self.key, start_seq, "Dropping detached fetch result");
            return result.map(|_| ());
        }
        state.in_flight = None;

        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.metrics().inc_fetch_failed();
                warn!(
                    cache = %self.shared.name,
                    key = ?self.key,
                    error = %e,
                    has_stale = state.entry.is_some(),
                    "Fetch failed"
                );
                return Err(e);
            }
        };

        if state.base_seq > start_seq {
            self.metrics().inc_fetch_discarded();
            debug!(
                cache = %self.shared.name,
                key = ?self.key,
                start_seq,
                base_seq = state.base_seq,
                "Discarding fetch superseded by a newer commit"
            );
            return Ok(());
        }

        state.entry = Some(CacheEntry::fresh(value.clone(), self.shared.ttl));
        state.base_seq = start_seq;
        state.generation += 1;
        let superseded = state.overlay.supersede_before(start_seq);
        self.cancel_expiries(&superseded);
        self.metrics().add_transforms_cleared(superseded.len() as u64);
        self.publish(&state);
        self.persist(&value);
        drop(state);

        debug!(
            cache = %self.shared.name,
            key = ?self.key,
            superseded = superseded.len(),
            "Fetch committed"
        );
        self.shared.emit(CacheEvent::Committed(self.key.clone()));
        Ok(())
    }

    /// Replace the base with `update(current base)` and retire transforms,
    /// publishing once. Returns `false` (retiring only) when `update` yields
    /// nothing.
    pub fn commit_base<F>(&self, update: F, retiring: &[TransformId]) -> bool
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        let mut state = self.state();
        let next = update(state.entry.as_ref().map(|entry| &entry.value));

        let retired: Vec<TransformId> = retiring
            .iter()
            .copied()
            .filter(|id| state.overlay.remove(*id))
            .collect();
        self.cancel_expiries(retiring);
        self.metrics().add_transforms_cleared(retired.len() as u64);

        let Some(value) = next else {
            if !retired.is_empty() {
                self.publish(&state);
            }
            return false;
        };

        state.entry = Some(CacheEntry::fresh(value.clone(), self.shared.ttl));
        state.base_seq = self.shared.context.next_sequence();
        state.generation += 1;
        self.publish(&state);
        self.persist(&value);
        drop(state);

        info!(
            cache = %self.shared.name,
            key = ?self.key,
            retired = retired.len(),
            "Committed authoritative value"
        );
        self.shared.emit(CacheEvent::Committed(self.key.clone()));
        true
    }

    pub fn invalidate(&self) {
        let mut state = self.state();
        if let Some(entry) = state.entry.as_mut() {
            entry.stale = true;
        }
        drop(state);
        debug!(cache = %self.shared.name, key = ?self.key, "Invalidated");
        self.shared.emit(CacheEvent::Invalidated(self.key.clone()));
    }

    /// Push a transform and publish. Returns its id and the base generation.
    pub fn push_transform(&self, apply: TransformFn<V>, expiry: Expiry) -> (TransformId, u64) {
        let mut state = self.state();
        let id = self.shared.context.next_sequence();
        state.overlay.push(Transform::new(id, apply, expiry));
        self.metrics().inc_transform_applied();
        self.publish(&state);
        (id, state.generation)
    }

    pub fn handle(self: &Arc<Self>, id: TransformId, generation: u64) -> TransformHandle {
        TransformHandle::new(
            id,
            generation,
            self.clone(),
            self.shared.context.sweeper().clone(),
        )
    }

    /// Drop everything for logout
    pub fn reset(&self) {
        let mut state = self.state();
        let dropped = state.overlay.clear();
        self.cancel_expiries(&dropped);
        state.entry = None;
        state.in_flight = None;
        state.generation += 1;
        self.stream.clear();
    }
}

impl<K: CacheKey, V: CacheValue> OverlayHost for Slot<K, V> {
    fn remove_transform(&self, id: TransformId, reason: Removal) -> bool {
        let mut state = self.state();
        if !state.overlay.remove(id) {
            return false;
        }
        if reason == Removal::Cleared {
            self.metrics().add_transforms_cleared(1);
        }
        self.publish(&state);
        true
    }

    fn generation(&self) -> u64 {
        self.state().generation
    }

    fn describe(&self) -> String {
        format!("{}[{:?}]", self.shared.name, self.key)
    }
}
