//! Transform overlay
//!
//! Optimistic local edits are kept as an ordered stack of transforms layered
//! on top of a cached base value. The visible value is the base with every
//! active transform applied in ascending sequence order. Transforms leave the
//! stack by explicit [`TransformHandle::clear`], by the expiry sweeper, or by
//! being superseded when a fetch that started after them commits a new base.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

mod sweeper;

pub use sweeper::ExpirySweeper;

/// Monotonic sequence number shared by transforms and fetches.
pub type Sequence = u64;

/// Identifier of a transform (its sequence number)
pub type TransformId = Sequence;

/// The mutation a transform applies to a value
pub type TransformFn<V> = Arc<dyn Fn(&V) -> V + Send + Sync>;

/// Lifetime of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Stays until cleared or superseded
    Permanent,
    /// Cleared automatically after the duration
    After(Duration),
}

/// One optimistic edit
pub struct Transform<V> {
    id: TransformId,
    apply: TransformFn<V>,
    expiry: Expiry,
}

impl<V> Transform<V> {
    pub fn new(id: TransformId, apply: TransformFn<V>, expiry: Expiry) -> Self {
        Self { id, apply, expiry }
    }

    pub fn id(&self) -> TransformId {
        self.id
    }

    pub fn expiry(&self) -> Expiry {
        self.expiry
    }
}

impl<V> fmt::Debug for Transform<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("id", &self.id)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Ordered stack of transforms for a single key
#[derive(Debug)]
pub struct TransformStack<V> {
    transforms: Vec<Transform<V>>,
}

impl<V> Default for TransformStack<V> {
    fn default() -> Self {
        Self {
            transforms: Vec::new(),
        }
    }
}

impl<V> TransformStack<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping ascending id order.
    pub fn push(&mut self, transform: Transform<V>) {
        let pos = self
            .transforms
            .partition_point(|existing| existing.id < transform.id);
        self.transforms.insert(pos, transform);
    }

    /// Remove one transform. Returns `false` if it was not present.
    pub fn remove(&mut self, id: TransformId) -> bool {
        match self.transforms.binary_search_by_key(&id, |t| t.id) {
            Ok(pos) => {
                self.transforms.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove every transform older than `sequence`, returning their ids.
    pub fn supersede_before(&mut self, sequence: Sequence) -> Vec<TransformId> {
        let split = self.transforms.partition_point(|t| t.id < sequence);
        self.transforms.drain(..split).map(|t| t.id).collect()
    }

    /// Remove everything, returning the removed ids.
    pub fn clear(&mut self) -> Vec<TransformId> {
        self.transforms.drain(..).map(|t| t.id).collect()
    }

    pub fn contains(&self, id: TransformId) -> bool {
        self.transforms.binary_search_by_key(&id, |t| t.id).is_ok()
    }

    pub fn ids(&self) -> Vec<TransformId> {
        self.transforms.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl<V: Clone> TransformStack<V> {
    /// Base value with every transform applied in order
    pub fn visible(&self, base: &V) -> V {
        self.transforms
            .iter()
            .fold(base.clone(), |value, transform| (transform.apply)(&value))
    }
}

/// Why a transform left its stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Cleared,
    Expired,
}

/// Owner of a transform stack that a handle can reach back into.
pub(crate) trait OverlayHost: Send + Sync {
    /// Remove the transform and republish. Returns `false` if already gone.
    fn remove_transform(&self, id: TransformId, reason: Removal) -> bool;

    /// Counter bumped by every base commit and reset.
    fn generation(&self) -> u64;

    /// Human readable owner, for logs
    fn describe(&self) -> String;
}

/// Handle to an applied transform.
///
/// Dropping the handle does not clear the transform.
#[derive(Clone)]
pub struct TransformHandle {
    id: TransformId,
    generation: u64,
    host: Arc<dyn OverlayHost>,
    sweeper: ExpirySweeper,
}

impl TransformHandle {
    pub(crate) fn new(
        id: TransformId,
        generation: u64,
        host: Arc<dyn OverlayHost>,
        sweeper: ExpirySweeper,
    ) -> Self {
        Self {
            id,
            generation,
            host,
            sweeper,
        }
    }

    pub fn id(&self) -> TransformId {
        self.id
    }

    /// Remove this transform. A second call is a no-op returning `false`.
    pub fn clear(&self) -> bool {
        self.sweeper.cancel(self.id);
        self.host.remove_transform(self.id, Removal::Cleared)
    }

    /// Schedule [`clear`](Self::clear) after `after`.
    pub fn expire(self, after: Duration) -> Self {
        self.sweeper.schedule(after, self.clone());
        self
    }

    /// Whether an authoritative base commit happened since this was applied
    pub fn base_changed(&self) -> bool {
        self.host.generation() != self.generation
    }

    pub(crate) fn clear_expired(&self) -> bool {
        self.host.remove_transform(self.id, Removal::Expired)
    }

    pub(crate) fn describe(&self) -> String {
        format!("{}#{}", self.host.describe(), self.id)
    }
}

impl fmt::Debug for TransformHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .finish()
    }
}
