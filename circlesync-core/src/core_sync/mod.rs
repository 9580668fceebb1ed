//! Sync coordinator
//!
//! Runs one user-initiated mutation end to end: snapshot, optimistic
//! transform, remote call, then commit or rollback. Mutations are serialized
//! per `(entity, key)`; different keys proceed in parallel.
//!
//! The entity-specific parts (what to snapshot, which transforms to stage,
//! how to reconcile a server result) are supplied by a [`MutationDriver`].

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Shared};
use tracing::error;

use crate::core_cache::CacheKey;
use crate::core_overlay::{TransformHandle, TransformId};
use crate::errors::{SyncError, SyncResult};

mod coordinator;

pub use coordinator::SyncCoordinator;

/// How concurrent requests for the same key combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    /// Idempotent end-state toggles: same end-state joins, a different one
    /// queues behind the in-flight call and replaces older queued ones.
    Toggle,
    /// Non-idempotent operations: every request runs, FIFO.
    Queue,
}

/// Per-key mutation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Nothing has run since the last submit for the key
    Idle,
    Updating,
    /// Last mutation reconciled with the server result
    Committed,
    /// Last mutation failed and its transforms were cleared
    RolledBack,
}

impl MutationPhase {
    pub fn is_updating(&self) -> bool {
        *self == MutationPhase::Updating
    }
}

/// Entity-specific half of a mutation
#[async_trait]
pub trait MutationDriver: Send + Sync + 'static {
    type Key: CacheKey;
    type Intent: Clone + PartialEq + Debug + Send + Sync + 'static;
    type Snapshot: Clone + Debug + Send + Sync + 'static;
    type Output: Clone + Debug + Send + Sync + 'static;

    /// Entity type name, for logs and errors
    fn entity(&self) -> &'static str;

    fn policy(&self, intent: &Self::Intent) -> MutationPolicy;

    /// Current value `V0` before the mutation
    async fn snapshot(&self, key: &Self::Key) -> SyncResult<Self::Snapshot>;

    /// For a queued toggle: the result to report without a remote call when
    /// `snapshot` already shows the intended end-state.
    fn already_satisfied(
        &self,
        _snapshot: &Self::Snapshot,
        _intent: &Self::Intent,
    ) -> Option<Self::Output> {
        None
    }

    /// Push the optimistic transforms
    fn stage(&self, key: &Self::Key, intent: &Self::Intent, snapshot: &Self::Snapshot) -> Staged;

    /// The remote call
    async fn perform(&self, key: &Self::Key, intent: &Self::Intent) -> SyncResult<Self::Output>;

    /// Reconcile the server result into the caches, retiring `staged`
    fn commit(
        &self,
        key: &Self::Key,
        intent: &Self::Intent,
        snapshot: &Self::Snapshot,
        output: &Self::Output,
        staged: &Staged,
    );
}

/// Optimistic transforms pushed for one mutation
#[derive(Debug, Default)]
pub struct Staged {
    handles: Vec<TransformHandle>,
}

impl Staged {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handle: TransformHandle) -> Self {
        self.handles.push(handle);
        self
    }

    pub fn push(&mut self, handle: TransformHandle) {
        self.handles.push(handle);
    }

    pub fn ids(&self) -> Vec<TransformId> {
        self.handles.iter().map(TransformHandle::id).collect()
    }

    pub fn handles(&self) -> &[TransformHandle] {
        &self.handles
    }

    /// Clear whatever a commit left behind, e.g. transforms on a list that
    /// was never loaded and so could not be committed. Returns how many were
    /// still present.
    pub fn settle(&self) -> usize {
        self.handles.iter().filter(|handle| handle.clear()).count()
    }

    /// Clear every staged transform after the remote call failed with `cause`.
    ///
    /// A transform that is already gone although no authoritative base
    /// commit happened since it was applied means the visible value can no
    /// longer be restored to the snapshot; that is reported, not hidden, and
    /// the report carries `cause`.
    pub fn rollback(&self, entity: &str, key: &str, cause: &SyncError) -> SyncResult<()> {
        let mut missing = Vec::new();
        for handle in &self.handles {
            if !handle.clear() && !handle.base_changed() {
                missing.push(handle.id());
            }
        }

        if missing.is_empty() {
            return Ok(());
        }
        error!(
            entity,
            key,
            transforms = ?missing,
            cause = %cause,
            "Rollback found optimistic transforms missing without a commit"
        );
        Err(SyncError::StaleSnapshot {
            entity: entity.to_string(),
            key: key.to_string(),
            detail: format!(
                "transforms {:?} removed before rollback of failed call ({})",
                missing, cause
            ),
        })
    }
}

pub(crate) type SharedResult<O> = Shared<BoxFuture<'static, SyncResult<O>>>;

/// Result of a submitted mutation. Dropping it does not cancel the
/// mutation; the caches are reconciled regardless.
pub struct MutationTicket<O: Clone> {
    inner: SharedResult<O>,
}

impl<O: Clone> MutationTicket<O> {
    pub(crate) fn new(inner: SharedResult<O>) -> Self {
        Self { inner }
    }
}

impl<O: Clone> Future for MutationTicket<O> {
    type Output = SyncResult<O>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}
