use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::{MutationDriver, MutationPhase, MutationPolicy, MutationTicket, SharedResult};
use crate::context::SyncContext;
use crate::errors::{SyncError, SyncResult};
use crate::util::lock;

/// Serializes mutations per key and coalesces toggles.
pub struct SyncCoordinator<D: MutationDriver> {
    inner: Arc<Inner<D>>,
}

impl<D: MutationDriver> Clone for SyncCoordinator<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<D: MutationDriver> {
    driver: Arc<D>,
    context: SyncContext,
    lanes: Mutex<HashMap<D::Key, Lane<D::Intent, D::Output>>>,
    /// How the last mutation of a key without scheduled work ended.
    /// Locked after `lanes`.
    outcomes: Mutex<HashMap<D::Key, MutationPhase>>,
}

/// Pending work for one key
struct Lane<I, O: Clone> {
    phase: MutationPhase,
    /// Toggle currently running (or next to run)
    in_flight: Option<ToggleTicket<I, O>>,
    /// Toggle waiting behind `in_flight`; its intent may still be replaced
    queued: Option<ToggleTicket<I, O>>,
    /// Completion of the most recently scheduled ticket
    tail: Option<Shared<BoxFuture<'static, ()>>>,
    scheduled: usize,
}

impl<I, O: Clone> Default for Lane<I, O> {
    fn default() -> Self {
        Self {
            phase: MutationPhase::Idle,
            in_flight: None,
            queued: None,
            tail: None,
            scheduled: 0,
        }
    }
}

struct ToggleTicket<I, O: Clone> {
    intent: Arc<Mutex<I>>,
    result: SharedResult<O>,
}

impl<I, O: Clone> Clone for ToggleTicket<I, O> {
    fn clone(&self) -> Self {
        Self {
            intent: self.intent.clone(),
            result: self.result.clone(),
        }
    }
}

impl<I, O: Clone> ToggleTicket<I, O> {
    fn is(&self, intent: &Arc<Mutex<I>>) -> bool {
        Arc::ptr_eq(&self.intent, intent)
    }
}

impl<D: MutationDriver> SyncCoordinator<D> {
    pub fn new(driver: D, context: &SyncContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver: Arc::new(driver),
                context: context.clone(),
                lanes: Mutex::new(HashMap::new()),
                outcomes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    /// Submit and await a mutation
    pub async fn mutate(&self, key: D::Key, intent: D::Intent) -> SyncResult<D::Output> {
        self.submit(key, intent).await
    }

    /// Schedule a mutation. It runs even if the ticket is dropped.
    pub fn submit(&self, key: D::Key, intent: D::Intent) -> MutationTicket<D::Output> {
        let policy = self.inner.driver.policy(&intent);
        let entity = self.inner.driver.entity();
        let metrics = self.inner.context.metrics();

        let mut lanes = lock(&self.inner.lanes);
        let lane = lanes.entry(key.clone()).or_default();

        if policy == MutationPolicy::Queue {
            let cell = Arc::new(Mutex::new(intent));
            let result = self.schedule(lane, key, cell, false);
            return MutationTicket::new(result);
        }

        let Some(current) = lane.in_flight.clone() else {
            let cell = Arc::new(Mutex::new(intent));
            let result = self.schedule(lane, key, cell.clone(), false);
            lane.in_flight = Some(ToggleTicket {
                intent: cell,
                result: result.clone(),
            });
            return MutationTicket::new(result);
        };

        // The newest end-state always wins over an older queued one.
        if let Some(queued) = &lane.queued {
            let mut queued_intent = lock(&queued.intent);
            if *queued_intent != intent {
                debug!(entity, ?key, from = ?*queued_intent, to = ?intent, "Replaced queued toggle");
                *queued_intent = intent;
            }
            metrics.inc_coalesced();
            return MutationTicket::new(queued.result.clone());
        }

        if *lock(&current.intent) == intent {
            metrics.inc_coalesced();
            debug!(entity, ?key, ?intent, "Joined in-flight toggle");
            return MutationTicket::new(current.result);
        }

        debug!(entity, ?key, ?intent, "Queued toggle behind in-flight mutation");
        let cell = Arc::new(Mutex::new(intent));
        let result = self.schedule(lane, key, cell.clone(), true);
        lane.queued = Some(ToggleTicket {
            intent: cell,
            result: result.clone(),
        });
        MutationTicket::new(result)
    }

    /// Current phase for `key`.
    ///
    /// The outcome of the last mutation (`Committed` or `RolledBack`) is
    /// reported until the next one is submitted for the key.
    pub fn phase(&self, key: &D::Key) -> MutationPhase {
        let lanes = lock(&self.inner.lanes);
        if let Some(lane) = lanes.get(key) {
            return lane.phase;
        }
        lock(&self.inner.outcomes)
            .get(key)
            .copied()
            .unwrap_or(MutationPhase::Idle)
    }

    /// Number of keys with scheduled work
    pub fn busy_keys(&self) -> usize {
        lock(&self.inner.lanes).len()
    }

    /// Chain a ticket after the lane's tail. Called with the lanes locked.
    fn schedule(
        &self,
        lane: &mut Lane<D::Intent, D::Output>,
        key: D::Key,
        intent: Arc<Mutex<D::Intent>>,
        queued: bool,
    ) -> SharedResult<D::Output> {
        let previous = lane.tail.take();
        lane.scheduled += 1;
        lock(&self.inner.outcomes).remove(&key);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            inner.run(key, intent, queued).await
        });

        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SyncError::from(e)),
            }
        }
        .boxed()
        .shared();

        lane.tail = Some(result.clone().map(|_| ()).boxed().shared());
        result
    }
}

impl<D: MutationDriver> Inner<D> {
    async fn run(
        &self,
        key: D::Key,
        cell: Arc<Mutex<D::Intent>>,
        queued: bool,
    ) -> SyncResult<D::Output> {
        let intent = {
            let mut lanes = lock(&self.lanes);
            let lane = lanes.entry(key.clone()).or_default();
            if lane.queued.as_ref().is_some_and(|t| t.is(&cell)) {
                lane.in_flight = lane.queued.take();
            }
            lane.phase = MutationPhase::Updating;
            lock(&cell).clone()
        };

        let result = self.execute(&key, &intent, queued).await;

        let mut lanes = lock(&self.lanes);
        if let Some(lane) = lanes.get_mut(&key) {
            if lane.in_flight.as_ref().is_some_and(|t| t.is(&cell)) {
                lane.in_flight = lane.queued.take();
            }
            let outcome = if result.is_ok() {
                MutationPhase::Committed
            } else {
                MutationPhase::RolledBack
            };
            debug!(entity = self.driver.entity(), ?key, phase = ?outcome, "Mutation settled");
            lane.phase = MutationPhase::Idle;
            lane.scheduled = lane.scheduled.saturating_sub(1);
            if lane.scheduled == 0 {
                lanes.remove(&key);
                lock(&self.outcomes).insert(key.clone(), outcome);
            }
        }
        result
    }

    async fn execute(
        &self,
        key: &D::Key,
        intent: &D::Intent,
        queued: bool,
    ) -> SyncResult<D::Output> {
        let driver = &self.driver;
        let entity = driver.entity();
        let metrics = self.context.metrics();

        let snapshot = driver.snapshot(key).await?;

        if queued {
            if let Some(output) = driver.already_satisfied(&snapshot, intent) {
                metrics.inc_coalesced();
                debug!(entity, ?key, ?intent, "Queued toggle already satisfied");
                return Ok(output);
            }
        }

        let staged = driver.stage(key, intent, &snapshot);
        let outcome = match tokio::time::timeout(
            self.context.call_timeout(),
            driver.perform(key, intent),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(elapsed) => Err(elapsed.into()),
        };

        match outcome {
            Ok(output) => {
                driver.commit(key, intent, &snapshot, &output, &staged);
                let leftover = staged.settle();
                if leftover > 0 {
                    debug!(entity, ?key, leftover, "Cleared transforms the commit did not retire");
                }
                metrics.inc_committed();
                info!(entity, ?key, ?intent, ?output, "Mutation committed");
                Ok(output)
            }
            Err(e) => {
                metrics.inc_rolled_back();
                warn!(entity, ?key, ?intent, error = %e, "Mutation failed, rolling back");
                staged.rollback(entity, &format!("{:?}", key), &e)?;
                Err(e)
            }
        }
    }
}
