//! Swept-list expiry scheduler
//!
//! One background task per session walks a deadline-ordered list instead of
//! arming a timer per transform.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::{TransformHandle, TransformId};
use crate::metrics::MetricsCollector;
use crate::shutdown::{ShutdownCoordinator, ShutdownHandler};
use crate::util::lock;

/// Shared expiry scheduler. Cloning shares the same swept list.
#[derive(Clone)]
pub struct ExpirySweeper {
    inner: Arc<SweeperInner>,
}

struct SweeperInner {
    list: Mutex<SweptList>,
    notify: Notify,
    tick_floor: Duration,
    metrics: Arc<MetricsCollector>,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

#[derive(Default)]
struct SweptList {
    by_deadline: BTreeMap<(Instant, TransformId), TransformHandle>,
    deadlines: HashMap<TransformId, Instant>,
    worker_running: bool,
}

impl ExpirySweeper {
    /// `tick_floor` is the minimum spacing between two sweeps.
    pub fn new(tick_floor: Duration, metrics: Arc<MetricsCollector>) -> Self {
        Self::build(tick_floor, metrics, None)
    }

    /// Like [`new`](Self::new), but the worker stops when `shutdown` fires.
    pub fn with_shutdown(
        tick_floor: Duration,
        metrics: Arc<MetricsCollector>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self::build(tick_floor, metrics, Some(shutdown))
    }

    fn build(
        tick_floor: Duration,
        metrics: Arc<MetricsCollector>,
        shutdown: Option<Arc<ShutdownCoordinator>>,
    ) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                list: Mutex::new(SweptList::default()),
                notify: Notify::new(),
                tick_floor,
                metrics,
                shutdown,
            }),
        }
    }

    /// Schedule `handle` to be cleared after `after`. Rescheduling replaces
    /// the previous deadline.
    pub(crate) fn schedule(&self, after: Duration, handle: TransformHandle) {
        let id = handle.id();
        let deadline = Instant::now() + after;
        let spawn_worker = {
            let mut list = lock(&self.inner.list);
            if let Some(previous) = list.deadlines.insert(id, deadline) {
                list.by_deadline.remove(&(previous, id));
            }
            list.by_deadline.insert((deadline, id), handle);
            let spawn = !list.worker_running;
            list.worker_running = true;
            spawn
        };

        if spawn_worker {
            self.spawn_worker();
        } else {
            self.inner.notify.notify_one();
        }
    }

    /// Drop a pending expiry. No-op if none is scheduled.
    pub(crate) fn cancel(&self, id: TransformId) {
        let mut list = lock(&self.inner.list);
        if let Some(deadline) = list.deadlines.remove(&id) {
            list.by_deadline.remove(&(deadline, id));
        }
    }

    /// Number of expiries still waiting
    pub fn pending(&self) -> usize {
        lock(&self.inner.list).by_deadline.len()
    }

    fn spawn_worker(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime; transform expiry disabled until next schedule");
                lock(&self.inner.list).worker_running = false;
                return;
            }
        };

        let inner = self.inner.clone();
        let handler = inner
            .shutdown
            .clone()
            .map(|coordinator| ShutdownHandler::new(coordinator, "expiry-sweeper"));
        runtime.spawn(async move {
            match handler {
                Some(handler) => handler.run(|| run_worker(inner)).await,
                None => run_worker(inner).await,
            }
        });
    }
}

async fn run_worker(inner: Arc<SweeperInner>) {
    let mut last_sweep: Option<Instant> = None;
    loop {
        let next = lock(&inner.list)
            .by_deadline
            .keys()
            .next()
            .map(|(deadline, _)| *deadline);

        match next {
            None => inner.notify.notified().await,
            Some(deadline) => {
                let wake = match last_sweep {
                    Some(at) => deadline.max(at + inner.tick_floor),
                    None => deadline,
                };
                tokio::select! {
                    _ = sleep_until(wake) => {
                        inner.sweep();
                        last_sweep = Some(Instant::now());
                    }
                    _ = inner.notify.notified() => {}
                }
            }
        }
    }
}

impl SweeperInner {
    fn sweep(&self) {
        let now = Instant::now();
        let due = {
            let mut list = lock(&self.list);
            let mut due = Vec::new();
            while let Some(entry) = list.by_deadline.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                let ((_, id), handle) = entry.remove_entry();
                list.deadlines.remove(&id);
                due.push(handle);
            }
            due
        };

        for handle in due {
            if handle.clear_expired() {
                self.metrics.inc_transform_expired();
                debug!(transform = %handle.describe(), "Transform expired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_overlay::{OverlayHost, Removal};
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeHost {
        active: Mutex<HashSet<TransformId>>,
        removals: Mutex<Vec<(TransformId, Removal)>>,
    }

    impl OverlayHost for FakeHost {
        fn remove_transform(&self, id: TransformId, reason: Removal) -> bool {
            let removed = self.active.lock().unwrap().remove(&id);
            if removed {
                self.removals.lock().unwrap().push((id, reason));
            }
            removed
        }

        fn generation(&self) -> u64 {
            0
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    fn setup() -> (Arc<FakeHost>, ExpirySweeper, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let sweeper = ExpirySweeper::new(Duration::from_millis(50), metrics.clone());
        (Arc::new(FakeHost::default()), sweeper, metrics)
    }

    fn handle(host: &Arc<FakeHost>, sweeper: &ExpirySweeper, id: TransformId) -> TransformHandle {
        host.active.lock().unwrap().insert(id);
        TransformHandle::new(id, 0, host.clone(), sweeper.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_clears_exactly_once() {
        let (host, sweeper, metrics) = setup();
        let h = handle(&host, &sweeper, 1).expire(Duration::from_secs(1));
        assert_eq!(sweeper.pending(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(sweeper.pending(), 0);
        assert!(!h.clear());
        assert_eq!(*host.removals.lock().unwrap(), vec![(1, Removal::Expired)]);
        assert_eq!(metrics.snapshot().transforms_expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_clear_cancels_expiry() {
        let (host, sweeper, metrics) = setup();
        let h = handle(&host, &sweeper, 7).expire(Duration::from_secs(1));

        assert!(h.clear());
        assert_eq!(sweeper.pending(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*host.removals.lock().unwrap(), vec![(7, Removal::Cleared)]);
        assert_eq!(metrics.snapshot().transforms_expired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_deadlines_share_one_worker() {
        let (host, sweeper, metrics) = setup();
        let handles: Vec<_> = (1..=5)
            .map(|id| handle(&host, &sweeper, id).expire(Duration::from_millis(100 * id)))
            .collect();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(metrics.snapshot().transforms_expired, 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().transforms_expired, 5);
        assert!(handles.iter().all(|h| !h.clear()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_deadline() {
        let (host, sweeper, metrics) = setup();
        let h = handle(&host, &sweeper, 3).expire(Duration::from_millis(100));
        let h = h.expire(Duration::from_secs(5));
        assert_eq!(sweeper.pending(), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(metrics.snapshot().transforms_expired, 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(metrics.snapshot().transforms_expired, 1);
        assert!(!h.clear());
    }
}
