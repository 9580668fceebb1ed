//! Session-wide engine context shared by every cache and coordinator

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::{OverlayConfig, RemoteConfig};
use crate::core_overlay::{Expiry, ExpirySweeper, Sequence};
use crate::metrics::MetricsCollector;
use crate::shutdown::{ShutdownCoordinator, ShutdownHandler};

/// Sequence counter, expiry sweeper and metrics for one session
#[derive(Clone)]
pub struct SyncContext {
    sequencer: Arc<AtomicU64>,
    sweeper: ExpirySweeper,
    metrics: Arc<MetricsCollector>,
    shutdown: Option<Arc<ShutdownCoordinator>>,
    settle_expiry: Duration,
    call_timeout: Duration,
}

impl SyncContext {
    pub fn new(overlay: &OverlayConfig, remote: &RemoteConfig) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let sweeper = ExpirySweeper::new(overlay.sweep_tick_floor, metrics.clone());
        Self::assemble(overlay, remote, sweeper, metrics, None)
    }

    /// Context whose sweeper and background components stop on `shutdown`
    pub fn with_shutdown(
        overlay: &OverlayConfig,
        remote: &RemoteConfig,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let sweeper =
            ExpirySweeper::with_shutdown(overlay.sweep_tick_floor, metrics.clone(), shutdown.clone());
        Self::assemble(overlay, remote, sweeper, metrics, Some(shutdown))
    }

    fn assemble(
        overlay: &OverlayConfig,
        remote: &RemoteConfig,
        sweeper: ExpirySweeper,
        metrics: Arc<MetricsCollector>,
        shutdown: Option<Arc<ShutdownCoordinator>>,
    ) -> Self {
        Self {
            sequencer: Arc::new(AtomicU64::new(0)),
            sweeper,
            metrics,
            shutdown,
            settle_expiry: overlay.settle_expiry,
            call_timeout: remote.call_timeout,
        }
    }

    /// Next value of the monotonic sequence (starts at 1)
    pub fn next_sequence(&self) -> Sequence {
        self.sequencer.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Expiry for optimistic transforms: the remote timeout plus the
    /// settle grace, so a transform orphaned by a lost task still goes away.
    pub fn optimistic_expiry(&self) -> Expiry {
        Expiry::After(self.call_timeout + self.settle_expiry)
    }

    /// Spawn a long-running background component.
    ///
    /// With a shutdown coordinator the component is stopped on shutdown;
    /// without one it runs until `component` returns.
    pub fn spawn_component<F>(&self, name: &'static str, component: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(component = name, "Spawning background component");
        match self.shutdown.clone() {
            Some(coordinator) => {
                // Registered before spawning so an early shutdown still counts it.
                let handler = ShutdownHandler::new(coordinator, name);
                tokio::spawn(handler.run(|| component));
            }
            None => {
                tokio::spawn(component);
            }
        }
    }

    /// Bound on every remote call
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Default for SyncContext {
    fn default() -> Self {
        Self::new(&OverlayConfig::default(), &RemoteConfig::default())
    }
}
