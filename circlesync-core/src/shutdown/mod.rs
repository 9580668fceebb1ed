//! Shutdown coordination for session background tasks
//!
//! Long-lived session tasks (the expiry sweeper, the relationship listener)
//! run under a [`ShutdownHandler`] so that `Session::shutdown` can stop them
//! and wait for them to unwind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Broadcasts shutdown to every registered component
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    /// Set before the signal is broadcast; late registrations check it
    signalled: AtomicBool,
    active_tx: watch::Sender<usize>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` bounds how long a graceful shutdown waits for components.
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        let (active_tx, _) = watch::channel(0);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
            signalled: AtomicBool::new(false),
            active_tx,
            grace,
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Number of components currently running under a handler
    pub fn active_components(&self) -> usize {
        *self.active_tx.borrow()
    }

    /// Signal every component and wait (up to the grace period) for them to stop.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                debug!("Shutdown already in progress");
                return;
            }
            *state = ShutdownState::ShuttingDown;
        }

        info!(components = self.active_components(), "Initiating graceful shutdown");
        self.signalled.store(true, Ordering::SeqCst);
        // No receivers just means no component is running.
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);

        let mut active = self.active_tx.subscribe();
        let drained = tokio::time::timeout(self.grace, active.wait_for(|count| *count == 0))
            .await
            .is_ok();
        if !drained {
            warn!(
                remaining = self.active_components(),
                "Components still running after grace period"
            );
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }

    /// Signal every component without waiting.
    pub async fn shutdown_immediately(&self) {
        *self.state.write().await = ShutdownState::Shutdown;
        warn!("Initiating immediate shutdown");
        self.signalled.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(ShutdownSignal::Immediate);
    }

    /// Check if shutdown is in progress
    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    /// Get current state
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    fn enter(&self) {
        self.active_tx.send_modify(|count| *count += 1);
    }

    fn leave(&self) {
        self.active_tx.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Runs one component until it finishes or shutdown is signalled.
///
/// The component counts as active from [`new`](Self::new) until the handler
/// is dropped, so a shutdown issued before the spawned task is first polled
/// still waits for it and still stops it.
pub struct ShutdownHandler {
    coordinator: Arc<ShutdownCoordinator>,
    component_name: String,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    stopped: bool,
}

impl ShutdownHandler {
    pub fn new(coordinator: Arc<ShutdownCoordinator>, component_name: impl Into<String>) -> Self {
        let shutdown_rx = coordinator.subscribe();
        coordinator.enter();
        // Subscribed and counted first: a signal sent after this check is
        // still received, and a shutdown already waiting sees this component.
        let stopped = coordinator.signalled.load(Ordering::SeqCst);
        Self {
            coordinator,
            component_name: component_name.into(),
            shutdown_rx,
            stopped,
        }
    }

    /// Run a component with shutdown support
    pub async fn run<F, Fut>(mut self, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        if self.stopped {
            debug!(component = %self.component_name, "Shutdown already signalled, not starting");
            return;
        }
        debug!(component = %self.component_name, "Component started");

        tokio::select! {
            _ = f() => {
                debug!(component = %self.component_name, "Component completed");
            }
            signal = self.shutdown_rx.recv() => {
                match signal {
                    Ok(signal) => {
                        debug!(component = %self.component_name, ?signal, "Component stopping");
                    }
                    Err(e) => {
                        warn!(component = %self.component_name, error = %e, "Shutdown channel error");
                    }
                }
            }
        }
    }
}

impl Drop for ShutdownHandler {
    fn drop(&mut self) {
        self.coordinator.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_stops_components() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
        let handler = ShutdownHandler::new(coordinator.clone(), "forever");

        let task = tokio::spawn(async move {
            handler.run(|| std::future::pending::<()>()).await;
        });
        while coordinator.active_components() == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown().await;
        task.await.unwrap();
        assert_eq!(coordinator.active_components(), 0);
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(10));
        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_poll_stops_component() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(1)));
        let handler = ShutdownHandler::new(coordinator.clone(), "unpolled");
        assert_eq!(coordinator.active_components(), 1);

        let task = tokio::spawn(handler.run(|| std::future::pending::<()>()));
        coordinator.shutdown().await;
        task.await.unwrap();
        assert_eq!(coordinator.active_components(), 0);
    }

    #[tokio::test]
    async fn test_registration_after_shutdown_never_runs() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_millis(10)));
        coordinator.shutdown().await;

        let handler = ShutdownHandler::new(coordinator.clone(), "late");
        handler.run(|| std::future::pending::<()>()).await;
        assert_eq!(coordinator.active_components(), 0);
    }
}
