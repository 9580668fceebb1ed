//! Session wiring
//!
//! A [`Session`] owns everything that lives for one signed-in user: the
//! engine context (sequence, expiry sweeper, metrics), the shutdown
//! coordinator for its background components, and the circle and social
//! services. Creation order is fixed: shutdown coordinator, context, then
//! services. `logout` drops every cached value and transform and erases the
//! durable store; `shutdown` keeps durable state for the next start and
//! stops the background components within the configured grace period.

use std::sync::Arc;

use tracing::info;

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::core_circle::{Circle, CircleId, CircleService};
use crate::core_social::SocialService;
use crate::core_store::DurableStore;
use crate::metrics::MetricsSnapshot;
use crate::remote::{CircleRemote, SimulatedBackend, SocialRemote};
use crate::shutdown::ShutdownCoordinator;

pub struct Session {
    config: SyncConfig,
    context: SyncContext,
    shutdown: Arc<ShutdownCoordinator>,
    circles: CircleService,
    social: SocialService,
}

impl Session {
    pub fn new(
        config: SyncConfig,
        circle_remote: Arc<dyn CircleRemote>,
        social_remote: Arc<dyn SocialRemote>,
        durable_circles: Option<Arc<dyn DurableStore<CircleId, Circle>>>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new(config.session.shutdown_grace));
        let context = SyncContext::with_shutdown(&config.overlay, &config.remote, shutdown.clone());
        let circles = CircleService::new(circle_remote, durable_circles, &config.cache, &context);
        let social = SocialService::new(social_remote, &config.cache, &context);
        info!(
            call_timeout = ?config.remote.call_timeout,
            "Session started"
        );

        Self {
            config,
            context,
            shutdown,
            circles,
            social,
        }
    }

    /// Session against one backend serving both circles and friends
    pub fn with_backend(config: SyncConfig, backend: SimulatedBackend) -> Self {
        let backend = Arc::new(backend);
        Self::new(config, backend.clone(), backend, None)
    }

    pub fn circles(&self) -> &CircleService {
        &self.circles
    }

    pub fn social(&self) -> &SocialService {
        &self.social
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.context.metrics().snapshot()
    }

    /// Forget every cached value and optimistic transform, and erase the
    /// durable store so the next read cannot seed the previous user's state.
    ///
    /// Mutations still in flight finish against empty caches: their
    /// commits find nothing loaded and are dropped.
    pub fn logout(&self) {
        self.circles.purge();
        self.social.reset();
        info!("Session caches and durable state cleared");
    }

    /// Drop in-memory state and stop background components, waiting at most
    /// the shutdown grace. Durable entries survive for the next session.
    pub async fn shutdown(&self) {
        self.circles.reset();
        self.social.reset();
        self.shutdown.shutdown().await;
        info!("Session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_circle::MembershipState;
    use crate::core_social::Person;
    use crate::core_store::MemoryStore;
    use std::time::Duration;

    fn backend() -> SimulatedBackend {
        let backend = SimulatedBackend::default();
        backend.add_circle(Circle::new("c1", "Coffee", "owner").with_participants(1));
        backend.add_friend_directly(Person::new("u1", "Ana"));
        backend
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_clears_every_cache() {
        let session = Session::with_backend(SyncConfig::default(), backend());
        session.circles().get_circle("c1").await.unwrap();
        assert_eq!(session.social().friends().await.unwrap().len(), 1);

        session.logout();

        assert!(session.circles().current_circle("c1").is_none());
        assert!(session.social().observe_friends().current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_follow_activity() {
        let session = Session::with_backend(SyncConfig::default(), backend());
        let joined = session.circles().join("c1").await.unwrap();
        assert_eq!(joined.membership, MembershipState::Active);

        let metrics = session.metrics();
        assert_eq!(metrics.mutations_committed, 1);
        assert!(metrics.fetches_started >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_completes() {
        let session = Session::with_backend(SyncConfig::default(), backend());
        session.social().relationships().await.unwrap();
        session.shutdown().await;
        assert!(session.circles().current_circle("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_erases_durable_membership() {
        let backend = backend();
        let durable: Arc<MemoryStore<CircleId, Circle>> = Arc::new(MemoryStore::new());
        let store: Arc<dyn DurableStore<CircleId, Circle>> = durable.clone();
        let session = Session::new(
            SyncConfig::default(),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Some(store),
        );
        let joined = session.circles().join("c1").await.unwrap();
        assert_eq!(joined.membership, MembershipState::Active);
        assert!(!durable.is_empty());

        session.logout();
        assert!(durable.is_empty());

        backend.set_offline(true);
        let first = session.circles().circle("c1").next().await;
        assert!(matches!(first, Some(Err(_))), "got {:?}", first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_keeps_durable_state() {
        let backend = backend();
        let durable: Arc<MemoryStore<CircleId, Circle>> = Arc::new(MemoryStore::new());
        let store: Arc<dyn DurableStore<CircleId, Circle>> = durable.clone();
        let session = Session::new(
            SyncConfig::default(),
            Arc::new(backend.clone()),
            Arc::new(backend),
            Some(store),
        );
        session.circles().join("c1").await.unwrap();
        session.shutdown().await;

        let stored = durable.read(&"c1".to_string()).unwrap().unwrap();
        assert_eq!(stored.membership, MembershipState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_right_after_new_stops_every_component() {
        let session = Session::with_backend(SyncConfig::default(), backend());
        session.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.shutdown.active_components(), 0);
    }
}
