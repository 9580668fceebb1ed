use std::sync::Arc;

use tracing::{debug, info};

use super::caches::CircleCaches;
use super::{
    Circle, CircleId, MembershipDriver, MembershipIntent, MuteDriver, RequestDecision, RequestDriver,
};
use crate::config::CacheTtls;
use crate::context::SyncContext;
use crate::core_cache::Observation;
use crate::core_social::Person;
use crate::core_store::DurableStore;
use crate::core_stream::Subscription;
use crate::core_sync::SyncCoordinator;
use crate::errors::SyncResult;
use crate::remote::CircleRemote;

/// Circle membership, mute and owner request handling for the session user.
///
/// Membership and mute run on separate coordinators so a mute toggle never
/// coalesces with a join on the same circle.
#[derive(Clone)]
pub struct CircleService {
    caches: CircleCaches,
    memberships: SyncCoordinator<MembershipDriver>,
    mutes: SyncCoordinator<MuteDriver>,
    requests: SyncCoordinator<RequestDriver>,
}

impl CircleService {
    pub fn new(
        remote: Arc<dyn CircleRemote>,
        durable: Option<Arc<dyn DurableStore<CircleId, Circle>>>,
        ttls: &CacheTtls,
        context: &SyncContext,
    ) -> Self {
        let caches = CircleCaches::new(&remote, durable, ttls, context);
        let memberships = SyncCoordinator::new(
            MembershipDriver::new(remote.clone(), caches.clone(), context),
            context,
        );
        let mutes = SyncCoordinator::new(MuteDriver::new(remote.clone(), caches.clone(), context), context);
        let requests = SyncCoordinator::new(RequestDriver::new(remote, caches.clone(), context), context);
        info!("Circle service ready");

        Self {
            caches,
            memberships,
            mutes,
            requests,
        }
    }

    /// Stream of the circle, fetching it when stale
    pub fn circle(&self, id: &str) -> Observation<Circle> {
        self.caches.circles.get(&id.to_string())
    }

    pub fn observe_circle(&self, id: &str) -> Subscription<Circle> {
        self.caches.circles.observe(&id.to_string())
    }

    pub async fn get_circle(&self, id: &str) -> SyncResult<Circle> {
        self.caches.circles.value(&id.to_string()).await
    }

    /// Visible value without touching the network
    pub fn current_circle(&self, id: &str) -> Option<Circle> {
        self.caches.circles.current_value(&id.to_string())
    }

    pub async fn nearby(&self) -> SyncResult<Vec<Circle>> {
        self.caches.nearby.value(&()).await
    }

    pub fn observe_nearby(&self) -> Subscription<Vec<Circle>> {
        self.caches.nearby.observe(&())
    }

    pub async fn joined(&self) -> SyncResult<Vec<Circle>> {
        self.caches.joined.value(&()).await
    }

    pub fn observe_joined(&self) -> Subscription<Vec<Circle>> {
        self.caches.joined.observe(&())
    }

    /// Pending join requests for a circle the user owns
    pub async fn membership_requests(&self, id: &str) -> SyncResult<Vec<Person>> {
        self.caches.requests.value(&id.to_string()).await
    }

    pub fn observe_membership_requests(&self, id: &str) -> Subscription<Vec<Person>> {
        self.caches.requests.observe(&id.to_string())
    }

    /// Join a circle. Open circles activate right away; gated ones leave
    /// the membership `Requested` until the owner decides.
    pub async fn join(&self, id: &str) -> SyncResult<Circle> {
        self.change_membership(id, MembershipIntent::Join).await
    }

    pub async fn leave(&self, id: &str) -> SyncResult<Circle> {
        self.change_membership(id, MembershipIntent::Leave).await
    }

    /// Leave when joined or joining, join otherwise
    pub async fn toggle_membership(&self, id: &str) -> SyncResult<Circle> {
        let circle = match self.current_circle(id) {
            Some(circle) => circle,
            None => self.get_circle(id).await?,
        };
        let intent = if circle.membership.is_joining() {
            MembershipIntent::Leave
        } else {
            MembershipIntent::Join
        };
        debug!(circle = id, from = ?circle.membership, ?intent, "Toggling membership");
        self.change_membership(id, intent).await
    }

    pub async fn set_muted(&self, id: &str, muted: bool) -> SyncResult<bool> {
        self.mutes.mutate(id.to_string(), muted).await
    }

    /// Flip `muted` from the visible value; returns the new flag
    pub async fn toggle_mute(&self, id: &str) -> SyncResult<bool> {
        let muted = match self.current_circle(id) {
            Some(circle) => circle.muted,
            None => self.get_circle(id).await?.muted,
        };
        self.set_muted(id, !muted).await
    }

    pub async fn approve(&self, id: &str, user: &str) -> SyncResult<()> {
        self.requests
            .mutate(id.to_string(), RequestDecision::approve(user))
            .await
    }

    pub async fn deny(&self, id: &str, user: &str) -> SyncResult<()> {
        self.requests
            .mutate(id.to_string(), RequestDecision::deny(user))
            .await
    }

    pub async fn refresh_circle(&self, id: &str) -> SyncResult<()> {
        self.caches.circles.refresh(&id.to_string()).await
    }

    /// Refetch both circle lists
    pub async fn refresh_lists(&self) -> SyncResult<()> {
        tokio::try_join!(self.caches.nearby.refresh(&()), self.caches.joined.refresh(&()))?;
        Ok(())
    }

    /// Whether a membership change for the circle is in flight
    pub fn busy(&self, id: &str) -> bool {
        self.memberships.phase(&id.to_string()).is_updating()
    }

    /// Drop every cached circle, list and transform
    pub fn reset(&self) {
        self.caches.reset();
    }

    /// Like [`reset`](Self::reset), and also erase the durable store so
    /// nothing is seeded back on the next read
    pub fn purge(&self) {
        self.caches.purge();
    }

    async fn change_membership(&self, id: &str, intent: MembershipIntent) -> SyncResult<Circle> {
        let key = id.to_string();
        self.memberships.mutate(key.clone(), intent).await?;
        match self.caches.circles.current_value(&key) {
            Some(circle) => Ok(circle),
            None => self.caches.circles.value(&key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_circle::{MembershipState, Preapproval};
    use crate::remote::SimulatedBackend;
    use crate::test_utils::within_second;
    use std::time::Duration;

    fn service(backend: &SimulatedBackend) -> CircleService {
        let context = SyncContext::default();
        CircleService::new(Arc::new(backend.clone()), None, &CacheTtls::default(), &context)
    }

    #[tokio::test(start_paused = true)]
    async fn test_mute_flips_optimistically_and_commits() {
        let backend = SimulatedBackend::default();
        backend.add_circle(Circle::new("c1", "Coffee", "owner").with_membership(MembershipState::Active));
        backend.set_latency(Duration::from_millis(200));
        let circles = service(&backend);
        circles.get_circle("c1").await.unwrap();

        let pending = tokio::spawn({
            let circles = circles.clone();
            async move { circles.toggle_mute("c1").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(circles.current_circle("c1").unwrap().muted);

        assert!(within_second("mute commit", pending).await.unwrap().unwrap());
        assert!(circles.current_circle("c1").unwrap().muted);
        assert!(backend.circle_state("c1").unwrap().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_mute_rolls_back() {
        let backend = SimulatedBackend::default();
        backend.add_circle(Circle::new("c1", "Coffee", "owner"));
        let circles = service(&backend);
        circles.get_circle("c1").await.unwrap();

        backend.reject_next("muting disabled");
        let err = circles.set_muted("c1", true).await.unwrap_err();

        assert!(!err.is_retryable());
        assert!(!circles.current_circle("c1").unwrap().muted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_approve_removes_request_and_refreshes_count() {
        let backend = SimulatedBackend::default();
        backend.add_circle(
            Circle::new("c1", "Book club", "me")
                .with_preapproval(Preapproval::InviteOnly)
                .with_participants(3),
        );
        backend.add_member_request("c1", Person::new("u1", "Ana"));
        backend.add_member_request("c1", Person::new("u2", "Ben"));
        let circles = service(&backend);
        assert_eq!(circles.membership_requests("c1").await.unwrap().len(), 2);
        circles.get_circle("c1").await.unwrap();

        circles.approve("c1", "u1").await.unwrap();
        circles.deny("c1", "u2").await.unwrap();

        assert!(circles.membership_requests("c1").await.unwrap().is_empty());
        assert_eq!(circles.get_circle("c1").await.unwrap().participant_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_joined_list_follows_membership() {
        let backend = SimulatedBackend::default();
        backend.add_circle(Circle::new("c1", "Coffee", "owner").with_participants(2));
        let circles = service(&backend);
        assert!(circles.joined().await.unwrap().is_empty());

        let joined = circles.join("c1").await.unwrap();
        assert_eq!(joined.membership, MembershipState::Active);
        assert_eq!(circles.joined().await.unwrap().len(), 1);

        let left = circles.leave("c1").await.unwrap();
        assert_eq!(left.membership, MembershipState::Unjoined);
        assert_eq!(left.participant_count, 2);
        assert!(circles.joined().await.unwrap().is_empty());
    }
}
