use std::sync::Arc;

use futures::{future, Stream, StreamExt};
use tracing::{debug, info};

use super::caches::SocialCaches;
use super::{
    BlockDriver, BlockIntent, FriendDriver, FriendIntent, FriendOutcome, FriendRelationship, Person,
    RelationshipMap, UserId,
};
use crate::config::CacheTtls;
use crate::context::SyncContext;
use crate::core_stream::Subscription;
use crate::core_sync::SyncCoordinator;
use crate::errors::{SyncError, SyncResult};
use crate::remote::SocialRemote;

/// Result of [`SocialService::toggle_friend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleFriendResult {
    Added(FriendOutcome),
    Removed,
}

/// Friends, requests and blocks for the session user
#[derive(Clone)]
pub struct SocialService {
    caches: SocialCaches,
    friendships: SyncCoordinator<FriendDriver>,
    blocks: SyncCoordinator<BlockDriver>,
}

impl SocialService {
    pub fn new(remote: Arc<dyn SocialRemote>, ttls: &CacheTtls, context: &SyncContext) -> Self {
        let caches = SocialCaches::new(&remote, ttls, context);
        let friendships = SyncCoordinator::new(
            FriendDriver::new(remote.clone(), caches.clone(), context),
            context,
        );
        let blocks = SyncCoordinator::new(BlockDriver::new(remote, caches.clone(), context), context);
        info!("Social service ready");

        Self {
            caches,
            friendships,
            blocks,
        }
    }

    pub async fn friends(&self) -> SyncResult<Vec<Person>> {
        self.caches.friends.value(&()).await
    }

    pub async fn outgoing_requests(&self) -> SyncResult<Vec<Person>> {
        self.caches.outgoing.value(&()).await
    }

    pub async fn incoming_requests(&self) -> SyncResult<Vec<Person>> {
        self.caches.incoming.value(&()).await
    }

    pub async fn blocked_users(&self) -> SyncResult<Vec<Person>> {
        self.caches.blocked.value(&()).await
    }

    pub fn observe_friends(&self) -> Subscription<Vec<Person>> {
        self.caches.friends.observe(&())
    }

    pub fn observe_incoming_requests(&self) -> Subscription<Vec<Person>> {
        self.caches.incoming.observe(&())
    }

    pub fn observe_blocked_users(&self) -> Subscription<Vec<Person>> {
        self.caches.blocked.observe(&())
    }

    pub async fn relationships(&self) -> SyncResult<RelationshipMap> {
        self.caches.relationships.map().await
    }

    pub fn observe_relationships(&self) -> Subscription<RelationshipMap> {
        self.caches.relationships.observe()
    }

    /// Relationship with `user`, fetching the friend lists when needed
    pub async fn relationship(&self, user: &str) -> SyncResult<FriendRelationship> {
        Ok(self.caches.relationships.map().await?.get(user))
    }

    /// Relationship with `user` as it changes, without repeats
    pub fn observe_relationship(&self, user: &str) -> impl Stream<Item = FriendRelationship> {
        let user = user.to_string();
        let mut last = None;
        self.caches
            .relationships
            .observe()
            .into_stream()
            .filter_map(move |map| {
                let relationship = map.get(&user);
                let changed = last != Some(relationship);
                last = Some(relationship);
                future::ready(changed.then_some(relationship))
            })
    }

    /// Send (or accept) a friend request. `target` may be a user id or a
    /// phone contact id; on success both resolve to the same state.
    pub async fn add_friend(&self, target: &str) -> SyncResult<FriendOutcome> {
        self.friendships
            .mutate(target.to_string(), FriendIntent::Add)
            .await
    }

    /// Remove a friend or withdraw a friend request
    pub async fn remove_friend(&self, user: &str) -> SyncResult<()> {
        self.friendships
            .mutate(user.to_string(), FriendIntent::Remove)
            .await
            .map(|_| ())
    }

    /// Add or remove depending on the current relationship.
    ///
    /// `None` and `IncomingRequest` add; `Friend` and `OutgoingRequest`
    /// remove. A relationship that is still `Updating` has no transition.
    pub async fn toggle_friend(&self, user: &str) -> SyncResult<ToggleFriendResult> {
        let current = match self.caches.relationships.current() {
            Some(map) => map.get(user),
            None => self.relationship(user).await?,
        };
        debug!(user, from = ?current, "Toggling friendship");

        match current {
            FriendRelationship::Updating => Err(SyncError::InvalidState(format!(
                "relationship with {} is updating",
                user
            ))),
            FriendRelationship::None | FriendRelationship::IncomingRequest => {
                self.add_friend(user).await.map(ToggleFriendResult::Added)
            }
            FriendRelationship::Friend | FriendRelationship::OutgoingRequest => {
                self.remove_friend(user).await?;
                Ok(ToggleFriendResult::Removed)
            }
        }
    }

    pub async fn block(&self, user: &str) -> SyncResult<()> {
        self.blocks
            .mutate(user.to_string(), BlockIntent::Block)
            .await
            .map(|_| ())
    }

    pub async fn unblock(&self, user: &str) -> SyncResult<()> {
        self.blocks
            .mutate(user.to_string(), BlockIntent::Unblock)
            .await
            .map(|_| ())
    }

    /// Refetch every friend list, then the relationship map
    pub async fn refresh_all(&self) -> SyncResult<()> {
        let caches = &self.caches;
        tokio::try_join!(
            caches.friends.refresh(&()),
            caches.outgoing.refresh(&()),
            caches.incoming.refresh(&()),
            caches.blocked.refresh(&()),
        )?;
        caches.relationships.store().refresh(&()).await
    }

    /// Whether a friendship mutation for `user` is in flight
    pub fn busy(&self, user: &UserId) -> bool {
        self.friendships.phase(user).is_updating()
    }

    /// Drop every cached list and transform
    pub fn reset(&self) {
        self.caches.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::SimulatedBackend;
    use std::time::Duration;

    fn service(backend: &SimulatedBackend) -> SocialService {
        SocialService::new(Arc::new(backend.clone()), &CacheTtls::default(), &SyncContext::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_contact_request_merges_identities() {
        let backend = SimulatedBackend::default();
        backend.add_contact("phone:555", Person::new("u9", "Dana"));
        backend.add_incoming_request(Person::new("u9", "Dana"));
        let social = service(&backend);
        assert_eq!(
            social.relationship("u9").await.unwrap(),
            FriendRelationship::IncomingRequest
        );

        let outcome = social.add_friend("phone:555").await.unwrap();

        assert_eq!(outcome.relationship, FriendRelationship::Friend);
        assert_eq!(social.relationship("phone:555").await.unwrap(), FriendRelationship::Friend);
        assert_eq!(social.relationship("u9").await.unwrap(), FriendRelationship::Friend);
        assert!(social.incoming_requests().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_adds_then_withdraws_request() {
        let backend = SimulatedBackend::default();
        backend.add_person(Person::new("u1", "Ana"));
        let social = service(&backend);

        let added = social.toggle_friend("u1").await.unwrap();
        assert!(matches!(
            added,
            ToggleFriendResult::Added(FriendOutcome {
                relationship: FriendRelationship::OutgoingRequest,
                ..
            })
        ));
        assert_eq!(social.outgoing_requests().await.unwrap().len(), 1);

        assert_eq!(social.toggle_friend("u1").await.unwrap(), ToggleFriendResult::Removed);
        assert_eq!(social.relationship("u1").await.unwrap(), FriendRelationship::None);
        assert!(social.outgoing_requests().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_while_updating_is_invalid() {
        let backend = SimulatedBackend::default();
        backend.add_person(Person::new("u1", "Ana"));
        let social = service(&backend);
        social.relationships().await.unwrap();
        backend.set_latency(Duration::from_millis(200));

        let pending = tokio::spawn({
            let social = social.clone();
            async move { social.add_friend("u1").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(social.busy(&"u1".to_string()));

        let err = social.toggle_friend("u1").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
        pending.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_drops_friendship() {
        let backend = SimulatedBackend::default();
        backend.add_friend_directly(Person::new("u1", "Ana"));
        let social = service(&backend);
        assert_eq!(social.relationship("u1").await.unwrap(), FriendRelationship::Friend);

        social.block("u1").await.unwrap();

        assert_eq!(social.relationship("u1").await.unwrap(), FriendRelationship::None);
        assert!(social.friends().await.unwrap().is_empty());
        assert_eq!(social.blocked_users().await.unwrap().len(), 1);

        social.unblock("u1").await.unwrap();
        assert!(social.blocked_users().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_add_restores_relationship() {
        let backend = SimulatedBackend::default();
        backend.add_incoming_request(Person::new("u1", "Ana"));
        let social = service(&backend);
        social.relationships().await.unwrap();
        backend.set_offline(true);

        let err = social.add_friend("u1").await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(
            social.caches.relationships.current().map(|map| map.get("u1")),
            Some(FriendRelationship::IncomingRequest)
        );
    }
}
