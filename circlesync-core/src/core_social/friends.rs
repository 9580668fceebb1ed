use async_trait::async_trait;
use std::sync::Arc;

use super::caches::SocialCaches;
use super::{with_person, without, FriendRelationship, Person, UserId};
use crate::context::SyncContext;
use crate::core_sync::{MutationDriver, MutationPolicy, Staged};
use crate::errors::SyncResult;
use crate::remote::{FriendRequestResult, SocialRemote};

/// Requested end-state of a friendship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendIntent {
    /// Send or accept a friend request
    Add,
    /// Remove a friend or withdraw a request
    Remove,
}

/// Reconciled result of a friend mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendOutcome {
    pub relationship: FriendRelationship,

    /// Resolved user, when the server returned one
    pub person: Option<Person>,
}

impl FriendOutcome {
    fn settled(relationship: FriendRelationship) -> Self {
        Self {
            relationship,
            person: None,
        }
    }
}

/// Friend add / remove, keyed by the id the user acted on (a user id or a
/// phone contact id).
pub struct FriendDriver {
    remote: Arc<dyn SocialRemote>,
    caches: SocialCaches,
    context: SyncContext,
}

impl FriendDriver {
    pub(crate) fn new(remote: Arc<dyn SocialRemote>, caches: SocialCaches, context: &SyncContext) -> Self {
        Self {
            remote,
            caches,
            context: context.clone(),
        }
    }

    fn commit_added(&self, key: &UserId, output: &FriendOutcome, staged: &Staged) {
        let mut ids = self.caches.identities_of(key);
        if let Some(person) = &output.person {
            for identity in person.identities() {
                if !ids.contains(identity) {
                    ids.push(identity.clone());
                }
            }
        }
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        if let Some(person) = &output.person {
            match output.relationship {
                FriendRelationship::Friend => {
                    self.caches
                        .friends
                        .commit_with(&(), |people| with_person(people, person), &[]);
                    self.caches
                        .outgoing
                        .commit_with(&(), |people| without(people, &id_refs), &[]);
                }
                FriendRelationship::OutgoingRequest => {
                    self.caches
                        .outgoing
                        .commit_with(&(), |people| with_person(people, person), &[]);
                }
                _ => {}
            }
        }
        self.caches
            .incoming
            .commit_with(&(), |people| without(people, &id_refs), &[]);

        // Both the requested id and the canonical id settle to the same state.
        let relationship = output.relationship;
        self.caches.commit_relationships(
            |map| {
                for id in &ids {
                    map.set(id, relationship);
                }
            },
            &staged.ids(),
        );
    }

    fn commit_removed(&self, key: &UserId, staged: &Staged) {
        let ids = self.caches.identities_of(key);
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        self.caches.drop_from_friend_lists(&id_refs);
        self.caches.commit_relationships(
            |map| {
                for id in &ids {
                    map.set(id, FriendRelationship::None);
                }
            },
            &staged.ids(),
        );

        self.caches.friends.invalidate(&());
        self.caches.outgoing.invalidate(&());
        self.caches.incoming.invalidate(&());
    }
}

#[async_trait]
impl MutationDriver for FriendDriver {
    type Key = UserId;
    type Intent = FriendIntent;
    type Snapshot = FriendRelationship;
    type Output = FriendOutcome;

    fn entity(&self) -> &'static str {
        "friendship"
    }

    fn policy(&self, _intent: &FriendIntent) -> MutationPolicy {
        MutationPolicy::Toggle
    }

    async fn snapshot(&self, key: &UserId) -> SyncResult<FriendRelationship> {
        Ok(self.caches.relationships.map().await?.get(key))
    }

    fn already_satisfied(
        &self,
        snapshot: &FriendRelationship,
        intent: &FriendIntent,
    ) -> Option<FriendOutcome> {
        let done = match intent {
            FriendIntent::Add => matches!(
                snapshot,
                FriendRelationship::Friend | FriendRelationship::OutgoingRequest
            ),
            FriendIntent::Remove => *snapshot == FriendRelationship::None,
        };
        done.then(|| FriendOutcome::settled(*snapshot))
    }

    fn stage(&self, key: &UserId, _intent: &FriendIntent, _snapshot: &FriendRelationship) -> Staged {
        let id = key.clone();
        let handle = self.caches.relationships.store().apply(
            &(),
            move |map| map.with(&id, FriendRelationship::Updating),
            self.context.optimistic_expiry(),
        );
        Staged::new().with(handle)
    }

    async fn perform(&self, key: &UserId, intent: &FriendIntent) -> SyncResult<FriendOutcome> {
        match intent {
            FriendIntent::Add => {
                let response = self.remote.add_friend(key).await?;
                let relationship = match response.result {
                    FriendRequestResult::Accepted => FriendRelationship::Friend,
                    FriendRequestResult::Requested => FriendRelationship::OutgoingRequest,
                };
                Ok(FriendOutcome {
                    relationship,
                    person: Some(response.user),
                })
            }
            FriendIntent::Remove => {
                self.remote.remove_friend(key).await?;
                Ok(FriendOutcome::settled(FriendRelationship::None))
            }
        }
    }

    fn commit(
        &self,
        key: &UserId,
        intent: &FriendIntent,
        _snapshot: &FriendRelationship,
        output: &FriendOutcome,
        staged: &Staged,
    ) {
        match intent {
            FriendIntent::Add => self.commit_added(key, output, staged),
            FriendIntent::Remove => self.commit_removed(key, staged),
        }
    }
}
