use async_trait::async_trait;
use std::sync::Arc;

use super::caches::SocialCaches;
use super::{with_person, without, FriendRelationship, Person, UserId};
use crate::context::SyncContext;
use crate::core_sync::{MutationDriver, MutationPolicy, Staged};
use crate::errors::SyncResult;
use crate::remote::SocialRemote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIntent {
    Block,
    Unblock,
}

impl BlockIntent {
    fn blocked(self) -> bool {
        self == BlockIntent::Block
    }
}

/// Block / unblock, keyed by user id. Output is the blocked state after the
/// mutation.
pub struct BlockDriver {
    remote: Arc<dyn SocialRemote>,
    caches: SocialCaches,
    context: SyncContext,
}

impl BlockDriver {
    pub(crate) fn new(remote: Arc<dyn SocialRemote>, caches: SocialCaches, context: &SyncContext) -> Self {
        Self {
            remote,
            caches,
            context: context.clone(),
        }
    }
}

#[async_trait]
impl MutationDriver for BlockDriver {
    type Key = UserId;
    type Intent = BlockIntent;
    type Snapshot = bool;
    type Output = bool;

    fn entity(&self) -> &'static str {
        "block"
    }

    fn policy(&self, _intent: &BlockIntent) -> MutationPolicy {
        MutationPolicy::Toggle
    }

    async fn snapshot(&self, key: &UserId) -> SyncResult<bool> {
        let blocked = self.caches.blocked.value(&()).await?;
        Ok(blocked.iter().any(|person| person.answers_to(key)))
    }

    fn already_satisfied(&self, snapshot: &bool, intent: &BlockIntent) -> Option<bool> {
        (*snapshot == intent.blocked()).then_some(*snapshot)
    }

    fn stage(&self, key: &UserId, intent: &BlockIntent, _snapshot: &bool) -> Staged {
        let expiry = self.context.optimistic_expiry();
        let handle = match intent {
            BlockIntent::Block => {
                let person = self
                    .caches
                    .person(key)
                    .unwrap_or_else(|| Person::new(key.clone(), key.clone()));
                self.caches
                    .blocked
                    .apply(&(), move |people| with_person(people, &person), expiry)
            }
            BlockIntent::Unblock => {
                let id = key.clone();
                self.caches
                    .blocked
                    .apply(&(), move |people| without(people, &[id.as_str()]), expiry)
            }
        };
        Staged::new().with(handle)
    }

    async fn perform(&self, key: &UserId, intent: &BlockIntent) -> SyncResult<bool> {
        match intent {
            BlockIntent::Block => self.remote.block_user(key).await?,
            BlockIntent::Unblock => self.remote.unblock_user(key).await?,
        }
        Ok(intent.blocked())
    }

    fn commit(
        &self,
        key: &UserId,
        intent: &BlockIntent,
        _snapshot: &bool,
        _output: &bool,
        staged: &Staged,
    ) {
        match intent {
            BlockIntent::Block => {
                let person = self
                    .caches
                    .person(key)
                    .unwrap_or_else(|| Person::new(key.clone(), key.clone()));
                let ids: Vec<String> = person.identities().cloned().collect();
                let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

                self.caches
                    .blocked
                    .commit_with(&(), |people| with_person(people, &person), &staged.ids());
                // A blocked user is no longer a friend or a pending request.
                self.caches.drop_from_friend_lists(&id_refs);
                self.caches.commit_relationships(
                    |map| {
                        for id in &ids {
                            map.set(id, FriendRelationship::None);
                        }
                    },
                    &[],
                );
            }
            BlockIntent::Unblock => {
                self.caches.blocked.commit_with(
                    &(),
                    |people| without(people, &[key.as_str()]),
                    &staged.ids(),
                );
            }
        }
    }
}
