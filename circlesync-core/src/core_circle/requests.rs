use async_trait::async_trait;
use std::sync::Arc;

use super::caches::CircleCaches;
use super::CircleId;
use crate::context::SyncContext;
use crate::core_social::{Person, UserId};
use crate::core_sync::{MutationDriver, MutationPolicy, Staged};
use crate::errors::SyncResult;
use crate::remote::CircleRemote;

/// Owner's answer to a pending join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDecision {
    pub user: UserId,
    pub approve: bool,
}

impl RequestDecision {
    pub fn approve(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            approve: true,
        }
    }

    pub fn deny(user: impl Into<UserId>) -> Self {
        Self {
            user: user.into(),
            approve: false,
        }
    }
}

/// Approve / deny membership requests, keyed by circle id.
///
/// Decisions are not idempotent toggles, so every one runs, in order. The
/// request disappears from the list optimistically; an approval also
/// invalidates the circle because its participant count changed.
pub struct RequestDriver {
    remote: Arc<dyn CircleRemote>,
    caches: CircleCaches,
    context: SyncContext,
}

impl RequestDriver {
    pub(crate) fn new(remote: Arc<dyn CircleRemote>, caches: CircleCaches, context: &SyncContext) -> Self {
        Self {
            remote,
            caches,
            context: context.clone(),
        }
    }
}

fn without_user(requests: &[Person], user: &str) -> Vec<Person> {
    requests
        .iter()
        .filter(|person| person.id != user)
        .cloned()
        .collect()
}

#[async_trait]
impl MutationDriver for RequestDriver {
    type Key = CircleId;
    type Intent = RequestDecision;
    type Snapshot = Vec<Person>;
    type Output = ();

    fn entity(&self) -> &'static str {
        "membership_request"
    }

    fn policy(&self, _decision: &RequestDecision) -> MutationPolicy {
        MutationPolicy::Queue
    }

    async fn snapshot(&self, key: &CircleId) -> SyncResult<Vec<Person>> {
        self.caches.requests.value(key).await
    }

    fn stage(&self, key: &CircleId, decision: &RequestDecision, _snapshot: &Vec<Person>) -> Staged {
        let user = decision.user.clone();
        Staged::new().with(self.caches.requests.apply(
            key,
            move |requests| without_user(requests, &user),
            self.context.optimistic_expiry(),
        ))
    }

    async fn perform(&self, key: &CircleId, decision: &RequestDecision) -> SyncResult<()> {
        if decision.approve {
            self.remote.approve_member(key, &decision.user).await
        } else {
            self.remote.deny_member(key, &decision.user).await
        }
    }

    fn commit(
        &self,
        key: &CircleId,
        decision: &RequestDecision,
        _snapshot: &Vec<Person>,
        _output: &(),
        staged: &Staged,
    ) {
        self.caches.requests.commit_with(
            key,
            |requests| without_user(requests, &decision.user),
            &staged.ids(),
        );
        if decision.approve {
            self.caches.circles.invalidate(key);
        }
    }
}
