use async_trait::async_trait;
use std::sync::Arc;

use super::caches::CircleCaches;
use super::{remove, upsert, Circle, CircleId, MembershipState};
use crate::context::SyncContext;
use crate::core_sync::{MutationDriver, MutationPolicy, Staged};
use crate::errors::SyncResult;
use crate::remote::{CircleRemote, JoinResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipIntent {
    Join,
    Leave,
}

/// Join / leave, keyed by circle id.
///
/// Join optimistically shows `Requested` and leaves the participant count
/// alone; leave shows `Unjoined` and drops the count when the user was an
/// active member. On commit the count comes from the server, or from the
/// snapshot plus the confirmed membership change when the server omits it.
pub struct MembershipDriver {
    remote: Arc<dyn CircleRemote>,
    caches: CircleCaches,
    context: SyncContext,
}

impl MembershipDriver {
    pub(crate) fn new(remote: Arc<dyn CircleRemote>, caches: CircleCaches, context: &SyncContext) -> Self {
        Self {
            remote,
            caches,
            context: context.clone(),
        }
    }
}

/// Participant count after moving from the snapshot membership to `after`
fn reconcile_count(snapshot: &Circle, after: MembershipState) -> u32 {
    let was_active = snapshot.membership == MembershipState::Active;
    let is_active = after == MembershipState::Active;
    match (was_active, is_active) {
        (false, true) => snapshot.participant_count + 1,
        (true, false) => snapshot.participant_count.saturating_sub(1),
        _ => snapshot.participant_count,
    }
}

#[async_trait]
impl MutationDriver for MembershipDriver {
    type Key = CircleId;
    type Intent = MembershipIntent;
    type Snapshot = Circle;
    type Output = JoinResponse;

    fn entity(&self) -> &'static str {
        "membership"
    }

    fn policy(&self, _intent: &MembershipIntent) -> MutationPolicy {
        MutationPolicy::Toggle
    }

    async fn snapshot(&self, key: &CircleId) -> SyncResult<Circle> {
        self.caches.circles.value(key).await
    }

    fn already_satisfied(&self, snapshot: &Circle, intent: &MembershipIntent) -> Option<JoinResponse> {
        let done = match intent {
            MembershipIntent::Join => snapshot.membership.is_joining(),
            MembershipIntent::Leave => !snapshot.membership.is_joining(),
        };
        done.then(|| JoinResponse {
            state: snapshot.membership,
            participant_count: Some(snapshot.participant_count),
        })
    }

    fn stage(&self, key: &CircleId, intent: &MembershipIntent, _snapshot: &Circle) -> Staged {
        let expiry = self.context.optimistic_expiry();
        match intent {
            MembershipIntent::Join => Staged::new().with(self.caches.circles.apply(
                key,
                |circle| Circle {
                    membership: MembershipState::Requested,
                    ..circle.clone()
                },
                expiry,
            )),
            MembershipIntent::Leave => {
                let circle_handle = self.caches.circles.apply(
                    key,
                    |circle| Circle {
                        membership: MembershipState::Unjoined,
                        joined: false,
                        participant_count: if circle.membership == MembershipState::Active {
                            circle.participant_count.saturating_sub(1)
                        } else {
                            circle.participant_count
                        },
                        ..circle.clone()
                    },
                    expiry,
                );
                let mut staged = Staged::new().with(circle_handle);
                if self.caches.joined.current_value(&()).is_some() {
                    let id = key.clone();
                    staged.push(
                        self.caches
                            .joined
                            .apply(&(), move |circles| remove(circles, &id), expiry),
                    );
                }
                staged
            }
        }
    }

    async fn perform(&self, key: &CircleId, intent: &MembershipIntent) -> SyncResult<JoinResponse> {
        match intent {
            MembershipIntent::Join => self.remote.join_circle(key).await,
            MembershipIntent::Leave => {
                self.remote.leave_circle(key).await?;
                Ok(JoinResponse {
                    state: MembershipState::Unjoined,
                    participant_count: None,
                })
            }
        }
    }

    fn commit(
        &self,
        key: &CircleId,
        _intent: &MembershipIntent,
        snapshot: &Circle,
        output: &JoinResponse,
        staged: &Staged,
    ) {
        let state = output.state;
        let participant_count = output
            .participant_count
            .unwrap_or_else(|| reconcile_count(snapshot, state));
        let retiring = staged.ids();

        let mut reconciled = None;
        self.caches.circles.commit_with(
            key,
            |base| {
                let circle = Circle {
                    membership: state,
                    joined: state == MembershipState::Active,
                    participant_count,
                    ..base.clone()
                };
                reconciled = Some(circle.clone());
                circle
            },
            &retiring,
        );

        match (state, reconciled) {
            (MembershipState::Active, Some(circle)) => {
                self.caches
                    .joined
                    .commit_with(&(), |circles| upsert(circles, &circle), &retiring);
            }
            _ => {
                self.caches
                    .joined
                    .commit_with(&(), |circles| remove(circles, key), &retiring);
            }
        }
        self.caches.nearby.invalidate(&());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(state: MembershipState, count: u32) -> Circle {
        Circle::new("c", "Circle", "owner")
            .with_membership(state)
            .with_participants(count)
    }

    #[test]
    fn test_count_follows_confirmed_membership() {
        assert_eq!(reconcile_count(&circle(MembershipState::Unjoined, 4), MembershipState::Active), 5);
        assert_eq!(reconcile_count(&circle(MembershipState::Unjoined, 4), MembershipState::Requested), 4);
        assert_eq!(reconcile_count(&circle(MembershipState::Active, 4), MembershipState::Unjoined), 3);
        assert_eq!(reconcile_count(&circle(MembershipState::Active, 0), MembershipState::Unjoined), 0);
        assert_eq!(reconcile_count(&circle(MembershipState::Active, 4), MembershipState::Active), 4);
    }
}
