use async_trait::async_trait;
use std::sync::Arc;

use super::caches::CircleCaches;
use super::{upsert, Circle, CircleId};
use crate::context::SyncContext;
use crate::core_sync::{MutationDriver, MutationPolicy, Staged};
use crate::errors::SyncResult;
use crate::remote::CircleRemote;

/// Mute / unmute notifications, keyed by circle id. The intent is the
/// requested `muted` flag.
pub struct MuteDriver {
    remote: Arc<dyn CircleRemote>,
    caches: CircleCaches,
    context: SyncContext,
}

impl MuteDriver {
    pub(crate) fn new(remote: Arc<dyn CircleRemote>, caches: CircleCaches, context: &SyncContext) -> Self {
        Self {
            remote,
            caches,
            context: context.clone(),
        }
    }
}

#[async_trait]
impl MutationDriver for MuteDriver {
    type Key = CircleId;
    type Intent = bool;
    type Snapshot = Circle;
    type Output = bool;

    fn entity(&self) -> &'static str {
        "circle_mute"
    }

    fn policy(&self, _muted: &bool) -> MutationPolicy {
        MutationPolicy::Toggle
    }

    async fn snapshot(&self, key: &CircleId) -> SyncResult<Circle> {
        self.caches.circles.value(key).await
    }

    fn already_satisfied(&self, snapshot: &Circle, muted: &bool) -> Option<bool> {
        (snapshot.muted == *muted).then_some(*muted)
    }

    fn stage(&self, key: &CircleId, muted: &bool, _snapshot: &Circle) -> Staged {
        let muted = *muted;
        Staged::new().with(self.caches.circles.apply(
            key,
            move |circle| Circle {
                muted,
                ..circle.clone()
            },
            self.context.optimistic_expiry(),
        ))
    }

    async fn perform(&self, key: &CircleId, muted: &bool) -> SyncResult<bool> {
        self.remote.set_muted(key, *muted).await?;
        Ok(*muted)
    }

    fn commit(&self, key: &CircleId, muted: &bool, _snapshot: &Circle, _output: &bool, staged: &Staged) {
        let muted = *muted;
        let mut committed = None;
        self.caches.circles.commit_with(
            key,
            |circle| {
                let next = Circle {
                    muted,
                    ..circle.clone()
                };
                committed = Some(next.clone());
                next
            },
            &staged.ids(),
        );

        let listed = self
            .caches
            .joined
            .current_value(&())
            .is_some_and(|circles| circles.iter().any(|circle| &circle.id == key));
        if let (true, Some(circle)) = (listed, committed) {
            self.caches
                .joined
                .commit_with(&(), |circles| upsert(circles, &circle), &[]);
        }
    }
}
