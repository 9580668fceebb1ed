//! Circles
//!
//! Per-circle membership state for the session user, the nearby and joined
//! circle lists, and pending membership requests for circles the user owns.
//! Join / leave, mute and request decisions are optimistic mutations run
//! through a [`SyncCoordinator`](crate::core_sync::SyncCoordinator).

use serde::{Deserialize, Serialize};

use crate::core_social::UserId;

mod caches;
mod membership;
mod mute;
mod requests;
mod service;

pub use membership::{MembershipDriver, MembershipIntent};
pub use mute::MuteDriver;
pub use requests::{RequestDecision, RequestDriver};
pub use service::CircleService;

pub type CircleId = String;

/// Membership of the session user in a circle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembershipState {
    Unjoined,
    /// Waiting for the owner's approval
    Requested,
    Invited,
    Rejected,
    Active,
}

impl MembershipState {
    /// Whether a join request is pending or granted
    pub fn is_joining(self) -> bool {
        matches!(self, MembershipState::Requested | MembershipState::Active)
    }
}

/// Who may join a circle without approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Preapproval {
    #[default]
    Anyone,
    FriendsOfMembers,
    Friends,
    InviteOnly,
}

/// A circle together with the session user's membership record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub id: CircleId,

    pub title: String,

    pub owner_id: UserId,

    /// Number of active members
    pub participant_count: u32,

    pub membership: MembershipState,

    /// Whether the circle is in the user's joined list
    pub joined: bool,

    /// Notifications muted
    pub muted: bool,

    pub preapproval: Preapproval,
}

impl Circle {
    pub fn new(id: impl Into<CircleId>, title: impl Into<String>, owner_id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            owner_id: owner_id.into(),
            participant_count: 0,
            membership: MembershipState::Unjoined,
            joined: false,
            muted: false,
            preapproval: Preapproval::Anyone,
        }
    }

    pub fn with_participants(mut self, count: u32) -> Self {
        self.participant_count = count;
        self
    }

    pub fn with_preapproval(mut self, preapproval: Preapproval) -> Self {
        self.preapproval = preapproval;
        self
    }

    pub fn with_membership(mut self, membership: MembershipState) -> Self {
        self.membership = membership;
        self.joined = membership == MembershipState::Active;
        self
    }
}

/// Copy of `circles` with `circle` inserted or replaced
pub(crate) fn upsert(circles: &[Circle], circle: &Circle) -> Vec<Circle> {
    let mut next = circles.to_vec();
    match next.iter_mut().find(|existing| existing.id == circle.id) {
        Some(existing) => *existing = circle.clone(),
        None => next.push(circle.clone()),
    }
    next
}

/// Copy of `circles` without `id`
pub(crate) fn remove(circles: &[Circle], id: &str) -> Vec<Circle> {
    circles.iter().filter(|circle| circle.id != id).cloned().collect()
}
