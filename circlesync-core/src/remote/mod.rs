//! Remote capabilities
//!
//! Boundary to the backend. Only the success / failure / result contract of
//! each call matters to the engine; transports implement these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core_circle::{Circle, CircleId, MembershipState};
use crate::core_social::{Person, UserId};
use crate::errors::SyncResult;

mod simulated;

pub use simulated::SimulatedBackend;

/// Server answer to a join request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Membership the server granted
    pub state: MembershipState,

    /// Member count after the join, when the server reports it
    pub participant_count: Option<u32>,
}

/// Outcome of a friend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendRequestResult {
    /// Both sides are now friends
    Accepted,
    /// Waiting for the other side
    Requested,
}

/// Server answer to a friend request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFriendResponse {
    pub result: FriendRequestResult,

    /// The resolved user. Its id may differ from the requested one when the
    /// request named a phone contact.
    pub user: Person,
}

/// Circle fetches and mutations
#[async_trait]
pub trait CircleRemote: Send + Sync + 'static {
    async fn circle(&self, id: &CircleId) -> SyncResult<Circle>;

    async fn nearby_circles(&self) -> SyncResult<Vec<Circle>>;

    async fn joined_circles(&self) -> SyncResult<Vec<Circle>>;

    /// Pending join requests for a circle owned by the session user
    async fn membership_requests(&self, circle: &CircleId) -> SyncResult<Vec<Person>>;

    async fn join_circle(&self, id: &CircleId) -> SyncResult<JoinResponse>;

    async fn leave_circle(&self, id: &CircleId) -> SyncResult<()>;

    async fn set_muted(&self, id: &CircleId, muted: bool) -> SyncResult<()>;

    async fn approve_member(&self, circle: &CircleId, user: &UserId) -> SyncResult<()>;

    async fn deny_member(&self, circle: &CircleId, user: &UserId) -> SyncResult<()>;
}

/// Social graph fetches and mutations
#[async_trait]
pub trait SocialRemote: Send + Sync + 'static {
    async fn friends(&self) -> SyncResult<Vec<Person>>;

    async fn outgoing_requests(&self) -> SyncResult<Vec<Person>>;

    async fn incoming_requests(&self) -> SyncResult<Vec<Person>>;

    async fn blocked_users(&self) -> SyncResult<Vec<Person>>;

    /// Request (or accept) a friendship. `target` is a user id or a phone
    /// contact id.
    async fn add_friend(&self, target: &UserId) -> SyncResult<AddFriendResponse>;

    async fn remove_friend(&self, user: &UserId) -> SyncResult<()>;

    async fn block_user(&self, user: &UserId) -> SyncResult<()>;

    async fn unblock_user(&self, user: &UserId) -> SyncResult<()>;
}
