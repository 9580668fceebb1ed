//! In-memory backend
//!
//! Implements both remote traits over a small simulated world. Failure
//! injection (offline switch, one-shot rejections) and latency let tests and
//! the CLI drive every path of the sync engine.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::{AddFriendResponse, CircleRemote, FriendRequestResult, JoinResponse, SocialRemote};
use crate::core_circle::{Circle, CircleId, MembershipState, Preapproval};
use crate::core_social::{Person, UserId};
use crate::errors::{SyncError, SyncResult};
use crate::util::lock;

#[derive(Default)]
struct World {
    circles: BTreeMap<CircleId, Circle>,
    member_requests: HashMap<CircleId, Vec<Person>>,
    people: HashMap<UserId, Person>,
    contacts: HashMap<UserId, Person>,
    friends: Vec<Person>,
    outgoing: Vec<Person>,
    incoming: Vec<Person>,
    blocked: Vec<Person>,
    accepting: HashSet<UserId>,
}

impl World {
    fn resolve(&self, target: &str) -> Option<Person> {
        self.people
            .get(target)
            .or_else(|| self.contacts.get(target))
            .cloned()
    }

    fn forget(&mut self, user: &str) {
        for list in [&mut self.friends, &mut self.outgoing, &mut self.incoming] {
            list.retain(|person| !person.answers_to(user));
        }
    }
}

#[derive(Default)]
struct Faults {
    offline: bool,
    reject_next: Option<String>,
    latency: Duration,
    omit_counts: bool,
}

/// Simulated backend shared by clones
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    world: Arc<Mutex<World>>,
    faults: Arc<Mutex<Faults>>,
    calls: Arc<Mutex<HashMap<&'static str, usize>>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a circle as the session user sees it
    pub fn add_circle(&self, circle: Circle) -> &Self {
        lock(&self.world).circles.insert(circle.id.clone(), circle);
        self
    }

    /// Server-side view of a circle
    pub fn circle_state(&self, id: &str) -> Option<Circle> {
        lock(&self.world).circles.get(id).cloned()
    }

    pub fn add_member_request(&self, circle: &str, person: Person) -> &Self {
        lock(&self.world)
            .member_requests
            .entry(circle.to_string())
            .or_default()
            .push(person);
        self
    }

    /// Make a user known by id
    pub fn add_person(&self, person: Person) -> &Self {
        lock(&self.world).people.insert(person.id.clone(), person);
        self
    }

    /// Make `person` reachable through the phone contact id `contact`.
    /// The person gains `contact` as an alias.
    pub fn add_contact(&self, contact: &str, person: Person) -> &Self {
        let person = person.with_alias(contact);
        let mut world = lock(&self.world);
        world.people.insert(person.id.clone(), person.clone());
        world.contacts.insert(contact.to_string(), person);
        self
    }

    pub fn add_friend_directly(&self, person: Person) -> &Self {
        lock(&self.world).friends.push(person);
        self
    }

    pub fn add_incoming_request(&self, person: Person) -> &Self {
        let mut world = lock(&self.world);
        world.people.insert(person.id.clone(), person.clone());
        world.incoming.push(person);
        self
    }

    /// Friend requests to `user` are accepted immediately
    pub fn accepts_friends(&self, user: &str) -> &Self {
        lock(&self.world).accepting.insert(user.to_string());
        self
    }

    /// While offline every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        lock(&self.faults).offline = offline;
    }

    /// The next call is rejected with `reason`
    pub fn reject_next(&self, reason: impl Into<String>) {
        lock(&self.faults).reject_next = Some(reason.into());
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.faults).latency = latency;
    }

    /// Leave participant counts out of join responses
    pub fn omit_counts(&self, omit: bool) {
        lock(&self.faults).omit_counts = omit;
    }

    /// Number of calls made to `op`
    pub fn calls(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Count the call, wait out the latency, then apply injected faults.
    async fn call(&self, op: &'static str) -> SyncResult<()> {
        *lock(&self.calls).entry(op).or_default() += 1;

        let latency = lock(&self.faults).latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut faults = lock(&self.faults);
        if faults.offline {
            debug!(op, "Simulated backend offline");
            return Err(SyncError::network("offline"));
        }
        if let Some(reason) = faults.reject_next.take() {
            debug!(op, %reason, "Simulated backend rejecting call");
            return Err(SyncError::rejected(reason));
        }
        Ok(())
    }

    fn unknown_circle(id: &str) -> SyncError {
        SyncError::rejected(format!("unknown circle {}", id))
    }
}

#[async_trait]
impl CircleRemote for SimulatedBackend {
    async fn circle(&self, id: &CircleId) -> SyncResult<Circle> {
        self.call("circle").await?;
        self.circle_state(id).ok_or_else(|| Self::unknown_circle(id))
    }

    async fn nearby_circles(&self) -> SyncResult<Vec<Circle>> {
        self.call("nearby_circles").await?;
        Ok(lock(&self.world).circles.values().cloned().collect())
    }

    async fn joined_circles(&self) -> SyncResult<Vec<Circle>> {
        self.call("joined_circles").await?;
        Ok(lock(&self.world)
            .circles
            .values()
            .filter(|circle| circle.joined)
            .cloned()
            .collect())
    }

    async fn membership_requests(&self, circle: &CircleId) -> SyncResult<Vec<Person>> {
        self.call("membership_requests").await?;
        Ok(lock(&self.world)
            .member_requests
            .get(circle)
            .cloned()
            .unwrap_or_default())
    }

    async fn join_circle(&self, id: &CircleId) -> SyncResult<JoinResponse> {
        self.call("join_circle").await?;
        let omit_counts = lock(&self.faults).omit_counts;
        let mut world = lock(&self.world);
        let circle = world
            .circles
            .get_mut(id)
            .ok_or_else(|| Self::unknown_circle(id))?;

        let granted = match (circle.preapproval, circle.membership) {
            (_, MembershipState::Active) => MembershipState::Active,
            (Preapproval::Anyone, _) => MembershipState::Active,
            (Preapproval::InviteOnly, MembershipState::Invited) => MembershipState::Active,
            _ => MembershipState::Requested,
        };
        if granted == MembershipState::Active && circle.membership != MembershipState::Active {
            circle.participant_count += 1;
        }
        circle.membership = granted;
        circle.joined = granted == MembershipState::Active;

        Ok(JoinResponse {
            state: granted,
            participant_count: (!omit_counts).then_some(circle.participant_count),
        })
    }

    async fn leave_circle(&self, id: &CircleId) -> SyncResult<()> {
        self.call("leave_circle").await?;
        let mut world = lock(&self.world);
        let circle = world
            .circles
            .get_mut(id)
            .ok_or_else(|| Self::unknown_circle(id))?;
        if circle.membership == MembershipState::Active {
            circle.participant_count = circle.participant_count.saturating_sub(1);
        }
        circle.membership = MembershipState::Unjoined;
        circle.joined = false;
        Ok(())
    }

    async fn set_muted(&self, id: &CircleId, muted: bool) -> SyncResult<()> {
        self.call("set_muted").await?;
        let mut world = lock(&self.world);
        let circle = world
            .circles
            .get_mut(id)
            .ok_or_else(|| Self::unknown_circle(id))?;
        circle.muted = muted;
        Ok(())
    }

    async fn approve_member(&self, circle: &CircleId, user: &UserId) -> SyncResult<()> {
        self.call("approve_member").await?;
        let mut world = lock(&self.world);
        if let Some(requests) = world.member_requests.get_mut(circle) {
            requests.retain(|person| &person.id != user);
        }
        let record = world
            .circles
            .get_mut(circle)
            .ok_or_else(|| Self::unknown_circle(circle))?;
        record.participant_count += 1;
        Ok(())
    }

    async fn deny_member(&self, circle: &CircleId, user: &UserId) -> SyncResult<()> {
        self.call("deny_member").await?;
        if let Some(requests) = lock(&self.world).member_requests.get_mut(circle) {
            requests.retain(|person| &person.id != user);
        }
        Ok(())
    }
}

#[async_trait]
impl SocialRemote for SimulatedBackend {
    async fn friends(&self) -> SyncResult<Vec<Person>> {
        self.call("friends").await?;
        Ok(lock(&self.world).friends.clone())
    }

    async fn outgoing_requests(&self) -> SyncResult<Vec<Person>> {
        self.call("outgoing_requests").await?;
        Ok(lock(&self.world).outgoing.clone())
    }

    async fn incoming_requests(&self) -> SyncResult<Vec<Person>> {
        self.call("incoming_requests").await?;
        Ok(lock(&self.world).incoming.clone())
    }

    async fn blocked_users(&self) -> SyncResult<Vec<Person>> {
        self.call("blocked_users").await?;
        Ok(lock(&self.world).blocked.clone())
    }

    async fn add_friend(&self, target: &UserId) -> SyncResult<AddFriendResponse> {
        self.call("add_friend").await?;
        let mut world = lock(&self.world);
        let user = world
            .resolve(target)
            .ok_or_else(|| SyncError::rejected(format!("unknown user {}", target)))?;

        let requested_us = world.incoming.iter().any(|person| person.id == user.id);
        let result = if requested_us || world.accepting.contains(&user.id) {
            world.forget(&user.id);
            world.friends.push(user.clone());
            FriendRequestResult::Accepted
        } else {
            world.outgoing.retain(|person| person.id != user.id);
            world.outgoing.push(user.clone());
            FriendRequestResult::Requested
        };
        Ok(AddFriendResponse { result, user })
    }

    async fn remove_friend(&self, user: &UserId) -> SyncResult<()> {
        self.call("remove_friend").await?;
        lock(&self.world).forget(user);
        Ok(())
    }

    async fn block_user(&self, user: &UserId) -> SyncResult<()> {
        self.call("block_user").await?;
        let mut world = lock(&self.world);
        let person = world
            .resolve(user)
            .unwrap_or_else(|| Person::new(user.clone(), user.clone()));
        world.forget(user);
        if !world.blocked.iter().any(|blocked| blocked.id == person.id) {
            world.blocked.push(person);
        }
        Ok(())
    }

    async fn unblock_user(&self, user: &UserId) -> SyncResult<()> {
        self.call("unblock_user").await?;
        lock(&self.world).blocked.retain(|person| &person.id != user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_circle_grants_active() {
        let backend = SimulatedBackend::new();
        backend.add_circle(Circle::new("c1", "Open", "owner").with_participants(3));

        let response = backend.join_circle(&"c1".to_string()).await.unwrap();
        assert_eq!(response.state, MembershipState::Active);
        assert_eq!(response.participant_count, Some(4));
        assert_eq!(backend.calls("join_circle"), 1);
    }

    #[tokio::test]
    async fn test_gated_circle_leaves_request_pending() {
        let backend = SimulatedBackend::new();
        backend.add_circle(
            Circle::new("c2", "Gated", "owner")
                .with_participants(3)
                .with_preapproval(Preapproval::InviteOnly),
        );

        let response = backend.join_circle(&"c2".to_string()).await.unwrap();
        assert_eq!(response.state, MembershipState::Requested);
        assert_eq!(response.participant_count, Some(3));
    }

    #[tokio::test]
    async fn test_offline_and_rejection_injection() {
        let backend = SimulatedBackend::new();
        backend.set_offline(true);
        assert_eq!(
            backend.friends().await,
            Err(SyncError::network("offline"))
        );

        backend.set_offline(false);
        backend.reject_next("nope");
        assert_eq!(backend.friends().await, Err(SyncError::rejected("nope")));
        assert_eq!(backend.friends().await, Ok(Vec::new()));
        assert_eq!(backend.calls("friends"), 3);
    }

    #[tokio::test]
    async fn test_contact_request_resolves_to_user() {
        let backend = SimulatedBackend::new();
        backend
            .add_contact("phone:555", Person::new("u42", "Ada"))
            .accepts_friends("u42");

        let response = backend.add_friend(&"phone:555".to_string()).await.unwrap();
        assert_eq!(response.result, FriendRequestResult::Accepted);
        assert_eq!(response.user.id, "u42");
        assert!(response.user.answers_to("phone:555"));
        assert_eq!(backend.friends().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accepting_incoming_request_moves_to_friends() {
        let backend = SimulatedBackend::new();
        backend.add_incoming_request(Person::new("u7", "Bo"));

        let response = backend.add_friend(&"u7".to_string()).await.unwrap();
        assert_eq!(response.result, FriendRequestResult::Accepted);
        assert!(backend.incoming_requests().await.unwrap().is_empty());
    }
}
