//! End-to-end membership and friendship flows against the simulated backend

use std::sync::Arc;
use std::time::Duration;

use circlesync_core::core_social::Person;
use circlesync_core::core_store::{DurableStore, SqliteStore};
use circlesync_core::{
    Circle, CircleId, FriendRelationship, MembershipState, Preapproval, Session, SimulatedBackend,
    SyncConfig, SyncError,
};

fn session(backend: &SimulatedBackend) -> Session {
    Session::with_backend(SyncConfig::default(), backend.clone())
}

/// Open circle: join goes straight to Active and the count moves by one
#[tokio::test(start_paused = true)]
async fn test_open_join_becomes_active() {
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park", "Park run", "owner").with_participants(12));
    backend.set_latency(Duration::from_millis(100));
    let session = session(&backend);
    session.circles().get_circle("park").await.unwrap();

    let join = tokio::spawn({
        let circles = session.circles().clone();
        async move { circles.join("park").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let optimistic = session.circles().current_circle("park").unwrap();
    assert_eq!(optimistic.membership, MembershipState::Requested);
    assert_eq!(optimistic.participant_count, 12);

    let circle = join.await.unwrap().unwrap();
    assert_eq!(circle.membership, MembershipState::Active);
    assert!(circle.joined);
    assert_eq!(circle.participant_count, 13);
    assert_eq!(backend.calls("join_circle"), 1);
}

/// Gated circle: join stays Requested and the count does not move
#[tokio::test(start_paused = true)]
async fn test_gated_join_stays_requested() {
    let backend = SimulatedBackend::new();
    backend.add_circle(
        Circle::new("club", "Book club", "owner")
            .with_participants(5)
            .with_preapproval(Preapproval::FriendsOfMembers),
    );
    let session = session(&backend);

    let circle = session.circles().join("club").await.unwrap();

    assert_eq!(circle.membership, MembershipState::Requested);
    assert!(!circle.joined);
    assert_eq!(circle.participant_count, 5);
    assert!(session.circles().joined().await.unwrap().is_empty());
}

/// Leaving while offline rolls back to Active and reports a network error
#[tokio::test(start_paused = true)]
async fn test_offline_leave_rolls_back() {
    let backend = SimulatedBackend::new();
    backend.add_circle(
        Circle::new("climb", "Climbing", "owner")
            .with_participants(8)
            .with_membership(MembershipState::Active),
    );
    let session = session(&backend);
    let before = session.circles().get_circle("climb").await.unwrap();
    assert_eq!(session.circles().joined().await.unwrap().len(), 1);

    backend.set_offline(true);
    let err = session.circles().leave("climb").await.unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(session.circles().current_circle("climb"), Some(before));
    assert_eq!(session.circles().joined().await.unwrap().len(), 1);
    assert_eq!(session.metrics().mutations_rolled_back, 1);
}

/// A request sent through a phone contact resolves to the real user; both
/// ids end up as friends and no incoming request is left behind
#[tokio::test(start_paused = true)]
async fn test_contact_friend_request_merges_identities() {
    let backend = SimulatedBackend::new();
    backend.add_contact("phone:+15550100", Person::new("u-dana", "Dana"));
    backend.add_incoming_request(Person::new("u-dana", "Dana"));
    let session = session(&backend);
    let social = session.social();
    assert_eq!(
        social.relationship("u-dana").await.unwrap(),
        FriendRelationship::IncomingRequest
    );

    social.add_friend("phone:+15550100").await.unwrap();

    let map = social.relationships().await.unwrap();
    assert_eq!(map.get("phone:+15550100"), FriendRelationship::Friend);
    assert_eq!(map.get("u-dana"), FriendRelationship::Friend);
    assert!(map
        .iter()
        .all(|(_, relationship)| relationship != FriendRelationship::IncomingRequest));
    assert!(social.incoming_requests().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_joined_circle_survives_in_durable_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("circles.db");
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park", "Park run", "owner").with_participants(2));

    let sqlite: SqliteStore<CircleId, Circle> = SqliteStore::open(&path, "circles").unwrap();
    let store: Arc<dyn DurableStore<CircleId, Circle>> = Arc::new(sqlite);
    let session = Session::new(
        SyncConfig::default(),
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        Some(store.clone()),
    );
    session.circles().join("park").await.unwrap();
    session.shutdown().await;

    let stored = store.read(&"park".to_string()).unwrap().unwrap();
    assert_eq!(stored.membership, MembershipState::Active);
    assert_eq!(stored.participant_count, 3);
}
