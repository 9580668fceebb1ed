//! Cache and mutation guarantees observed through the public API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use circlesync_core::core_cache::{fetch_fn, CacheOptions, CacheStore};
use circlesync_core::core_overlay::Expiry;
use circlesync_core::{
    Circle, MembershipState, Session, SimulatedBackend, SyncConfig, SyncContext, SyncError,
};

fn session(backend: &SimulatedBackend) -> Session {
    Session::with_backend(SyncConfig::default(), backend.clone())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_reads_share_one_fetch() {
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park", "Park run", "owner").with_participants(3));
    backend.set_latency(Duration::from_millis(100));
    let session = session(&backend);

    let circles = session.circles();
    let (a, b, c) = tokio::join!(
        circles.get_circle("park"),
        circles.get_circle("park"),
        circles.get_circle("park"),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(c.unwrap().participant_count, 3);
    assert_eq!(backend.calls("circle"), 1);
    assert_eq!(session.metrics().fetches_joined, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rollback_restores_exact_snapshot() {
    let backend = SimulatedBackend::new();
    backend.add_circle(
        Circle::new("climb", "Climbing", "owner")
            .with_participants(8)
            .with_membership(MembershipState::Active),
    );
    let session = session(&backend);
    let before = session.circles().get_circle("climb").await.unwrap();
    backend.set_latency(Duration::from_millis(100));
    backend.reject_next("owners cannot leave");

    let leave = tokio::spawn({
        let circles = session.circles().clone();
        async move { circles.leave("climb").await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let optimistic = session.circles().current_circle("climb").unwrap();
    assert_eq!(optimistic.membership, MembershipState::Unjoined);
    assert_eq!(optimistic.participant_count, 7);

    let err = leave.await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::ServerRejected { .. }));
    assert_eq!(session.circles().current_circle("climb"), Some(before));
}

#[tokio::test(start_paused = true)]
async fn test_count_moves_once_without_server_count() {
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park", "Park run", "owner").with_participants(4));
    backend.omit_counts(true);
    let session = session(&backend);
    let circles = session.circles();
    circles.get_circle("park").await.unwrap();

    let (first, second) = tokio::join!(circles.join("park"), circles.join("park"));

    assert_eq!(first.unwrap().participant_count, 5);
    assert_eq!(second.unwrap().participant_count, 5);
    assert_eq!(backend.calls("join_circle"), 1);

    let left = circles.leave("park").await.unwrap();
    assert_eq!(left.participant_count, 4);
    assert_eq!(backend.circle_state("park").unwrap().participant_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_transform_expires_exactly_once() {
    let context = SyncContext::default();
    let fetches = Arc::new(AtomicUsize::new(0));
    let store: CacheStore<u32, i64> = CacheStore::new(
        CacheOptions::new("counter", Duration::from_secs(60)),
        fetch_fn({
            let fetches = fetches.clone();
            move |_: u32| {
                fetches.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, SyncError>(10) }
            }
        }),
        &context,
    );
    assert_eq!(store.value(&1).await.unwrap(), 10);

    let handle = store.apply(&1, |value| value + 1, Expiry::After(Duration::from_secs(1)));
    assert_eq!(store.current_value(&1), Some(11));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.current_value(&1), Some(11));
    assert_eq!(context.metrics().snapshot().transforms_expired, 0);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(store.current_value(&1), Some(10));
    assert!(!handle.clear());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.transforms_expired, 1);
    assert_eq!(metrics.transforms_cleared, 0);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mute_and_membership_do_not_coalesce() {
    let backend = SimulatedBackend::new();
    backend.add_circle(Circle::new("park", "Park run", "owner").with_participants(1));
    let session = session(&backend);
    let circles = session.circles();
    circles.get_circle("park").await.unwrap();

    let (joined, muted) = tokio::join!(circles.join("park"), circles.set_muted("park", true));

    assert_eq!(joined.unwrap().membership, MembershipState::Active);
    assert!(muted.unwrap());
    let circle = circles.current_circle("park").unwrap();
    assert!(circle.muted);
    assert_eq!(circle.membership, MembershipState::Active);
}
