use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use super::{Person, RelationshipMap};
use crate::context::SyncContext;
use crate::core_cache::{fetch_fn, CacheEvent, CacheOptions, CacheStore};
use crate::core_stream::Subscription;
use crate::errors::{SyncError, SyncResult};

type PeopleStore = CacheStore<(), Vec<Person>>;

/// Relationship map derived from the friends, outgoing and incoming lists.
///
/// Backed by a [`CacheStore`] keyed by `()` whose fetcher reads the three
/// source caches, so it shares their single-flight and TTL handling. A
/// background listener keeps it current: an invalidated source invalidates
/// the map, a committed source recomputes it if it was loaded before. A
/// recompute supersedes a derivation already in flight, which may have read
/// the source before the commit.
#[derive(Clone)]
pub struct RelationshipStore {
    derived: CacheStore<(), RelationshipMap>,
}

impl RelationshipStore {
    pub fn new(
        ttl: Duration,
        friends: &PeopleStore,
        outgoing: &PeopleStore,
        incoming: &PeopleStore,
        context: &SyncContext,
    ) -> Self {
        let sources = (friends.clone(), outgoing.clone(), incoming.clone());
        let fetcher = fetch_fn(move |_: ()| {
            let (friends, outgoing, incoming) = sources.clone();
            async move {
                let (friends, outgoing, incoming) =
                    tokio::try_join!(friends.value(&()), outgoing.value(&()), incoming.value(&()))?;
                Ok::<_, SyncError>(RelationshipMap::derive(&friends, &outgoing, &incoming))
            }
        });
        let derived = CacheStore::new(
            CacheOptions::new("relationships", ttl),
            fetcher,
            context,
        );

        let listener = SourceListener {
            derived: derived.clone(),
            friends: friends.events(),
            outgoing: outgoing.events(),
            incoming: incoming.events(),
        };
        context.spawn_component("relationship-listener", listener.run());

        Self { derived }
    }

    /// Underlying derived cache, for transforms and commits
    pub fn store(&self) -> &CacheStore<(), RelationshipMap> {
        &self.derived
    }

    /// Current map, fetching the sources when needed
    pub async fn map(&self) -> SyncResult<RelationshipMap> {
        self.derived.value(&()).await
    }

    pub fn observe(&self) -> Subscription<RelationshipMap> {
        self.derived.observe(&())
    }

    /// Visible map without fetching
    pub fn current(&self) -> Option<RelationshipMap> {
        self.derived.current_value(&())
    }
}

struct SourceListener {
    derived: CacheStore<(), RelationshipMap>,
    friends: broadcast::Receiver<CacheEvent<()>>,
    outgoing: broadcast::Receiver<CacheEvent<()>>,
    incoming: broadcast::Receiver<CacheEvent<()>>,
}

impl SourceListener {
    async fn run(mut self) {
        loop {
            let (source, event) = tokio::select! {
                event = self.friends.recv() => ("friends", event),
                event = self.outgoing.recv() => ("outgoing", event),
                event = self.incoming.recv() => ("incoming", event),
            };

            match event {
                Ok(CacheEvent::Committed(())) => {
                    debug!(source, "Source committed, recomputing relationships");
                    // The refresh runs to completion on its own task.
                    let _ = self.derived.restart_if_present(&());
                }
                Ok(CacheEvent::Invalidated(())) => {
                    debug!(source, "Source invalidated, invalidating relationships");
                    self.derived.invalidate(&());
                }
                Ok(CacheEvent::Reset) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(source, missed, "Relationship listener lagged");
                    self.derived.invalidate(&());
                }
                Err(RecvError::Closed) => {
                    debug!(source, "Source closed, stopping relationship listener");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_overlay::Expiry;
    use crate::core_social::FriendRelationship;
    use crate::test_utils::eventually;
    use std::sync::{Arc, Mutex};

    struct Sources {
        lists: [Arc<Mutex<Vec<Person>>>; 3],
        stores: [PeopleStore; 3],
    }

    fn sources(context: &SyncContext) -> Sources {
        let lists: [Arc<Mutex<Vec<Person>>>; 3] = Default::default();
        let stores = [0, 1, 2].map(|i| {
            let list = lists[i].clone();
            CacheStore::new(
                CacheOptions::new(format!("source{}", i), Duration::from_secs(30)),
                fetch_fn(move |_: ()| {
                    let list = list.clone();
                    async move { Ok::<_, SyncError>(list.lock().unwrap().clone()) }
                }),
                context,
            )
        });
        Sources { lists, stores }
    }

    fn relationships(sources: &Sources, context: &SyncContext) -> RelationshipStore {
        let [friends, outgoing, incoming] = &sources.stores;
        RelationshipStore::new(Duration::from_secs(10), friends, outgoing, incoming, context)
    }

    #[tokio::test]
    async fn test_map_is_derived_from_sources() {
        let context = SyncContext::default();
        let sources = sources(&context);
        sources.lists[0].lock().unwrap().push(Person::new("a", "A"));
        sources.lists[2].lock().unwrap().push(Person::new("b", "B"));
        let store = relationships(&sources, &context);

        let map = store.map().await.unwrap();
        assert_eq!(map.get("a"), FriendRelationship::Friend);
        assert_eq!(map.get("b"), FriendRelationship::IncomingRequest);
    }

    #[tokio::test]
    async fn test_source_commit_recomputes_map() {
        let context = SyncContext::default();
        let sources = sources(&context);
        let store = relationships(&sources, &context);
        assert!(store.map().await.unwrap().is_empty());

        sources.stores[1].commit(&(), vec![Person::new("c", "C")], &[]);

        eventually("recomputed map", || {
            store
                .current()
                .is_some_and(|map| map.get("c") == FriendRelationship::OutgoingRequest)
        })
        .await;
    }

    #[tokio::test]
    async fn test_source_invalidation_invalidates_map() {
        let context = SyncContext::default();
        let sources = sources(&context);
        let store = relationships(&sources, &context);
        store.map().await.unwrap();

        sources.lists[0].lock().unwrap().push(Person::new("d", "D"));
        sources.stores[0].invalidate(&());
        eventually("stale map", || !store.store().is_fresh(&())).await;

        assert_eq!(store.map().await.unwrap().get("d"), FriendRelationship::Friend);
    }

    #[tokio::test]
    async fn test_transform_layers_over_derived_map() {
        let context = SyncContext::default();
        let sources = sources(&context);
        let store = relationships(&sources, &context);
        store.map().await.unwrap();

        let handle = store.store().apply(
            &(),
            |map| map.with("e", FriendRelationship::Updating),
            Expiry::Permanent,
        );
        assert_eq!(store.current().unwrap().get("e"), FriendRelationship::Updating);

        assert!(handle.clear());
        assert_eq!(store.current().unwrap().get("e"), FriendRelationship::None);
    }
}
