use std::sync::Arc;

use super::{without, Person, RelationshipMap, RelationshipStore, UserId};
use crate::config::CacheTtls;
use crate::context::SyncContext;
use crate::core_cache::{fetch_fn, CacheOptions, CacheStore};
use crate::core_overlay::TransformId;
use crate::remote::SocialRemote;

pub(crate) type PeopleStore = CacheStore<(), Vec<Person>>;

/// Every social cache of a session
#[derive(Clone)]
pub(crate) struct SocialCaches {
    pub friends: PeopleStore,
    pub outgoing: PeopleStore,
    pub incoming: PeopleStore,
    pub blocked: PeopleStore,
    pub relationships: RelationshipStore,
}

macro_rules! people_store {
    ($remote:expr, $method:ident, $name:literal, $ttl:expr, $context:expr) => {{
        let remote = $remote.clone();
        CacheStore::new(
            CacheOptions::new($name, $ttl),
            fetch_fn(move |_: ()| {
                let remote = remote.clone();
                async move { remote.$method().await }
            }),
            $context,
        )
    }};
}

impl SocialCaches {
    pub fn new(remote: &Arc<dyn SocialRemote>, ttls: &CacheTtls, context: &SyncContext) -> Self {
        let friends = people_store!(remote, friends, "friends", ttls.friends, context);
        let outgoing = people_store!(remote, outgoing_requests, "outgoing", ttls.outgoing, context);
        let incoming = people_store!(remote, incoming_requests, "incoming", ttls.incoming, context);
        let blocked = people_store!(remote, blocked_users, "blocked", ttls.blocked, context);
        let relationships =
            RelationshipStore::new(ttls.relationships, &friends, &outgoing, &incoming, context);

        Self {
            friends,
            outgoing,
            incoming,
            blocked,
            relationships,
        }
    }

    /// Every id known for the person answering to `id`, `id` first
    pub fn identities_of(&self, id: &str) -> Vec<UserId> {
        let mut ids = vec![id.to_string()];
        for store in [&self.friends, &self.outgoing, &self.incoming, &self.blocked] {
            let Some(people) = store.current_value(&()) else {
                continue;
            };
            for person in people.iter().filter(|person| person.answers_to(id)) {
                for identity in person.identities() {
                    if !ids.contains(identity) {
                        ids.push(identity.clone());
                    }
                }
            }
        }
        ids
    }

    /// Best known record for `id`
    pub fn person(&self, id: &str) -> Option<Person> {
        [&self.friends, &self.outgoing, &self.incoming, &self.blocked]
            .into_iter()
            .filter_map(|store| store.current_value(&()))
            .flat_map(|people| people.into_iter())
            .find(|person| person.answers_to(id))
    }

    /// Commit removal of `ids` from the three friend lists
    pub fn drop_from_friend_lists(&self, ids: &[&str]) {
        for store in [&self.friends, &self.outgoing, &self.incoming] {
            let listed = store.current_value(&()).is_some_and(|people| {
                people
                    .iter()
                    .any(|person| ids.iter().any(|id| person.answers_to(id)))
            });
            if listed {
                store.commit_with(&(), |people| without(people, ids), &[]);
            }
        }
    }

    /// Commit `update` to the relationship map, retiring `retiring`
    pub fn commit_relationships<F>(&self, update: F, retiring: &[TransformId])
    where
        F: FnOnce(&mut RelationshipMap),
    {
        self.relationships.store().commit_with(
            &(),
            |map| {
                let mut next = map.clone();
                update(&mut next);
                next
            },
            retiring,
        );
    }

    pub fn reset(&self) {
        for store in [&self.friends, &self.outgoing, &self.incoming, &self.blocked] {
            store.reset();
        }
        self.relationships.store().reset();
    }
}
