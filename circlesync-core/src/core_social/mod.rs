//! Social graph
//!
//! Friends, friend requests and blocks for the session user. Each list is a
//! cache of its own; the per-person [`FriendRelationship`] is derived from
//! the three friend lists by [`RelationshipMap::derive`] and cached in a
//! short-lived derived store that is recomputed whenever a source list is
//! committed or invalidated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod blocking;
mod caches;
mod friends;
mod relationships;
mod service;

pub use blocking::{BlockDriver, BlockIntent};
pub use friends::{FriendDriver, FriendIntent, FriendOutcome};
pub use relationships::RelationshipStore;
pub use service::{SocialService, ToggleFriendResult};

/// Server user id, or a client-side alias such as a phone contact id
pub type UserId = String;

/// Another user as seen by the session user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Canonical server id
    pub id: UserId,

    /// Display name
    pub name: String,

    /// Other identifiers this person was resolved from
    #[serde(default)]
    pub aliases: Vec<UserId>,
}

impl Person {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<UserId>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Whether `id` is this person's id or one of its aliases
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.aliases.iter().any(|alias| alias == id)
    }

    /// Canonical id followed by every alias
    pub fn identities(&self) -> impl Iterator<Item = &UserId> {
        std::iter::once(&self.id).chain(self.aliases.iter())
    }
}

/// Relationship of the session user to another person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FriendRelationship {
    /// No relationship
    None,
    /// A change is in flight
    Updating,
    /// The other person asked to be friends
    IncomingRequest,
    /// The session user asked to be friends
    OutgoingRequest,
    Friend,
}

impl FriendRelationship {
    /// Rank used when several sources mention the same person
    fn precedence(self) -> u8 {
        match self {
            FriendRelationship::Friend => 3,
            FriendRelationship::OutgoingRequest => 2,
            FriendRelationship::IncomingRequest => 1,
            FriendRelationship::None | FriendRelationship::Updating => 0,
        }
    }
}

/// Relationship by user id. Absent ids are [`FriendRelationship::None`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipMap {
    entries: HashMap<UserId, FriendRelationship>,
}

impl RelationshipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine the three friend lists.
    ///
    /// Precedence is `Friend > OutgoingRequest > IncomingRequest > None`, and
    /// every alias of a person maps to the same state as its id.
    pub fn derive(friends: &[Person], outgoing: &[Person], incoming: &[Person]) -> Self {
        let mut map = Self::new();
        let sources = [
            (incoming, FriendRelationship::IncomingRequest),
            (outgoing, FriendRelationship::OutgoingRequest),
            (friends, FriendRelationship::Friend),
        ];
        for (people, relationship) in sources {
            for person in people {
                for id in person.identities() {
                    map.raise(id, relationship);
                }
            }
        }
        map
    }

    pub fn get(&self, id: &str) -> FriendRelationship {
        self.entries
            .get(id)
            .copied()
            .unwrap_or(FriendRelationship::None)
    }

    /// Set `id` to `relationship`; `None` removes the entry.
    pub fn set(&mut self, id: &str, relationship: FriendRelationship) {
        if relationship == FriendRelationship::None {
            self.entries.remove(id);
        } else {
            self.entries.insert(id.to_string(), relationship);
        }
    }

    /// Copy with `id` set to `relationship`
    pub fn with(&self, id: &str, relationship: FriendRelationship) -> Self {
        let mut next = self.clone();
        next.set(id, relationship);
        next
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UserId, FriendRelationship)> {
        self.entries.iter().map(|(id, relationship)| (id, *relationship))
    }

    fn raise(&mut self, id: &str, relationship: FriendRelationship) {
        let current = self.get(id);
        if relationship.precedence() > current.precedence() {
            self.set(id, relationship);
        }
    }
}

/// Copy of `people` without anyone answering to one of `ids`
pub(crate) fn without(people: &[Person], ids: &[&str]) -> Vec<Person> {
    people
        .iter()
        .filter(|person| !ids.iter().any(|id| person.answers_to(id)))
        .cloned()
        .collect()
}

/// Copy of `people` with `person` added, replacing an entry with the same id
pub(crate) fn with_person(people: &[Person], person: &Person) -> Vec<Person> {
    let mut next: Vec<Person> = people
        .iter()
        .filter(|existing| existing.id != person.id)
        .cloned()
        .collect();
    next.push(person.clone());
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn person(id: &str) -> Person {
        Person::new(id, id.to_uppercase())
    }

    #[test]
    fn test_friend_wins_over_requests() {
        let map = RelationshipMap::derive(&[person("a")], &[person("a"), person("b")], &[
            person("a"),
            person("b"),
            person("c"),
        ]);

        assert_eq!(map.get("a"), FriendRelationship::Friend);
        assert_eq!(map.get("b"), FriendRelationship::OutgoingRequest);
        assert_eq!(map.get("c"), FriendRelationship::IncomingRequest);
        assert_eq!(map.get("d"), FriendRelationship::None);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_aliases_share_the_state() {
        let friend = person("u42").with_alias("phone:555");
        let map = RelationshipMap::derive(&[friend], &[], &[]);

        assert_eq!(map.get("u42"), FriendRelationship::Friend);
        assert_eq!(map.get("phone:555"), FriendRelationship::Friend);
    }

    #[test]
    fn test_setting_none_removes_entry() {
        let map = RelationshipMap::new().with("a", FriendRelationship::Updating);
        assert_eq!(map.len(), 1);
        assert!(map.with("a", FriendRelationship::None).is_empty());
    }

    #[test]
    fn test_list_helpers_match_aliases() {
        let people = vec![person("a").with_alias("phone:1"), person("b")];
        assert_eq!(without(&people, &["phone:1"]), vec![person("b")]);

        let renamed = Person::new("b", "Bee");
        let next = with_person(&people, &renamed);
        assert_eq!(next.len(), 2);
        assert!(next.contains(&renamed));
    }

    fn membership() -> impl Strategy<Value = (bool, bool, bool)> {
        (any::<bool>(), any::<bool>(), any::<bool>())
    }

    proptest! {
        #[test]
        fn prop_precedence_law(flags in proptest::collection::vec(membership(), 1..12)) {
            let mut friends = Vec::new();
            let mut outgoing = Vec::new();
            let mut incoming = Vec::new();
            for (i, (f, o, n)) in flags.iter().enumerate() {
                let p = person(&format!("user{}", i));
                if *f { friends.push(p.clone()); }
                if *o { outgoing.push(p.clone()); }
                if *n { incoming.push(p); }
            }

            let map = RelationshipMap::derive(&friends, &outgoing, &incoming);
            for (i, (f, o, n)) in flags.iter().enumerate() {
                let expected = if *f {
                    FriendRelationship::Friend
                } else if *o {
                    FriendRelationship::OutgoingRequest
                } else if *n {
                    FriendRelationship::IncomingRequest
                } else {
                    FriendRelationship::None
                };
                prop_assert_eq!(map.get(&format!("user{}", i)), expected);
            }
        }
    }
}
