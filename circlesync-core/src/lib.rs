//! Client-side consistency engine for circles and the social graph.
//!
//! Server-owned state (circle membership, friend relationships, mute and
//! block flags) is cached locally, observed as replay-latest streams and
//! mutated optimistically: the visible value changes at once, the remote
//! call runs serialized per entity, and the cache is either reconciled with
//! the server result or rolled back to the exact pre-mutation snapshot.

pub mod config;
pub mod context;
pub mod core_cache;
pub mod core_circle;
pub mod core_overlay;
pub mod core_social;
pub mod core_store;
pub mod core_stream;
pub mod core_sync;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod remote;
pub mod session;
pub mod shutdown;

mod util;

#[cfg(test)]
mod test_utils;

pub use config::SyncConfig;
pub use context::SyncContext;
pub use core_circle::{Circle, CircleId, CircleService, MembershipState, Preapproval};
pub use core_social::{FriendRelationship, Person, RelationshipMap, SocialService, UserId};
pub use errors::{SyncError, SyncResult};
pub use logging::{init_logging, init_logging_with_config, LogLevel};
pub use remote::{CircleRemote, SimulatedBackend, SocialRemote};
pub use session::Session;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = SyncConfig::default();
        assert_eq!(MembershipState::Unjoined, Circle::new("c", "C", "o").membership);
    }
}
