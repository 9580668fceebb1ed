use std::sync::Arc;

use super::{Circle, CircleId};
use crate::config::CacheTtls;
use crate::context::SyncContext;
use crate::core_cache::{fetch_fn, CacheOptions, CacheStore};
use crate::core_social::Person;
use crate::core_store::DurableStore;
use crate::errors::SyncError;
use crate::remote::CircleRemote;

pub(crate) type CircleListStore = CacheStore<(), Vec<Circle>>;

/// Every circle cache of a session
#[derive(Clone)]
pub(crate) struct CircleCaches {
    pub circles: CacheStore<CircleId, Circle>,
    pub nearby: CircleListStore,
    pub joined: CircleListStore,
    pub requests: CacheStore<CircleId, Vec<Person>>,
}

impl CircleCaches {
    pub fn new(
        remote: &Arc<dyn CircleRemote>,
        durable: Option<Arc<dyn DurableStore<CircleId, Circle>>>,
        ttls: &CacheTtls,
        context: &SyncContext,
    ) -> Self {
        let mut options = CacheOptions::new("circles", ttls.circles);
        if let Some(durable) = durable {
            options = options.with_durable(durable);
        }
        let circles = {
            let remote = remote.clone();
            CacheStore::new(
                options,
                fetch_fn(move |id: CircleId| {
                    let remote = remote.clone();
                    async move { remote.circle(&id).await }
                }),
                context,
            )
        };

        let nearby = {
            let remote = remote.clone();
            let circles = circles.clone();
            CacheStore::new(
                CacheOptions::new("nearby", ttls.nearby),
                fetch_fn(move |_: ()| {
                    let remote = remote.clone();
                    let circles = circles.clone();
                    async move {
                        let nearby = remote.nearby_circles().await?;
                        prime(&circles, &nearby);
                        Ok::<_, SyncError>(nearby)
                    }
                }),
                context,
            )
        };

        let joined = {
            let remote = remote.clone();
            let circles = circles.clone();
            CacheStore::new(
                CacheOptions::new("joined", ttls.joined),
                fetch_fn(move |_: ()| {
                    let remote = remote.clone();
                    let circles = circles.clone();
                    async move {
                        let joined = remote.joined_circles().await?;
                        prime(&circles, &joined);
                        Ok::<_, SyncError>(joined)
                    }
                }),
                context,
            )
        };

        let requests = {
            let remote = remote.clone();
            CacheStore::new(
                CacheOptions::new("member_requests", ttls.member_requests),
                fetch_fn(move |id: CircleId| {
                    let remote = remote.clone();
                    async move { remote.membership_requests(&id).await }
                }),
                context,
            )
        };

        Self {
            circles,
            nearby,
            joined,
            requests,
        }
    }

    pub fn reset(&self) {
        self.circles.reset();
        self.nearby.reset();
        self.joined.reset();
        self.requests.reset();
    }

    /// Reset and erase durable copies
    pub fn purge(&self) {
        self.circles.purge();
        self.nearby.purge();
        self.joined.purge();
        self.requests.purge();
    }
}

/// Seed per-circle entries that were never loaded from a list fetch
fn prime(circles: &CacheStore<CircleId, Circle>, list: &[Circle]) {
    for circle in list {
        circles.seed(&circle.id, circle.clone());
    }
}
