//! Reusable fetchers for cache tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core_cache::Fetcher;
use crate::errors::{SyncError, SyncResult};

/// Fetcher returning a settable value (or error) and counting calls
#[derive(Clone)]
pub struct CountingFetcher {
    next: Arc<Mutex<SyncResult<i64>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl CountingFetcher {
    pub fn new(value: i64) -> Self {
        Self {
            next: Arc::new(Mutex::new(Ok(value))),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_value(&self, value: i64) {
        *self.next.lock().unwrap() = Ok(value);
    }

    pub fn fail_with(&self, error: SyncError) {
        *self.next.lock().unwrap() = Err(error);
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher<u32, i64> for CountingFetcher {
    async fn fetch(&self, _key: &u32) -> SyncResult<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next.lock().unwrap().clone()
    }
}
