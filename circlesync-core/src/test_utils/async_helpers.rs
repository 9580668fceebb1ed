//! Async test helpers

use std::future::Future;
use tokio::time::{timeout, Duration};

/// Await `future`, panicking with `what` if it takes longer than a second.
pub async fn within_second<F, T>(what: &str, future: F) -> T
where
    F: Future<Output = T>,
{
    timeout(Duration::from_secs(1), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// Poll `condition` until it holds, yielding to other tasks in between.
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    within_second(what, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
}
