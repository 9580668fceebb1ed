//! Multicast value stream
//!
//! A hot, replay-latest publish/subscribe cell. Publishing never blocks and
//! never fails: the newest value simply replaces the previous one, and a slow
//! subscriber observes only the most recent value when it next polls.
//! Late subscribers receive the latest published value first.

use futures::stream::{self, Stream};
use tokio::sync::watch;

/// Publisher side of a multicast value stream.
#[derive(Debug)]
pub struct ValueStream<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> ValueStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty stream (no value published yet)
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Create a stream that already holds `value`
    pub fn with_value(value: T) -> Self {
        let (tx, _rx) = watch::channel(Some(value));
        Self { tx }
    }

    /// Publish a value to every subscriber, replacing the latest value.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Forget the latest value so new subscribers wait for the next publish.
    pub fn clear(&self) {
        self.tx.send_if_modified(|current| current.take().is_some());
    }

    /// The most recently published value
    pub fn latest(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Subscribe; the first `next()` yields the latest value if one exists.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            replayed: false,
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T> Default for ValueStream<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of a [`ValueStream`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Option<T>>,
    replayed: bool,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Latest value without waiting or marking it as seen
    pub fn current(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next value.
    ///
    /// Returns `None` once the publisher is gone and every value has been seen.
    pub async fn next(&mut self) -> Option<T> {
        if let Some(value) = self.replay() {
            return Some(value);
        }
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            let value = self.rx.borrow_and_update().clone();
            if value.is_some() {
                return value;
            }
        }
    }

    /// Return the next value if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        if let Some(value) = self.replay() {
            return Some(value);
        }
        match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            _ => None,
        }
    }

    /// Wait until a value satisfying `predicate` is visible and return it.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        loop {
            let value = self.next().await?;
            if predicate(&value) {
                return Some(value);
            }
        }
    }

    /// Adapt into a `futures` stream
    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut sub| async move {
            let value = sub.next().await?;
            Some((value, sub))
        })
    }

    fn replay(&mut self) -> Option<T> {
        if self.replayed {
            return None;
        }
        self.replayed = true;
        self.rx.borrow_and_update().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_subscriber_gets_latest() {
        let stream = ValueStream::new();
        stream.publish(1);
        stream.publish(2);

        let mut sub = stream.subscribe();
        assert_eq!(sub.next().await, Some(2));

        stream.publish(3);
        assert_eq!(sub.next().await, Some(3));
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_to_latest() {
        let stream = ValueStream::with_value(0);
        let mut sub = stream.subscribe();
        assert_eq!(sub.next().await, Some(0));

        for i in 1..=10 {
            stream.publish(i);
        }
        assert_eq!(sub.next().await, Some(10));
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_empty_stream_waits_for_first_publish() {
        let stream = ValueStream::<String>::new();
        let mut sub = stream.subscribe();
        assert_eq!(sub.try_next(), None);

        stream.publish("hello".to_string());
        let value = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .expect("value should arrive");
        assert_eq!(value.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_affect_others() {
        let stream = ValueStream::with_value(1);
        let dropped = stream.subscribe();
        let mut kept = stream.subscribe();
        assert_eq!(stream.subscriber_count(), 2);
        drop(dropped);
        assert_eq!(stream.subscriber_count(), 1);

        stream.publish(5);
        assert_eq!(kept.next().await, Some(5));
    }

    #[tokio::test]
    async fn test_clear_hides_value_from_new_subscribers() {
        let stream = ValueStream::with_value(7);
        stream.clear();
        assert_eq!(stream.latest(), None);

        let mut sub = stream.subscribe();
        assert_eq!(sub.try_next(), None);
        stream.publish(8);
        assert_eq!(sub.next().await, Some(8));
    }

    #[tokio::test]
    async fn test_publisher_drop_ends_subscription() {
        let stream = ValueStream::with_value(1);
        let mut sub = stream.subscribe();
        drop(stream);
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_into_stream_and_wait_for() {
        let stream = ValueStream::with_value(1);
        let mut waiter = stream.subscribe();
        let items = stream.subscribe().into_stream();

        stream.publish(2);
        assert_eq!(waiter.wait_for(|v| *v >= 2).await, Some(2));

        drop(stream);
        let collected: Vec<i32> = items.collect().await;
        assert_eq!(collected.last(), Some(&2));
    }
}
