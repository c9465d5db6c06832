//! Election official
//!
//! Keeps the last known holder and fans every new result out to live
//! subscribers. The view and the subscriber registry share one lock.
//! Each subscriber has its own single-slot `watch` channel: delivery
//! overwrites the slot and never waits, so a stalled consumer skips
//! intermediate views and resumes on the latest one.

use crate::{
    error::{ElectorError, Result},
    health::ReadinessCheck,
    stream::ResultSubscriber,
};
use elector_types::{BroadcastView, ResultEvent};
use futures::{Stream, StreamExt};
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

#[derive(Default)]
struct Registry {
    view: BroadcastView,
    subscribers: HashMap<u64, watch::Sender<BroadcastView>>,
    next_id: u64,
    closed: bool,
}

/// Broadcast service for election results
#[derive(Default)]
pub struct Official {
    registry: Mutex<Registry>,
}

impl Official {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current view, never waiting for a new result
    pub fn snapshot(&self) -> BroadcastView {
        self.lock().view.clone()
    }

    /// Fails until a result has been consumed
    pub fn ready(&self) -> Result<()> {
        if self.lock().view.is_empty() {
            Err(ElectorError::NotReady("no election has run"))
        } else {
            Ok(())
        }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Register a subscriber. The current view comes first, followed by
    /// later updates until the subscription is dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (id, rx) = {
            let mut registry = self.lock();
            let (tx, rx) = watch::channel(registry.view.clone());
            let id = registry.next_id;
            registry.next_id += 1;
            // After shutdown the feed ends right after the current view
            if !registry.closed {
                registry.subscribers.insert(id, tx);
            }
            (id, rx)
        };

        debug!(subscriber = id, "Subscriber registered");
        Subscription {
            id,
            views: WatchStream::new(rx),
            official: Arc::clone(self),
        }
    }

    /// End every live subscription
    pub fn close(&self) {
        let closed = {
            let mut registry = self.lock();
            registry.closed = true;
            std::mem::take(&mut registry.subscribers).len()
        };
        if closed > 0 {
            info!(subscribers = closed, "Closed live subscriptions");
        }
    }

    fn unregister(&self, id: u64) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "Subscriber unregistered");
        }
    }

    /// Record `event` as the current result and forward it
    pub fn publish(&self, event: &ResultEvent) {
        let view = BroadcastView::from(event);
        let mut registry = self.lock();
        registry.view = view.clone();

        // A failed send means the subscriber is gone
        registry
            .subscribers
            .retain(|_, subscriber| subscriber.send(view.clone()).is_ok());

        debug!(
            holder = %view.name,
            subscribers = registry.subscribers.len(),
            "Updated election results"
        );
    }

    /// Consume the result stream until it ends or `cancel` fires
    pub async fn run(&self, results: ResultSubscriber, cancel: CancellationToken) -> Result<()> {
        let span = tracing::info_span!("official", component = "Official");
        self.consume(results, cancel).instrument(span).await
    }

    async fn consume(&self, mut results: ResultSubscriber, cancel: CancellationToken) -> Result<()> {
        info!("Official consuming election results");
        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(ElectorError::Cancelled),
                event = results.next() => match event {
                    Some(event) => self.publish(&event),
                    None => {
                        info!("Result stream closed");
                        break Ok(());
                    }
                },
            }
        };
        self.close();
        outcome
    }
}

impl ReadinessCheck for Official {
    fn component(&self) -> &'static str {
        "official"
    }

    fn check(&self) -> Result<()> {
        self.ready()
    }
}

/// Live feed of broadcast views for one consumer.
///
/// Dropping it unregisters the consumer.
pub struct Subscription {
    id: u64,
    views: WatchStream<BroadcastView>,
    official: Arc<Official>,
}

impl Subscription {
    /// Next view, `None` once the official has shut down.
    ///
    /// Views published while the caller was busy collapse into the latest.
    pub async fn recv(&mut self) -> Option<BroadcastView> {
        self.views.next().await
    }
}

impl Stream for Subscription {
    type Item = BroadcastView;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().views.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.official.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::result_stream;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn event(holder: &str) -> ResultEvent {
        ResultEvent {
            holder_identity: holder.to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_not_ready_without_result() {
        let official = Official::new();
        assert!(official.ready().is_err());
        assert!(official.snapshot().is_empty());

        official.publish(&event("app-0"));
        assert!(official.ready().is_ok());
        assert_eq!(official.snapshot().name, "app-0");
        assert_eq!(official.snapshot().last_update, "2024-03-01T12:00:00Z");
    }

    #[tokio::test]
    async fn test_subscriber_gets_current_view_first() {
        let official = Arc::new(Official::new());
        official.publish(&event("app-0"));

        let mut subscription = official.subscribe();
        assert_eq!(subscription.recv().await.unwrap().name, "app-0");

        official.publish(&event("app-1"));
        assert_eq!(subscription.recv().await.unwrap().name, "app-1");
    }

    #[tokio::test]
    async fn test_early_subscriber_gets_empty_view() {
        let official = Arc::new(Official::new());
        let mut subscription = official.subscribe();
        assert!(subscription.recv().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_subscription_unregisters() {
        let official = Arc::new(Official::new());
        let first = official.subscribe();
        let _second = official.subscribe();
        assert_eq!(official.subscriber_count(), 2);

        drop(first);
        assert_eq!(official.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let official = Arc::new(Official::new());
        let mut stalled = official.subscribe();
        let mut active = official.subscribe();
        assert!(active.recv().await.unwrap().is_empty());

        for holder in ["app-0", "app-1", "app-2", "app-3", "app-4"] {
            official.publish(&event(holder));
            assert_eq!(active.recv().await.unwrap().name, holder);
        }

        assert_eq!(official.snapshot().name, "app-4");
        assert_eq!(official.subscriber_count(), 2);

        // Catching up lands on the latest holder, not an old one
        assert_eq!(stalled.recv().await.unwrap().name, "app-4");
    }

    #[tokio::test]
    async fn test_consumes_result_stream() {
        let official = Arc::new(Official::new());
        let (publisher, results) = result_stream();
        let cancel = CancellationToken::new();

        let task = {
            let official = official.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { official.run(results, cancel).await })
        };

        let mut subscription = official.subscribe();
        assert!(subscription.recv().await.unwrap().is_empty());

        publisher.publish(event("app-0"));
        let view = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.name, "app-0");
        assert!(official.ready().is_ok());

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(ElectorError::Cancelled)));
        assert!(subscription.recv().await.is_none());
        assert_eq!(official.subscriber_count(), 0);

        let mut late = official.subscribe();
        assert_eq!(late.recv().await.unwrap().name, "app-0");
        assert!(late.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_ends_with_result_stream() {
        let official = Official::new();
        let (publisher, results) = result_stream();
        drop(publisher);

        assert!(official.run(results, CancellationToken::new()).await.is_ok());
    }
}
