//! Result stream connecting a candidate to its official
//!
//! The stream carries state, not a log: only the most recent holder
//! matters, so it keeps just the newest event. Publishing never blocks and
//! never fails, whether or not anyone is listening.

use elector_types::ResultEvent;
use tokio::sync::watch;

/// Create a connected publisher/subscriber pair
pub fn result_stream() -> (ResultPublisher, ResultSubscriber) {
    let (tx, rx) = watch::channel(None);
    (ResultPublisher { tx }, ResultSubscriber { rx })
}

/// Producing half, owned by the candidate
#[derive(Debug)]
pub struct ResultPublisher {
    tx: watch::Sender<Option<ResultEvent>>,
}

impl ResultPublisher {
    /// Replace the current result, waking every subscriber
    pub fn publish(&self, event: ResultEvent) {
        self.tx.send_replace(Some(event));
    }

    /// Open another consuming half
    pub fn subscribe(&self) -> ResultSubscriber {
        ResultSubscriber {
            rx: self.tx.subscribe(),
        }
    }
}

/// Consuming half
#[derive(Debug, Clone)]
pub struct ResultSubscriber {
    rx: watch::Receiver<Option<ResultEvent>>,
}

impl ResultSubscriber {
    /// Wait for a result newer than the last one returned.
    ///
    /// Intermediate results published while the caller was busy are
    /// skipped. Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<ResultEvent> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(event) = self.rx.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    /// Most recent result without waiting
    pub fn latest(&self) -> Option<ResultEvent> {
        self.rx.borrow().clone()
    }
}
