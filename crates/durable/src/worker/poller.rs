//! Work item polling with fixed backoff
//!
//! An empty or failed fetch is never an error to the worker: it waits one
//! backoff interval and asks again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::queue::{WorkItem, WorkSource};

/// Fetches items for one worker and sleeps between empty polls
pub struct SourcePoller {
    source: Arc<dyn WorkSource>,
    backoff: Duration,
    stop: CancellationToken,
    polls: u64,
    backoffs: u64,
}

impl SourcePoller {
    /// Create a new poller
    pub fn new(source: Arc<dyn WorkSource>, backoff: Duration, stop: CancellationToken) -> Self {
        Self {
            source,
            backoff,
            stop,
            polls: 0,
            backoffs: 0,
        }
    }

    /// Ask the source for the next item
    pub async fn poll(&mut self) -> Option<WorkItem> {
        self.polls += 1;
        let item = self.source.fetch_next().await;
        if item.is_none() {
            trace!(backoff_ms = self.backoff.as_millis(), "No work item available");
        }
        item
    }

    /// Sleep for the backoff interval
    ///
    /// Returns `true` if a stop was requested, either before the sleep (in
    /// which case no sleep happens) or while sleeping.
    pub async fn wait(&mut self) -> bool {
        if self.is_shutdown() {
            return true;
        }

        self.backoffs += 1;
        tokio::select! {
            _ = tokio::time::sleep(self.backoff) => false,
            _ = self.stop.cancelled() => {
                debug!("Stop requested during backoff");
                true
            }
        }
    }

    /// Check if a stop has been requested
    pub fn is_shutdown(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Change the backoff interval
    pub fn set_backoff(&mut self, backoff: Duration) {
        self.backoff = backoff;
    }

    /// The configured backoff interval
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Number of fetches issued
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Number of backoff sleeps started
    pub fn backoffs(&self) -> u64 {
        self.backoffs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Always(Option<WorkItem>);

    #[async_trait]
    impl WorkSource for Always {
        async fn fetch_next(&self) -> Option<WorkItem> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_poll_counts() {
        let mut poller = SourcePoller::new(
            Arc::new(Always(Some(WorkItem::new(1, json!({}))))),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        assert_eq!(poller.poll().await.unwrap().id, 1);
        assert_eq!(poller.poll().await.unwrap().id, 1);
        assert_eq!(poller.polls(), 2);
        assert_eq!(poller.backoffs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_full_backoff() {
        let mut poller = SourcePoller::new(
            Arc::new(Always(None)),
            Duration::from_secs(5),
            CancellationToken::new(),
        );

        assert!(poller.poll().await.is_none());
        let started = tokio::time::Instant::now();
        assert!(!poller.wait().await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(poller.backoffs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_skipped_once_stopped() {
        let stop = CancellationToken::new();
        let mut poller =
            SourcePoller::new(Arc::new(Always(None)), Duration::from_secs(5), stop.clone());

        stop.cancel();
        let started = tokio::time::Instant::now();
        assert!(poller.wait().await);
        assert!(started.elapsed() < Duration::from_millis(1));
        assert_eq!(poller.backoffs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_stop() {
        let stop = CancellationToken::new();
        let mut poller = SourcePoller::new(
            Arc::new(Always(None)),
            Duration::from_secs(60),
            stop.clone(),
        );

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            stop.cancel();
        });

        let started = tokio::time::Instant::now();
        assert!(poller.wait().await);
        assert!(started.elapsed() < Duration::from_secs(60));
        canceller.await.unwrap();
    }
}
