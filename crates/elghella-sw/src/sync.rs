//! Background sync: replay of actions recorded while offline.

use std::collections::VecDeque;
use std::time::Duration;

use elghella_common::{retry_with_backoff, RetryConfig};
use elghella_net::{Fetcher, NetError, Request};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fetch_with_timeout;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub delivered: usize,
    /// Still failing; kept for the next sync.
    pub requeued: usize,
    /// Rejected by the server with a client error.
    pub dropped: usize,
}

enum Delivery {
    Delivered,
    Rejected(u16),
    Failed(NetError),
}

/// FIFO of pending non-GET requests.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    pending: Mutex<VecDeque<Request>>,
    flush_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, request: Request) {
        debug!(method = %request.method, url = %request.url, "Queued offline action");
        self.pending.lock().await.push_back(request);
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Replay every queued request in order. Concurrent flushes run one
    /// after another.
    pub async fn flush(
        &self,
        fetcher: &dyn Fetcher,
        retry: &RetryConfig,
        timeout: Option<Duration>,
    ) -> SyncReport {
        let _guard = self.flush_lock.lock().await;
        let batch: Vec<Request> = self.pending.lock().await.drain(..).collect();
        let mut report = SyncReport::default();
        if batch.is_empty() {
            return report;
        }

        let mut retained = Vec::new();
        for request in batch {
            match deliver(fetcher, &request, retry, timeout).await {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Rejected(status) => {
                    warn!(url = %request.url, status, "Dropping rejected offline action");
                    report.dropped += 1;
                }
                Delivery::Failed(e) => {
                    warn!(url = %request.url, error = %e, "Offline action still failing");
                    retained.push(request);
                }
            }
        }

        report.requeued = retained.len();
        if !retained.is_empty() {
            // Keep original order ahead of anything queued during the flush.
            let mut pending = self.pending.lock().await;
            for request in retained.into_iter().rev() {
                pending.push_front(request);
            }
        }

        info!(
            delivered = report.delivered,
            requeued = report.requeued,
            dropped = report.dropped,
            "Offline queue flushed"
        );
        report
    }
}

async fn deliver(
    fetcher: &dyn Fetcher,
    request: &Request,
    retry: &RetryConfig,
    timeout: Option<Duration>,
) -> Delivery {
    let result = retry_with_backoff(retry, move || async move {
        let response = fetch_with_timeout(fetcher, request, timeout).await?;
        if response.status.is_server_error() {
            return Err(NetError::RequestFailed(format!(
                "server returned {}",
                response.status
            )));
        }
        Ok(response)
    })
    .await;

    match result {
        Ok(response) if response.status.is_client_error() => {
            Delivery::Rejected(response.status.as_u16())
        }
        Ok(_) => Delivery::Delivered,
        Err(e) => Delivery::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use elghella_net::mock::MockFetcher;
    use url::Url;

    fn post(url: &str) -> Request {
        Request::post(Url::parse(url).unwrap(), Bytes::from_static(b"{}"))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_flush_delivers_and_empties() {
        let fetcher = MockFetcher::new();
        fetcher.respond("https://elghella.test/api/orders", 201, "application/json", "{}");
        let queue = OfflineQueue::new();
        queue.push(post("https://elghella.test/api/orders")).await;
        queue.push(post("https://elghella.test/api/orders")).await;

        let report = queue.flush(&fetcher, &fast_retry(), None).await;
        assert_eq!(report.delivered, 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failures_are_requeued_in_order() {
        let fetcher = MockFetcher::new();
        fetcher
            .fail("https://elghella.test/api/a")
            .respond("https://elghella.test/api/b", 502, "text/plain", "bad gateway")
            .respond("https://elghella.test/api/c", 200, "application/json", "{}");
        let queue = OfflineQueue::new();
        for path in ["a", "b", "c"] {
            queue.push(post(&format!("https://elghella.test/api/{path}"))).await;
        }

        let report = queue.flush(&fetcher, &fast_retry(), None).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.requeued, 2);
        // Two attempts each for the failing ones.
        assert_eq!(fetcher.calls("https://elghella.test/api/a"), 2);
        assert_eq!(fetcher.calls("https://elghella.test/api/b"), 2);

        let pending = queue.pending.lock().await;
        assert_eq!(pending[0].url.path(), "/api/a");
        assert_eq!(pending[1].url.path(), "/api/b");
    }

    #[tokio::test]
    async fn test_client_errors_are_dropped() {
        let fetcher = MockFetcher::new();
        fetcher.respond("https://elghella.test/api/bad", 422, "application/json", "{}");
        let queue = OfflineQueue::new();
        queue.push(post("https://elghella.test/api/bad")).await;

        let report = queue.flush(&fetcher, &fast_retry(), None).await;
        assert_eq!(report.dropped, 1);
        assert_eq!(fetcher.calls("https://elghella.test/api/bad"), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_flush() {
        let fetcher = MockFetcher::new();
        let report = OfflineQueue::new().flush(&fetcher, &fast_retry(), None).await;
        assert_eq!(report, SyncReport::default());
        assert!(fetcher.requests().is_empty());
    }
}
