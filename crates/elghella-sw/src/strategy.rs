//! Fetch strategies.
//!
//! Every strategy reads and writes the live partition only. Store failures
//! never reach the caller: a failed lookup counts as a miss and a failed
//! write is logged.

use std::sync::Arc;
use std::time::Duration;

use elghella_net::{Fetcher, NetError, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::fetch_with_timeout;
use crate::offline;
use crate::router::StrategyKind;
use crate::store::{Partition, RequestKey, StoredResponse};

/// The response handed back to the caller, plus the background refresh it
/// started, if any.
#[derive(Debug)]
pub struct StrategyOutcome {
    pub response: Response,
    pub revalidation: Option<JoinHandle<()>>,
}

impl StrategyOutcome {
    fn immediate(response: Response) -> Self {
        Self {
            response,
            revalidation: None,
        }
    }

    /// Wait for the background refresh to finish.
    pub async fn settle(self) -> Response {
        if let Some(handle) = self.revalidation {
            if let Err(e) = handle.await {
                warn!(error = %e, "Revalidation task aborted");
            }
        }
        self.response
    }
}

/// Collaborators shared by all strategies.
#[derive(Clone)]
pub struct StrategyContext {
    live: Partition,
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Option<Duration>,
}

impl StrategyContext {
    pub fn new(live: Partition, fetcher: Arc<dyn Fetcher>, fetch_timeout: Option<Duration>) -> Self {
        Self {
            live,
            fetcher,
            fetch_timeout,
        }
    }

    /// Run the given strategy. Only stale-while-revalidate can fail, when
    /// there is neither a cached entry nor a network response.
    pub async fn run(&self, kind: StrategyKind, request: &Request) -> Result<StrategyOutcome, NetError> {
        debug!(url = %request.url, strategy = %kind, "Dispatching");
        match kind {
            StrategyKind::CacheFirst => Ok(self.cache_first(request).await),
            StrategyKind::NetworkFirst => Ok(self.network_first(request).await),
            StrategyKind::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    /// Serve from cache, refreshing in the background. On a miss, fetch and
    /// store; offline misses get a plain-text 503.
    pub async fn cache_first(&self, request: &Request) -> StrategyOutcome {
        let key = RequestKey::from_request(request);

        if let Some(cached) = self.lookup(&key).await {
            debug!(key = %key, "Cache hit");
            return StrategyOutcome {
                response: cached,
                revalidation: Some(self.spawn_refresh(request)),
            };
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(key, &response).await;
                }
                StrategyOutcome::immediate(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Offline cache miss");
                StrategyOutcome::immediate(offline::offline_text(&request.url))
            }
        }
    }

    /// Prefer the network; fall back to the cache, then to an HTML 503.
    pub async fn network_first(&self, request: &Request) -> StrategyOutcome {
        let key = RequestKey::from_request(request);

        match self.fetch(request).await {
            Ok(response) => {
                if response.ok() {
                    self.store(key, &response).await;
                }
                StrategyOutcome::immediate(response)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Network failed, trying cache");
                let response = match self.lookup(&key).await {
                    Some(cached) => cached,
                    None => offline::offline_page(&request.url),
                };
                StrategyOutcome::immediate(response)
            }
        }
    }

    /// Serve the cached entry right away while refreshing it. Without one,
    /// wait for the network.
    pub async fn stale_while_revalidate(&self, request: &Request) -> Result<StrategyOutcome, NetError> {
        let key = RequestKey::from_request(request);

        if let Some(cached) = self.lookup(&key).await {
            return Ok(StrategyOutcome {
                response: cached,
                revalidation: Some(self.spawn_refresh(request)),
            });
        }

        let response = self.fetch(request).await?;
        if response.ok() {
            self.store(key, &response).await;
        }
        Ok(StrategyOutcome::immediate(response))
    }

    fn spawn_refresh(&self, request: &Request) -> JoinHandle<()> {
        let ctx = self.clone();
        let request = request.clone();
        tokio::spawn(async move { ctx.refresh(&request).await })
    }

    /// Background refresh. Errors end here.
    async fn refresh(&self, request: &Request) {
        match self.fetch(request).await {
            Ok(response) if response.ok() => {
                self.store(RequestKey::from_request(request), &response).await;
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Refresh not cached");
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Background refresh failed");
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        fetch_with_timeout(self.fetcher.as_ref(), request, self.fetch_timeout).await
    }

    async fn lookup(&self, key: &RequestKey) -> Option<Response> {
        let stored = match self.live.match_request(key).await {
            Ok(stored) => stored?,
            Err(e) => {
                warn!(key = %key, partition = %self.live.name(), error = %e, "Cache lookup failed");
                return None;
            }
        };
        match stored.to_response() {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    async fn store(&self, key: RequestKey, response: &Response) {
        let entry = StoredResponse::from_response(response);
        if let Err(e) = self.live.put(key.clone(), entry).await {
            warn!(key = %key, partition = %self.live.name(), error = %e, "Cache write failed");
        }
    }
}
