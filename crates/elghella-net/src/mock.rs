//! Scripted in-process fetcher.
//!
//! Routes are keyed by full URL. Unknown URLs fail like an unreachable host.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use tracing::trace;

use crate::{Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Outcome {
    Respond {
        status: StatusCode,
        content_type: String,
        body: Bytes,
    },
    Fail,
}

#[derive(Debug, Clone)]
struct Route {
    outcome: Outcome,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    routes: HashMap<String, Route>,
    offline: bool,
    log: Vec<Request>,
}

/// A [`Fetcher`] whose answers are set up ahead of time.
#[derive(Debug, Default)]
pub struct MockFetcher {
    state: Mutex<State>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, url: &str, route: Route) -> &Self {
        self.state().routes.insert(url.to_string(), route);
        self
    }

    /// Answer `url` with the given status and body.
    pub fn respond(&self, url: &str, status: u16, content_type: &str, body: &str) -> &Self {
        self.respond_after(url, Duration::ZERO, status, content_type, body)
    }

    /// Answer `url` after sleeping for `delay`.
    pub fn respond_after(
        &self,
        url: &str,
        delay: Duration,
        status: u16,
        content_type: &str,
        body: &str,
    ) -> &Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.route(
            url,
            Route {
                outcome: Outcome::Respond {
                    status,
                    content_type: content_type.to_string(),
                    body: Bytes::copy_from_slice(body.as_bytes()),
                },
                delay: (!delay.is_zero()).then_some(delay),
            },
        )
    }

    /// Make `url` fail with a network error.
    pub fn fail(&self, url: &str) -> &Self {
        self.route(
            url,
            Route {
                outcome: Outcome::Fail,
                delay: None,
            },
        )
    }

    /// Fail every request regardless of its route.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Number of fetches issued for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.state()
            .log
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.state().log.clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let (route, offline) = {
            let mut state = self.state();
            state.log.push(request.clone());
            (state.routes.get(request.url.as_str()).cloned(), state.offline)
        };
        trace!(url = %request.url, offline, "Mock fetch");

        let Some(route) = route else {
            return Err(NetError::RequestFailed(format!(
                "no route to {}",
                request.url
            )));
        };

        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        match route.outcome {
            _ if offline => Err(NetError::RequestFailed("offline".to_string())),
            Outcome::Fail => Err(NetError::RequestFailed(format!(
                "connection refused: {}",
                request.url
            ))),
            Outcome::Respond {
                status,
                content_type,
                body,
            } => Ok(Response::synthetic(
                request.url.clone(),
                status,
                &content_type,
                body,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_scripted_routes() {
        let fetcher = MockFetcher::new();
        fetcher
            .respond("https://a.test/ok", 200, "text/plain", "hello")
            .fail("https://a.test/down");

        let ok = fetcher.fetch(&get("https://a.test/ok")).await.unwrap();
        assert_eq!(ok.status, StatusCode::OK);
        assert_eq!(ok.text().unwrap(), "hello");

        assert!(fetcher.fetch(&get("https://a.test/down")).await.is_err());
        assert!(fetcher.fetch(&get("https://a.test/unknown")).await.is_err());
        assert_eq!(fetcher.calls("https://a.test/ok"), 1);
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_offline_overrides_routes() {
        let fetcher = MockFetcher::new();
        fetcher.respond("https://a.test/ok", 200, "text/plain", "hello");
        fetcher.set_offline(true);
        assert!(fetcher.fetch(&get("https://a.test/ok")).await.is_err());
        fetcher.set_offline(false);
        assert!(fetcher.fetch(&get("https://a.test/ok")).await.is_ok());
    }
}
