//! Strategy selection.
//!
//! A [`RuleTable`] is an ordered list of [`PatternRule`]s plus a fallback.
//! The first rule whose matcher accepts the request decides the [`Route`].
//! Selection is a pure function of `(method, url, destination)`.

use elghella_core::AgentConfig;
use elghella_net::{Destination, Request};
use http::Method;
use tracing::trace;
use url::Url;

/// File extensions served cache-first.
pub const STATIC_ASSET_SUFFIXES: &[&str] = &[".js", ".css", ".html"];

/// Path segments served cache-first.
pub const CACHE_FIRST_SEGMENTS: &[&str] = &["/assets/", "/api/"];

/// Caching strategy applied to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::CacheFirst => write!(f, "cache-first"),
            StrategyKind::NetworkFirst => write!(f, "network-first"),
            StrategyKind::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Not intercepted; default network handling.
    Bypass,
    Strategy(StrategyKind),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Bypass => write!(f, "bypass"),
            Route::Strategy(kind) => write!(f, "{}", kind),
        }
    }
}

/// Request shape a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMatcher {
    /// Method differs from the given one.
    MethodIsNot(Method),
    /// Hostname contains `host` and path contains `path`.
    HostAndPath { host: String, path: String },
    /// Path ends with the suffix.
    PathSuffix(String),
    /// Path contains the fragment.
    PathContains(String),
    /// Request destination equals the given one.
    Destination(Destination),
    /// Any inner matcher accepts.
    AnyOf(Vec<RequestMatcher>),
}

impl RequestMatcher {
    pub fn matches(&self, method: &Method, url: &Url, destination: Destination) -> bool {
        match self {
            RequestMatcher::MethodIsNot(expected) => method != expected,
            RequestMatcher::HostAndPath { host, path } => {
                url.host_str().is_some_and(|h| h.contains(host.as_str()))
                    && url.path().contains(path.as_str())
            }
            RequestMatcher::PathSuffix(suffix) => url.path().ends_with(suffix.as_str()),
            RequestMatcher::PathContains(fragment) => url.path().contains(fragment.as_str()),
            RequestMatcher::Destination(expected) => destination == *expected,
            RequestMatcher::AnyOf(inner) => {
                inner.iter().any(|m| m.matches(method, url, destination))
            }
        }
    }
}

/// Rule mapping a request shape to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRule {
    pub name: &'static str,
    pub matcher: RequestMatcher,
    pub route: Route,
}

/// Ordered rules with a fallback route.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<PatternRule>,
    fallback: Route,
}

impl RuleTable {
    /// Empty table routing everything to `fallback`.
    pub fn new(fallback: Route) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule. Earlier rules take precedence.
    pub fn with_rule(mut self, name: &'static str, matcher: RequestMatcher, route: Route) -> Self {
        self.rules.push(PatternRule {
            name,
            matcher,
            route,
        });
        self
    }

    /// The agent's standard table.
    pub fn for_config(config: &AgentConfig) -> Self {
        let static_assets = STATIC_ASSET_SUFFIXES
            .iter()
            .map(|s| RequestMatcher::PathSuffix(s.to_string()))
            .chain(
                CACHE_FIRST_SEGMENTS
                    .iter()
                    .map(|s| RequestMatcher::PathContains(s.to_string())),
            )
            .collect();

        Self::new(Route::Strategy(StrategyKind::StaleWhileRevalidate))
            .with_rule(
                "non-get",
                RequestMatcher::MethodIsNot(Method::GET),
                Route::Bypass,
            )
            .with_rule(
                "realtime",
                RequestMatcher::HostAndPath {
                    host: config.realtime.host_fragment.clone(),
                    path: config.realtime.path_fragment.clone(),
                },
                Route::Bypass,
            )
            .with_rule(
                "static-assets",
                RequestMatcher::AnyOf(static_assets),
                Route::Strategy(StrategyKind::CacheFirst),
            )
            .with_rule(
                "documents",
                RequestMatcher::Destination(Destination::Document),
                Route::Strategy(StrategyKind::NetworkFirst),
            )
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn fallback(&self) -> Route {
        self.fallback
    }

    /// Route for a request shape.
    pub fn select(&self, method: &Method, url: &Url, destination: Destination) -> Route {
        for rule in &self.rules {
            if rule.matcher.matches(method, url, destination) {
                trace!(url = %url, rule = rule.name, route = %rule.route, "Rule matched");
                return rule.route;
            }
        }
        self.fallback
    }

    pub fn classify(&self, request: &Request) -> Route {
        self.select(&request.method, &request.url, request.destination)
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::for_config(&AgentConfig::default())
    }
}
