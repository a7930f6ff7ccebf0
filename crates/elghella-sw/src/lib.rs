//! # Elghella Service Worker
//!
//! The background cache agent of the Elghella marketplace.
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (partition cleanup, clients claim)
//! - **Routing**: a declarative, ordered rule table picks a strategy per request
//! - **Strategies**: cache-first, network-first, stale-while-revalidate
//! - **Cache Store**: injected storage, in-memory or SQLite
//! - **Background sync**: replays queued offline actions
//! - **Push**: coalescing notifications
//!
//! ## Architecture
//!
//! ```text
//! CacheAgent
//!     ├── Lifecycle (Uninstalled → Installing → Installed → Activating → Activated)
//!     ├── PartitionManager
//!     │       ├── live partition    "{prefix}-{version}"
//!     │       └── static partition  "{prefix}-static-{version}"
//!     ├── RuleTable → StrategyKind
//!     ├── StrategyContext ── CacheStore + Fetcher
//!     ├── Clients
//!     ├── OfflineQueue
//!     └── Notifier
//! ```

use std::time::Duration;

use elghella_common::with_timeout;
use elghella_core::ElghellaError;
use elghella_net::{Fetcher, NetError, Request, Response};
use thiserror::Error;

pub mod agent;
pub mod clients;
pub mod lifecycle;
pub mod notify;
pub mod offline;
pub mod router;
pub mod store;
pub mod strategy;
pub mod sync;

pub use agent::{AgentSignal, CacheAgent, EventOutcome, FetchDisposition, LifecycleEvent};
pub use clients::{Client, ClientType, Clients};
pub use lifecycle::{AgentState, CleanupReport, Lifecycle, PartitionManager};
pub use notify::{LogNotifier, NotificationOptions, Notifier, PushPayload};
pub use router::{PatternRule, RequestMatcher, Route, RuleTable, StrategyKind};
pub use store::{
    CacheStore, MemoryCacheStore, Partition, RequestKey, SqliteCacheStore, StoredResponse,
};
pub use strategy::{StrategyContext, StrategyOutcome};
pub use sync::{OfflineQueue, SyncReport};

// ==================== Errors ====================

/// Errors raised by a cache store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the cache agent's lifecycle operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Invalid agent state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: AgentState,
    },

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Configuration error: {0}")]
    Config(#[from] ElghellaError),
}

// ==================== Helpers ====================

/// Fetch through `fetcher`, treating an elapsed timeout as a network failure.
pub(crate) async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &Request,
    timeout: Option<Duration>,
) -> Result<Response, NetError> {
    match with_timeout(timeout, fetcher.fetch(request)).await {
        Ok(result) => result,
        Err(elghella_common::CommonError::Timeout(limit)) => Err(NetError::Timeout(limit)),
    }
}
