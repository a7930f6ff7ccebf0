//! The cache agent: receives lifecycle events and routes them.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use elghella_common::RetryConfig;
use elghella_core::AgentConfig;
use elghella_net::{Fetcher, Request};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

use crate::clients::{Client, Clients};
use crate::lifecycle::{AgentState, CleanupReport, Lifecycle, PartitionManager};
use crate::notify::{Notifier, PushPayload};
use crate::router::{Route, RuleTable};
use crate::store::CacheStore;
use crate::strategy::{StrategyContext, StrategyOutcome};
use crate::sync::{OfflineQueue, SyncReport};
use crate::AgentError;

/// Events delivered by the host.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    Push { payload: Option<Vec<u8>> },
}

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Answer with this response.
    Respond(StrategyOutcome),
    /// Let the request go to the network untouched.
    Passthrough,
    /// Fail the request as a network error.
    NetworkError(String),
}

impl FetchDisposition {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, FetchDisposition::Passthrough)
    }
}

/// Result of a dispatched event.
#[derive(Debug)]
pub enum EventOutcome {
    Installed { precached: usize },
    Activated(CleanupReport),
    Fetch(FetchDisposition),
    /// `None` when the tag was not ours.
    Synced(Option<SyncReport>),
    Notified,
}

/// Signals sent back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSignal {
    StateChange(AgentState),
    /// Install succeeded; activate without waiting for old clients to close.
    SkipWaiting,
    ClientsClaimed(usize),
}

/// The offline cache agent.
pub struct CacheAgent {
    config: AgentConfig,
    lifecycle: Mutex<Lifecycle>,
    partitions: PartitionManager,
    rules: RuleTable,
    strategies: StrategyContext,
    clients: Mutex<Clients>,
    queue: OfflineQueue,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    fetch_timeout: Option<Duration>,
    signals: UnboundedSender<AgentSignal>,
}

impl CacheAgent {
    /// Build an agent over the given collaborators. The returned receiver
    /// carries [`AgentSignal`]s for the host.
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(Self, UnboundedReceiver<AgentSignal>), AgentError> {
        config.validate()?;

        let fetch_timeout = config.fetch_timeout_ms.map(Duration::from_millis);
        let partitions = PartitionManager::new(&config, store, fetcher.clone())?;
        let strategies =
            StrategyContext::new(partitions.live_partition(), fetcher.clone(), fetch_timeout);
        let (signals, receiver) = unbounded_channel();

        info!(
            scope = %config.scope,
            live = %partitions.live_name(),
            static_partition = %partitions.static_name(),
            "Cache agent created"
        );

        let agent = Self {
            rules: RuleTable::for_config(&config),
            config,
            lifecycle: Mutex::new(Lifecycle::new()),
            partitions,
            strategies,
            clients: Mutex::new(Clients::new()),
            queue: OfflineQueue::new(),
            fetcher,
            notifier,
            retry: RetryConfig::default(),
            fetch_timeout,
            signals,
        };
        Ok((agent, receiver))
    }

    /// Use a different retry policy for background sync.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn partitions(&self) -> &PartitionManager {
        &self.partitions
    }

    pub fn state(&self) -> AgentState {
        self.lifecycle().state()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clients_mut(&self) -> MutexGuard<'_, Clients> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, signal: AgentSignal) {
        if self.signals.send(signal).is_err() {
            trace!("No listener for agent signals");
        }
    }

    /// Apply a lifecycle step and announce the resulting state.
    fn transition<T>(&self, step: impl FnOnce(&mut Lifecycle) -> T) -> T {
        let (result, before, after) = {
            let mut lifecycle = self.lifecycle();
            let before = lifecycle.state();
            let result = step(&mut lifecycle);
            (result, before, lifecycle.state())
        };
        if before != after {
            self.emit(AgentSignal::StateChange(after));
        }
        result
    }

    // ==================== Events ====================

    /// Route one host event to its handler.
    pub async fn dispatch(&self, event: LifecycleEvent) -> Result<EventOutcome, AgentError> {
        match event {
            LifecycleEvent::Install => {
                let precached = self.install().await?;
                Ok(EventOutcome::Installed { precached })
            }
            LifecycleEvent::Activate => Ok(EventOutcome::Activated(self.activate().await?)),
            LifecycleEvent::Fetch(request) => Ok(EventOutcome::Fetch(self.handle_fetch(request).await)),
            LifecycleEvent::Sync { tag } => Ok(EventOutcome::Synced(self.handle_sync(&tag).await)),
            LifecycleEvent::Push { payload } => {
                self.handle_push(payload.as_deref());
                Ok(EventOutcome::Notified)
            }
        }
    }

    /// Precache the manifest. On failure nothing is committed and the agent
    /// returns to `Uninstalled`.
    pub async fn install(&self) -> Result<usize, AgentError> {
        self.transition(Lifecycle::begin_install)?;

        match self.partitions.precache().await {
            Ok(count) => {
                self.transition(|l| l.finish_install(true));
                self.emit(AgentSignal::SkipWaiting);
                info!(assets = count, "Install complete");
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.transition(|l| l.finish_install(false));
                Err(e)
            }
        }
    }

    /// Drop stale partitions, then claim every client.
    pub async fn activate(&self) -> Result<CleanupReport, AgentError> {
        self.transition(Lifecycle::begin_activate)?;

        let report = match self.partitions.cleanup().await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Could not list partitions, skipping cleanup");
                CleanupReport::default()
            }
        };

        let claimed = self.clients_mut().claim();
        self.emit(AgentSignal::ClientsClaimed(claimed));

        self.transition(Lifecycle::finish_activate);
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            claimed,
            "Activation complete"
        );
        Ok(report)
    }

    /// Intercept a request. Anything but an active agent passes it through.
    pub async fn handle_fetch(&self, request: Request) -> FetchDisposition {
        let state = self.state();
        if !state.can_intercept_fetch() {
            trace!(url = %request.url, %state, "Not active, passing through");
            return FetchDisposition::Passthrough;
        }

        match self.rules.classify(&request) {
            Route::Bypass => {
                trace!(url = %request.url, "Bypassed");
                FetchDisposition::Passthrough
            }
            Route::Strategy(kind) => match self.strategies.run(kind, &request).await {
                Ok(outcome) => FetchDisposition::Respond(outcome),
                Err(e) => {
                    debug!(url = %request.url, error = %e, "No cached or network response");
                    FetchDisposition::NetworkError(e.to_string())
                }
            },
        }
    }

    /// Flush queued actions when `tag` is the configured sync tag.
    pub async fn handle_sync(&self, tag: &str) -> Option<SyncReport> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return None;
        }
        info!(tag, "Background sync");
        Some(
            self.queue
                .flush(self.fetcher.as_ref(), &self.retry, self.fetch_timeout)
                .await,
        )
    }

    /// Show a notification for a push message.
    pub fn handle_push(&self, payload: Option<&[u8]>) {
        let (title, options) = PushPayload::parse(payload).to_notification(&self.config.notification);
        debug!(%title, tag = %options.tag, "Push received");
        self.notifier.show(&title, options);
    }

    // ==================== Clients & queue ====================

    /// Record a mutation made while offline, for the next background sync.
    pub async fn queue_offline_action(&self, request: Request) {
        self.queue.push(request).await;
    }

    pub async fn pending_actions(&self) -> usize {
        self.queue.len().await
    }

    pub fn add_client(&self, client: Client) {
        self.clients_mut().add(client);
    }

    pub fn remove_client(&self, id: &str) -> Option<Client> {
        self.clients_mut().remove(id)
    }

    /// Snapshot of known clients.
    pub fn clients(&self, include_uncontrolled: bool) -> Vec<Client> {
        self.clients_mut()
            .match_all(include_uncontrolled)
            .into_iter()
            .cloned()
            .collect()
    }
}
