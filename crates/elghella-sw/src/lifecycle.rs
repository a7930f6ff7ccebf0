//! Agent lifecycle and partition management.

use std::sync::Arc;
use std::time::Duration;

use elghella_core::AgentConfig;
use elghella_net::{Fetcher, Request};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch_with_timeout;
use crate::store::{CacheStore, Partition, RequestKey, StoredResponse};
use crate::AgentError;

// ==================== State Machine ====================

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AgentState {
    /// Never installed, or the last install failed.
    #[default]
    Uninstalled,
    /// Install event in flight.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activate event in flight.
    Activating,
    /// Active and intercepting fetches.
    Activated,
}

impl AgentState {
    /// Only an active agent intercepts fetches.
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, AgentState::Activated)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Uninstalled => write!(f, "uninstalled"),
            AgentState::Installing => write!(f, "installing"),
            AgentState::Installed => write!(f, "installed"),
            AgentState::Activating => write!(f, "activating"),
            AgentState::Activated => write!(f, "activated"),
        }
    }
}

/// Guarded lifecycle transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: AgentState,
    skip_waiting: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AgentState::Uninstalled,
            skip_waiting: false,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Whether the installed agent asked to skip the waiting phase.
    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting
    }

    fn set_state(&mut self, state: AgentState) {
        debug!(from = %self.state, to = %state, "Lifecycle transition");
        self.state = state;
    }

    /// Uninstalled | Installed → Installing.
    pub fn begin_install(&mut self) -> Result<(), AgentError> {
        match self.state {
            AgentState::Uninstalled | AgentState::Installed => {
                self.skip_waiting = false;
                self.set_state(AgentState::Installing);
                Ok(())
            }
            actual => Err(AgentError::InvalidState {
                expected: "uninstalled or installed",
                actual,
            }),
        }
    }

    /// Installing → Installed on success, back to Uninstalled on failure.
    pub fn finish_install(&mut self, succeeded: bool) {
        if self.state != AgentState::Installing {
            warn!(state = %self.state, "finish_install outside of install");
            return;
        }
        if succeeded {
            self.skip_waiting = true;
            self.set_state(AgentState::Installed);
        } else {
            self.set_state(AgentState::Uninstalled);
        }
    }

    /// Installed → Activating.
    pub fn begin_activate(&mut self) -> Result<(), AgentError> {
        match self.state {
            AgentState::Installed => {
                self.set_state(AgentState::Activating);
                Ok(())
            }
            actual => Err(AgentError::InvalidState {
                expected: "installed",
                actual,
            }),
        }
    }

    /// Activating → Activated.
    pub fn finish_activate(&mut self) {
        if self.state == AgentState::Activating {
            self.set_state(AgentState::Activated);
        } else {
            warn!(state = %self.state, "finish_activate outside of activation");
        }
    }
}

// ==================== Partition Manager ====================

/// Result of the activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub retained: Vec<String>,
}

/// Creates, seeds and prunes the agent's partitions.
pub struct PartitionManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    live: String,
    static_name: String,
    manifest: Vec<Url>,
    fetch_timeout: Option<Duration>,
}

impl PartitionManager {
    pub fn new(
        config: &AgentConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            store,
            fetcher,
            live: config.live_partition(),
            static_name: config.static_partition(),
            manifest: config.precache_urls()?,
            fetch_timeout: config.fetch_timeout_ms.map(Duration::from_millis),
        })
    }

    pub fn live_name(&self) -> &str {
        &self.live
    }

    pub fn static_name(&self) -> &str {
        &self.static_name
    }

    pub fn manifest(&self) -> &[Url] {
        &self.manifest
    }

    /// Partitions that survive activation.
    pub fn is_current(&self, name: &str) -> bool {
        name == self.live || name == self.static_name
    }

    /// Handle to the live partition.
    pub fn live_partition(&self) -> Partition {
        Partition::lazy(self.store.clone(), self.live.clone())
    }

    /// Fetch every manifest asset and commit them to the static partition in
    /// one step. Any failed or non-OK fetch aborts with nothing committed.
    pub async fn precache(&self) -> Result<usize, AgentError> {
        let partition = Partition::open(self.store.clone(), self.static_name.clone()).await?;

        let fetches = self.manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let result = fetch_with_timeout(self.fetcher.as_ref(), &request, self.fetch_timeout).await;
            (url, result)
        });

        let mut entries = Vec::with_capacity(self.manifest.len());
        for (url, result) in join_all(fetches).await {
            match result {
                Ok(response) if response.ok() => {
                    entries.push((RequestKey::get(url), StoredResponse::from_response(&response)));
                }
                Ok(response) => {
                    return Err(AgentError::InstallFailed(format!(
                        "{} returned {}",
                        url, response.status
                    )));
                }
                Err(e) => {
                    return Err(AgentError::InstallFailed(format!("{}: {}", url, e)));
                }
            }
        }

        let count = entries.len();
        partition.put_all(entries).await?;
        info!(partition = %self.static_name, assets = count, "Precached critical assets");
        Ok(count)
    }

    /// Delete every partition that is neither live nor static. A failed
    /// delete is logged and the rest continue.
    pub async fn cleanup(&self) -> Result<CleanupReport, AgentError> {
        let mut report = CleanupReport::default();

        for name in self.store.partition_names().await? {
            if self.is_current(&name) {
                report.retained.push(name);
                continue;
            }
            match self.store.delete_partition(&name).await {
                Ok(_) => {
                    info!(partition = %name, "Deleted stale partition");
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(partition = %name, error = %e, "Failed to delete stale partition");
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }
}
