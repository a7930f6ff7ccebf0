//! Cache agent configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{ElghellaError, ElghellaResult};

/// Prefix shared by every partition the agent owns.
pub const DEFAULT_CACHE_PREFIX: &str = "elghella";

/// Version tag baked into partition names. Bumping it orphans old partitions.
pub const DEFAULT_CACHE_VERSION: &str = "v1";

/// Critical assets seeded into the static partition on install.
pub const DEFAULT_PRECACHE: &[&str] = &["/", "/manifest.json", "/logo.svg", "/favicon.ico"];

/// Tag that triggers the offline action flush.
pub const DEFAULT_SYNC_TAG: &str = "background-sync";

/// Deduplication tag shared by all push notifications.
pub const DEFAULT_NOTIFICATION_TAG: &str = "elghella-notification";

/// Cache agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin (and path scope) the agent controls. Manifest paths resolve against it.
    pub scope: Url,

    /// Partition name prefix
    pub cache_prefix: String,

    /// Partition version tag
    pub version: String,

    /// Root-relative paths of critical assets
    pub precache: Vec<String>,

    /// Background sync tag
    pub sync_tag: String,

    /// Push notification settings
    pub notification: NotificationConfig,

    /// Streaming traffic that must never be intercepted
    pub realtime: RealtimeConfig,

    /// Network fetch timeout in milliseconds. Unset means no timeout.
    pub fetch_timeout_ms: Option<u64>,

    /// Directory holding the durable cache database
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Icon shown with each notification
    pub icon: String,

    /// Monochrome badge
    pub badge: String,

    /// Constant tag so rapid pushes coalesce
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Hostname fragment identifying the backend
    pub host_fragment: String,

    /// Path fragment identifying the streaming endpoint
    pub path_fragment: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            scope: Url::parse("http://localhost:3000/").expect("static scope URL is valid"),
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            version: DEFAULT_CACHE_VERSION.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect(),
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            notification: NotificationConfig::default(),
            realtime: RealtimeConfig::default(),
            fetch_timeout_ms: None,
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("elghella"),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            tag: DEFAULT_NOTIFICATION_TAG.to_string(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            host_fragment: "supabase".to_string(),
            path_fragment: "realtime".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> ElghellaResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would produce unusable partition names or manifest URLs.
    pub fn validate(&self) -> ElghellaResult<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(ElghellaError::config("cache_prefix must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(ElghellaError::config("version must not be empty"));
        }
        if self.sync_tag.is_empty() {
            return Err(ElghellaError::config("sync_tag must not be empty"));
        }
        if self.realtime.host_fragment.is_empty() || self.realtime.path_fragment.is_empty() {
            // An empty fragment would match every URL and bypass all traffic.
            return Err(ElghellaError::config("realtime fragments must not be empty"));
        }
        if let Some(path) = self.precache.iter().find(|p| !p.starts_with('/')) {
            return Err(ElghellaError::config(format!(
                "precache entry '{}' is not root-relative",
                path
            )));
        }
        Ok(())
    }

    /// Name of the general runtime partition.
    pub fn live_partition(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    /// Name of the pre-seeded critical asset partition.
    pub fn static_partition(&self) -> String {
        format!("{}-static-{}", self.cache_prefix, self.version)
    }

    /// Resolve the manifest against the scope.
    pub fn precache_urls(&self) -> ElghellaResult<Vec<Url>> {
        self.precache
            .iter()
            .map(|path| self.scope.join(path).map_err(ElghellaError::from))
            .collect()
    }

    /// Location of the SQLite cache database.
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("cache.sqlite3")
    }
}
