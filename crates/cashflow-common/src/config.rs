//! Worker configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::ConfigError;

/// Configuration shared by the background worker and the page-side clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application origin. Only responses from this origin are "basic".
    pub origin: Url,

    /// Version tag of the current cache generation.
    pub cache_version: String,

    /// Routes fetched and stored eagerly on install, in order.
    pub precache: Vec<String>,

    /// Home route.
    pub home_route: String,

    /// Fallback target for notification clicks.
    pub dashboard_route: String,

    /// Network timeout in seconds
    pub network_timeout_secs: u64,

    /// Deferred synchronization settings
    pub sync: SyncConfig,

    /// Push server endpoints
    pub push: PushEndpoints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync tag that triggers the transaction flush
    pub tag: String,

    /// Server route receiving queued writes
    pub endpoint: String,

    /// Location of the durable pending-write queue
    pub queue_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushEndpoints {
    pub subscribe: String,
    pub unsubscribe: String,
    pub test: String,
}

impl WorkerConfig {
    /// Load a configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every configured route is origin-relative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let routes = self
            .precache
            .iter()
            .chain([
                &self.home_route,
                &self.dashboard_route,
                &self.sync.endpoint,
                &self.push.subscribe,
                &self.push.unsubscribe,
                &self.push.test,
            ]);
        for route in routes {
            if !route.starts_with('/') {
                return Err(ConfigError::InvalidRoute(route.clone()));
            }
        }
        Ok(())
    }

    /// Resolve a route (or absolute URL) against the application origin.
    pub fn resolve(&self, route: &str) -> Result<Url, url::ParseError> {
        self.origin.join(route)
    }

    /// Whether `url` belongs to the application origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Network timeout as a duration.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:8000/").expect("static origin is valid"),
            cache_version: "cashflow-v1".to_string(),
            precache: vec![
                "/".to_string(),
                "/static/css/style.css".to_string(),
                "/accounts/login/".to_string(),
                "/core/dashboard/".to_string(),
            ],
            home_route: "/".to_string(),
            dashboard_route: "/core/dashboard/".to_string(),
            network_timeout_secs: 30,
            sync: SyncConfig::default(),
            push: PushEndpoints::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "sync-transactions".to_string(),
            endpoint: "/api/transactions/sync/".to_string(),
            queue_path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cashflow")
                .join("pending-writes.json"),
        }
    }
}

impl Default for PushEndpoints {
    fn default() -> Self {
        Self {
            subscribe: "/api/push/subscribe/".to_string(),
            unsubscribe: "/api/push/unsubscribe/".to_string(),
            test: "/api/push/test/".to_string(),
        }
    }
}
