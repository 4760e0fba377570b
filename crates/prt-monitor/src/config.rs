//! Monitor configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use prt_client::DEFAULT_FETCH_TIMEOUT_MS;

pub const DEFAULT_DOMAIN_REFRESH_SECS: u64 = 3600;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Endpoint serving `{epochIdBase64}.json`
    pub key_base_url: String,
    /// Domain classification document; `None` disables classification
    #[serde(default)]
    pub domain_list_url: Option<String>,
    #[serde(default = "default_key_fetch_timeout_ms")]
    pub key_fetch_timeout_ms: u64,
    #[serde(default = "default_domain_refresh_secs")]
    pub domain_refresh_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_enable_metrics")]
    pub enable_metrics: bool,
}

fn default_key_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

fn default_domain_refresh_secs() -> u64 {
    DEFAULT_DOMAIN_REFRESH_SECS
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}

fn default_enable_metrics() -> bool {
    true
}

impl MonitorConfig {
    /// Defaults around a key endpoint
    pub fn new(key_base_url: impl Into<String>) -> Self {
        Self {
            key_base_url: key_base_url.into(),
            domain_list_url: None,
            key_fetch_timeout_ms: default_key_fetch_timeout_ms(),
            domain_refresh_secs: default_domain_refresh_secs(),
            listen_addr: default_listen_addr(),
            enable_metrics: default_enable_metrics(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.key_fetch_timeout_ms)
    }

    pub fn domain_refresh_period(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.domain_refresh_secs.max(1))
    }
}
