//! Network registry sources.
//!
//! The registry answers "which networks exist for this mode". The
//! production source fetches a JSON document mapping network name to
//! chain metadata; localhost and tests inject a static list.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::types::{Network, NetworkMode, RebalancerError};

/// Source of candidate networks for a mode.
#[async_trait]
pub trait NetworkRegistry: Send + Sync {
    async fn fetch(&self, mode: NetworkMode) -> Result<Vec<Network>, RebalancerError>;
}

// ---------------------------------------------------------------------------
// Registry document shape
// ---------------------------------------------------------------------------

/// One network record in the registry JSON (keyed by network name).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub chain_id: u64,
    pub chain_selector: String,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
}

/// Convert a registry document into networks for a mode, sorted by
/// name so downstream diffing and logging are deterministic.
pub fn entries_to_networks(
    entries: HashMap<String, RegistryEntry>,
    mode: NetworkMode,
) -> Vec<Network> {
    let mut networks: Vec<Network> = entries
        .into_iter()
        .map(|(name, entry)| Network {
            name: name.to_lowercase(),
            chain_id: entry.chain_id,
            selector: entry.chain_selector,
            mode,
            rpc_urls: entry.rpc_urls,
        })
        .collect();
    networks.sort_by(|a, b| a.name.cmp(&b.name));
    networks
}

// ---------------------------------------------------------------------------
// HTTP registry
// ---------------------------------------------------------------------------

/// Fetches the network registry document over HTTP.
pub struct HttpNetworkRegistry {
    http: Client,
    url: String,
}

impl HttpNetworkRegistry {
    pub fn new(url: &str) -> Result<Self, RebalancerError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RebalancerError::ManifestFetchFailed(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl NetworkRegistry for HttpNetworkRegistry {
    async fn fetch(&self, mode: NetworkMode) -> Result<Vec<Network>, RebalancerError> {
        let entries: HashMap<String, RegistryEntry> = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RebalancerError::ManifestFetchFailed(format!("{}: {e}", self.url)))?
            .json()
            .await
            .map_err(|e| RebalancerError::ManifestParseFailed(format!("{}: {e}", self.url)))?;

        let networks = entries_to_networks(entries, mode);
        debug!(url = %self.url, count = networks.len(), "Network registry fetched");
        Ok(networks)
    }
}

// ---------------------------------------------------------------------------
// Static registry
// ---------------------------------------------------------------------------

/// A fixed network list, for localhost mode and tests.
pub struct StaticNetworkRegistry {
    networks: Vec<Network>,
}

impl StaticNetworkRegistry {
    pub fn new(networks: Vec<Network>) -> Self {
        Self { networks }
    }
}

#[async_trait]
impl NetworkRegistry for StaticNetworkRegistry {
    async fn fetch(&self, mode: NetworkMode) -> Result<Vec<Network>, RebalancerError> {
        Ok(self
            .networks
            .iter()
            .filter(|n| n.mode == mode)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
