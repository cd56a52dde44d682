//! Network coordinator.
//!
//! Maintains the set of active networks: candidates from the registry,
//! filtered against the deployment snapshot and the configured
//! whitelist/blacklist. Changes are detected by chain-id set diff and
//! fanned out to listeners sequentially, in registration order.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::coordinator::deployment::DeploymentCoordinator;
use crate::registry::NetworkRegistry;
use crate::types::{Deployments, Network, NetworkMode, RebalancerError};

/// Receives the new active set after every change.
#[async_trait]
pub trait NetworkUpdateListener: Send + Sync {
    /// Logical identity; registering the same name twice is a no-op.
    fn name(&self) -> &str;

    async fn on_networks_updated(&self, networks: &[Network]) -> Result<(), RebalancerError>;
}

/// Filter configuration for the active set.
#[derive(Debug, Clone)]
pub struct NetworkCoordinatorConfig {
    pub mode: NetworkMode,
    /// When non-empty, only these chain ids are eligible.
    pub whitelist: Vec<u64>,
    pub blacklist: Vec<u64>,
}

pub struct NetworkCoordinator {
    registry: Arc<dyn NetworkRegistry>,
    deployments: Arc<DeploymentCoordinator>,
    config: NetworkCoordinatorConfig,
    active: StdMutex<Vec<Network>>,
    /// Notified sequentially while held; registration happens at
    /// startup, so contention is not a concern.
    listeners: Mutex<Vec<Arc<dyn NetworkUpdateListener>>>,
}

impl NetworkCoordinator {
    pub fn new(
        registry: Arc<dyn NetworkRegistry>,
        deployments: Arc<DeploymentCoordinator>,
        config: NetworkCoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            deployments,
            config,
            active: StdMutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener. Listeners are notified in registration
    /// order; re-registering a name is a warned no-op.
    pub async fn register_listener(&self, listener: Arc<dyn NetworkUpdateListener>) {
        let mut listeners = self.listeners.lock().await;
        if listeners.iter().any(|l| l.name() == listener.name()) {
            warn!(listener = listener.name(), "Listener already registered, ignoring");
            return;
        }
        debug!(listener = listener.name(), "Listener registered");
        listeners.push(listener);
    }

    /// Initial refresh. Listener failures here abort startup.
    pub async fn start(&self) -> Result<(), RebalancerError> {
        self.refresh_inner(true).await
    }

    /// Periodic (or forced) refresh. Listener failures are logged and
    /// do not stop notification of the remaining listeners.
    pub async fn refresh(&self) -> Result<(), RebalancerError> {
        self.refresh_inner(false).await
    }

    async fn refresh_inner(&self, initial: bool) -> Result<(), RebalancerError> {
        let candidates = self.registry.fetch(self.config.mode).await?;
        self.deployments.refresh().await?;
        let snapshot = self
            .deployments
            .snapshot()
            .ok_or(RebalancerError::MissingParentPool)?;

        let mut next: Vec<Network> = candidates
            .into_iter()
            .filter(|n| self.keep(n, &snapshot))
            .collect();
        next.sort_by(|a, b| a.name.cmp(&b.name));

        let changed = {
            let current = self.active.lock().unwrap();
            chain_id_set(&current) != chain_id_set(&next)
        };
        if !changed {
            debug!(count = next.len(), "Active network set unchanged");
            return Ok(());
        }

        info!(
            count = next.len(),
            networks = %next.iter().map(|n| n.name.as_str()).collect::<Vec<_>>().join(","),
            "Active network set changed"
        );
        *self.active.lock().unwrap() = next.clone();

        let listeners = self.listeners.lock().await;
        for listener in listeners.iter() {
            if let Err(e) = listener.on_networks_updated(&next).await {
                if initial {
                    return Err(e);
                }
                error!(
                    listener = listener.name(),
                    error = %e,
                    "Network update listener failed"
                );
            }
        }
        Ok(())
    }

    /// Whether a candidate network belongs in the active set.
    ///
    /// The parent pool's network is always kept, regardless of
    /// whitelist and blacklist. Every other network needs a pool
    /// deployment and must pass both filters.
    fn keep(&self, network: &Network, deployments: &Deployments) -> bool {
        if network.name == deployments.parent_pool.network {
            return true;
        }
        if !deployments.pools.contains_key(&network.name) {
            return false;
        }
        if !self.config.whitelist.is_empty() && !self.config.whitelist.contains(&network.chain_id)
        {
            return false;
        }
        !self.config.blacklist.contains(&network.chain_id)
    }

    // -- Queries ----------------------------------------------------------

    pub fn active_networks(&self) -> Vec<Network> {
        self.active.lock().unwrap().clone()
    }

    pub fn by_name(&self, name: &str) -> Result<Network, RebalancerError> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| RebalancerError::NotFound {
                what: "network".into(),
                key: name.to_string(),
            })
    }

    pub fn by_chain_id(&self, chain_id: u64) -> Result<Network, RebalancerError> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.chain_id == chain_id)
            .cloned()
            .ok_or_else(|| RebalancerError::NotFound {
                what: "network".into(),
                key: chain_id.to_string(),
            })
    }

    pub fn by_selector(&self, selector: &str) -> Result<Network, RebalancerError> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .find(|n| n.selector == selector)
            .cloned()
            .ok_or_else(|| RebalancerError::NotFound {
                what: "network".into(),
                key: selector.to_string(),
            })
    }

    pub fn networks_in_mode(&self, mode: NetworkMode) -> Vec<Network> {
        self.active
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.mode == mode)
            .cloned()
            .collect()
    }
}

fn chain_id_set(networks: &[Network]) -> BTreeSet<u64> {
    networks.iter().map(|n| n.chain_id).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
