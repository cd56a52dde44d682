//! Pool observer.
//!
//! Streams `(network, deficit, surplus)` readings into the core
//! inbox. One watcher task per active network, re-armed on every
//! network change; the pool address is resolved from the deployment
//! snapshot at registration time. Read errors keep the watcher armed
//! and post nothing, so a consumer only ever sees successful reads.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::ChainClients;
use crate::coordinator::deployment::DeploymentCoordinator;
use crate::coordinator::network::NetworkUpdateListener;
use crate::engine::Event;
use crate::types::{Network, RebalancerError};

pub struct PoolObserver {
    inner: Arc<ObserverInner>,
}

struct ObserverInner {
    clients: Arc<ChainClients>,
    deployments: Arc<DeploymentCoordinator>,
    update_interval: Duration,
    tx: mpsc::Sender<Event>,
    watchers: StdMutex<HashMap<String, JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl PoolObserver {
    pub fn new(
        clients: Arc<ChainClients>,
        deployments: Arc<DeploymentCoordinator>,
        update_interval: Duration,
        tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                clients,
                deployments,
                update_interval,
                tx,
                watchers: StdMutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Stop all watchers. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut watchers = self.inner.watchers.lock().unwrap();
        for (_, handle) in watchers.drain() {
            handle.abort();
        }
        debug!("Pool observer shut down");
    }

    fn spawn_watcher(&self, network: &str, pool: alloy::primitives::Address) {
        let inner = self.inner.clone();
        let name = network.to_string();
        let handle = tokio::spawn(async move {
            let client = match inner.clients.get(&name) {
                Ok(c) => c,
                Err(e) => {
                    warn!(network = %name, error = %e, "Pool watcher has no client");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(inner.update_interval);
            loop {
                ticker.tick().await;
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match client.get_pool_data(pool).await {
                    Ok((deficit, surplus)) => {
                        let event = Event::PoolUpdated {
                            network: name.clone(),
                            deficit,
                            surplus,
                        };
                        // A closed inbox means the engine is gone.
                        if inner.tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(network = %name, error = %e, "Pool read failed"),
                }
            }
        });
        self.inner
            .watchers
            .lock()
            .unwrap()
            .insert(network.to_string(), handle);
    }

    #[cfg(test)]
    fn watched_networks(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .watchers
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl NetworkUpdateListener for PoolObserver {
    fn name(&self) -> &str {
        "pool-observer"
    }

    async fn on_networks_updated(&self, networks: &[Network]) -> Result<(), RebalancerError> {
        // Pool addresses may have moved with the deployment snapshot,
        // so every watcher is re-armed, not just the diff.
        {
            let mut watchers = self.inner.watchers.lock().unwrap();
            for (_, handle) in watchers.drain() {
                handle.abort();
            }
        }

        let Some(snapshot) = self.inner.deployments.snapshot() else {
            warn!("No deployment snapshot, pool watchers not armed");
            return Ok(());
        };

        for network in networks {
            let Some(pool) = snapshot.pool_address(&network.name) else {
                warn!(network = %network.name, "No pool deployment, skipping watcher");
                continue;
            };
            self.spawn_watcher(&network.name, pool);
        }

        info!(
            watchers = self.inner.watchers.lock().unwrap().len(),
            "Pool watchers re-armed"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
