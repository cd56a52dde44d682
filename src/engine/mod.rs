//! Core engine — the discover → score → execute loop.
//!
//! One task owns the pool-data map and drives the pipeline. It
//! consumes a single inbox of events posted by the pool watchers and
//! the network coordinator; timers trigger the periodic network
//! refresh and a fallback rebalance sweep. All state mutation happens
//! here, serially.

pub mod discovery;
pub mod executor;
pub mod scorer;

use alloy::primitives::U256;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::coordinator::deployment::DeploymentCoordinator;
use crate::coordinator::network::{NetworkCoordinator, NetworkUpdateListener};
use crate::observer::PoolObserver;
use crate::tracker::BalanceTracker;
use crate::types::{Network, PoolData, RebalancerError};

use discovery::Discoverer;
use executor::Executor;
use scorer::Scorer;

/// Events consumed by the core task.
#[derive(Debug, Clone)]
pub enum Event {
    /// A pool watcher read fresh `(deficit, surplus)` data.
    PoolUpdated {
        network: String,
        deficit: U256,
        surplus: U256,
    },
    /// The active network set changed.
    NetworksChanged(Vec<Network>),
}

/// Forwards network changes into the core inbox so pool-data
/// lifecycle follows the active set on the core task.
pub struct InboxForwarder {
    tx: mpsc::Sender<Event>,
}

impl InboxForwarder {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NetworkUpdateListener for InboxForwarder {
    fn name(&self) -> &str {
        "engine-inbox"
    }

    async fn on_networks_updated(&self, networks: &[Network]) -> Result<(), RebalancerError> {
        self.tx
            .send(Event::NetworksChanged(networks.to_vec()))
            .await
            .map_err(|_| RebalancerError::Cancelled)
    }
}

/// Summary of one discover → score → execute sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub sweep_number: u64,
    pub discovered: usize,
    pub shortlisted: usize,
    pub executed: usize,
    pub failed: usize,
    pub total_redeemed: U256,
}

/// Engine timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub network_update_interval: Duration,
    pub rebalance_interval: Duration,
}

pub struct Engine {
    config: EngineConfig,
    coordinator: Arc<NetworkCoordinator>,
    deployments: Arc<DeploymentCoordinator>,
    tracker: Arc<BalanceTracker>,
    observer: Arc<PoolObserver>,
    discoverer: Discoverer,
    scorer: Scorer,
    executor: Executor,
    pools: HashMap<String, PoolData>,
    rx: mpsc::Receiver<Event>,
    sweeps: u64,
    started: Instant,
    stopped: bool,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        coordinator: Arc<NetworkCoordinator>,
        deployments: Arc<DeploymentCoordinator>,
        tracker: Arc<BalanceTracker>,
        observer: Arc<PoolObserver>,
        discoverer: Discoverer,
        scorer: Scorer,
        executor: Executor,
        rx: mpsc::Receiver<Event>,
    ) -> Self {
        Self {
            config,
            coordinator,
            deployments,
            tracker,
            observer,
            discoverer,
            scorer,
            executor,
            pools: HashMap::new(),
            rx,
            sweeps: 0,
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Run until shutdown (Ctrl+C or a closed inbox).
    ///
    /// A sweep in progress finishes its receipt waits before the
    /// shutdown branch is polled again, so no write is abandoned
    /// mid-flight.
    pub async fn run(mut self) -> Result<(), RebalancerError> {
        let mut network_ticker = tokio::time::interval(self.config.network_update_interval);
        let mut sweep_ticker = tokio::time::interval(self.config.rebalance_interval);
        // Both tickers fire immediately; startup already refreshed the
        // network set and there is no pool data yet, so consume those.
        network_ticker.tick().await;
        sweep_ticker.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            network_interval_ms = self.config.network_update_interval.as_millis() as u64,
            rebalance_interval_ms = self.config.rebalance_interval.as_millis() as u64,
            "Engine entering main loop"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            warn!("Event inbox closed, shutting down");
                            break;
                        }
                    }
                }
                _ = network_ticker.tick() => {
                    if let Err(e) = self.coordinator.refresh().await {
                        error!(error = %e, "Network refresh failed, keeping previous active set");
                    }
                }
                _ = sweep_ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Apply one inbox event. Pool updates trigger a sweep.
    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::PoolUpdated {
                network,
                deficit,
                surplus,
            } => {
                debug!(network = %network, %deficit, %surplus, "Pool data updated");
                self.pools
                    .insert(network, PoolData::new(deficit, surplus));
                self.sweep().await;
            }
            Event::NetworksChanged(networks) => {
                let before = self.pools.len();
                self.pools
                    .retain(|name, _| networks.iter().any(|n| &n.name == name));
                debug!(
                    dropped = before - self.pools.len(),
                    remaining = self.pools.len(),
                    "Pool data pruned to active set"
                );
            }
        }
    }

    /// One discover → score → execute pass over current state.
    pub async fn sweep(&mut self) -> SweepReport {
        self.sweeps += 1;
        let Some(deployments) = self.deployments.snapshot() else {
            warn!("No deployment snapshot yet, skipping sweep");
            return self.report(0, 0, 0, 0);
        };

        let networks = self.coordinator.active_networks();
        let balances = self.tracker.snapshot();
        let opportunities = self.discoverer.discover(
            &self.pools,
            &balances,
            self.executor.total_redeemed_usdc(),
        );
        if opportunities.is_empty() {
            debug!(sweep = self.sweeps, "No opportunities discovered");
            return self.report(0, 0, 0, 0);
        }

        let shortlist = self.scorer.shortlist(&opportunities, &balances);
        let execution = self
            .executor
            .execute_batch(&shortlist, &deployments, &networks)
            .await;

        let report = self.report(
            opportunities.len(),
            shortlist.len(),
            execution.executed.len(),
            execution.failed.len(),
        );
        info!(
            sweep = report.sweep_number,
            discovered = report.discovered,
            shortlisted = report.shortlisted,
            executed = report.executed,
            failed = report.failed,
            redeemed = %report.total_redeemed,
            "Sweep complete"
        );
        report
    }

    fn report(
        &self,
        discovered: usize,
        shortlisted: usize,
        executed: usize,
        failed: usize,
    ) -> SweepReport {
        SweepReport {
            sweep_number: self.sweeps,
            discovered,
            shortlisted,
            executed,
            failed,
            total_redeemed: self.executor.total_redeemed_usdc(),
        }
    }

    /// Cancel all watchers. Idempotent.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.tracker.shutdown();
        self.observer.shutdown();
        info!(
            uptime_secs = self.started.elapsed().as_secs(),
            sweeps = self.sweeps,
            redeemed = %self.executor.total_redeemed_usdc(),
            "Engine shut down cleanly"
        );
    }

    /// Current pool-data view (test and diagnostics hook).
    pub fn pool_data(&self, network: &str) -> Option<&PoolData> {
        self.pools.get(network)
    }
}
