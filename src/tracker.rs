//! Balance tracker.
//!
//! Maintains `{native, USDC, IOU}` operator balances per active
//! network and owns allowance management. Token balances come from
//! per-(network, token) watchers; native balances from a separate
//! per-network pass (contract watchers cannot observe them). All map
//! writes happen in short critical sections that never cross an
//! await.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainClients};
use crate::coordinator::deployment::DeploymentCoordinator;
use crate::coordinator::network::NetworkUpdateListener;
use crate::types::{Network, RebalancerError, TokenBalance, TokenKind};

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct BalanceTrackerConfig {
    /// Cadence of the per-(network, token) and native watchers.
    pub update_interval: Duration,
    /// Allowance floor per token kind (approve at least this much).
    pub min_allowance_usdc: U256,
    pub min_allowance_iou: U256,
    /// Gas limit for approve transactions.
    pub approve_gas_limit: u64,
}

impl BalanceTrackerConfig {
    fn floor(&self, kind: TokenKind) -> U256 {
        match kind {
            TokenKind::Usdc => self.min_allowance_usdc,
            TokenKind::Iou => self.min_allowance_iou,
        }
    }
}

/// Watcher identity: `(network, Some(token))` for ERC-20 watchers,
/// `(network, None)` for the native watcher.
type WatcherKey = (String, Option<TokenKind>);

type AllowanceKey = (String, TokenKind, Address);

pub struct BalanceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    operator: Address,
    clients: Arc<ChainClients>,
    deployments: Arc<DeploymentCoordinator>,
    config: BalanceTrackerConfig,
    balances: StdMutex<HashMap<String, TokenBalance>>,
    watchers: StdMutex<HashMap<WatcherKey, JoinHandle<()>>>,
    /// Active set as last seen, for native refresh and force updates.
    networks: StdMutex<Vec<Network>>,
    /// One pending allowance operation per (network, token, spender).
    allowance_locks: StdMutex<HashMap<AllowanceKey, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: AtomicBool,
}

impl BalanceTracker {
    pub fn new(
        operator: Address,
        clients: Arc<ChainClients>,
        deployments: Arc<DeploymentCoordinator>,
        config: BalanceTrackerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                operator,
                clients,
                deployments,
                config,
                balances: StdMutex::new(HashMap::new()),
                watchers: StdMutex::new(HashMap::new()),
                networks: StdMutex::new(Vec::new()),
                allowance_locks: StdMutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    // -- Queries ----------------------------------------------------------

    /// Balances for one network, if any were observed.
    pub fn balance(&self, network: &str) -> Option<TokenBalance> {
        self.inner.balances.lock().unwrap().get(network).cloned()
    }

    /// Token balance on a network; zero if never observed.
    pub fn token(&self, network: &str, kind: TokenKind) -> U256 {
        self.balance(network)
            .map(|b| b.token(kind))
            .unwrap_or(U256::ZERO)
    }

    /// Sum of a token across all tracked networks.
    pub fn total(&self, kind: TokenKind) -> U256 {
        self.inner
            .balances
            .lock()
            .unwrap()
            .values()
            .fold(U256::ZERO, |acc, b| acc.saturating_add(b.token(kind)))
    }

    /// Whether the network holds strictly more native balance than
    /// `min`. Gas readiness uses `has_native(n, 0)`.
    pub fn has_native(&self, network: &str, min: U256) -> bool {
        self.balance(network)
            .map(|b| b.native > min)
            .unwrap_or(false)
    }

    /// Whether the network holds at least `min` of a token.
    pub fn has_token(&self, network: &str, kind: TokenKind, min: U256) -> bool {
        self.token(network, kind) >= min
    }

    /// A by-value copy of every tracked balance.
    pub fn snapshot(&self) -> HashMap<String, TokenBalance> {
        self.inner.balances.lock().unwrap().clone()
    }

    // -- Allowances -------------------------------------------------------

    /// Current allowance granted by the operator to `spender`.
    pub async fn get_allowance(
        &self,
        network: &str,
        kind: TokenKind,
        spender: Address,
    ) -> Result<U256, RebalancerError> {
        let token = self.token_address(network, kind)?;
        let client = self.inner.clients.get(network)?;
        client.allowance(token, self.inner.operator, spender).await
    }

    /// Make sure `spender` may pull at least `required` of a token.
    ///
    /// No-op when the current allowance already suffices — a
    /// sufficient allowance is never lowered. Otherwise approves
    /// `max(required, floor)` and waits for the receipt. At most one
    /// allowance operation is in flight per (network, token, spender).
    pub async fn ensure_allowance(
        &self,
        network: &str,
        kind: TokenKind,
        spender: Address,
        required: U256,
    ) -> Result<Option<crate::chain::TxOutcome>, RebalancerError> {
        let guard = self.allowance_lock(network, kind, spender);
        let _held = guard.lock().await;

        let current = self.get_allowance(network, kind, spender).await?;
        if current >= required {
            debug!(
                network,
                token = %kind,
                %current,
                %required,
                "Allowance sufficient, no approve needed"
            );
            return Ok(None);
        }

        let target = required.max(self.inner.config.floor(kind));
        let token = self.token_address(network, kind)?;
        let client = self.inner.clients.get(network)?;

        info!(network, token = %kind, %current, %target, "Approving allowance");
        let outcome = client
            .approve(token, spender, target, self.inner.config.approve_gas_limit)
            .await
            .map_err(|e| RebalancerError::AllowanceFailed {
                network: network.to_string(),
                message: e.to_string(),
            })?;

        if !outcome.success {
            return Err(RebalancerError::AllowanceFailed {
                network: network.to_string(),
                message: format!("approve reverted: {:#x}", outcome.tx_hash),
            });
        }
        Ok(Some(outcome))
    }

    fn allowance_lock(
        &self,
        network: &str,
        kind: TokenKind,
        spender: Address,
    ) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .allowance_locks
            .lock()
            .unwrap()
            .entry((network.to_string(), kind, spender))
            .or_default()
            .clone()
    }

    fn token_address(&self, network: &str, kind: TokenKind) -> Result<Address, RebalancerError> {
        self.inner
            .deployments
            .snapshot()
            .and_then(|d| d.token_address(network, kind))
            .ok_or_else(|| RebalancerError::MissingDeployment {
                network: network.to_string(),
                what: kind.to_string(),
            })
    }

    // -- Refresh ----------------------------------------------------------

    /// One-shot refresh of every balance on every tracked network.
    /// The executor calls this between opportunities so feasibility is
    /// re-evaluated against fresh state.
    pub async fn force_update(&self) {
        let networks = self.inner.networks.lock().unwrap().clone();
        let snapshot = self.inner.deployments.snapshot();

        let mut reads = Vec::new();
        for network in &networks {
            let inner = self.inner.clone();
            let name = network.name.clone();
            let tokens: Vec<(TokenKind, Address)> = snapshot
                .iter()
                .flat_map(|d| {
                    TokenKind::ALL
                        .iter()
                        .filter_map(|kind| d.token_address(&name, *kind).map(|a| (*kind, a)))
                        .collect::<Vec<_>>()
                })
                .collect();
            reads.push(async move {
                let client = match inner.clients.get(&name) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(network = %name, error = %e, "No client for balance refresh");
                        return;
                    }
                };
                match client.native_balance(inner.operator).await {
                    Ok(v) => inner.apply_native(&name, v),
                    Err(e) => warn!(network = %name, error = %e, "Native balance read failed"),
                }
                for (kind, token) in tokens {
                    match client.balance_of(token, inner.operator).await {
                        Ok(v) => inner.apply_token(&name, kind, v),
                        Err(e) => {
                            warn!(network = %name, token = %kind, error = %e, "Balance read failed")
                        }
                    }
                }
            });
        }
        join_all(reads).await;
        debug!(networks = networks.len(), "Forced balance update complete");
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
        debug!("Balance tracker shut down");
    }

    // -- Watcher management -----------------------------------------------

    fn spawn_token_watcher(&self, network: &str, kind: TokenKind, token: Address) {
        let inner = self.inner.clone();
        let name = network.to_string();
        let interval = self.inner.config.update_interval;
        let handle = tokio::spawn(async move {
            let client = match inner.clients.get(&name) {
                Ok(c) => c,
                Err(e) => {
                    warn!(network = %name, error = %e, "Token watcher has no client");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match client.balance_of(token, inner.operator).await {
                    Ok(v) => inner.apply_token(&name, kind, v),
                    Err(e) => {
                        warn!(network = %name, token = %kind, error = %e, "Balance read failed")
                    }
                }
            }
        });
        self.inner
            .watchers
            .lock()
            .unwrap()
            .insert((network.to_string(), Some(kind)), handle);
    }

    fn spawn_native_watcher(&self, network: &str) {
        let inner = self.inner.clone();
        let name = network.to_string();
        let interval = self.inner.config.update_interval;
        let handle = tokio::spawn(async move {
            let client = match inner.clients.get(&name) {
                Ok(c) => c,
                Err(e) => {
                    warn!(network = %name, error = %e, "Native watcher has no client");
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match client.native_balance(inner.operator).await {
                    Ok(v) => inner.apply_native(&name, v),
                    Err(e) => warn!(network = %name, error = %e, "Native balance read failed"),
                }
            }
        });
        self.inner
            .watchers
            .lock()
            .unwrap()
            .insert((network.to_string(), None), handle);
    }

    async fn refresh_native(&self, networks: &[Network]) {
        let reads = networks.iter().map(|network| {
            let inner = self.inner.clone();
            let name = network.name.clone();
            async move {
                let client = match inner.clients.get(&name) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(network = %name, error = %e, "No client for native refresh");
                        return;
                    }
                };
                match client.native_balance(inner.operator).await {
                    Ok(v) => inner.apply_native(&name, v),
                    Err(e) => warn!(network = %name, error = %e, "Native balance read failed"),
                }
            }
        });
        join_all(reads).await;
    }

    #[cfg(test)]
    fn watcher_keys(&self) -> Vec<WatcherKey> {
        let mut keys: Vec<_> = self
            .inner
            .watchers
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl TrackerInner {
    /// Update a single token field, preserving the rest of the entry.
    fn apply_token(&self, network: &str, kind: TokenKind, value: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(network.to_string()).or_default();
        entry.tokens.insert(kind, value);
    }

    fn apply_native(&self, network: &str, value: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(network.to_string()).or_default();
        entry.native = value;
    }
}

#[async_trait]
impl NetworkUpdateListener for BalanceTracker {
    fn name(&self) -> &str {
        "balance-tracker"
    }

    async fn on_networks_updated(&self, networks: &[Network]) -> Result<(), RebalancerError> {
        let snapshot = self.inner.deployments.snapshot();
        *self.inner.networks.lock().unwrap() = networks.to_vec();

        // Drop state and watchers for departed networks.
        {
            let mut balances = self.inner.balances.lock().unwrap();
            balances.retain(|name, _| networks.iter().any(|n| &n.name == name));
        }
        {
            let mut watchers = self.inner.watchers.lock().unwrap();
            watchers.retain(|(name, _), handle| {
                let keep = networks.iter().any(|n| &n.name == name);
                if !keep {
                    handle.abort();
                }
                keep
            });
        }

        // Arm watchers for newly active networks.
        for network in networks {
            let has_native = self
                .inner
                .watchers
                .lock()
                .unwrap()
                .contains_key(&(network.name.clone(), None));
            if !has_native {
                self.spawn_native_watcher(&network.name);
            }

            for kind in TokenKind::ALL {
                let token = snapshot
                    .as_ref()
                    .and_then(|d| d.token_address(&network.name, *kind));
                let Some(token) = token else { continue };
                let armed = self
                    .inner
                    .watchers
                    .lock()
                    .unwrap()
                    .contains_key(&(network.name.clone(), Some(*kind)));
                if !armed {
                    self.spawn_token_watcher(&network.name, *kind, token);
                }
            }
        }

        // First native reading for the new set, synchronously.
        self.refresh_native(networks).await;
        info!(
            networks = networks.len(),
            watchers = self.inner.watchers.lock().unwrap().len(),
            "Balance watchers re-armed"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
