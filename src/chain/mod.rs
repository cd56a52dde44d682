//! Chain access seams.
//!
//! Defines the `ChainClient` trait every component reads and writes
//! through, the `SignerRegistry` seam for operator identity, and the
//! `ChainClients` registry that keeps one client per active network.
//! The production implementation lives in `rpc`; tests provide
//! in-memory mocks.

pub mod rpc;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::coordinator::network::NetworkUpdateListener;
use crate::types::{Network, RebalancerError};

/// Result of a submitted transaction after its receipt landed.
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub tx_hash: B256,
    /// Receipt status flag; false means the transaction reverted.
    pub success: bool,
}

/// Read/write primitives for one chain.
///
/// Implementors own transport selection, nonce allocation, and retry;
/// callers see one async call per logical operation, resolved once
/// the receipt is available (for writes) or the result decoded (for
/// reads).
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Name of the network this client serves.
    fn network(&self) -> &str;

    async fn native_balance(&self, account: Address) -> Result<U256, RebalancerError>;

    async fn balance_of(&self, token: Address, account: Address)
        -> Result<U256, RebalancerError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, RebalancerError>;

    /// Read `(deficit, surplus)` from a pool contract.
    async fn get_pool_data(&self, pool: Address) -> Result<(U256, U256), RebalancerError>;

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError>;

    async fn fill_deficit(
        &self,
        pool: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError>;

    async fn take_surplus(
        &self,
        pool: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError>;

    async fn bridge_iou(
        &self,
        pool: Address,
        amount: U256,
        dest_chain_id: u64,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError>;
}

/// Operator wallet identity.
pub trait SignerRegistry: Send + Sync {
    fn operator_address(&self) -> Address;
}

/// Builds a client for a network that just entered the active set.
pub trait ChainClientFactory: Send + Sync {
    fn create(&self, network: &Network) -> Result<Arc<dyn ChainClient>, RebalancerError>;
}

// Tests keep an `Arc` handle to their factory while the registry owns
// a boxed one.
impl<T: ChainClientFactory + ?Sized> ChainClientFactory for Arc<T> {
    fn create(&self, network: &Network) -> Result<Arc<dyn ChainClient>, RebalancerError> {
        (**self).create(network)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One `ChainClient` per active network.
///
/// Registered as the first network-update listener so clients exist
/// before the balance tracker and pool observer re-arm their watchers.
pub struct ChainClients {
    factory: Box<dyn ChainClientFactory>,
    clients: Mutex<HashMap<String, Arc<dyn ChainClient>>>,
}

impl ChainClients {
    pub fn new(factory: Box<dyn ChainClientFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Create clients for newly active networks and drop departed ones.
    pub fn sync(&self, networks: &[Network]) -> Result<(), RebalancerError> {
        let mut clients = self.clients.lock().unwrap();

        let before = clients.len();
        clients.retain(|name, _| networks.iter().any(|n| &n.name == name));
        let dropped = before - clients.len();

        let mut created = 0usize;
        for network in networks {
            if !clients.contains_key(&network.name) {
                let client = self.factory.create(network)?;
                clients.insert(network.name.clone(), client);
                created += 1;
            }
        }

        if created > 0 || dropped > 0 {
            info!(created, dropped, total = clients.len(), "Chain clients synced");
        } else {
            debug!(total = clients.len(), "Chain clients unchanged");
        }
        Ok(())
    }

    pub fn get(&self, network: &str) -> Result<Arc<dyn ChainClient>, RebalancerError> {
        self.clients
            .lock()
            .unwrap()
            .get(network)
            .cloned()
            .ok_or_else(|| RebalancerError::NetworkNotActive(network.to_string()))
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl NetworkUpdateListener for ChainClients {
    fn name(&self) -> &str {
        "chain-clients"
    }

    async fn on_networks_updated(&self, networks: &[Network]) -> Result<(), RebalancerError> {
        self.sync(networks)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
