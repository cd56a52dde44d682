//! Mock chain for integration testing.
//!
//! Provides a deterministic `ChainClient` implementation backed by
//! in-memory per-network state: balances, pool data, allowances, and
//! a recorded call log — all fully controllable from test code.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lbf_rebalancer::chain::{ChainClient, ChainClientFactory, TxOutcome};
use lbf_rebalancer::types::{Network, NetworkMode, RebalancerError};

/// A write recorded by the mock chain.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolCall {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    FillDeficit {
        pool: Address,
        amount: U256,
    },
    TakeSurplus {
        pool: Address,
        amount: U256,
    },
    BridgeIou {
        pool: Address,
        amount: U256,
        dest_chain_id: u64,
    },
}

/// In-memory state of one chain.
#[derive(Debug, Default)]
pub struct MockChain {
    pub native: U256,
    /// Operator ERC-20 balances keyed by token address.
    pub tokens: HashMap<Address, U256>,
    /// `(deficit, surplus)` the pool reports.
    pub pool_data: (U256, U256),
    pub allowances: HashMap<(Address, Address), U256>,
    pub calls: Vec<PoolCall>,
    /// When set, every operation returns this error.
    pub force_error: Option<String>,
}

pub type SharedChain = Arc<Mutex<MockChain>>;

pub struct MockChainClient {
    network: String,
    state: SharedChain,
}

impl MockChainClient {
    fn check_error(&self, read: bool) -> Result<(), RebalancerError> {
        if let Some(message) = self.state.lock().unwrap().force_error.clone() {
            return Err(if read {
                RebalancerError::RpcReadFailed {
                    network: self.network.clone(),
                    message,
                }
            } else {
                RebalancerError::RpcWriteFailed {
                    network: self.network.clone(),
                    message,
                }
            });
        }
        Ok(())
    }

    fn ok_outcome() -> TxOutcome {
        TxOutcome {
            tx_hash: B256::repeat_byte(0xCC),
            success: true,
        }
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn network(&self) -> &str {
        &self.network
    }

    async fn native_balance(&self, _account: Address) -> Result<U256, RebalancerError> {
        self.check_error(true)?;
        Ok(self.state.lock().unwrap().native)
    }

    async fn balance_of(
        &self,
        token: Address,
        _account: Address,
    ) -> Result<U256, RebalancerError> {
        self.check_error(true)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .tokens
            .get(&token)
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn allowance(
        &self,
        token: Address,
        _owner: Address,
        spender: Address,
    ) -> Result<U256, RebalancerError> {
        self.check_error(true)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .allowances
            .get(&(token, spender))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn get_pool_data(&self, _pool: Address) -> Result<(U256, U256), RebalancerError> {
        self.check_error(true)?;
        Ok(self.state.lock().unwrap().pool_data)
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
        _gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        self.check_error(false)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(PoolCall::Approve {
            token,
            spender,
            amount,
        });
        state.allowances.insert((token, spender), amount);
        Ok(Self::ok_outcome())
    }

    async fn fill_deficit(
        &self,
        pool: Address,
        amount: U256,
        _gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        self.check_error(false)?;
        self.state
            .lock()
            .unwrap()
            .calls
            .push(PoolCall::FillDeficit { pool, amount });
        Ok(Self::ok_outcome())
    }

    async fn take_surplus(
        &self,
        pool: Address,
        amount: U256,
        _gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        self.check_error(false)?;
        self.state
            .lock()
            .unwrap()
            .calls
            .push(PoolCall::TakeSurplus { pool, amount });
        Ok(Self::ok_outcome())
    }

    async fn bridge_iou(
        &self,
        pool: Address,
        amount: U256,
        dest_chain_id: u64,
        _gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        self.check_error(false)?;
        self.state.lock().unwrap().calls.push(PoolCall::BridgeIou {
            pool,
            amount,
            dest_chain_id,
        });
        Ok(Self::ok_outcome())
    }
}

/// Factory handing out clients bound to shared per-network state.
pub struct MockChainFactory {
    chains: Mutex<HashMap<String, SharedChain>>,
}

impl MockChainFactory {
    pub fn new() -> Self {
        Self {
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// The shared state handle for a network, created on first use.
    pub fn chain(&self, network: &str) -> SharedChain {
        self.chains
            .lock()
            .unwrap()
            .entry(network.to_string())
            .or_default()
            .clone()
    }
}

impl ChainClientFactory for MockChainFactory {
    fn create(&self, network: &Network) -> Result<Arc<dyn ChainClient>, RebalancerError> {
        Ok(Arc::new(MockChainClient {
            network: network.name.clone(),
            state: self.chain(&network.name),
        }))
    }
}

/// A localhost test network.
pub fn make_network(name: &str, chain_id: u64) -> Network {
    Network {
        name: name.to_string(),
        chain_id,
        selector: chain_id.to_string(),
        mode: NetworkMode::Localhost,
        rpc_urls: vec![],
    }
}
