//! Production chain access over JSON-RPC.
//!
//! One `RpcChainClient` per network, built from the network's first
//! RPC URL with a wallet-filling provider. Contract surfaces are the
//! LBF pool ABI and the ERC-20 subset the rebalancer touches.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{ChainClient, ChainClientFactory, SignerRegistry, TxOutcome};
use crate::types::{Network, RebalancerError};

sol! {
    #[sol(rpc)]
    contract LbfPool {
        function getPoolData() external view returns (uint256 deficit, uint256 surplus);
        function fillDeficit(uint256 amount) external;
        function takeSurplus(uint256 amount) external;
        function bridgeIOU(uint256 amount, uint256 destChainId) external;
    }

    #[sol(rpc)]
    contract Erc20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

/// JSON-RPC backed `ChainClient`.
pub struct RpcChainClient {
    network: String,
    provider: DynProvider,
}

impl RpcChainClient {
    /// Connect to the network's first RPC URL with a signing provider.
    pub fn connect(network: &Network, signer: PrivateKeySigner) -> Result<Self, RebalancerError> {
        let url = network.rpc_urls.first().ok_or_else(|| {
            RebalancerError::ConfigInvalid(format!("network {} has no rpc urls", network.name))
        })?;
        let url = url.parse().map_err(|e| {
            RebalancerError::ConfigInvalid(format!("invalid rpc url for {}: {e}", network.name))
        })?;

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();

        debug!(network = %network.name, "Chain client connected");
        Ok(Self {
            network: network.name.clone(),
            provider,
        })
    }

    fn read_err(&self, e: impl std::fmt::Display) -> RebalancerError {
        RebalancerError::RpcReadFailed {
            network: self.network.clone(),
            message: e.to_string(),
        }
    }

    fn write_err(&self, e: impl std::fmt::Display) -> RebalancerError {
        RebalancerError::RpcWriteFailed {
            network: self.network.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn network(&self) -> &str {
        &self.network
    }

    async fn native_balance(&self, account: Address) -> Result<U256, RebalancerError> {
        self.provider
            .get_balance(account)
            .await
            .map_err(|e| self.read_err(e))
    }

    async fn balance_of(
        &self,
        token: Address,
        account: Address,
    ) -> Result<U256, RebalancerError> {
        Erc20::new(token, self.provider.clone())
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| self.read_err(e))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, RebalancerError> {
        Erc20::new(token, self.provider.clone())
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| self.read_err(e))
    }

    async fn get_pool_data(&self, pool: Address) -> Result<(U256, U256), RebalancerError> {
        let data = LbfPool::new(pool, self.provider.clone())
            .getPoolData()
            .call()
            .await
            .map_err(|e| self.read_err(e))?;
        Ok((data.deficit, data.surplus))
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        let pending = Erc20::new(token, self.provider.clone())
            .approve(spender, amount)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| self.write_err(e))?;
        self.wait(pending).await
    }

    async fn fill_deficit(
        &self,
        pool: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        let pending = LbfPool::new(pool, self.provider.clone())
            .fillDeficit(amount)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| self.write_err(e))?;
        self.wait(pending).await
    }

    async fn take_surplus(
        &self,
        pool: Address,
        amount: U256,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        let pending = LbfPool::new(pool, self.provider.clone())
            .takeSurplus(amount)
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| self.write_err(e))?;
        self.wait(pending).await
    }

    async fn bridge_iou(
        &self,
        pool: Address,
        amount: U256,
        dest_chain_id: u64,
        gas_limit: u64,
    ) -> Result<TxOutcome, RebalancerError> {
        let pending = LbfPool::new(pool, self.provider.clone())
            .bridgeIOU(amount, U256::from(dest_chain_id))
            .gas(gas_limit)
            .send()
            .await
            .map_err(|e| self.write_err(e))?;
        self.wait(pending).await
    }
}

impl RpcChainClient {
    async fn wait(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
    ) -> Result<TxOutcome, RebalancerError> {
        let tx_hash = *pending.tx_hash();
        let receipt = pending.get_receipt().await.map_err(|_| {
            RebalancerError::ReceiptTimeout {
                tx: format!("{tx_hash:#x}"),
            }
        })?;
        Ok(TxOutcome {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
        })
    }
}

// ---------------------------------------------------------------------------
// Factory & signer registry
// ---------------------------------------------------------------------------

/// Builds `RpcChainClient`s for the active set, all signing with the
/// same operator key.
pub struct RpcClientFactory {
    signer: PrivateKeySigner,
}

impl RpcClientFactory {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }
}

impl ChainClientFactory for RpcClientFactory {
    fn create(&self, network: &Network) -> Result<Arc<dyn ChainClient>, RebalancerError> {
        Ok(Arc::new(RpcChainClient::connect(
            network,
            self.signer.clone(),
        )?))
    }
}

/// Local private-key signer registry.
pub struct LocalSignerRegistry {
    signer: PrivateKeySigner,
}

impl LocalSignerRegistry {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> PrivateKeySigner {
        self.signer.clone()
    }
}

impl SignerRegistry for LocalSignerRegistry {
    fn operator_address(&self) -> Address {
        self.signer.address()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
