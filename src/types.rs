//! Shared types for the LBF rebalancer.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that chain, coordinator,
//! tracker, and engine modules can depend on them without
//! circular references.

use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// USDC uses 6 decimal places on every supported chain.
pub const USDC_DECIMALS: u32 = 6;

/// Convert a base-unit amount to an approximate float value.
///
/// Only the opportunity scorer uses this (for the cost-factor
/// computation). Monetary state never round-trips through floats.
pub fn to_float(amount: U256, decimals: u32) -> f64 {
    let raw: f64 = amount.to_string().parse().unwrap_or(f64::MAX);
    raw / 10f64.powi(decimals as i32)
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Deployment environment a network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkMode {
    Mainnet,
    Testnet,
    Localhost,
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Mainnet => write!(f, "mainnet"),
            NetworkMode::Testnet => write!(f, "testnet"),
            NetworkMode::Localhost => write!(f, "localhost"),
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = RebalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(NetworkMode::Mainnet),
            "testnet" => Ok(NetworkMode::Testnet),
            "localhost" => Ok(NetworkMode::Localhost),
            other => Err(RebalancerError::ConfigInvalid(format!(
                "unknown network mode: {other}"
            ))),
        }
    }
}

/// A blockchain the operator may hold balances and pools on.
///
/// `name` is the primary key used throughout the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    /// Cross-chain messaging selector for this network.
    pub selector: String,
    pub mode: NetworkMode,
    pub rpc_urls: Vec<String>,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain {}, {})", self.name, self.chain_id, self.mode)
    }
}

// ---------------------------------------------------------------------------
// Tokens & balances
// ---------------------------------------------------------------------------

/// The closed set of tracked tokens.
///
/// A closed enum instead of string keys: the source of truth for
/// balance maps, deployment lookups, and allowance floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    Usdc,
    Iou,
}

impl TokenKind {
    /// All tracked token kinds (useful for iteration).
    pub const ALL: &'static [TokenKind] = &[TokenKind::Usdc, TokenKind::Iou];
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Usdc => write!(f, "USDC"),
            TokenKind::Iou => write!(f, "IOU"),
        }
    }
}

/// Operator balances on a single network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBalance {
    /// Native gas balance (wei).
    pub native: U256,
    /// ERC-20 balances in base units, keyed by token kind.
    pub tokens: HashMap<TokenKind, U256>,
}

impl TokenBalance {
    /// Balance for a token kind; zero if never observed.
    pub fn token(&self, kind: TokenKind) -> U256 {
        self.tokens.get(&kind).copied().unwrap_or(U256::ZERO)
    }
}

impl fmt::Display for TokenBalance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "native={} USDC={} IOU={}",
            self.native,
            self.token(TokenKind::Usdc),
            self.token(TokenKind::Iou),
        )
    }
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// Latest observed liquidity state of one pool.
#[derive(Debug, Clone)]
pub struct PoolData {
    /// USDC the pool is short of (base units).
    pub deficit: U256,
    /// USDC the pool holds in excess (base units).
    pub surplus: U256,
    /// When this observation was received. Consumers may use the age
    /// of a reading to ignore stale values; no TTL is enforced here.
    pub last_updated: Instant,
}

impl PoolData {
    pub fn new(deficit: U256, surplus: U256) -> Self {
        Self {
            deficit,
            surplus,
            last_updated: Instant::now(),
        }
    }
}

impl fmt::Display for PoolData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deficit={} surplus={}", self.deficit, self.surplus)
    }
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

/// The unique redemption hub pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentPool {
    pub network: String,
    pub address: Address,
}

/// A consistent snapshot of every contract address the rebalancer
/// may interact with. Handed out by value; exactly one parent pool
/// exists after a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployments {
    /// Child pool addresses keyed by network name.
    pub pools: HashMap<String, Address>,
    pub parent_pool: ParentPool,
    pub usdc: HashMap<String, Address>,
    pub iou: HashMap<String, Address>,
}

impl Deployments {
    /// The pool address serving a network: the parent pool address on
    /// its own network, the child pool address elsewhere.
    pub fn pool_address(&self, network: &str) -> Option<Address> {
        if network == self.parent_pool.network {
            Some(self.parent_pool.address)
        } else {
            self.pools.get(network).copied()
        }
    }

    /// Token contract address for a network, if deployed there.
    pub fn token_address(&self, network: &str, kind: TokenKind) -> Option<Address> {
        match kind {
            TokenKind::Usdc => self.usdc.get(network).copied(),
            TokenKind::Iou => self.iou.get(network).copied(),
        }
    }

    /// Whether a pool (parent or child) exists for the network.
    pub fn has_pool(&self, network: &str) -> bool {
        self.pool_address(network).is_some()
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// A candidate on-chain action produced by the discoverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opportunity {
    /// Give USDC to a deficit pool, receiving IOU.
    FillDeficit { to: String, amount: U256 },
    /// Redeem IOU against a surplus pool, receiving USDC.
    TakeSurplus { on: String, amount: U256 },
    /// Move IOU from one chain to where surplus is largest.
    BridgeIou {
        from: String,
        to: String,
        amount: U256,
    },
}

impl Opportunity {
    /// The network the transaction is submitted on (and whose native
    /// balance pays for gas).
    pub fn execution_network(&self) -> &str {
        match self {
            Opportunity::FillDeficit { to, .. } => to,
            Opportunity::TakeSurplus { on, .. } => on,
            Opportunity::BridgeIou { from, .. } => from,
        }
    }

    /// The token the pool pulls from the operator for this action.
    pub fn spend_token(&self) -> TokenKind {
        match self {
            Opportunity::FillDeficit { .. } => TokenKind::Usdc,
            Opportunity::TakeSurplus { .. } | Opportunity::BridgeIou { .. } => TokenKind::Iou,
        }
    }

    pub fn amount(&self) -> U256 {
        match self {
            Opportunity::FillDeficit { amount, .. }
            | Opportunity::TakeSurplus { amount, .. }
            | Opportunity::BridgeIou { amount, .. } => *amount,
        }
    }

    /// Stable key used to make ranking a total order.
    pub fn sort_key(&self) -> String {
        match self {
            Opportunity::FillDeficit { to, .. } => format!("fill:{to}"),
            Opportunity::TakeSurplus { on, .. } => format!("take:{on}"),
            Opportunity::BridgeIou { from, to, .. } => format!("bridge:{from}:{to}"),
        }
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opportunity::FillDeficit { to, amount } => {
                write!(f, "fill deficit on {to} with {amount} USDC")
            }
            Opportunity::TakeSurplus { on, amount } => {
                write!(f, "take surplus on {on} for {amount} IOU")
            }
            Opportunity::BridgeIou { from, to, amount } => {
                write!(f, "bridge {amount} IOU from {from} to {to}")
            }
        }
    }
}

/// An opportunity after feasibility checks and scoring.
#[derive(Debug, Clone)]
pub struct ScoredOpportunity {
    pub opportunity: Opportunity,
    pub score: f64,
    pub feasible: bool,
    /// Human-readable infeasibility reasons; empty when feasible.
    pub reasons: Vec<String>,
}

impl fmt::Display for ScoredOpportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.feasible {
            write!(f, "{} (score {:.1})", self.opportunity, self.score)
        } else {
            write!(
                f,
                "{} (infeasible: {})",
                self.opportunity,
                self.reasons.join("; ")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain-specific error types for the rebalancer.
#[derive(Debug, thiserror::Error)]
pub enum RebalancerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("manifest fetch failed: {0}")]
    ManifestFetchFailed(String),

    #[error("manifest parse failed: {0}")]
    ManifestParseFailed(String),

    #[error("duplicate parent pool entry ({first}, then {second})")]
    DuplicateParentPool { first: String, second: String },

    #[error("no parent pool entry found in manifest")]
    MissingParentPool,

    #[error("missing {what} deployment for network {network}")]
    MissingDeployment { network: String, what: String },

    #[error("network {0} is not active")]
    NetworkNotActive(String),

    #[error("{what} not found: {key}")]
    NotFound { what: String, key: String },

    #[error("rpc read failed on {network}: {message}")]
    RpcReadFailed { network: String, message: String },

    #[error("rpc write failed on {network}: {message}")]
    RpcWriteFailed { network: String, message: String },

    #[error("allowance update failed on {network}: {message}")]
    AllowanceFailed { network: String, message: String },

    #[error("timed out waiting for receipt of {tx}")]
    ReceiptTimeout { tx: String },

    #[error("operation cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
