//! Configuration loading from environment variables.
//!
//! Reads the recognized `KEY=VALUE` environment entries (a `.env`
//! file is loaded by `main` before this runs) and parses them into
//! strongly-typed config structs. Parsing goes through an injected
//! lookup function so tests never touch the process environment.

use alloy::primitives::{Address, U256};
use std::time::Duration;

use crate::types::{NetworkMode, RebalancerError, TokenKind};

/// Default network refresh cadence: 5 minutes.
const DEFAULT_NETWORK_UPDATE_INTERVAL_MS: u64 = 300_000;
/// Default balance watcher cadence: 1 minute.
const DEFAULT_BALANCE_UPDATE_INTERVAL_MS: u64 = 60_000;
/// Default rebalance sweep cadence: 30 seconds.
const DEFAULT_REBALANCER_CHECK_INTERVAL_MS: u64 = 30_000;
/// Default gas limit for pool and approve transactions.
const DEFAULT_TX_GAS_LIMIT: u64 = 2_000_000;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: NetworkMode,
    /// The wallet whose balances are tracked and spent.
    pub operator_address: Address,
    /// Chain ids excluded from the active set.
    pub ignored_network_ids: Vec<u64>,
    /// When non-empty, only these chain ids are eligible.
    pub whitelisted_network_ids: Vec<u64>,
    pub network_update_interval: Duration,
    pub balance_update_interval: Duration,
    pub rebalancer_check_interval: Duration,
    /// Minimum pool deficit worth filling (USDC base units).
    pub deficit_threshold: U256,
    /// Minimum pool surplus worth redeeming against (USDC base units).
    pub surplus_threshold: U256,
    /// Upper bound on net IOU exposure (USDC base units).
    pub net_total_allowance: U256,
    pub min_allowance_usdc: U256,
    pub min_allowance_iou: U256,
    pub scorer_min_score: f64,
    /// Log intended transactions without submitting them.
    pub dry_run: bool,
    pub tx_gas_limit: u64,
    /// Deployment manifest endpoints for the selected mode.
    /// None in localhost mode (deployments are provided statically).
    pub pools_manifest_url: Option<String>,
    pub tokens_manifest_url: Option<String>,
    pub network_registry_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, RebalancerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RebalancerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode: NetworkMode = required(&lookup, "NETWORK_MODE")?.parse()?;

        let operator_address = parse_address(&required(&lookup, "OPERATOR_ADDRESS")?)
            .map_err(|e| RebalancerError::ConfigInvalid(format!("OPERATOR_ADDRESS: {e}")))?;

        // The whitelist is per-mode; a mode-suffixed key wins over the
        // plain one.
        let mode_suffix = mode.to_string().to_uppercase();
        let whitelist_raw = lookup(&format!("WHITELISTED_NETWORK_IDS_{mode_suffix}"))
            .or_else(|| lookup("WHITELISTED_NETWORK_IDS"));

        let pools_manifest_url = lookup(&format!("POOLS_MANIFEST_URL_{mode_suffix}"));
        let tokens_manifest_url = lookup(&format!("TOKENS_MANIFEST_URL_{mode_suffix}"));
        let network_registry_url = lookup("NETWORK_REGISTRY_URL");

        if mode != NetworkMode::Localhost {
            if pools_manifest_url.is_none() {
                return Err(RebalancerError::ConfigInvalid(format!(
                    "POOLS_MANIFEST_URL_{mode_suffix} is required in {mode} mode"
                )));
            }
            if tokens_manifest_url.is_none() {
                return Err(RebalancerError::ConfigInvalid(format!(
                    "TOKENS_MANIFEST_URL_{mode_suffix} is required in {mode} mode"
                )));
            }
            if network_registry_url.is_none() {
                return Err(RebalancerError::ConfigInvalid(format!(
                    "NETWORK_REGISTRY_URL is required in {mode} mode"
                )));
            }
        }

        Ok(Self {
            mode,
            operator_address,
            ignored_network_ids: parse_id_list(
                lookup("IGNORED_NETWORK_IDS").as_deref(),
                "IGNORED_NETWORK_IDS",
            )?,
            whitelisted_network_ids: parse_id_list(
                whitelist_raw.as_deref(),
                "WHITELISTED_NETWORK_IDS",
            )?,
            network_update_interval: Duration::from_millis(parse_u64(
                &lookup,
                "LANCA_NETWORK_UPDATE_INTERVAL_MS",
                DEFAULT_NETWORK_UPDATE_INTERVAL_MS,
            )?),
            balance_update_interval: Duration::from_millis(parse_u64(
                &lookup,
                "BALANCE_UPDATE_INTERVAL_MS",
                DEFAULT_BALANCE_UPDATE_INTERVAL_MS,
            )?),
            rebalancer_check_interval: Duration::from_millis(parse_u64(
                &lookup,
                "REBALANCER_CHECK_INTERVAL_MS",
                DEFAULT_REBALANCER_CHECK_INTERVAL_MS,
            )?),
            deficit_threshold: parse_u256(&lookup, "DEFICIT_THRESHOLD")?,
            surplus_threshold: parse_u256(&lookup, "SURPLUS_THRESHOLD")?,
            net_total_allowance: parse_u256(&lookup, "NET_TOTAL_ALLOWANCE")?,
            min_allowance_usdc: parse_u256(&lookup, "MIN_ALLOWANCE_USDC")?,
            min_allowance_iou: parse_u256(&lookup, "MIN_ALLOWANCE_IOU")?,
            scorer_min_score: parse_f64(&lookup, "OPPORTUNITY_SCORER_MIN_SCORE", 0.0)?,
            dry_run: parse_bool(&lookup, "DRY_RUN")?,
            tx_gas_limit: parse_u64(&lookup, "TX_GAS_LIMIT", DEFAULT_TX_GAS_LIMIT)?,
            pools_manifest_url,
            tokens_manifest_url,
            network_registry_url,
        })
    }

    /// Configured allowance floor for a token kind.
    pub fn min_allowance(&self, kind: TokenKind) -> U256 {
        match kind {
            TokenKind::Usdc => self.min_allowance_usdc,
            TokenKind::Iou => self.min_allowance_iou,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse helpers
// ---------------------------------------------------------------------------

fn required<F>(lookup: &F, key: &str) -> Result<String, RebalancerError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RebalancerError::ConfigInvalid(format!("{key} is required")))
}

fn parse_address(value: &str) -> Result<Address, String> {
    value.trim().parse::<Address>().map_err(|e| e.to_string())
}

fn parse_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, RebalancerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
            RebalancerError::ConfigInvalid(format!("{key}: {e}"))
        }),
    }
}

fn parse_u256<F>(lookup: &F, key: &str) -> Result<U256, RebalancerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(U256::ZERO),
        Some(raw) => raw.trim().parse::<U256>().map_err(|e| {
            RebalancerError::ConfigInvalid(format!("{key}: {e}"))
        }),
    }
}

fn parse_f64<F>(lookup: &F, key: &str, default: f64) -> Result<f64, RebalancerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<f64>().map_err(|e| {
            RebalancerError::ConfigInvalid(format!("{key}: {e}"))
        }),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<bool, RebalancerError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(false),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(RebalancerError::ConfigInvalid(format!(
                "{key}: expected a boolean, got {other}"
            ))),
        },
    }
}

fn parse_id_list(raw: Option<&str>, key: &str) -> Result<Vec<u64>, RebalancerError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| RebalancerError::ConfigInvalid(format!("{key}: {e}")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
