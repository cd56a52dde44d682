//! LBF Rebalancer — autonomous cross-chain liquidity rebalancer.
//!
//! Entry point. Loads configuration from the environment, initialises
//! structured logging, wires the component graph explicitly, performs
//! the initial network refresh, and hands control to the engine loop
//! with graceful shutdown.

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use lbf_rebalancer::chain::rpc::{LocalSignerRegistry, RpcClientFactory};
use lbf_rebalancer::chain::{ChainClients, SignerRegistry};
use lbf_rebalancer::config::AppConfig;
use lbf_rebalancer::coordinator::deployment::{build_deployments, DeploymentCoordinator};
use lbf_rebalancer::coordinator::network::{NetworkCoordinator, NetworkCoordinatorConfig};
use lbf_rebalancer::engine::discovery::{Discoverer, DiscoveryConfig};
use lbf_rebalancer::engine::executor::{Executor, ExecutorConfig};
use lbf_rebalancer::engine::scorer::{Scorer, ScorerConfig};
use lbf_rebalancer::engine::{Engine, EngineConfig, InboxForwarder};
use lbf_rebalancer::manifest::{
    compile_patterns, parse_manifest, HttpManifestSource, ManifestSource,
    POOL_KEY_PATTERNS, TOKEN_KEY_PATTERNS,
};
use lbf_rebalancer::observer::PoolObserver;
use lbf_rebalancer::registry::{
    entries_to_networks, HttpNetworkRegistry, NetworkRegistry, RegistryEntry,
    StaticNetworkRegistry,
};
use lbf_rebalancer::tracker::{BalanceTracker, BalanceTrackerConfig};
use lbf_rebalancer::types::NetworkMode;

const BANNER: &str = r#"
 _     ____  _____   ____  _____ ____    _    _        _    _      ____ _____ ____
| |   | __ )|  ___| |  _ \| ____| __ )  / \  | |      / \  | \ | |/ ___| ____|  _ \
| |   |  _ \| |_    | |_) |  _| |  _ \ / _ \ | |     / _ \ |  \| | |   |  _| | |_) |
| |___| |_) |  _|   |  _ <| |___| |_) / ___ \| |___ / ___ \| |\  | |___| |___|  _ <
|_____|____/|_|     |_| \_\_____|____/_/   \_\_____/_/   \_\_| \_|\____|_____|_| \_\

  Liquidity Bridging Framework — cross-chain rebalancer
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::from_env().context("Configuration invalid")?;

    init_logging();

    println!("{BANNER}");
    info!(
        mode = %cfg.mode,
        operator = %cfg.operator_address,
        dry_run = cfg.dry_run,
        "LBF rebalancer starting up"
    );

    // -- Operator identity -----------------------------------------------

    let signer = load_signer(cfg.dry_run)?;
    let signers = LocalSignerRegistry::new(signer);
    if signers.operator_address() != cfg.operator_address {
        warn!(
            key_address = %signers.operator_address(),
            operator = %cfg.operator_address,
            "Signer address does not match OPERATOR_ADDRESS"
        );
    }

    // -- Component graph --------------------------------------------------

    let clients = Arc::new(ChainClients::new(Box::new(RpcClientFactory::new(
        signers.signer(),
    ))));

    let (registry, deployments): (Arc<dyn NetworkRegistry>, Arc<DeploymentCoordinator>) =
        match cfg.mode {
            NetworkMode::Localhost => localhost_wiring()?,
            _ => {
                let pools_url = cfg
                    .pools_manifest_url
                    .as_deref()
                    .context("pools manifest url missing")?;
                let tokens_url = cfg
                    .tokens_manifest_url
                    .as_deref()
                    .context("tokens manifest url missing")?;
                let registry_url = cfg
                    .network_registry_url
                    .as_deref()
                    .context("network registry url missing")?;

                let pools: Arc<dyn ManifestSource> =
                    Arc::new(HttpManifestSource::new(pools_url, POOL_KEY_PATTERNS)?);
                let tokens: Arc<dyn ManifestSource> =
                    Arc::new(HttpManifestSource::new(tokens_url, TOKEN_KEY_PATTERNS)?);
                (
                    Arc::new(HttpNetworkRegistry::new(registry_url)?),
                    Arc::new(DeploymentCoordinator::from_sources(pools, tokens)),
                )
            }
        };

    let coordinator = Arc::new(NetworkCoordinator::new(
        registry,
        deployments.clone(),
        NetworkCoordinatorConfig {
            mode: cfg.mode,
            whitelist: cfg.whitelisted_network_ids.clone(),
            blacklist: cfg.ignored_network_ids.clone(),
        },
    ));

    let (tx, rx) = mpsc::channel(256);

    let tracker = Arc::new(BalanceTracker::new(
        cfg.operator_address,
        clients.clone(),
        deployments.clone(),
        BalanceTrackerConfig {
            update_interval: cfg.balance_update_interval,
            min_allowance_usdc: cfg.min_allowance_usdc,
            min_allowance_iou: cfg.min_allowance_iou,
            approve_gas_limit: cfg.tx_gas_limit,
        },
    ));

    let observer = Arc::new(PoolObserver::new(
        clients.clone(),
        deployments.clone(),
        cfg.rebalancer_check_interval,
        tx.clone(),
    ));

    // Listener order matters: clients first, state trackers after,
    // engine inbox last.
    coordinator.register_listener(clients.clone()).await;
    coordinator.register_listener(tracker.clone()).await;
    coordinator.register_listener(observer.clone()).await;
    coordinator
        .register_listener(Arc::new(InboxForwarder::new(tx)))
        .await;

    coordinator
        .start()
        .await
        .context("Initial network refresh failed")?;
    info!(
        networks = coordinator.active_networks().len(),
        "Initial network set established"
    );

    let engine = Engine::new(
        EngineConfig {
            network_update_interval: cfg.network_update_interval,
            rebalance_interval: cfg.rebalancer_check_interval,
        },
        coordinator,
        deployments,
        tracker.clone(),
        observer,
        Discoverer::new(DiscoveryConfig {
            deficit_threshold: cfg.deficit_threshold,
            surplus_threshold: cfg.surplus_threshold,
            net_total_allowance: cfg.net_total_allowance,
        }),
        Scorer::new(ScorerConfig {
            min_score: cfg.scorer_min_score,
        }),
        Executor::new(
            clients,
            tracker,
            ExecutorConfig {
                gas_limit: cfg.tx_gas_limit,
                dry_run: cfg.dry_run,
            },
        ),
        rx,
    );

    engine.run().await?;
    Ok(())
}

/// Load the operator key. In dry-run mode a missing key degrades to a
/// throwaway signer: reads still work, writes never happen.
fn load_signer(dry_run: bool) -> Result<PrivateKeySigner> {
    match std::env::var("OPERATOR_PRIVATE_KEY") {
        Ok(key) => key
            .trim()
            .parse::<PrivateKeySigner>()
            .context("OPERATOR_PRIVATE_KEY is not a valid private key"),
        Err(_) if dry_run => {
            warn!("No OPERATOR_PRIVATE_KEY set — using a throwaway key (dry run)");
            Ok(PrivateKeySigner::random())
        }
        Err(_) => anyhow::bail!("OPERATOR_PRIVATE_KEY is required unless DRY_RUN=true"),
    }
}

/// Localhost wiring: networks and deployments come from local files
/// instead of remote endpoints.
///
/// `LOCALHOST_NETWORKS_FILE` holds the registry document (same JSON
/// shape as the remote registry); `LOCALHOST_POOLS_MANIFEST_FILE` and
/// `LOCALHOST_TOKENS_MANIFEST_FILE` hold `KEY=VALUE` manifests.
fn localhost_wiring() -> Result<(Arc<dyn NetworkRegistry>, Arc<DeploymentCoordinator>)> {
    let networks_file = std::env::var("LOCALHOST_NETWORKS_FILE")
        .context("LOCALHOST_NETWORKS_FILE is required in localhost mode")?;
    let pools_file = std::env::var("LOCALHOST_POOLS_MANIFEST_FILE")
        .context("LOCALHOST_POOLS_MANIFEST_FILE is required in localhost mode")?;
    let tokens_file = std::env::var("LOCALHOST_TOKENS_MANIFEST_FILE")
        .context("LOCALHOST_TOKENS_MANIFEST_FILE is required in localhost mode")?;

    let doc = std::fs::read_to_string(&networks_file)
        .with_context(|| format!("Failed to read {networks_file}"))?;
    let entries: HashMap<String, RegistryEntry> =
        serde_json::from_str(&doc).with_context(|| format!("Failed to parse {networks_file}"))?;
    let networks = entries_to_networks(entries, NetworkMode::Localhost);

    let pool_text = std::fs::read_to_string(&pools_file)
        .with_context(|| format!("Failed to read {pools_file}"))?;
    let token_text = std::fs::read_to_string(&tokens_file)
        .with_context(|| format!("Failed to read {tokens_file}"))?;
    let pool_entries = parse_manifest(&pool_text, &compile_patterns(POOL_KEY_PATTERNS)?)?;
    let token_entries = parse_manifest(&token_text, &compile_patterns(TOKEN_KEY_PATTERNS)?)?;
    let deployments = build_deployments(&pool_entries, &token_entries)?;

    info!(
        networks = networks.len(),
        parent = %deployments.parent_pool.network,
        "Localhost wiring loaded"
    );
    Ok((
        Arc::new(StaticNetworkRegistry::new(networks)),
        Arc::new(DeploymentCoordinator::with_static(deployments)),
    ))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lbf_rebalancer=info"));

    let json_logging = std::env::var("LBF_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
