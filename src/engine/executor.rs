//! Opportunity executor.
//!
//! Walks a scored batch best-first, resolving addresses from the
//! deployment snapshot, topping up allowances, submitting the pool
//! call, and waiting for its receipt. A failure affects only its own
//! opportunity; the batch continues. `totalRedeemedUsdc` — the one
//! piece of earned-progress state — lives here and only ever grows.

use alloy::primitives::U256;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chain::ChainClients;
use crate::tracker::BalanceTracker;
use crate::types::{
    Deployments, Network, Opportunity, RebalancerError, ScoredOpportunity,
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Gas limit for pool transactions.
    pub gas_limit: u64,
    /// Log intended transactions without submitting anything.
    pub dry_run: bool,
}

/// What happened to one batch of scored opportunities.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub executed: Vec<ExecutedAction>,
    pub failed: Vec<FailedAction>,
}

#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub opportunity: Opportunity,
    pub score: f64,
    pub tx: String,
}

#[derive(Debug, Clone)]
pub struct FailedAction {
    pub opportunity: Opportunity,
    pub reason: String,
}

pub struct Executor {
    clients: Arc<ChainClients>,
    tracker: Arc<BalanceTracker>,
    config: ExecutorConfig,
    total_redeemed: Mutex<U256>,
}

impl Executor {
    pub fn new(
        clients: Arc<ChainClients>,
        tracker: Arc<BalanceTracker>,
        config: ExecutorConfig,
    ) -> Self {
        if config.dry_run {
            warn!("Executor is in DRY RUN mode — no transactions will be submitted");
        }
        Self {
            clients,
            tracker,
            config,
            total_redeemed: Mutex::new(U256::ZERO),
        }
    }

    /// Cumulative USDC redeemed via `takeSurplus`. Monotone.
    pub fn total_redeemed_usdc(&self) -> U256 {
        *self.total_redeemed.lock().unwrap()
    }

    /// Execute a ranked batch sequentially, best score first.
    ///
    /// Balances are force-refreshed after every submission so the
    /// next sweep's feasibility sees the effect of this one.
    pub async fn execute_batch(
        &self,
        batch: &[ScoredOpportunity],
        deployments: &Deployments,
        networks: &[Network],
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if batch.is_empty() {
            return report;
        }

        info!(count = batch.len(), dry_run = self.config.dry_run, "Executing batch");

        for scored in batch {
            match self.execute_one(&scored.opportunity, deployments, networks).await {
                Ok(tx) => {
                    info!(
                        opportunity = %scored.opportunity,
                        score = scored.score,
                        tx = %tx,
                        "Opportunity executed"
                    );
                    report.executed.push(ExecutedAction {
                        opportunity: scored.opportunity.clone(),
                        score: scored.score,
                        tx,
                    });
                }
                Err(e) => {
                    match &e {
                        RebalancerError::MissingDeployment { .. } => error!(
                            opportunity = %scored.opportunity,
                            error = %e,
                            "Deployment missing for executable opportunity"
                        ),
                        _ => error!(
                            opportunity = %scored.opportunity,
                            error = %e,
                            "Opportunity execution failed"
                        ),
                    }
                    report.failed.push(FailedAction {
                        opportunity: scored.opportunity.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            if !self.config.dry_run {
                self.tracker.force_update().await;
            }
        }

        info!(
            executed = report.executed.len(),
            failed = report.failed.len(),
            redeemed = %self.total_redeemed_usdc(),
            "Batch execution complete"
        );
        report
    }

    async fn execute_one(
        &self,
        opportunity: &Opportunity,
        deployments: &Deployments,
        networks: &[Network],
    ) -> Result<String, RebalancerError> {
        let network = opportunity.execution_network();
        let amount = opportunity.amount();

        let pool = deployments.pool_address(network).ok_or_else(|| {
            RebalancerError::MissingDeployment {
                network: network.to_string(),
                what: "pool".into(),
            }
        })?;
        let token_kind = opportunity.spend_token();
        // Resolved ahead of the allowance call so a missing token
        // deployment surfaces as MissingDeployment, not as an
        // allowance failure.
        deployments.token_address(network, token_kind).ok_or_else(|| {
            RebalancerError::MissingDeployment {
                network: network.to_string(),
                what: token_kind.to_string(),
            }
        })?;

        // Bridge destinations are addressed by chain id on the wire.
        let dest_chain_id = match opportunity {
            Opportunity::BridgeIou { to, .. } => Some(
                networks
                    .iter()
                    .find(|n| &n.name == to)
                    .map(|n| n.chain_id)
                    .ok_or_else(|| RebalancerError::NotFound {
                        what: "bridge destination network".into(),
                        key: to.clone(),
                    })?,
            ),
            _ => None,
        };

        if self.config.dry_run {
            let pseudo = format!("dry-run-{}", Uuid::new_v4());
            info!(
                opportunity = %opportunity,
                network,
                pool = %pool,
                tx = %pseudo,
                "[DRY RUN] Would submit transaction"
            );
            return Ok(pseudo);
        }

        self.tracker
            .ensure_allowance(network, token_kind, pool, amount)
            .await?;

        let client = self.clients.get(network)?;
        let outcome = match opportunity {
            Opportunity::FillDeficit { .. } => {
                client.fill_deficit(pool, amount, self.config.gas_limit).await?
            }
            Opportunity::TakeSurplus { .. } => {
                client.take_surplus(pool, amount, self.config.gas_limit).await?
            }
            Opportunity::BridgeIou { .. } => {
                let dest = dest_chain_id.unwrap_or_default();
                client
                    .bridge_iou(pool, amount, dest, self.config.gas_limit)
                    .await?
            }
        };

        if !outcome.success {
            return Err(RebalancerError::RpcWriteFailed {
                network: network.to_string(),
                message: format!("transaction reverted: {:#x}", outcome.tx_hash),
            });
        }

        if matches!(opportunity, Opportunity::TakeSurplus { .. }) {
            let mut redeemed = self.total_redeemed.lock().unwrap();
            *redeemed = redeemed.saturating_add(amount);
            info!(network, %amount, total = %*redeemed, "Surplus redeemed");
        }

        Ok(format!("{:#x}", outcome.tx_hash))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
