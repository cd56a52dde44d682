//! Opportunity discovery.
//!
//! Enumerates candidate actions from the joint state of pool data and
//! operator balances. Networks are visited in sorted-name order so
//! discovery is deterministic and idempotent on identical inputs.

use alloy::primitives::U256;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{Opportunity, PoolData, TokenBalance, TokenKind};

/// Discovery thresholds and the net-exposure bound.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Minimum deficit worth filling (USDC base units).
    pub deficit_threshold: U256,
    /// Minimum surplus worth redeeming against or bridging towards.
    pub surplus_threshold: U256,
    /// Upper bound on net IOU exposure (USDC base units).
    pub net_total_allowance: U256,
}

pub struct Discoverer {
    config: DiscoveryConfig,
}

impl Discoverer {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Enumerate candidate actions.
    ///
    /// `total_redeemed` is the executor's redeemed-USDC counter; with
    /// total IOU holdings it bounds how much more deficit may be
    /// filled (net exposure = totalIOU − totalRedeemed).
    pub fn discover(
        &self,
        pools: &HashMap<String, PoolData>,
        balances: &HashMap<String, TokenBalance>,
        total_redeemed: U256,
    ) -> Vec<Opportunity> {
        let mut names: Vec<&str> = pools.keys().map(String::as_str).collect();
        names.sort_unstable();

        let token = |network: &str, kind: TokenKind| -> U256 {
            balances
                .get(network)
                .map(|b| b.token(kind))
                .unwrap_or(U256::ZERO)
        };

        let total_iou = balances
            .values()
            .fold(U256::ZERO, |acc, b| acc.saturating_add(b.token(TokenKind::Iou)));
        let exposure = total_iou.saturating_sub(total_redeemed);
        let net_allowance = self.config.net_total_allowance.saturating_sub(exposure);

        let mut opportunities = Vec::new();

        // Deficit fills, bounded by local USDC and the exposure cap.
        for &name in &names {
            let pool = &pools[name];
            let usdc = token(name, TokenKind::Usdc);
            if pool.deficit < self.config.deficit_threshold || usdc == U256::ZERO {
                continue;
            }
            let amount = usdc.min(pool.deficit).min(net_allowance);
            if amount > U256::ZERO {
                opportunities.push(Opportunity::FillDeficit {
                    to: name.to_string(),
                    amount,
                });
            }
        }

        // Surplus redemptions, bounded by local IOU.
        for &name in &names {
            let pool = &pools[name];
            let iou = token(name, TokenKind::Iou);
            if pool.surplus < self.config.surplus_threshold || iou == U256::ZERO {
                continue;
            }
            opportunities.push(Opportunity::TakeSurplus {
                on: name.to_string(),
                amount: iou.min(pool.surplus),
            });
        }

        // Bridging: move idle IOU to the single best surplus network.
        // A source is idle when it holds IOU but qualifies for neither
        // local action; the destination is the strict surplus maximum
        // (ties resolve to the lexicographically first name, names
        // being sorted and replacement requiring a strictly larger
        // surplus).
        let mut destination: Option<&str> = None;
        for &name in &names {
            let surplus = pools[name].surplus;
            if surplus < self.config.surplus_threshold {
                continue;
            }
            match destination {
                Some(current) if pools[current].surplus >= surplus => {}
                _ => destination = Some(name),
            }
        }

        if let Some(destination) = destination {
            for &name in &names {
                if name == destination {
                    continue;
                }
                let pool = &pools[name];
                let iou = token(name, TokenKind::Iou);
                if iou == U256::ZERO
                    || pool.deficit >= self.config.deficit_threshold
                    || pool.surplus >= self.config.surplus_threshold
                {
                    continue;
                }
                opportunities.push(Opportunity::BridgeIou {
                    from: name.to_string(),
                    to: destination.to_string(),
                    amount: iou,
                });
            }
        }

        debug!(
            count = opportunities.len(),
            %net_allowance,
            "Discovery complete"
        );
        opportunities
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
