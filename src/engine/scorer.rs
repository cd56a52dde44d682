//! Opportunity scoring.
//!
//! Rechecks feasibility against a fresh balance snapshot (balances
//! can move between discovery and scoring), scores every candidate,
//! and ranks the feasible ones. Scoring is deterministic for a fixed
//! input; ranking is a total order (score descending, then the
//! opportunity's stable key).

use std::cmp::Ordering;
use std::collections::HashMap;

use alloy::primitives::U256;
use tracing::debug;

use crate::types::{
    to_float, Opportunity, ScoredOpportunity, TokenBalance, TokenKind, USDC_DECIMALS,
};

/// Base weights per opportunity type. Redemptions and fills move USDC
/// directly; bridges only reposition IOU, so they rank far below.
const FILL_DEFICIT_WEIGHT: f64 = 200.0;
const TAKE_SURPLUS_WEIGHT: f64 = 200.0;
const BRIDGE_IOU_WEIGHT: f64 = 40.0;

/// Placeholder per-transaction gas cost in USD.
const GAS_COST_USD: f64 = 1.0;
/// Bridge fee for unmodeled routes.
const BRIDGE_FEE_USD: f64 = 0.0;
/// Floor for the cost factor so costs never zero a score entirely.
const MIN_COST_FACTOR: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Opportunities scoring below this are dropped from the ranking.
    pub min_score: f64,
}

pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score every candidate, keep the feasible ones above the score
    /// floor, and return them ranked best-first.
    pub fn shortlist(
        &self,
        opportunities: &[Opportunity],
        balances: &HashMap<String, TokenBalance>,
    ) -> Vec<ScoredOpportunity> {
        let mut scored: Vec<ScoredOpportunity> = opportunities
            .iter()
            .map(|opp| self.score_one(opp, balances))
            .collect();

        for rejected in scored.iter().filter(|s| !s.feasible) {
            debug!(opportunity = %rejected.opportunity, reasons = ?rejected.reasons, "Infeasible");
        }

        scored.retain(|s| s.feasible && s.score >= self.config.min_score);
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.opportunity.sort_key().cmp(&b.opportunity.sort_key()))
        });
        scored
    }

    /// Feasibility check and score for a single candidate.
    pub fn score_one(
        &self,
        opportunity: &Opportunity,
        balances: &HashMap<String, TokenBalance>,
    ) -> ScoredOpportunity {
        let reasons = self.feasibility_reasons(opportunity, balances);
        ScoredOpportunity {
            score: score(opportunity),
            feasible: reasons.is_empty(),
            reasons,
            opportunity: opportunity.clone(),
        }
    }

    fn feasibility_reasons(
        &self,
        opportunity: &Opportunity,
        balances: &HashMap<String, TokenBalance>,
    ) -> Vec<String> {
        let token = |network: &str, kind: TokenKind| -> U256 {
            balances
                .get(network)
                .map(|b| b.token(kind))
                .unwrap_or(U256::ZERO)
        };

        let mut reasons = Vec::new();

        match opportunity {
            Opportunity::FillDeficit { to, amount } => {
                if token(to, TokenKind::Usdc) < *amount {
                    reasons.push(format!("insufficient USDC on {to}"));
                }
            }
            Opportunity::TakeSurplus { on, amount } => {
                if token(on, TokenKind::Iou) < *amount {
                    reasons.push(format!("insufficient IOU on {on}"));
                }
            }
            Opportunity::BridgeIou { from, amount, .. } => {
                if token(from, TokenKind::Iou) < *amount {
                    reasons.push(format!("insufficient IOU on {from}"));
                }
            }
        }

        // Gas readiness is strictly positive native balance on the
        // network the transaction executes on.
        let gas_network = opportunity.execution_network();
        let native = balances
            .get(gas_network)
            .map(|b| b.native)
            .unwrap_or(U256::ZERO);
        if native == U256::ZERO {
            reasons.push(format!("no native gas on {gas_network}"));
        }

        reasons
    }
}

/// `base_weight * cost_factor`, with the cost factor discounting
/// small transfers whose fixed costs eat the value moved.
fn score(opportunity: &Opportunity) -> f64 {
    let weight = match opportunity {
        Opportunity::FillDeficit { .. } => FILL_DEFICIT_WEIGHT,
        Opportunity::TakeSurplus { .. } => TAKE_SURPLUS_WEIGHT,
        Opportunity::BridgeIou { .. } => BRIDGE_IOU_WEIGHT,
    };
    weight * cost_factor(opportunity)
}

fn cost_factor(opportunity: &Opportunity) -> f64 {
    let value_usd = to_float(opportunity.amount(), USDC_DECIMALS);
    if value_usd <= 0.0 {
        return MIN_COST_FACTOR;
    }
    let cost_usd = match opportunity {
        Opportunity::BridgeIou { .. } => GAS_COST_USD + BRIDGE_FEE_USD,
        _ => GAS_COST_USD,
    };
    (1.0 - cost_usd / value_usd).max(MIN_COST_FACTOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
