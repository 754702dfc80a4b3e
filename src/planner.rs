//! Transaction planning
//!
//! Pure transform from one [`Opportunity`] into a fee-accounted,
//! guard-checked [`TransactionPlan`]. Never touches the ledger; the same
//! opportunity against the same graph version always yields the same plan.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::asset::AssetId;
use crate::config::EngineConfig;
use crate::dex::{Dex, PoolId};
use crate::errors::EngineError;
use crate::graph::{GraphSnapshot, Opportunity};
use crate::quote::CycleQuote;

/// One swap leg: spend `input_amount` of `input_asset` against `pool`,
/// refuse anything under `min_output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInstruction {
    pub pool: PoolId,
    pub dex: Dex,
    pub input_asset: AssetId,
    pub input_amount: u128,
    pub output_asset: AssetId,
    pub min_output: u128,
}

/// A concrete, fee-accounted plan derived from exactly one opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub swaps: Vec<SwapInstruction>,
    /// Lovelace consumed by batcher and network fees.
    pub fee_budget: u128,
    /// Lovelace locked as per-hop deposits, returned on settlement.
    pub deposit_budget: u128,
    /// Address that signs and receives the cycle output.
    pub signer: String,
    /// Must not be submitted at or past this slot.
    pub expiry_slot: u64,
    /// Graph version the numbers were taken from.
    pub snapshot_version: u64,
    pub input: u128,
    pub predicted_out: u128,
}

impl TransactionPlan {
    pub fn pool_ids(&self) -> Vec<PoolId> {
        self.swaps.iter().map(|swap| swap.pool.clone()).collect()
    }

    /// Asset path of the cycle, start asset first and last.
    pub fn asset_path(&self) -> Vec<AssetId> {
        let mut path: Vec<AssetId> = self
            .swaps
            .iter()
            .map(|swap| swap.input_asset.clone())
            .collect();
        if let Some(last) = self.swaps.last() {
            path.push(last.output_asset.clone());
        }
        path
    }

    /// Minimum acceptable final output, in the start asset.
    pub fn final_min_output(&self) -> u128 {
        self.swaps.last().map(|swap| swap.min_output).unwrap_or(0)
    }
}

/// Builds plans, enforcing staleness and the monotone-tightening law.
pub struct TransactionPlanner {
    slippage_buffer_bps: u32,
    replan_tolerance_bps: u32,
    deposit_per_hop: u128,
    signer_address: String,
}

impl TransactionPlanner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            slippage_buffer_bps: config.slippage_buffer_bps,
            replan_tolerance_bps: config.replan_tolerance_bps,
            deposit_per_hop: config.deposit,
            signer_address: config.signer_address.clone(),
        }
    }

    /// Translate an opportunity into a plan against `snapshot`.
    ///
    /// If the snapshot has moved past the opportunity's version, the cycle
    /// is requoted: a missing pool or a predicted output decayed beyond the
    /// replan tolerance refuses with `StaleOpportunity`. Otherwise the
    /// original numbers stand and only the guards tighten.
    pub fn build_plan(
        &self,
        opportunity: &Opportunity,
        snapshot: &GraphSnapshot,
    ) -> Result<TransactionPlan, EngineError> {
        if snapshot.as_of_slot >= opportunity.expiry_slot {
            return Err(EngineError::StaleOpportunity {
                computed: opportunity.snapshot_version,
                current: snapshot.version,
            });
        }

        if snapshot.version != opportunity.snapshot_version {
            self.check_drift(opportunity, snapshot)?;
        }

        let fee_budget = self.fee_budget_of(opportunity);
        let hops = opportunity.pools.len();
        let mut swaps = Vec::with_capacity(hops);
        for (hop, pool) in opportunity.pools.iter().enumerate() {
            let predicted = opportunity.hop_outputs[hop];
            let mut min_output = apply_buffer(predicted, self.slippage_buffer_bps);

            if hop + 1 == hops {
                // Final hop: never allow settlement below breakeven. The
                // guard only ever tightens relative to the prediction.
                let breakeven = opportunity.input + fee_budget + 1;
                if breakeven > predicted {
                    return Err(EngineError::InsufficientLiquidity(pool.clone()));
                }
                min_output = min_output.max(breakeven);
            }

            let input_amount = if hop == 0 {
                opportunity.input
            } else {
                opportunity.hop_outputs[hop - 1]
            };
            swaps.push(SwapInstruction {
                pool: pool.clone(),
                dex: opportunity.dexes[hop],
                input_asset: opportunity.path[hop].clone(),
                input_amount,
                output_asset: opportunity.path[hop + 1].clone(),
                min_output,
            });
        }

        let plan = TransactionPlan {
            swaps,
            fee_budget,
            deposit_budget: self.deposit_per_hop * hops as u128,
            signer: self.signer_address.clone(),
            expiry_slot: opportunity.expiry_slot,
            snapshot_version: opportunity.snapshot_version,
            input: opportunity.input,
            predicted_out: opportunity.predicted_out,
        };
        debug!(
            hops,
            input = plan.input,
            min_out = plan.final_min_output(),
            expiry = plan.expiry_slot,
            "built transaction plan"
        );
        Ok(plan)
    }

    /// Requote the cycle on the newer snapshot and refuse on unfavorable
    /// drift beyond tolerance.
    fn check_drift(
        &self,
        opportunity: &Opportunity,
        snapshot: &GraphSnapshot,
    ) -> Result<(), EngineError> {
        let stale = || EngineError::StaleOpportunity {
            computed: opportunity.snapshot_version,
            current: snapshot.version,
        };

        let pools: Option<Vec<_>> = opportunity
            .pools
            .iter()
            .map(|id| snapshot.pool(id))
            .collect();
        let Some(pools) = pools else {
            warn!(version = snapshot.version, "cycle pool vanished from newer snapshot");
            return Err(stale());
        };

        let Some(quote) = CycleQuote::simulate(&pools, &opportunity.path, opportunity.input)
        else {
            return Err(stale());
        };

        let floor = apply_buffer(opportunity.predicted_out, self.replan_tolerance_bps);
        if quote.output() < floor {
            debug!(
                predicted = opportunity.predicted_out,
                requoted = quote.output(),
                "price moved unfavorably past tolerance"
            );
            return Err(stale());
        }
        Ok(())
    }

    /// The lovelace fee budget baked into the opportunity's net profit.
    fn fee_budget_of(&self, opportunity: &Opportunity) -> u128 {
        if opportunity.path.first().map(AssetId::is_ada).unwrap_or(false) {
            (opportunity.predicted_out as i128
                - opportunity.input as i128
                - opportunity.net_profit)
                .max(0) as u128
        } else {
            0
        }
    }
}

fn apply_buffer(amount: u128, buffer_bps: u32) -> u128 {
    amount - amount * u128::from(buffer_bps) / 10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::PoolUpdate;
    use crate::dex::test_support::pool;
    use crate::dex::{Dex, Pool};
    use crate::graph::builder::GraphBuilder;
    use crate::graph::OpportunityDetector;

    fn ada() -> AssetId {
        AssetId::ada()
    }

    fn token(tag: &str) -> AssetId {
        AssetId::new("12".repeat(28), hex::encode(tag))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            batcher_fee: 0,
            network_fee: 0,
            min_trade: 1_000_000,
            signer_address: "addr1qsigner".to_string(),
            ..EngineConfig::default()
        }
    }

    fn triangle(skew_num: u128, skew_den: u128) -> Vec<Pool> {
        let r = 1_000_000_000_000u128;
        vec![
            pool("ab", Dex::MinswapV1, ada(), token("B"), r, r, 1000, 1000, 10),
            pool("bc", Dex::SundaeswapV1, token("B"), token("C"), r, r, 1000, 1000, 10),
            pool("ca", Dex::MinswapV1, token("C"), ada(), r, r * skew_num / skew_den, 1000, 1000, 10),
        ]
    }

    fn detect_one(
        builder: &GraphBuilder,
        pools: Vec<Pool>,
        slot: u64,
    ) -> (std::sync::Arc<GraphSnapshot>, Opportunity) {
        let snapshot = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools,
            slot,
        });
        let detector = OpportunityDetector::new(&config());
        let mut opportunities = detector.detect(&snapshot, &[ada()]);
        assert!(!opportunities.is_empty());
        (snapshot, opportunities.remove(0))
    }

    #[test]
    fn plan_guards_obey_the_monotone_tightening_law() {
        let builder = GraphBuilder::new(1_000);
        let (snapshot, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        let planner = TransactionPlanner::new(&config());
        let plan = planner.build_plan(&opportunity, &snapshot).expect("plan");

        assert_eq!(plan.swaps.len(), opportunity.hop_count());
        for (hop, swap) in plan.swaps.iter().enumerate() {
            // Never looser than the prediction.
            assert!(swap.min_output <= opportunity.hop_outputs[hop]);
        }
        // Final guard is at or above breakeven: settlement at the minimum
        // still returns the input plus fees.
        assert!(plan.final_min_output() > plan.input + plan.fee_budget);
        assert_eq!(plan.signer, "addr1qsigner");
    }

    #[test]
    fn build_plan_is_idempotent() {
        let builder = GraphBuilder::new(1_000);
        let (snapshot, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        let planner = TransactionPlanner::new(&config());
        let first = planner.build_plan(&opportunity, &snapshot).expect("plan");
        let second = planner.build_plan(&opportunity, &snapshot).expect("plan");
        assert_eq!(first, second);
    }

    /// Scenario C: graph advances with an unfavorable move before planning.
    #[test]
    fn unfavorable_drift_past_tolerance_is_stale() {
        let builder = GraphBuilder::new(1_000);
        let (_, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        // Version 2: the C/A pool price collapses back to parity, wiping
        // out the edge the opportunity priced in.
        let newer = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools: triangle(1, 1),
            slot: 11,
        });
        assert!(newer.version > opportunity.snapshot_version);

        let planner = TransactionPlanner::new(&config());
        let result = planner.build_plan(&opportunity, &newer);
        assert!(matches!(
            result,
            Err(EngineError::StaleOpportunity { computed, current })
                if computed == opportunity.snapshot_version && current == newer.version
        ));
    }

    #[test]
    fn benign_drift_within_tolerance_still_plans() {
        let builder = GraphBuilder::new(1_000);
        let (_, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        // Republish the same pools: version moves, prices do not.
        let newer = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools: triangle(21, 20),
            slot: 11,
        });

        let planner = TransactionPlanner::new(&config());
        let plan = planner.build_plan(&opportunity, &newer).expect("plan");
        // The plan still carries the numbers of the snapshot it priced.
        assert_eq!(plan.snapshot_version, opportunity.snapshot_version);
    }

    #[test]
    fn vanished_pool_is_stale() {
        let builder = GraphBuilder::new(1_000);
        let (_, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        let mut remaining = triangle(21, 20);
        remaining.retain(|p| p.id.0 != "bc");
        let newer = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools: remaining,
            slot: 11,
        });

        let planner = TransactionPlanner::new(&config());
        assert!(matches!(
            planner.build_plan(&opportunity, &newer),
            Err(EngineError::StaleOpportunity { .. })
        ));
    }

    #[test]
    fn expired_opportunity_is_refused() {
        let builder = GraphBuilder::new(10_000);
        let (_, opportunity) = detect_one(&builder, triangle(21, 20), 10);

        // Chain view far past the opportunity's expiry.
        let late = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools: triangle(21, 20),
            slot: opportunity.expiry_slot + 1,
        });

        let planner = TransactionPlanner::new(&config());
        assert!(matches!(
            planner.build_plan(&opportunity, &late),
            Err(EngineError::StaleOpportunity { .. })
        ));
    }
}
