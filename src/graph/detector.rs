//! Bounded cycle search over a graph snapshot
//!
//! Depth-first enumeration of negative-weight cycles up to the hop bound,
//! then exact refinement of every surviving candidate against real
//! reserves. Detection always runs against a single snapshot version; the
//! caller discards results whose version has been superseded.

use std::collections::HashSet;

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use tracing::{debug, info, trace};

use super::builder::GraphSnapshot;
use crate::asset::AssetId;
use crate::config::{thresholds, tokens, EngineConfig};
use crate::dex::{Dex, PoolId};
use crate::quote::{optimal_input, CycleQuote};

/// A profitable cycle, sized and tagged against one snapshot version.
#[derive(Debug, Clone)]
pub struct Opportunity {
    /// Asset path; first and last entries are the same base asset.
    pub path: Vec<AssetId>,
    /// One pool per hop.
    pub pools: Vec<PoolId>,
    pub dexes: Vec<Dex>,
    /// Input amount, in the base asset.
    pub input: u128,
    /// Predicted output of each hop at `input`.
    pub hop_outputs: Vec<u128>,
    /// Predicted final output, in the base asset.
    pub predicted_out: u128,
    /// Predicted profit net of the fee budget.
    pub net_profit: i128,
    /// Shallowest reserve traversed, for tie-breaking.
    pub min_depth: u128,
    /// Snapshot this was computed against. Planning refuses anything else
    /// without a staleness check.
    pub snapshot_version: u64,
    pub expiry_slot: u64,
}

impl Opportunity {
    pub fn hop_count(&self) -> usize {
        self.pools.len()
    }

    pub fn profit_bps(&self) -> i64 {
        if self.input == 0 {
            return 0;
        }
        ((self.net_profit * 10_000) / self.input as i128) as i64
    }

    pub fn is_cross_dex(&self) -> bool {
        self.dexes.iter().any(|dex| *dex != self.dexes[0])
    }

    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(tokens::symbol)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Marginal-filter candidate, before exact sizing.
struct Candidate {
    path: Vec<AssetId>,
    pools: Vec<PoolId>,
    dexes: Vec<Dex>,
    expected_return: f64,
}

impl Candidate {
    fn signature(&self) -> String {
        let mut ids: Vec<&str> = self.pools.iter().map(|id| id.0.as_str()).collect();
        ids.sort_unstable();
        ids.join("-")
    }

    fn is_viable(&self) -> bool {
        if self.path.len() < 3 || self.path.first() != self.path.last() {
            return false;
        }
        let unique_pools: HashSet<&PoolId> = self.pools.iter().collect();
        if unique_pools.len() != self.pools.len() {
            return false;
        }
        self.expected_return.is_finite()
            && self.expected_return > thresholds::MIN_EXPECTED_RETURN
            && self.expected_return < thresholds::MAX_EXPECTED_RETURN
    }
}

/// Searches snapshots for profitable, executable cycles.
pub struct OpportunityDetector {
    config: EngineConfig,
}

impl OpportunityDetector {
    pub fn new(config: &EngineConfig) -> Self {
        let mut config = config.clone();
        config.max_hops = config.max_hops.max(2);
        config.min_trade = config.min_trade.max(1);
        Self { config }
    }

    /// Enumerate profitable cycles from the given base assets, best first.
    pub fn detect(&self, snapshot: &GraphSnapshot, base_assets: &[AssetId]) -> Vec<Opportunity> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut opportunities = Vec::new();

        for base in base_assets {
            let Some(start) = snapshot.node(base) else {
                continue;
            };
            let mut candidates = Vec::new();
            self.dfs(
                snapshot,
                start,
                start,
                &mut vec![base.clone()],
                &mut Vec::new(),
                &mut Vec::new(),
                &mut HashSet::new(),
                0.0,
                &mut candidates,
            );
            debug!(
                base = %tokens::symbol(base),
                candidates = candidates.len(),
                "marginal filter pass"
            );

            for candidate in candidates {
                if !seen.insert(candidate.signature()) {
                    continue;
                }
                if let Some(opportunity) = self.refine(snapshot, &candidate) {
                    info!(
                        path = %opportunity.path_string(),
                        hops = opportunity.hop_count(),
                        profit_bps = opportunity.profit_bps(),
                        cross_dex = opportunity.is_cross_dex(),
                        "opportunity"
                    );
                    opportunities.push(opportunity);
                }
            }
        }

        opportunities.sort_by(Self::ranking);
        opportunities
    }

    /// Net profit descending; within comparable profitability (same 5%
    /// bucket) prefer fewer hops, then deeper liquidity.
    fn ranking(a: &Opportunity, b: &Opportunity) -> std::cmp::Ordering {
        profit_bucket(b.net_profit)
            .cmp(&profit_bucket(a.net_profit))
            .then(a.hop_count().cmp(&b.hop_count()))
            .then(b.min_depth.cmp(&a.min_depth))
            .then(b.net_profit.cmp(&a.net_profit))
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs(
        &self,
        snapshot: &GraphSnapshot,
        start: NodeIndex,
        current: NodeIndex,
        path: &mut Vec<AssetId>,
        pools: &mut Vec<PoolId>,
        dexes: &mut Vec<Dex>,
        visited: &mut HashSet<NodeIndex>,
        total_weight: f64,
        out: &mut Vec<Candidate>,
    ) {
        for edge in snapshot.graph.edges(current) {
            let target = edge.target();
            let data = edge.weight();
            let weight = total_weight + data.weight;

            if target == start && pools.len() + 1 >= 2 {
                if weight < 0.0 {
                    let mut candidate_path = path.clone();
                    candidate_path.push(
                        snapshot
                            .asset(start)
                            .cloned()
                            .unwrap_or_else(AssetId::ada),
                    );
                    let mut candidate_pools = pools.clone();
                    candidate_pools.push(data.pool.clone());
                    let mut candidate_dexes = dexes.clone();
                    candidate_dexes.push(data.dex);

                    let candidate = Candidate {
                        path: candidate_path,
                        pools: candidate_pools,
                        dexes: candidate_dexes,
                        expected_return: (-weight).exp(),
                    };
                    if candidate.is_viable() {
                        out.push(candidate);
                    } else {
                        trace!(return_ = candidate.expected_return, "candidate rejected");
                    }
                }
            } else if !visited.contains(&target) && pools.len() + 1 < self.config.max_hops {
                let Some(asset) = snapshot.asset(target).cloned() else {
                    continue;
                };
                path.push(asset);
                pools.push(data.pool.clone());
                dexes.push(data.dex);
                visited.insert(target);

                self.dfs(snapshot, start, target, path, pools, dexes, visited, weight, out);

                visited.remove(&target);
                dexes.pop();
                pools.pop();
                path.pop();
            }
        }
    }

    /// Size the candidate against real reserves and apply the admission
    /// thresholds.
    fn refine(&self, snapshot: &GraphSnapshot, candidate: &Candidate) -> Option<Opportunity> {
        let pools: Option<Vec<_>> = candidate
            .pools
            .iter()
            .map(|id| snapshot.pool(id))
            .collect();
        let pools = pools?;
        let base = candidate.path.first()?;

        // Batcher and network fees are paid in lovelace; they enter the
        // profit equation directly only for ADA-based cycles. Non-ADA
        // bases must clear them through the bps thresholds instead.
        let fee_budget = if base.is_ada() {
            self.config.fee_budget(pools.len())
        } else {
            0
        };

        let (reserve_in, _) = pools[0].reserves_for(base)?;
        let hi = (reserve_in / 2).max(self.config.min_trade);
        let quote = optimal_input(&pools, &candidate.path, self.config.min_trade, hi, fee_budget)?;

        let net_profit = quote.profit(fee_budget);
        if net_profit <= 0 {
            return None;
        }
        // Explicit slippage buffer: profit must survive the worst case the
        // plan's minimum-output guards will later allow.
        let buffer = quote.output() * u128::from(self.config.slippage_buffer_bps) / 10_000;
        if net_profit <= buffer as i128 {
            return None;
        }
        if net_profit * 10_000 < (quote.input * u128::from(self.config.min_profit_bps)) as i128 {
            return None;
        }

        let min_depth = pools
            .iter()
            .zip(candidate.path.iter())
            .map(|(pool, input_asset)| pool.depth(input_asset))
            .min()
            .unwrap_or(0);

        Some(Opportunity {
            path: candidate.path.clone(),
            pools: candidate.pools.clone(),
            dexes: candidate.dexes.clone(),
            input: quote.input,
            predicted_out: quote.output(),
            hop_outputs: quote.hop_outputs.clone(),
            net_profit,
            min_depth,
            snapshot_version: snapshot.version,
            expiry_slot: snapshot.as_of_slot + self.config.expiry_horizon_slots,
        })
    }

    /// Recompute an opportunity's profit independently from its ordered
    /// swaps. Used by planning-side verification and tests.
    pub fn recompute_profit(
        &self,
        snapshot: &GraphSnapshot,
        opportunity: &Opportunity,
    ) -> Option<i128> {
        let pools: Option<Vec<_>> = opportunity
            .pools
            .iter()
            .map(|id| snapshot.pool(id))
            .collect();
        let quote = CycleQuote::simulate(&pools?, &opportunity.path, opportunity.input)?;
        let fee_budget = if opportunity.path[0].is_ada() {
            self.config.fee_budget(opportunity.pools.len())
        } else {
            0
        };
        Some(quote.profit(fee_budget))
    }
}

/// 5%-wide logarithmic profit buckets; transitive stand-in for "comparable
/// profitability".
fn profit_bucket(net_profit: i128) -> i64 {
    if net_profit <= 0 {
        return i64::MIN;
    }
    ((net_profit as f64).ln() / 1.05f64.ln()).floor() as i64
}
