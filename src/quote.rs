//! Exact cycle quoting over actual reserves
//!
//! The marginal-rate graph only filters candidates; real trade size moves
//! the price. A [`CycleQuote`] folds the exact constant-product output
//! across every hop, and [`optimal_input`] searches the input domain for
//! the profit maximizer. Cycle profit is concave in the input (each hop's
//! output is concave and increasing), so a ternary search converges.

use crate::asset::AssetId;
use crate::dex::Pool;

/// Result of pushing one input amount around a full cycle.
#[derive(Debug, Clone)]
pub struct CycleQuote {
    pub input: u128,
    /// Predicted output of each hop, in that hop's output asset.
    pub hop_outputs: Vec<u128>,
}

impl CycleQuote {
    /// Simulate `path[0] -> path[1] -> ... -> path[n] == path[0]` through
    /// `pools`, one pool per hop. `None` when an asset is missing from its
    /// pool, a hop rounds to zero, or the math overflows.
    pub fn simulate(pools: &[&Pool], path: &[AssetId], input: u128) -> Option<Self> {
        if pools.is_empty() || pools.len() + 1 != path.len() || input == 0 {
            return None;
        }
        let mut hop_outputs = Vec::with_capacity(pools.len());
        let mut amount = input;
        for (hop, pool) in pools.iter().enumerate() {
            amount = pool.amount_out(&path[hop], amount)?;
            if amount == 0 {
                return None;
            }
            hop_outputs.push(amount);
        }
        Some(Self { input, hop_outputs })
    }

    /// Final output, in the start asset.
    pub fn output(&self) -> u128 {
        *self.hop_outputs.last().unwrap_or(&0)
    }

    /// Net profit after the fixed fee budget, in the start asset.
    pub fn profit(&self, fee_budget: u128) -> i128 {
        self.output() as i128 - self.input as i128 - fee_budget as i128
    }
}

/// Net profit at `input`, with failed simulation pinned to the bottom.
fn profit_at(pools: &[&Pool], path: &[AssetId], input: u128, fee_budget: u128) -> i128 {
    CycleQuote::simulate(pools, path, input)
        .map(|quote| quote.profit(fee_budget))
        .unwrap_or(i128::MIN)
}

/// Find the input in `[lo, hi]` maximizing net cycle profit.
///
/// Returns the quote at the best input, profitable or not; callers apply
/// their own admission threshold. `None` when no input in the range
/// simulates successfully.
pub fn optimal_input(
    pools: &[&Pool],
    path: &[AssetId],
    lo: u128,
    hi: u128,
    fee_budget: u128,
) -> Option<CycleQuote> {
    if lo == 0 || hi < lo {
        return None;
    }
    let (mut lo, mut hi) = (lo, hi);

    // Integer division flattens the profit curve locally, so narrow by
    // thirds down to a window small enough to scan exhaustively.
    while hi - lo > 16 {
        let step = (hi - lo) / 3;
        let m1 = lo + step;
        let m2 = hi - step;
        let p1 = profit_at(pools, path, m1, fee_budget);
        let p2 = profit_at(pools, path, m2, fee_budget);
        if p1 < p2 {
            lo = m1;
        } else if p1 > p2 {
            hi = m2;
        } else {
            lo = m1;
            hi = m2;
        }
    }

    let mut best: Option<(i128, u128)> = None;
    let mut input = lo;
    while input <= hi {
        let profit = profit_at(pools, path, input, fee_budget);
        if profit > i128::MIN && best.map_or(true, |(bp, _)| profit > bp) {
            best = Some((profit, input));
        }
        input += 1;
    }

    let (_, best_input) = best?;
    CycleQuote::simulate(pools, path, best_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::test_support::pool;
    use crate::dex::Dex;

    fn ada() -> AssetId {
        AssetId::ada()
    }

    fn token(tag: &str) -> AssetId {
        AssetId::new("cd".repeat(28), hex::encode(tag))
    }

    /// Three pools with marginal rates 1.00, 1.00, 1.05 and zero fees.
    fn skewed_triangle() -> Vec<Pool> {
        let r = 1_000_000_000_000u128;
        vec![
            pool("ab", Dex::MinswapV1, ada(), token("B"), r, r, 1000, 1000, 1),
            pool("bc", Dex::SundaeswapV1, token("B"), token("C"), r, r, 1000, 1000, 1),
            pool("ca", Dex::MinswapV1, token("C"), ada(), r, r + r / 20, 1000, 1000, 1),
        ]
    }

    #[test]
    fn simulation_chains_hop_outputs() {
        let pools = skewed_triangle();
        let refs: Vec<&Pool> = pools.iter().collect();
        let path = vec![ada(), token("B"), token("C"), ada()];

        let quote = CycleQuote::simulate(&refs, &path, 1_000_000_000).expect("quote");
        assert_eq!(quote.hop_outputs.len(), 3);
        // Each hop's output seeds the next; the last one is the cycle output.
        assert!(quote.output() > quote.input);
    }

    #[test]
    fn optimal_input_is_profitable_on_skewed_cycle() {
        let pools = skewed_triangle();
        let refs: Vec<&Pool> = pools.iter().collect();
        let path = vec![ada(), token("B"), token("C"), ada()];

        let quote = optimal_input(&refs, &path, 1_000_000, 500_000_000_000, 0).expect("quote");
        assert!(quote.profit(0) > 0);

        // The maximizer beats both a tiny and a huge trade.
        let small = CycleQuote::simulate(&refs, &path, 1_000_000).unwrap();
        let large = CycleQuote::simulate(&refs, &path, 500_000_000_000).unwrap();
        assert!(quote.profit(0) >= small.profit(0));
        assert!(quote.profit(0) >= large.profit(0));
    }

    #[test]
    fn balanced_cycle_is_never_profitable() {
        let r = 1_000_000_000_000u128;
        let pools = vec![
            pool("ab", Dex::MinswapV1, ada(), token("B"), r, r, 997, 1000, 1),
            pool("ba", Dex::SundaeswapV1, token("B"), ada(), r, r, 997, 1000, 1),
        ];
        let refs: Vec<&Pool> = pools.iter().collect();
        let path = vec![ada(), token("B"), ada()];

        let quote = optimal_input(&refs, &path, 1_000_000, r / 2, 0).expect("quote");
        assert!(quote.profit(0) <= 0);
    }

    #[test]
    fn mismatched_path_is_rejected() {
        let pools = skewed_triangle();
        let refs: Vec<&Pool> = pools.iter().collect();
        assert!(CycleQuote::simulate(&refs, &[ada(), token("B")], 1_000).is_none());
        assert!(CycleQuote::simulate(&refs, &[], 1_000).is_none());
    }
}
