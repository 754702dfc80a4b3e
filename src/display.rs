//! Human-facing rendering
//!
//! The only place floating point and decimal formatting touch amounts;
//! everything upstream stays in integer smallest units.

use rust_decimal::Decimal;

use crate::config::tokens;
use crate::graph::{GraphSnapshot, Opportunity};

/// Render a smallest-unit amount with the asset's decimal precision.
pub fn format_amount(amount: u128, decimals: u8) -> String {
    match i64::try_from(amount) {
        Ok(value) => Decimal::new(value, u32::from(decimals)).normalize().to_string(),
        Err(_) => amount.to_string(),
    }
}

pub fn print_opportunities(opportunities: &[Opportunity]) {
    if opportunities.is_empty() {
        println!("No profitable cycles at the current snapshot.");
        return;
    }

    println!("\n  {:<44} {:>6} {:>12} {:>12} {:>10}", "PATH", "HOPS", "INPUT", "PROFIT", "BPS");
    println!("  {}", "-".repeat(88));
    for opportunity in opportunities {
        let base = &opportunity.path[0];
        let decimals = tokens::decimals(base);
        let profit = if opportunity.net_profit >= 0 {
            format_amount(opportunity.net_profit as u128, decimals)
        } else {
            format!("-{}", format_amount(opportunity.net_profit.unsigned_abs(), decimals))
        };
        println!(
            "  {:<44} {:>6} {:>12} {:>12} {:>10}",
            opportunity.path_string(),
            opportunity.hop_count(),
            format_amount(opportunity.input, decimals),
            profit,
            opportunity.profit_bps(),
        );
    }
    println!();
}

pub fn print_snapshot(snapshot: &GraphSnapshot) {
    println!(
        "\nSnapshot v{} @ slot {} | {} pools, {} assets, {} edges\n",
        snapshot.version,
        snapshot.as_of_slot,
        snapshot.pool_count(),
        snapshot.node_count(),
        snapshot.edge_count(),
    );
    println!(
        "  {:<14} {:<10} {:<26} {:>16} {:>16} {:>12}",
        "DEX", "FEE(bps)", "PAIR", "RESERVE A", "RESERVE B", "SPOT B/A"
    );
    println!("  {}", "-".repeat(99));
    let mut pools: Vec<_> = snapshot.pools().collect();
    pools.sort_by(|a, b| a.id.cmp(&b.id));
    for pool in pools {
        let spot = pool
            .spot_price(&pool.asset_a)
            .map(|price| format!("{price:.6}"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<14} {:<10} {:<26} {:>16} {:>16} {:>12}",
            pool.dex.to_string(),
            pool.fee_bps(),
            format!("{}/{}", tokens::symbol(&pool.asset_a), tokens::symbol(&pool.asset_b)),
            format_amount(pool.reserve_a, tokens::decimals(&pool.asset_a)),
            format_amount(pool.reserve_b, tokens::decimals(&pool.asset_b)),
            spot,
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn formats_lovelace_as_ada() {
        assert_eq!(format_amount(12_345_678, 6), "12.345678");
        assert_eq!(format_amount(2_000_000, 6), "2");
        assert_eq!(format_amount(7, 0), "7");
    }

    #[test]
    fn formatting_matches_decimal_semantics() {
        assert_eq!(format_amount(1_500_000, 6), dec!(1.5).to_string());
    }
}
