//! Engine configuration
//!
//! Numeric defaults follow Minswap V1 figures (2 ADA batcher fee, 2 ADA
//! refundable deposit). Everything is overridable from the environment.

use std::time::Duration;

use crate::asset::AssetId;

/// Validation thresholds for pool and cycle sanity checks.
pub mod thresholds {
    /// A pool's two directional spot prices must multiply to ~1.
    /// Larger deviation means corrupted reserve data.
    pub const MAX_ROUND_TRIP_DEVIATION: f64 = 0.02;

    /// Marginal returns above this are noise, not arbitrage.
    pub const MAX_EXPECTED_RETURN: f64 = 1.5;

    /// Marginal returns below this are dust.
    pub const MIN_EXPECTED_RETURN: f64 = 1.0001;

    /// Pools holding less ADA than this are not real pools.
    pub const MIN_POOL_LOVELACE: u128 = 4_000_000;
}

/// Static metadata for well-known mainnet assets.
pub mod tokens {
    use crate::asset::AssetId;

    const KNOWN: &[(&str, &str, &str, u8)] = &[
        (
            "29d222ce763455e3d7a09a665ce554f00ac89d2e99a1a83d267170c6",
            "4d494e",
            "MIN",
            6,
        ),
        (
            "9a9693a9a37912a5097918f97918d15240c92ab729a0b7c4aa144d77",
            "53554e444145",
            "SUNDAE",
            6,
        ),
        (
            "8db269c3ec630e06ae29f74bc39edd1f87c819f1056206e879a1cd61",
            "446a65644d6963726f555344",
            "DJED",
            6,
        ),
    ];

    /// Short human-readable symbol, falling back to the policy..name form.
    pub fn symbol(asset: &AssetId) -> String {
        if asset.is_ada() {
            return "ADA".to_string();
        }
        for (policy, name, symbol, _) in KNOWN {
            if asset.policy_id == *policy && asset.name == *name {
                return (*symbol).to_string();
            }
        }
        asset.to_string()
    }

    /// Decimal precision for display. Unknown native tokens default to 0.
    pub fn decimals(asset: &AssetId) -> u8 {
        if asset.is_ada() {
            return 6;
        }
        for (policy, name, _, decimals) in KNOWN {
            if asset.policy_id == *policy && asset.name == *name {
                return *decimals;
            }
        }
        0
    }
}

/// Runtime configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ogmios WebSocket endpoint.
    pub ogmios_url: String,
    /// Maximum hops in an arbitrage cycle (2..=4 is the useful range).
    pub max_hops: usize,
    /// Minimum net profit, in basis points of the input, to report an opportunity.
    pub min_profit_bps: u32,
    /// Slippage buffer applied to minimum-output guards, in basis points.
    pub slippage_buffer_bps: u32,
    /// Tolerated predicted-output decay when planning against a newer snapshot.
    pub replan_tolerance_bps: u32,
    /// Pools last observed more than this many slots ago are excluded.
    pub stale_horizon_slots: u64,
    /// Opportunities and plans expire this many slots after their snapshot.
    pub expiry_horizon_slots: u64,
    /// Fresh-plan retries after an on-chain rejection.
    pub max_submit_retries: u32,
    /// Transient-failure attempts per refresh before the round is skipped.
    pub max_fetch_attempts: u32,
    /// Concurrent in-flight submissions.
    pub max_inflight: usize,
    /// Pool refresh cadence per DEX.
    pub poll_interval: Duration,
    /// Confirmation polling cadence.
    pub status_poll_interval: Duration,
    /// Per-hop batcher fee, lovelace.
    pub batcher_fee: u128,
    /// Per-hop refundable deposit, lovelace. Locked during execution,
    /// returned on settlement, so it is not part of the fee budget.
    pub deposit: u128,
    /// Flat network fee estimate per transaction, lovelace.
    pub network_fee: u128,
    /// Smallest trade worth routing, in units of the base asset.
    pub min_trade: u128,
    /// Address that signs and receives the cycle output.
    pub signer_address: String,
    /// Assets cycles must start and end at.
    pub base_assets: Vec<AssetId>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ogmios_url: "ws://127.0.0.1:1337".to_string(),
            max_hops: 4,
            min_profit_bps: 30,
            slippage_buffer_bps: 50,
            replan_tolerance_bps: 50,
            stale_horizon_slots: 120,
            expiry_horizon_slots: 120,
            max_submit_retries: 1,
            max_fetch_attempts: 5,
            max_inflight: 4,
            poll_interval: Duration::from_millis(5_000),
            status_poll_interval: Duration::from_millis(2_000),
            batcher_fee: 2_000_000,
            deposit: 2_000_000,
            network_fee: 300_000,
            min_trade: 10_000_000,
            signer_address: String::new(),
            base_assets: vec![AssetId::ada()],
        }
    }
}

impl EngineConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ogmios_url: env_str("OGMIOS_URL", &defaults.ogmios_url),
            max_hops: env_u64("ARB_MAX_HOPS", defaults.max_hops as u64) as usize,
            min_profit_bps: env_u64("ARB_MIN_PROFIT_BPS", u64::from(defaults.min_profit_bps))
                as u32,
            slippage_buffer_bps: env_u64(
                "ARB_SLIPPAGE_BUFFER_BPS",
                u64::from(defaults.slippage_buffer_bps),
            ) as u32,
            replan_tolerance_bps: env_u64(
                "ARB_REPLAN_TOLERANCE_BPS",
                u64::from(defaults.replan_tolerance_bps),
            ) as u32,
            stale_horizon_slots: env_u64("ARB_STALE_HORIZON_SLOTS", defaults.stale_horizon_slots),
            expiry_horizon_slots: env_u64(
                "ARB_EXPIRY_HORIZON_SLOTS",
                defaults.expiry_horizon_slots,
            ),
            max_submit_retries: env_u64(
                "ARB_MAX_SUBMIT_RETRIES",
                u64::from(defaults.max_submit_retries),
            ) as u32,
            max_fetch_attempts: env_u64(
                "ARB_MAX_FETCH_ATTEMPTS",
                u64::from(defaults.max_fetch_attempts),
            ) as u32,
            max_inflight: env_u64("ARB_MAX_INFLIGHT", defaults.max_inflight as u64) as usize,
            poll_interval: Duration::from_millis(env_u64(
                "ARB_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            status_poll_interval: Duration::from_millis(env_u64(
                "ARB_STATUS_POLL_INTERVAL_MS",
                defaults.status_poll_interval.as_millis() as u64,
            )),
            batcher_fee: u128::from(env_u64("ARB_BATCHER_FEE", defaults.batcher_fee as u64)),
            deposit: u128::from(env_u64("ARB_DEPOSIT", defaults.deposit as u64)),
            network_fee: u128::from(env_u64("ARB_NETWORK_FEE", defaults.network_fee as u64)),
            min_trade: u128::from(env_u64("ARB_MIN_TRADE", defaults.min_trade as u64)),
            signer_address: env_str("ARB_SIGNER_ADDRESS", &defaults.signer_address),
            base_assets: defaults.base_assets,
        }
    }

    /// Lovelace spent per executed cycle of `hops` swaps. Deposits are
    /// returned on settlement and therefore excluded.
    pub fn fee_budget(&self, hops: usize) -> u128 {
        self.batcher_fee * hops as u128 + self.network_fee
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
