//! DEX pools and per-protocol handlers

pub mod minswap_v1;
pub mod sundaeswap_v1;

use serde::{Deserialize, Serialize};

use crate::asset::AssetId;
use crate::chain::{OutputRef, Utxo};

/// Enum representing supported DEXes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dex {
    MinswapV1,
    SundaeswapV1,
}

impl Dex {
    pub fn all() -> [Dex; 2] {
        [Dex::MinswapV1, Dex::SundaeswapV1]
    }
}

impl std::fmt::Display for Dex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dex::MinswapV1 => write!(f, "Minswap V1"),
            Dex::SundaeswapV1 => write!(f, "SundaeSwap V1"),
        }
    }
}

/// Pool identity, taken from the pool NFT asset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A constant-product liquidity pool, normalized across DEX protocols.
///
/// Reserves are exact integers in the smallest on-chain unit. The record is
/// replaced wholesale on every refresh; nothing mutates it in place.
#[derive(Debug, Clone)]
pub struct Pool {
    pub id: PoolId,
    pub dex: Dex,
    /// UTXO currently holding the pool.
    pub utxo: OutputRef,
    pub asset_a: AssetId,
    pub asset_b: AssetId,
    pub reserve_a: u128,
    pub reserve_b: u128,
    /// Swap fee as an exact rational: the pool keeps
    /// `1 - fee_num/fee_den` of every input.
    pub fee_num: u64,
    pub fee_den: u64,
    /// LP token circulation, when the protocol tracks one.
    pub lp_supply: Option<u128>,
    /// Slot at which this state was observed.
    pub seen_slot: u64,
}

impl Pool {
    pub fn contains(&self, asset: &AssetId) -> bool {
        self.asset_a == *asset || self.asset_b == *asset
    }

    pub fn other_asset(&self, asset: &AssetId) -> Option<&AssetId> {
        if self.asset_a == *asset {
            Some(&self.asset_b)
        } else if self.asset_b == *asset {
            Some(&self.asset_a)
        } else {
            None
        }
    }

    /// `(reserve_in, reserve_out)` for a swap entering with `input`.
    pub fn reserves_for(&self, input: &AssetId) -> Option<(u128, u128)> {
        if self.asset_a == *input {
            Some((self.reserve_a, self.reserve_b))
        } else if self.asset_b == *input {
            Some((self.reserve_b, self.reserve_a))
        } else {
            None
        }
    }

    /// Exact constant-product output:
    /// `(in * fee_num * r_out) / (r_in * fee_den + in * fee_num)`.
    ///
    /// Integer arithmetic throughout; `None` when the asset is not in the
    /// pool or the intermediate products overflow.
    pub fn amount_out(&self, input: &AssetId, amount: u128) -> Option<u128> {
        let (r_in, r_out) = self.reserves_for(input)?;
        if r_in == 0 || r_out == 0 {
            return None;
        }
        let amount_with_fee = amount.checked_mul(u128::from(self.fee_num))?;
        let numerator = amount_with_fee.checked_mul(r_out)?;
        let denominator = r_in
            .checked_mul(u128::from(self.fee_den))?
            .checked_add(amount_with_fee)?;
        Some(numerator / denominator)
    }

    /// Required input for a desired output, rounded up. `None` when the
    /// output would drain the pool.
    pub fn amount_in(&self, output: &AssetId, amount: u128) -> Option<u128> {
        let other = self.other_asset(output)?.clone();
        let (r_in, r_out) = self.reserves_for(&other)?;
        if amount >= r_out {
            return None;
        }
        let numerator = r_in
            .checked_mul(amount)?
            .checked_mul(u128::from(self.fee_den))?;
        let denominator = (r_out - amount).checked_mul(u128::from(self.fee_num))?;
        Some(numerator / denominator + 1)
    }

    /// Zero-size exchange rate net of fee. First-filter and display only;
    /// trade sizing always goes through [`Pool::amount_out`].
    pub fn marginal_rate(&self, input: &AssetId) -> Option<f64> {
        let (r_in, r_out) = self.reserves_for(input)?;
        if r_in == 0 {
            return None;
        }
        let fee_factor = self.fee_num as f64 / self.fee_den as f64;
        Some(r_out as f64 / r_in as f64 * fee_factor)
    }

    /// Fee-free spot price of the other asset in terms of `base`.
    pub fn spot_price(&self, base: &AssetId) -> Option<f64> {
        let (r_base, r_quote) = self.reserves_for(base)?;
        if r_base == 0 {
            return None;
        }
        Some(r_quote as f64 / r_base as f64)
    }

    /// Reserve of `asset`, the pool's depth on that side.
    pub fn depth(&self, asset: &AssetId) -> u128 {
        if self.asset_a == *asset {
            self.reserve_a
        } else if self.asset_b == *asset {
            self.reserve_b
        } else {
            0
        }
    }

    pub fn fee_bps(&self) -> u32 {
        10_000u64.saturating_sub(10_000 * self.fee_num / self.fee_den) as u32
    }

    pub fn is_coherent(&self) -> bool {
        self.reserve_a > 0 && self.reserve_b > 0 && self.asset_a != self.asset_b
    }
}

/// Capability interface implemented per DEX variant.
///
/// A handler knows how to recognize its protocol's pool UTXOs and normalize
/// them into [`Pool`] records; everything downstream is protocol-agnostic.
pub trait PoolHandler: Send + Sync {
    fn dex(&self) -> Dex;

    /// Script address whose UTXOs may hold this DEX's pools.
    fn pool_address(&self) -> &'static str;

    /// Parse a pool out of a raw UTXO observed at `slot`.
    /// `None` when the UTXO is not a pool of this protocol.
    fn parse_pool(&self, utxo: &Utxo, slot: u64) -> Option<Pool>;
}

pub fn handler_for(dex: Dex) -> Box<dyn PoolHandler> {
    match dex {
        Dex::MinswapV1 => Box::new(minswap_v1::MinswapV1Handler),
        Dex::SundaeswapV1 => Box::new(sundaeswap_v1::SundaeswapV1Handler),
    }
}

/// Asset name of the pool NFT under `policy`, when the UTXO holds exactly
/// one unit of it. The NFT identifies the pool across UTXO replacements.
pub(crate) fn pool_nft_name(utxo: &Utxo, policy: &str) -> Option<String> {
    let assets = utxo.value.get(policy)?;
    assets
        .iter()
        .find(|(_, quantity)| **quantity == 1)
        .map(|(name, _)| name.clone())
}

/// Recover the traded pair and reserves from a pool UTXO's value map.
///
/// After dropping ADA and the protocol's own bookkeeping policies, an ADA
/// pool holds exactly one foreign asset plus lovelace above the dust floor;
/// a token/token pool holds exactly two. Anything else is malformed.
pub(crate) fn extract_pair(
    utxo: &Utxo,
    ignored_policies: &[&str],
) -> Option<(AssetId, u128, AssetId, u128)> {
    let mut foreign: Vec<(AssetId, u128)> = Vec::new();
    for (policy, assets) in &utxo.value {
        if policy == "ada" || ignored_policies.contains(&policy.as_str()) {
            continue;
        }
        for (name, quantity) in assets {
            if *quantity > 0 {
                foreign.push((AssetId::new(policy.clone(), name.clone()), *quantity));
            }
        }
    }
    foreign.sort_by(|a, b| a.0.cmp(&b.0));

    let lovelace = utxo.lovelace();
    match foreign.len() {
        1 if lovelace >= crate::config::thresholds::MIN_POOL_LOVELACE => {
            let (asset, quantity) = foreign.remove(0);
            Some((AssetId::ada(), lovelace, asset, quantity))
        }
        2 => {
            let (asset_b, reserve_b) = foreign.remove(1);
            let (asset_a, reserve_a) = foreign.remove(0);
            Some((asset_a, reserve_a, asset_b, reserve_b))
        }
        _ => None,
    }
}
