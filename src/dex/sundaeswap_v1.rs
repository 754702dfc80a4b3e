//! SundaeSwap V1 pools — constant product AMM with a 0.5% default fee
//!
//! Sundae mints its pool NFT and LP tokens under one factory policy, so
//! ignoring that policy wholesale drops both from the reserve extraction.

use crate::chain::Utxo;
use crate::dex::{extract_pair, pool_nft_name, Dex, Pool, PoolHandler, PoolId};

/// Mainnet pool script address.
const POOL_ADDRESS: &str = "addr1w9qzpelu9hn45pefc0xr4ac4kdxeswq7pndul2vuj59u8tqaxdznu";

/// Factory policy for pool NFTs and LP tokens.
const FACTORY_POLICY: &str = "0029cb7c88c7567b63d1a512c0ed626aa169688ec980730c0473b913";

const FEE_NUM: u64 = 995;
const FEE_DEN: u64 = 1000;

pub struct SundaeswapV1Handler;

impl PoolHandler for SundaeswapV1Handler {
    fn dex(&self) -> Dex {
        Dex::SundaeswapV1
    }

    fn pool_address(&self) -> &'static str {
        POOL_ADDRESS
    }

    fn parse_pool(&self, utxo: &Utxo, slot: u64) -> Option<Pool> {
        utxo.datum.as_ref()?;
        let nft_name = pool_nft_name(utxo, FACTORY_POLICY)?;

        let (asset_a, reserve_a, asset_b, reserve_b) =
            extract_pair(utxo, &[FACTORY_POLICY])?;

        let pool = Pool {
            id: PoolId(nft_name),
            dex: Dex::SundaeswapV1,
            utxo: utxo.output_ref(),
            asset_a,
            asset_b,
            reserve_a,
            reserve_b,
            fee_num: FEE_NUM,
            fee_den: FEE_DEN,
            lp_supply: None,
            seen_slot: slot,
        };
        pool.is_coherent().then_some(pool)
    }
}
