//! Minswap V1 pools — constant product AMM with a 0.3% fee

use crate::chain::Utxo;
use crate::dex::{extract_pair, pool_nft_name, Dex, Pool, PoolHandler, PoolId};

/// Mainnet pool script address.
const POOL_ADDRESS: &str =
    "addr1z8snz7c4974vzdpxu65ruphl3zjdvtxw8strf2c2tmqnxz2j2c79gy9l76sdg0xwhd7r0c0kna0tycz4y5s6mlenh8pq6s3z70";

/// Every pool UTXO carries exactly one NFT under this policy; its asset
/// name is the pool id.
const POOL_NFT_POLICY: &str = "0be55d262b29f564998ff81efe21bdc0022621c12f15af08d0f2ddb1";

/// Protocol bookkeeping tokens that sit in the pool UTXO but are not
/// reserves.
const POOL_TOKEN_POLICY: &str = "13aa2accf2e1561723aa26871e071fdf32c867cff7e7d50ad470d62f";
const LP_TOKEN_POLICY: &str = "e4214b7cce62ac6fbba385d164df48e157eae5863521b4b67ca71d86";

const FEE_NUM: u64 = 997;
const FEE_DEN: u64 = 1000;

pub struct MinswapV1Handler;

impl PoolHandler for MinswapV1Handler {
    fn dex(&self) -> Dex {
        Dex::MinswapV1
    }

    fn pool_address(&self) -> &'static str {
        POOL_ADDRESS
    }

    fn parse_pool(&self, utxo: &Utxo, slot: u64) -> Option<Pool> {
        // Pool UTXOs always carry an inline datum; plain value UTXOs at the
        // script address are not pools.
        utxo.datum.as_ref()?;
        let nft_name = pool_nft_name(utxo, POOL_NFT_POLICY)?;

        let (asset_a, reserve_a, asset_b, reserve_b) = extract_pair(
            utxo,
            &[POOL_NFT_POLICY, POOL_TOKEN_POLICY, LP_TOKEN_POLICY],
        )?;

        let lp_supply = utxo
            .value
            .get(LP_TOKEN_POLICY)
            .and_then(|assets| assets.values().next())
            .copied();

        let pool = Pool {
            id: PoolId(nft_name),
            dex: Dex::MinswapV1,
            utxo: utxo.output_ref(),
            asset_a,
            asset_b,
            reserve_a,
            reserve_b,
            fee_num: FEE_NUM,
            fee_den: FEE_DEN,
            lp_supply,
            seen_slot: slot,
        };
        pool.is_coherent().then_some(pool)
    }
}
