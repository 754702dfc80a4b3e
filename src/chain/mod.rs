//! Node-facing collaborator interface
//!
//! The engine never talks to the ledger directly. Everything it needs from
//! the chain goes through [`ChainClient`]; the default implementation speaks
//! Ogmios ([`ogmios::OgmiosClient`]), tests use scripted mocks.

pub mod ogmios;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asset::AssetId;

/// Current tip of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub slot: u64,
    pub block_hash: String,
}

/// A transaction output reference, `<tx hash>#<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub tx_hash: String,
    pub index: u32,
}

impl std::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

/// Raw UTXO as reported by the collaborator.
///
/// `value` maps policy id to asset name to quantity; ADA sits under
/// `"ada" -> "lovelace"` the way Ogmios reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,
    pub index: u32,
    pub address: String,
    pub value: HashMap<String, HashMap<String, u128>>,
    /// Inline datum, CBOR hex. Pools without a datum are not pools.
    pub datum: Option<String>,
}

impl Utxo {
    pub fn output_ref(&self) -> OutputRef {
        OutputRef {
            tx_hash: self.tx_hash.clone(),
            index: self.index,
        }
    }

    pub fn lovelace(&self) -> u128 {
        self.value
            .get("ada")
            .and_then(|assets| assets.get("lovelace"))
            .copied()
            .unwrap_or(0)
    }

    pub fn quantity_of(&self, asset: &AssetId) -> u128 {
        if asset.is_ada() {
            return self.lovelace();
        }
        self.value
            .get(&asset.policy_id)
            .and_then(|assets| assets.get(&asset.name))
            .copied()
            .unwrap_or(0)
    }
}

/// Chain-side status of a submitted transaction.
#[derive(Debug, Clone)]
pub enum TxStatus {
    Pending,
    Confirmed { slot: u64, outputs: Vec<Utxo> },
    Rejected { reason: String },
}

/// Errors surfaced by the node-facing collaborator.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("node unreachable: {0}")]
    Unreachable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Narrow interface to the ledger/chain-state collaborator.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain tip.
    async fn chain_tip(&self) -> Result<ChainTip, ChainError>;

    /// All UTXOs currently sitting at `address`.
    async fn utxos_by_address(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// Submit a signed transaction, returning its id.
    async fn submit_transaction(&self, signed_cbor: &str) -> Result<String, ChainError>;

    /// Status of a previously submitted transaction.
    async fn transaction_status(&self, tx_id: &str) -> Result<TxStatus, ChainError>;
}
