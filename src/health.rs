//! Infrastructure check for startup verification

use std::time::Instant;

use crate::chain::{ChainClient, ChainError};

/// Snapshot of collaborator reachability and chain position.
#[derive(Debug, Clone)]
pub struct ChainHealth {
    pub healthy: bool,
    pub slot: u64,
    pub block_hash: String,
    pub query_latency_ms: u64,
}

impl ChainHealth {
    /// Query the tip and measure round-trip latency. Anything under two
    /// seconds counts as usable for a polling engine.
    pub async fn check(client: &dyn ChainClient) -> Result<Self, ChainError> {
        let start = Instant::now();
        let tip = client.chain_tip().await?;
        let query_latency_ms = start.elapsed().as_millis() as u64;

        Ok(Self {
            healthy: query_latency_ms < 2_000,
            slot: tip.slot,
            block_hash: tip.block_hash,
            query_latency_ms,
        })
    }

    pub fn print(&self) {
        println!("\nChain collaborator health");
        println!("  status:   {}", if self.healthy { "healthy" } else { "degraded" });
        println!("  slot:     {}", self.slot);
        println!("  tip hash: {}", self.block_hash);
        println!("  latency:  {} ms\n", self.query_latency_ms);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::chain::{ChainTip, TxStatus, Utxo};

    struct TipOnly;

    #[async_trait]
    impl ChainClient for TipOnly {
        async fn chain_tip(&self) -> Result<ChainTip, ChainError> {
            Ok(ChainTip {
                slot: 424_242,
                block_hash: "ff".repeat(32),
            })
        }

        async fn utxos_by_address(&self, _address: &str) -> Result<Vec<Utxo>, ChainError> {
            Ok(Vec::new())
        }

        async fn submit_transaction(&self, _signed_cbor: &str) -> Result<String, ChainError> {
            Err(ChainError::Rejected("unused".to_string()))
        }

        async fn transaction_status(&self, _tx_id: &str) -> Result<TxStatus, ChainError> {
            Ok(TxStatus::Pending)
        }
    }

    #[tokio::test]
    async fn healthy_when_tip_answers_quickly() {
        let health = ChainHealth::check(&TipOnly).await.expect("health");
        assert!(health.healthy);
        assert_eq!(health.slot, 424_242);
    }
}
