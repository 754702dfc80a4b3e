//! Pool state adapter
//!
//! Normalizes each DEX's on-chain representation into [`Pool`] records.
//! Purely a data source: it never touches the shared graph state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::chain::{ChainClient, ChainError};
use crate::dex::{handler_for, Dex, Pool, PoolHandler, PoolId};
use crate::errors::EngineError;

/// One refresh round for a single DEX.
#[derive(Debug, Clone)]
pub struct PoolUpdate {
    pub dex: Dex,
    pub pools: Vec<Pool>,
    pub slot: u64,
}

/// Fetches and normalizes pool state through the chain collaborator.
pub struct PoolStateAdapter {
    client: Arc<dyn ChainClient>,
    max_fetch_attempts: u32,
}

impl PoolStateAdapter {
    pub fn new(client: Arc<dyn ChainClient>, max_fetch_attempts: u32) -> Self {
        Self {
            client,
            max_fetch_attempts,
        }
    }

    /// Fetch the current pool set for one DEX.
    ///
    /// Malformed UTXOs (no datum, no pool NFT, ambiguous pair, empty
    /// reserves) are discarded with an anomaly log; only transport
    /// failures surface as errors.
    pub async fn refresh(&self, dex: Dex) -> Result<PoolUpdate, EngineError> {
        let handler = handler_for(dex);
        let tip = self.client.chain_tip().await?;
        let utxos = self
            .client
            .utxos_by_address(handler.pool_address())
            .await?;

        let mut pools = Vec::new();
        let mut discarded = 0usize;
        for utxo in &utxos {
            match handler.parse_pool(utxo, tip.slot) {
                Some(pool) => pools.push(pool),
                None => discarded += 1,
            }
        }
        if discarded > 0 {
            let anomaly = EngineError::MalformedState(format!(
                "{discarded} UTXOs at {} failed normalization",
                handler.pool_address()
            ));
            warn!(dex = %dex, %anomaly, kept = pools.len(), "refresh discarded pool state");
        }
        debug!(dex = %dex, pools = pools.len(), slot = tip.slot, "pool refresh");

        Ok(PoolUpdate {
            dex,
            pools,
            slot: tip.slot,
        })
    }

    /// Current state of one pool, re-fetched from the chain.
    pub async fn pool_state(&self, dex: Dex, id: &PoolId) -> Result<Pool, EngineError> {
        let update = self.refresh(dex).await?;
        update
            .pools
            .into_iter()
            .find(|pool| pool.id == *id)
            .ok_or_else(|| {
                EngineError::Chain(ChainError::NotFound(format!("pool {id} on {dex}")))
            })
    }

    /// Refresh with bounded exponential backoff across transient failures.
    pub async fn refresh_with_backoff(&self, dex: Dex) -> Result<PoolUpdate, EngineError> {
        let mut backoff = Duration::from_millis(500);
        let mut last_error = EngineError::Unreachable("no attempts made".to_string());

        for attempt in 1..=self.max_fetch_attempts {
            match self.refresh(dex).await {
                Ok(update) => return Ok(update),
                Err(e) if e.is_transient() => {
                    warn!(dex = %dex, attempt, error = %e, "transient refresh failure, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// Infinite stream of pool updates for one DEX, one element per poll
    /// round. The feeding task survives transient outages (it reconnects
    /// and resumes on the next round) and ends only when the receiver is
    /// dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        dex: Dex,
        poll_interval: Duration,
    ) -> mpsc::Receiver<PoolUpdate> {
        let (tx, rx) = mpsc::channel(8);
        let adapter = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match adapter.refresh_with_backoff(dex).await {
                    Ok(update) => {
                        if tx.send(update).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        // Degrade this DEX for the round; the next tick
                        // starts over from a fresh connection.
                        error!(dex = %dex, error = %e, "refresh round abandoned");
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::chain::{ChainError, ChainTip, TxStatus, Utxo};

    struct FlakyClient {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChainClient for FlakyClient {
        async fn chain_tip(&self) -> Result<ChainTip, ChainError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(ChainError::Unreachable("down".to_string()));
            }
            Ok(ChainTip {
                slot: 1000,
                block_hash: "00".repeat(32),
            })
        }

        async fn utxos_by_address(&self, _address: &str) -> Result<Vec<Utxo>, ChainError> {
            // One malformed UTXO: no datum, no NFT. Must be discarded, not fatal.
            Ok(vec![Utxo {
                tx_hash: "11".repeat(32),
                index: 0,
                address: "addr1".to_string(),
                value: HashMap::new(),
                datum: None,
            }])
        }

        async fn submit_transaction(&self, _signed_cbor: &str) -> Result<String, ChainError> {
            Err(ChainError::Rejected("not used".to_string()))
        }

        async fn transaction_status(&self, _tx_id: &str) -> Result<TxStatus, ChainError> {
            Ok(TxStatus::Pending)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_transient_failures() {
        let client = Arc::new(FlakyClient {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let adapter = PoolStateAdapter::new(client.clone(), 5);

        let update = adapter
            .refresh_with_backoff(Dex::MinswapV1)
            .await
            .expect("should succeed after retries");
        assert_eq!(update.slot, 1000);
        assert!(update.pools.is_empty());
        assert!(client.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pool_is_not_found() {
        let client = Arc::new(FlakyClient {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        });
        let adapter = PoolStateAdapter::new(client, 2);

        let result = adapter
            .pool_state(Dex::MinswapV1, &PoolId("absent".to_string()))
            .await;
        assert!(matches!(
            result,
            Err(EngineError::Chain(ChainError::NotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_attempts_then_error() {
        let client = Arc::new(FlakyClient {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let adapter = PoolStateAdapter::new(client, 3);

        let result = adapter.refresh_with_backoff(Dex::MinswapV1).await;
        assert!(matches!(result, Err(e) if e.is_transient()));
    }
}
