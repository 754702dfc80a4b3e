//! Execution coordination
//!
//! Drives each plan through `Created -> Submitted -> {Confirmed, Rejected,
//! Expired}`. Transitions are one-directional; expiry wins unconditionally
//! over in-flight I/O. A single-flight guard keyed by the touched pool set
//! keeps the engine from racing itself on the same liquidity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ChainError, TxStatus, Utxo};
use crate::config::EngineConfig;
use crate::dex::PoolId;
use crate::errors::EngineError;
use crate::graph::{GraphBuilder, Opportunity};
use crate::planner::{TransactionPlan, TransactionPlanner};
use crate::quote::CycleQuote;

/// Per-call timeout on a single status probe.
const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive unreachable probes tolerated before giving up on a record.
const MAX_PROBE_FAILURES: u32 = 10;

/// Chain-side lifecycle of a plan. One-directional; terminal states are
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanStatus {
    Created,
    Submitted,
    Confirmed,
    Rejected,
    Expired,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlanStatus::Confirmed | PlanStatus::Rejected | PlanStatus::Expired
        )
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlanStatus::Created => "created",
            PlanStatus::Submitted => "submitted",
            PlanStatus::Confirmed => "confirmed",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Expired => "expired",
        };
        write!(f, "{label}")
    }
}

/// Append-only account of one plan's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub plan: TransactionPlan,
    pub attempts: u32,
    pub status: PlanStatus,
    pub tx_id: Option<String>,
    /// Realized output in the start asset, once confirmed.
    pub realized_out: Option<u128>,
    /// Set when the realized outcome contradicts the plan's guards.
    pub anomaly: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    fn new(plan: TransactionPlan) -> Self {
        Self {
            plan,
            attempts: 0,
            status: PlanStatus::Created,
            tx_id: None,
            realized_out: None,
            anomaly: None,
            created_at: Utc::now(),
        }
    }

    /// Realized profit against the input, once confirmed.
    pub fn realized_profit(&self) -> Option<i128> {
        let realized = self.realized_out?;
        Some(realized as i128 - self.plan.input as i128 - self.plan.fee_budget as i128)
    }

    fn transition(&mut self, next: PlanStatus) {
        if self.status.is_terminal() {
            // A late signal after a terminal outcome must never flip it.
            warn!(
                current = %self.status,
                attempted = %next,
                "ignoring transition out of terminal state"
            );
            return;
        }
        debug!(from = %self.status, to = %next, "plan transition");
        self.status = next;
    }
}

/// Signing collaborator. The engine never holds keys; it hands the plan
/// out and gets signed transaction CBOR back.
#[async_trait]
pub trait PlanSigner: Send + Sync {
    async fn sign(&self, plan: &TransactionPlan) -> Result<String, ChainError>;
}

/// Deterministic unsigned envelope, hex over the plan's JSON form.
///
/// Stands in where the deployment has not wired a key-holding signer;
/// a real node rejects the envelope, which keeps dry runs honest.
pub struct EnvelopeSigner;

#[async_trait]
impl PlanSigner for EnvelopeSigner {
    async fn sign(&self, plan: &TransactionPlan) -> Result<String, ChainError> {
        let body = serde_json::to_vec(plan).map_err(|e| ChainError::Protocol(e.to_string()))?;
        Ok(hex::encode(body))
    }
}

/// Releases the claimed pools when dropped.
struct PoolClaims {
    inflight: Arc<DashMap<PoolId, u64>>,
    pools: Vec<PoolId>,
    ticket: u64,
}

impl Drop for PoolClaims {
    fn drop(&mut self) {
        for pool in &self.pools {
            self.inflight
                .remove_if(pool, |_, ticket| *ticket == self.ticket);
        }
    }
}

enum ConfirmOutcome {
    Confirmed { outputs: Vec<Utxo> },
    Rejected(String),
    Expired { slot: u64 },
}

/// Owns every record it creates until terminal state.
pub struct ExecutionCoordinator {
    client: Arc<dyn ChainClient>,
    signer: Arc<dyn PlanSigner>,
    builder: Arc<GraphBuilder>,
    planner: TransactionPlanner,
    inflight: Arc<DashMap<PoolId, u64>>,
    tickets: AtomicU64,
    max_submit_retries: u32,
    status_poll_interval: Duration,
}

impl ExecutionCoordinator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn PlanSigner>,
        builder: Arc<GraphBuilder>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            client,
            signer,
            builder,
            planner: TransactionPlanner::new(config),
            inflight: Arc::new(DashMap::new()),
            tickets: AtomicU64::new(1),
            max_submit_retries: config.max_submit_retries,
            status_poll_interval: config.status_poll_interval,
        }
    }

    /// Pools currently locked by in-flight plans.
    pub fn busy_pools(&self) -> Vec<PoolId> {
        self.inflight.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Claim every pool of the plan atomically, or none of them.
    fn try_claim(&self, pools: &[PoolId]) -> Option<PoolClaims> {
        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst);
        let mut claimed = Vec::with_capacity(pools.len());
        for pool in pools {
            match self.inflight.entry(pool.clone()) {
                Entry::Occupied(_) => {
                    for taken in &claimed {
                        self.inflight.remove_if(taken, |_, t| *t == ticket);
                    }
                    return None;
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(ticket);
                    claimed.push(pool.clone());
                }
            }
        }
        Some(PoolClaims {
            inflight: Arc::clone(&self.inflight),
            pools: claimed,
            ticket,
        })
    }

    /// Drive one plan to a terminal state.
    ///
    /// Returns `PoolsBusy` without submitting anything when another
    /// in-flight plan shares a pool. Infrastructure failures before the
    /// first submission also surface as errors; once submitted, every
    /// outcome lands in the returned record.
    pub async fn execute(&self, plan: TransactionPlan) -> Result<ExecutionRecord, EngineError> {
        let Some(_claims) = self.try_claim(&plan.pool_ids()) else {
            return Err(EngineError::PoolsBusy);
        };

        let mut record = ExecutionRecord::new(plan.clone());
        let mut plan = plan;
        let mut retries = 0u32;

        loop {
            let tip = self.client.chain_tip().await?;
            if tip.slot >= plan.expiry_slot {
                // Stale opportunities are never chased.
                record.transition(PlanStatus::Expired);
                break;
            }

            record.attempts += 1;
            let signed = self.signer.sign(&plan).await.map_err(EngineError::from)?;

            let rejection = match self.client.submit_transaction(&signed).await {
                Ok(tx_id) => {
                    info!(tx_id = %tx_id, attempt = record.attempts, "plan submitted");
                    record.transition(PlanStatus::Submitted);
                    record.tx_id = Some(tx_id.clone());

                    match self.await_confirmation(&tx_id, plan.expiry_slot).await? {
                        ConfirmOutcome::Confirmed { outputs } => {
                            record.transition(PlanStatus::Confirmed);
                            self.reconcile(&mut record, &outputs);
                            // Post-trade feedback: the consumed pool UTXOs
                            // are gone; drop them until the next refresh.
                            self.builder.invalidate(&plan.pool_ids());
                            break;
                        }
                        ConfirmOutcome::Expired { slot } => {
                            let expired = EngineError::Expired {
                                expiry: plan.expiry_slot,
                                current: slot,
                            };
                            warn!(%expired, "plan abandoned while awaiting confirmation");
                            record.transition(PlanStatus::Expired);
                            break;
                        }
                        ConfirmOutcome::Rejected(reason) => reason,
                    }
                }
                Err(ChainError::Rejected(reason)) => reason,
                Err(ChainError::Unreachable(message)) => {
                    // The submission may or may not have landed; without a
                    // tx id there is nothing to poll. Treat as a failed
                    // attempt and let the bounded retry decide.
                    warn!(error = %message, "submission transport failure");
                    message
                }
                Err(e) => return Err(e.into()),
            };

            if retries >= self.max_submit_retries {
                warn!(reason = %rejection, retries, "rejection is terminal");
                record.transition(PlanStatus::Rejected);
                break;
            }
            retries += 1;

            // Rejection retry uses a fresh plan recomputed from the
            // then-current snapshot, never the stale numbers.
            match self.replan(&plan) {
                Some(fresh) => {
                    info!(retry = retries, "recomputed fresh plan after rejection");
                    record.plan = fresh.clone();
                    plan = fresh;
                }
                None => {
                    debug!("cycle no longer profitable on current snapshot");
                    record.transition(PlanStatus::Rejected);
                    break;
                }
            }
        }

        Ok(record)
    }

    /// Poll for confirmation until the expiry slot. Expiry is checked
    /// before each probe, so a late confirmation never outruns it.
    async fn await_confirmation(
        &self,
        tx_id: &str,
        expiry_slot: u64,
    ) -> Result<ConfirmOutcome, EngineError> {
        let mut probe_failures = 0u32;
        loop {
            let tip = match self.client.chain_tip().await {
                Ok(tip) => tip,
                Err(ChainError::Unreachable(message)) => {
                    probe_failures += 1;
                    if probe_failures > MAX_PROBE_FAILURES {
                        return Err(EngineError::Unreachable(message));
                    }
                    tokio::time::sleep(self.status_poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if tip.slot >= expiry_slot {
                return Ok(ConfirmOutcome::Expired { slot: tip.slot });
            }

            match timeout(STATUS_PROBE_TIMEOUT, self.client.transaction_status(tx_id)).await {
                Err(_) => {
                    warn!(tx_id, "status probe timed out");
                }
                Ok(Err(ChainError::Unreachable(message))) => {
                    probe_failures += 1;
                    if probe_failures > MAX_PROBE_FAILURES {
                        return Err(EngineError::Unreachable(message));
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(TxStatus::Confirmed { outputs, .. })) => {
                    return Ok(ConfirmOutcome::Confirmed { outputs });
                }
                Ok(Ok(TxStatus::Rejected { reason })) => {
                    return Ok(ConfirmOutcome::Rejected(reason));
                }
                Ok(Ok(TxStatus::Pending)) => {
                    probe_failures = 0;
                }
            }
            tokio::time::sleep(self.status_poll_interval).await;
        }
    }

    /// Compare realized settlement against the plan's guards. A violated
    /// minimum despite confirmation means a collaborator or modeling bug:
    /// logged, recorded, never retried.
    fn reconcile(&self, record: &mut ExecutionRecord, outputs: &[Utxo]) {
        let plan = &record.plan;
        let Some(start_asset) = plan.asset_path().first().cloned() else {
            return;
        };
        let realized: u128 = outputs
            .iter()
            .filter(|utxo| utxo.address == plan.signer)
            .map(|utxo| utxo.quantity_of(&start_asset))
            .sum();
        record.realized_out = Some(realized);

        if realized < plan.final_min_output() {
            let message = format!(
                "realized output {} below plan minimum {}",
                realized,
                plan.final_min_output()
            );
            let anomaly = EngineError::Anomaly(message.clone());
            error!(tx_id = ?record.tx_id, %anomaly, "settlement inconsistent with guards");
            record.anomaly = Some(message);
        } else {
            info!(
                realized,
                predicted = plan.predicted_out,
                profit = ?record.realized_profit(),
                "plan confirmed and reconciled"
            );
        }
    }

    /// Requote the plan's cycle on the current snapshot and rebuild the
    /// plan when it is still profitable. `None` ends the retry chain.
    fn replan(&self, plan: &TransactionPlan) -> Option<TransactionPlan> {
        let snapshot = self.builder.current();
        let path = plan.asset_path();
        let pool_ids = plan.pool_ids();
        let pools: Option<Vec<_>> = pool_ids.iter().map(|id| snapshot.pool(id)).collect();
        let quote = CycleQuote::simulate(&pools?, &path, plan.input)?;

        let net_profit = quote.profit(plan.fee_budget);
        if net_profit <= 0 {
            return None;
        }
        let opportunity = Opportunity {
            predicted_out: quote.output(),
            hop_outputs: quote.hop_outputs,
            input: plan.input,
            net_profit,
            min_depth: 0,
            path,
            pools: pool_ids,
            dexes: plan.swaps.iter().map(|swap| swap.dex).collect(),
            snapshot_version: snapshot.version,
            expiry_slot: plan.expiry_slot,
        };
        self.planner.build_plan(&opportunity, &snapshot).ok()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::adapter::PoolUpdate;
    use crate::asset::AssetId;
    use crate::chain::ChainTip;
    use crate::dex::test_support::pool;
    use crate::dex::{Dex, Pool};
    use crate::graph::OpportunityDetector;

    fn ada() -> AssetId {
        AssetId::ada()
    }

    fn token(tag: &str) -> AssetId {
        AssetId::new("34".repeat(28), hex::encode(tag))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            batcher_fee: 0,
            network_fee: 0,
            min_trade: 1_000_000,
            signer_address: "addr1qsigner".to_string(),
            status_poll_interval: Duration::from_millis(10),
            ..EngineConfig::default()
        }
    }

    fn triangle() -> Vec<Pool> {
        let r = 1_000_000_000_000u128;
        vec![
            pool("ab", Dex::MinswapV1, ada(), token("B"), r, r, 1000, 1000, 10),
            pool("bc", Dex::SundaeswapV1, token("B"), token("C"), r, r, 1000, 1000, 10),
            pool("ca", Dex::MinswapV1, token("C"), ada(), r, r + r / 20, 1000, 1000, 10),
        ]
    }

    struct ScriptedClient {
        slots: Mutex<VecDeque<u64>>,
        submits: Mutex<VecDeque<Result<String, ChainError>>>,
        statuses: Mutex<VecDeque<TxStatus>>,
    }

    impl ScriptedClient {
        fn new(
            slots: Vec<u64>,
            submits: Vec<Result<String, ChainError>>,
            statuses: Vec<TxStatus>,
        ) -> Arc<Self> {
            Arc::new(Self {
                slots: Mutex::new(slots.into()),
                submits: Mutex::new(submits.into()),
                statuses: Mutex::new(statuses.into()),
            })
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        async fn chain_tip(&self) -> Result<ChainTip, ChainError> {
            let mut slots = self.slots.lock().unwrap();
            let slot = if slots.len() > 1 {
                slots.pop_front().unwrap_or(0)
            } else {
                *slots.front().unwrap_or(&0)
            };
            Ok(ChainTip {
                slot,
                block_hash: "00".repeat(32),
            })
        }

        async fn utxos_by_address(&self, _address: &str) -> Result<Vec<Utxo>, ChainError> {
            Ok(Vec::new())
        }

        async fn submit_transaction(&self, _signed_cbor: &str) -> Result<String, ChainError> {
            self.submits
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ChainError::Rejected("script exhausted".to_string())))
        }

        async fn transaction_status(&self, _tx_id: &str) -> Result<TxStatus, ChainError> {
            let mut statuses = self.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().unwrap_or(TxStatus::Pending))
            } else {
                Ok(statuses.front().cloned().unwrap_or(TxStatus::Pending))
            }
        }
    }

    struct OkSigner;

    #[async_trait]
    impl PlanSigner for OkSigner {
        async fn sign(&self, _plan: &TransactionPlan) -> Result<String, ChainError> {
            Ok("84a4".to_string())
        }
    }

    fn settlement_output(plan: &TransactionPlan, amount: u128) -> Utxo {
        let mut value = std::collections::HashMap::new();
        value.insert(
            "ada".to_string(),
            std::collections::HashMap::from([("lovelace".to_string(), amount)]),
        );
        Utxo {
            tx_hash: "77".repeat(32),
            index: 0,
            address: plan.signer.clone(),
            value,
            datum: None,
        }
    }

    struct Fixture {
        builder: Arc<GraphBuilder>,
        plan: TransactionPlan,
        config: EngineConfig,
    }

    fn fixture() -> Fixture {
        let config = config();
        let builder = Arc::new(GraphBuilder::new(100_000));
        let snapshot = builder.apply_update(PoolUpdate {
            dex: Dex::MinswapV1,
            pools: triangle(),
            slot: 10,
        });
        let detector = OpportunityDetector::new(&config);
        let opportunity = detector.detect(&snapshot, &[ada()]).remove(0);
        let plan = TransactionPlanner::new(&config)
            .build_plan(&opportunity, &snapshot)
            .expect("plan");
        Fixture {
            builder,
            plan,
            config,
        }
    }

    fn coordinator(
        fixture: &Fixture,
        client: Arc<dyn ChainClient>,
    ) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            client,
            Arc::new(OkSigner),
            Arc::clone(&fixture.builder),
            &fixture.config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_plan_reconciles_and_invalidates() {
        let fixture = fixture();
        let settlement = settlement_output(&fixture.plan, fixture.plan.predicted_out);
        let client = ScriptedClient::new(
            vec![20],
            vec![Ok("tx1".to_string())],
            vec![
                TxStatus::Pending,
                TxStatus::Confirmed {
                    slot: 21,
                    outputs: vec![settlement],
                },
            ],
        );
        let coordinator = coordinator(&fixture, client);
        let version_before = fixture.builder.version();

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Confirmed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.realized_out, Some(fixture.plan.predicted_out));
        assert!(record.anomaly.is_none());
        assert!(record.realized_profit().unwrap() > 0);
        // Post-trade invalidation published a fresh snapshot without the pools.
        assert!(fixture.builder.version() > version_before);
        let current = fixture.builder.current();
        for pool_id in fixture.plan.pool_ids() {
            assert!(current.pool(&pool_id).is_none());
        }
        // Claims released at terminal state.
        assert!(coordinator.busy_pools().is_empty());
    }

    /// Scenario D: first submission rejected, fresh plan retried once,
    /// terminal `Rejected` when the retry fails too.
    #[tokio::test(start_paused = true)]
    async fn rejection_retries_once_with_fresh_plan_then_terminal() {
        let fixture = fixture();
        let client = ScriptedClient::new(
            vec![20],
            vec![
                Err(ChainError::Rejected("minimum output not met".to_string())),
                Err(ChainError::Rejected("minimum output not met".to_string())),
            ],
            vec![],
        );
        let coordinator = coordinator(&fixture, client);

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Rejected);
        assert_eq!(record.attempts, 2);
        // The retried plan was rebuilt against the then-current snapshot.
        assert_eq!(record.plan.snapshot_version, fixture.builder.version());
        assert!(coordinator.busy_pools().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_then_success_on_fresh_plan() {
        let fixture = fixture();
        let settlement = settlement_output(&fixture.plan, fixture.plan.predicted_out);
        let client = ScriptedClient::new(
            vec![20],
            vec![
                Err(ChainError::Rejected("conflicting utxo consumption".to_string())),
                Ok("tx2".to_string()),
            ],
            vec![TxStatus::Confirmed {
                slot: 22,
                outputs: vec![settlement],
            }],
        );
        let coordinator = coordinator(&fixture, client);

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Confirmed);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.tx_id.as_deref(), Some("tx2"));
    }

    /// Scenario E: expiry passes while submitted and unconfirmed. The
    /// state goes `Expired` and a confirmation sitting right behind the
    /// expiry is never consumed.
    #[tokio::test(start_paused = true)]
    async fn expiry_wins_over_late_confirmation() {
        let fixture = fixture();
        let expiry = fixture.plan.expiry_slot;
        let settlement = settlement_output(&fixture.plan, fixture.plan.predicted_out);
        let client = ScriptedClient::new(
            // Pre-submit check, then first poll below expiry, then past it.
            vec![20, 40, expiry + 5],
            vec![Ok("tx1".to_string())],
            vec![
                TxStatus::Pending,
                TxStatus::Confirmed {
                    slot: expiry + 5,
                    outputs: vec![settlement],
                },
            ],
        );
        let coordinator = coordinator(&fixture, client);

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Expired);
        assert_eq!(record.attempts, 1);
        assert!(record.realized_out.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_before_submission_never_submits() {
        let fixture = fixture();
        let client = ScriptedClient::new(
            vec![fixture.plan.expiry_slot],
            vec![Ok("never".to_string())],
            vec![],
        );
        let coordinator = coordinator(&fixture, client);

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Expired);
        assert_eq!(record.attempts, 0);
        assert!(record.tx_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_excludes_overlapping_plans() {
        let fixture = fixture();
        let client = ScriptedClient::new(vec![20], vec![], vec![]);
        let coordinator = coordinator(&fixture, client);

        let claims = coordinator
            .try_claim(&fixture.plan.pool_ids())
            .expect("first claim");
        // Any plan sharing a pool is refused while the first is in flight.
        let result = coordinator.execute(fixture.plan.clone()).await;
        assert!(matches!(result, Err(EngineError::PoolsBusy)));

        drop(claims);
        assert!(coordinator.try_claim(&fixture.plan.pool_ids()).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_below_minimum_is_an_anomaly_not_a_retry() {
        let fixture = fixture();
        // Settles under the final minimum despite on-chain guards.
        let settlement = settlement_output(&fixture.plan, fixture.plan.input / 2);
        let client = ScriptedClient::new(
            vec![20],
            vec![Ok("tx1".to_string())],
            vec![TxStatus::Confirmed {
                slot: 21,
                outputs: vec![settlement],
            }],
        );
        let coordinator = coordinator(&fixture, client);

        let record = coordinator.execute(fixture.plan.clone()).await.expect("record");
        assert_eq!(record.status, PlanStatus::Confirmed);
        assert_eq!(record.attempts, 1);
        assert!(record.anomaly.is_some());
        assert!(record.realized_profit().unwrap() < 0);
    }
}
