//! Engine orchestration
//!
//! Wires the adapter, graph builder, detector, planner and coordinator
//! together and exposes the engine's contract to the orchestration layer:
//! `plan_opportunities`, `build_plan`, `execute`, plus the long-running
//! `run` loop. All cross-task traffic is immutable values; the builder's
//! pointer swap is the only shared-state mutation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::adapter::{PoolStateAdapter, PoolUpdate};
use crate::chain::ChainClient;
use crate::config::EngineConfig;
use crate::dex::Dex;
use crate::errors::EngineError;
use crate::executor::{ExecutionCoordinator, ExecutionRecord, PlanSigner};
use crate::graph::{GraphBuilder, Opportunity, OpportunityDetector};
use crate::planner::{TransactionPlan, TransactionPlanner};
use crate::stats::EngineStats;

pub struct Engine {
    config: EngineConfig,
    adapter: Arc<PoolStateAdapter>,
    builder: Arc<GraphBuilder>,
    detector: OpportunityDetector,
    planner: TransactionPlanner,
    coordinator: Arc<ExecutionCoordinator>,
    stats: Arc<EngineStats>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn PlanSigner>,
    ) -> Self {
        let builder = Arc::new(GraphBuilder::new(config.stale_horizon_slots));
        let adapter = Arc::new(PoolStateAdapter::new(
            Arc::clone(&client),
            config.max_fetch_attempts,
        ));
        let coordinator = Arc::new(ExecutionCoordinator::new(
            client,
            signer,
            Arc::clone(&builder),
            &config,
        ));
        Self {
            detector: OpportunityDetector::new(&config),
            planner: TransactionPlanner::new(&config),
            adapter,
            builder,
            coordinator,
            stats: Arc::new(EngineStats::default()),
            config,
        }
    }

    pub fn builder(&self) -> Arc<GraphBuilder> {
        Arc::clone(&self.builder)
    }

    /// Refresh every DEX, publish, and detect against the fresh snapshot.
    /// A DEX that stays unreachable past the retry budget degrades to its
    /// last published state instead of failing the call.
    pub async fn plan_opportunities(&self) -> Result<Vec<Opportunity>, EngineError> {
        for dex in Dex::all() {
            match self.adapter.refresh_with_backoff(dex).await {
                Ok(update) => {
                    self.builder.apply_update(update);
                    self.stats.record_snapshot();
                }
                Err(e) => warn!(dex = %dex, error = %e, "refresh degraded, keeping last state"),
            }
        }
        let snapshot = self.builder.current();
        let opportunities = self.detector.detect(&snapshot, &self.config.base_assets);
        self.stats.record_opportunities(opportunities.len());
        Ok(opportunities)
    }

    /// Plan against the currently published snapshot. Pure; stale or
    /// drifted opportunities are refused, never patched up.
    pub fn build_plan(&self, opportunity: &Opportunity) -> Result<TransactionPlan, EngineError> {
        let plan = self
            .planner
            .build_plan(opportunity, &self.builder.current())?;
        self.stats.record_plan();
        Ok(plan)
    }

    /// Drive one plan to terminal state.
    pub async fn execute(&self, plan: TransactionPlan) -> Result<ExecutionRecord, EngineError> {
        let record = self.coordinator.execute(plan).await?;
        self.stats.record_outcome(&record);
        Ok(record)
    }

    /// Long-running loop: per-DEX subscriptions feed the builder, each
    /// publish triggers detection, winners go to bounded execution.
    pub async fn run(self: Arc<Self>, execute: bool) -> eyre::Result<()> {
        let (updates_tx, mut updates) = mpsc::channel::<PoolUpdate>(16);
        for dex in Dex::all() {
            let mut subscription = self.adapter.subscribe(dex, self.config.poll_interval);
            let updates_tx = updates_tx.clone();
            tokio::spawn(async move {
                while let Some(update) = subscription.recv().await {
                    if updates_tx.send(update).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(updates_tx);

        let inflight = Arc::new(Semaphore::new(self.config.max_inflight));
        let mut stats_ticker = tokio::time::interval(Duration::from_secs(60));
        stats_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(execute, "engine loop started");
        loop {
            tokio::select! {
                maybe_update = updates.recv() => {
                    let Some(update) = maybe_update else { break };
                    let snapshot = self.builder.apply_update(update);
                    self.stats.record_snapshot();

                    let opportunities = self.detector.detect(&snapshot, &self.config.base_assets);

                    // A fresher snapshot always wins: results computed
                    // against a superseded version are discarded unacted.
                    if self.builder.version() != snapshot.version {
                        debug!(version = snapshot.version, "detection superseded, discarding");
                        continue;
                    }
                    if opportunities.is_empty() {
                        continue;
                    }
                    self.stats.record_opportunities(opportunities.len());
                    for opportunity in opportunities.iter().take(3) {
                        info!(
                            path = %opportunity.path_string(),
                            profit_bps = opportunity.profit_bps(),
                            hops = opportunity.hop_count(),
                            "detected"
                        );
                    }
                    if !execute {
                        continue;
                    }

                    let busy = self.coordinator.busy_pools();
                    let Some(best) = opportunities
                        .into_iter()
                        .find(|o| !o.pools.iter().any(|pool| busy.contains(pool)))
                    else {
                        debug!("all profitable cycles overlap in-flight plans");
                        continue;
                    };

                    let plan = match self.planner.build_plan(&best, &snapshot) {
                        Ok(plan) => plan,
                        Err(e) => {
                            debug!(error = %e, "opportunity did not survive planning");
                            continue;
                        }
                    };
                    self.stats.record_plan();

                    let Ok(permit) = Arc::clone(&inflight).try_acquire_owned() else {
                        debug!("in-flight budget exhausted, skipping plan");
                        continue;
                    };
                    let engine = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        match engine.coordinator.execute(plan).await {
                            Ok(record) => {
                                engine.stats.record_outcome(&record);
                                info!(
                                    status = %record.status,
                                    attempts = record.attempts,
                                    realized = ?record.realized_out,
                                    "execution finished"
                                );
                            }
                            Err(EngineError::PoolsBusy) => {
                                debug!("plan lost the single-flight race");
                            }
                            Err(e) => error!(error = %e, "execution failed"),
                        }
                    });
                }
                _ = stats_ticker.tick() => {
                    info!("{}", self.stats.summary());
                }
            }
        }
        Ok(())
    }
}
