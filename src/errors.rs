//! Engine error taxonomy

use thiserror::Error;

use crate::chain::ChainError;
use crate::dex::PoolId;

/// Errors produced by the arbitrage engine.
///
/// Adapter and planner failures degrade the affected DEX or opportunity;
/// they never tear down the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transient collaborator failure. Retried with backoff at the adapter
    /// layer, bounded attempt count.
    #[error("chain collaborator unreachable: {0}")]
    Unreachable(String),

    /// Pool state that cannot be normalized (missing datum, ambiguous pair,
    /// zero reserves). The pool is discarded, the source DEX degraded.
    #[error("malformed pool state: {0}")]
    MalformedState(String),

    /// The opportunity was computed against a superseded snapshot and the
    /// price has moved unfavorably, or its expiry slot has passed.
    #[error("stale opportunity: computed against snapshot v{computed}, current v{current}")]
    StaleOpportunity { computed: u64, current: u64 },

    /// A pool in the cycle can no longer cover the planned trade size.
    #[error("insufficient liquidity on pool {0}")]
    InsufficientLiquidity(PoolId),

    /// The plan's expiry slot passed before confirmation.
    #[error("plan expired at slot {expiry}, chain at slot {current}")]
    Expired { expiry: u64, current: u64 },

    /// On-chain rejection reported by the submission collaborator.
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// Another in-flight plan already claims one of this plan's pools.
    #[error("conflicting in-flight plan touches the same pools")]
    PoolsBusy,

    /// Realized outcome inconsistent with the plan's guards despite
    /// confirmation. Logged, surfaced, never auto-retried.
    #[error("execution anomaly: {0}")]
    Anomaly(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl EngineError {
    /// Whether the caller may retry the failed operation as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Unreachable(_) | EngineError::Chain(ChainError::Unreachable(_))
        )
    }
}
