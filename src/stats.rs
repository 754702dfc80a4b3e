//! Engine runtime counters

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::executor::{ExecutionRecord, PlanStatus};

/// Lifetime counters for one engine run. Shared across tasks, updated
/// with relaxed atomics; precision matters less than never blocking.
pub struct EngineStats {
    snapshots: AtomicU64,
    opportunities: AtomicU64,
    plans: AtomicU64,
    confirmed: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
    anomalies: AtomicU64,
    started_at: DateTime<Utc>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self {
            snapshots: AtomicU64::new(0),
            opportunities: AtomicU64::new(0),
            plans: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }
}

impl EngineStats {
    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_opportunities(&self, count: usize) {
        self.opportunities.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_plan(&self) {
        self.plans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, record: &ExecutionRecord) {
        match record.status {
            PlanStatus::Confirmed => self.confirmed.fetch_add(1, Ordering::Relaxed),
            PlanStatus::Rejected => self.rejected.fetch_add(1, Ordering::Relaxed),
            PlanStatus::Expired => self.expired.fetch_add(1, Ordering::Relaxed),
            PlanStatus::Created | PlanStatus::Submitted => 0,
        };
        if record.anomaly.is_some() {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> String {
        let uptime = Utc::now() - self.started_at;
        format!(
            "uptime {}m | snapshots {} | opportunities {} | plans {} | confirmed {} | rejected {} | expired {} | anomalies {}",
            uptime.num_minutes(),
            self.snapshots.load(Ordering::Relaxed),
            self.opportunities.load(Ordering::Relaxed),
            self.plans.load(Ordering::Relaxed),
            self.confirmed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.expired.load(Ordering::Relaxed),
            self.anomalies.load(Ordering::Relaxed),
        )
    }
}
