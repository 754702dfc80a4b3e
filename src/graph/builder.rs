//! Versioned exchange-rate graph
//!
//! Each refresh folds the latest per-DEX pool sets into a fresh immutable
//! [`GraphSnapshot`]. Readers hold an `Arc` to a single version; publishing
//! a new snapshot is one pointer swap, so no reader ever observes edges
//! from two build cycles.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info, trace};

use super::types::EdgeData;
use crate::adapter::PoolUpdate;
use crate::asset::AssetId;
use crate::dex::{Dex, Pool, PoolId};

/// Rates outside this range are corrupted reserve data, not prices.
const MIN_VALID_RATE: f64 = 1e-10;
const MAX_VALID_RATE: f64 = 1e10;

/// Immutable view of all known pools as an exchange-rate graph.
pub struct GraphSnapshot {
    pub version: u64,
    pub as_of_slot: u64,
    pub graph: DiGraph<AssetId, EdgeData>,
    nodes: HashMap<AssetId, NodeIndex>,
    pools: HashMap<PoolId, Pool>,
}

impl GraphSnapshot {
    fn empty() -> Self {
        Self {
            version: 0,
            as_of_slot: 0,
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            pools: HashMap::new(),
        }
    }

    fn build(version: u64, as_of_slot: u64, pools: Vec<Pool>, stale_horizon: u64) -> Self {
        let mut snapshot = Self {
            version,
            as_of_slot,
            ..Self::empty()
        };
        for pool in pools {
            if pool.seen_slot + stale_horizon < as_of_slot {
                trace!(pool = %pool.id, seen = pool.seen_slot, "excluding stale pool");
                continue;
            }
            snapshot.add_pool(pool);
        }
        snapshot
    }

    fn node_for(&mut self, asset: &AssetId) -> NodeIndex {
        if let Some(&node) = self.nodes.get(asset) {
            return node;
        }
        let node = self.graph.add_node(asset.clone());
        self.nodes.insert(asset.clone(), node);
        node
    }

    /// Add a pool: both directional edges, best rate per direction wins,
    /// but every coherent pool is retained for depth-aware refinement.
    fn add_pool(&mut self, pool: Pool) {
        if !pool.is_coherent() {
            trace!(pool = %pool.id, "skipping incoherent pool");
            return;
        }

        let node_a = self.node_for(&pool.asset_a);
        let node_b = self.node_for(&pool.asset_b);

        self.add_direction(node_a, node_b, &pool, &pool.asset_a);
        self.add_direction(node_b, node_a, &pool, &pool.asset_b);
        self.pools.insert(pool.id.clone(), pool);
    }

    fn add_direction(&mut self, from: NodeIndex, to: NodeIndex, pool: &Pool, input: &AssetId) {
        let Some(rate) = pool.marginal_rate(input) else {
            return;
        };
        if !rate.is_finite() || !(MIN_VALID_RATE..MAX_VALID_RATE).contains(&rate) {
            trace!(pool = %pool.id, rate, "rate out of range, edge skipped");
            return;
        }
        let edge = EdgeData::new(pool.id.clone(), pool.dex, rate, pool.depth(input));
        match self.graph.find_edge(from, to) {
            Some(existing) if self.graph[existing].weight <= edge.weight => {}
            Some(existing) => self.graph[existing] = edge,
            None => {
                self.graph.add_edge(from, to, edge);
            }
        }
    }

    pub fn node(&self, asset: &AssetId) -> Option<NodeIndex> {
        self.nodes.get(asset).copied()
    }

    pub fn asset(&self, node: NodeIndex) -> Option<&AssetId> {
        self.graph.node_weight(node)
    }

    pub fn pool(&self, id: &PoolId) -> Option<&Pool> {
        self.pools.get(id)
    }

    /// All retained pools trading the unordered pair, deepest first.
    /// Parallel pools survive losing the best-rate edge so refinement can
    /// weigh depth, not just marginal price.
    pub fn pools_for_pair(&self, a: &AssetId, b: &AssetId) -> Vec<&Pool> {
        let mut matching: Vec<&Pool> = self
            .pools
            .values()
            .filter(|pool| pool.contains(a) && pool.contains(b))
            .collect();
        matching.sort_by(|x, y| y.depth(a).cmp(&x.depth(a)));
        matching
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

/// Folds per-DEX pool updates into published snapshots.
pub struct GraphBuilder {
    /// Latest pool set per DEX. Also serializes publishes: the lock is
    /// held across build-and-swap (pure CPU, no await points).
    cache: Mutex<HashMap<Dex, Vec<Pool>>>,
    current: RwLock<Arc<GraphSnapshot>>,
    stale_horizon: u64,
}

impl GraphBuilder {
    pub fn new(stale_horizon: u64) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            current: RwLock::new(Arc::new(GraphSnapshot::empty())),
            stale_horizon,
        }
    }

    /// The currently published snapshot.
    pub fn current(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace one DEX's pool set wholesale and publish a new snapshot.
    pub fn apply_update(&self, update: PoolUpdate) -> Arc<GraphSnapshot> {
        let mut cache = self.cache.lock();
        cache.insert(update.dex, update.pools);
        let pools: Vec<Pool> = cache.values().flatten().cloned().collect();
        self.publish_locked(pools, update.slot)
    }

    /// Drop pools whose reserves were just consumed by an executed trade
    /// and publish the reduced view until the next refresh re-observes them.
    pub fn invalidate(&self, touched: &[PoolId]) -> Arc<GraphSnapshot> {
        let mut cache = self.cache.lock();
        for pools in cache.values_mut() {
            pools.retain(|pool| !touched.contains(&pool.id));
        }
        let pools: Vec<Pool> = cache.values().flatten().cloned().collect();
        let slot = self.current.read().as_of_slot;
        debug!(touched = touched.len(), "invalidating executed pools");
        self.publish_locked(pools, slot)
    }

    /// Build fully off to the side, then swap the pointer. Caller holds the
    /// cache lock, so versions are assigned and published in order.
    fn publish_locked(&self, pools: Vec<Pool>, slot: u64) -> Arc<GraphSnapshot> {
        let version = self.current.read().version + 1;
        let snapshot = Arc::new(GraphSnapshot::build(
            version,
            slot,
            pools,
            self.stale_horizon,
        ));
        *self.current.write() = Arc::clone(&snapshot);
        info!(
            version,
            slot,
            pools = snapshot.pool_count(),
            assets = snapshot.node_count(),
            edges = snapshot.edge_count(),
            "published graph snapshot"
        );
        snapshot
    }
}
