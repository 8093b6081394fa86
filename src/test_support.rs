//! Deterministic stream generators and a naive reference verifier used by
//! the test suites.

use crate::engine::ConnectivityEngine;
use crate::error::EngineError;
use crate::model::{Edge, GraphUpdate, NodeId, UpdateType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};

/// Naive single-threaded union-find over the full vertex set; the ground
/// truth the probabilistic engine is checked against.
pub struct RefConnectivity {
    parent: Vec<usize>,
}

impl RefConnectivity {
    pub fn new(num_nodes: NodeId) -> Self {
        Self {
            parent: (0..num_nodes as usize).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: NodeId, b: NodeId) {
        let ra = self.find(a as usize);
        let rb = self.find(b as usize);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }

    pub fn connected(&mut self, a: NodeId, b: NodeId) -> bool {
        self.find(a as usize) == self.find(b as usize)
    }

    /// Components in the same normal form the engine produces: members
    /// ascending, components ordered by first member.
    pub fn components(&mut self) -> Vec<Vec<NodeId>> {
        let mut groups: FxHashMap<usize, Vec<NodeId>> = FxHashMap::default();
        for v in 0..self.parent.len() {
            let root = self.find(v);
            groups.entry(root).or_default().push(v as NodeId);
        }
        let mut components: Vec<Vec<NodeId>> = groups.into_values().collect();
        components.sort_unstable_by_key(|c| c[0]);
        components
    }
}

/// The set of edges present after applying the whole stream (each update
/// toggles its edge, matching the sketches' XOR semantics).
pub fn net_edges(stream: &[GraphUpdate]) -> FxHashSet<Edge> {
    let mut present: FxHashSet<Edge> = FxHashSet::default();
    for update in stream {
        let edge = update.edge.canonical();
        if !present.insert(edge) {
            present.remove(&edge);
        }
    }
    present
}

/// Exact components of the stream's net graph.
pub fn expected_components(num_nodes: NodeId, stream: &[GraphUpdate]) -> Vec<Vec<NodeId>> {
    let mut reference = RefConnectivity::new(num_nodes);
    for edge in net_edges(stream) {
        reference.union(edge.src, edge.dst);
    }
    reference.components()
}

/// A Hamiltonian path `0 - 1 - ... - (n-1)`.
pub fn path_stream(num_nodes: NodeId) -> Vec<GraphUpdate> {
    (0..num_nodes - 1)
        .map(|v| GraphUpdate::insert(v, v + 1))
        .collect()
}

/// The multiples graph: an edge from every `i >= 2` to each of its proper
/// multiples below `n`. For `n = 1024` this has 78 components (the big
/// composite cluster, the isolated vertices 0 and 1, and every prime in
/// `(n/2, n)`).
pub fn multiples_stream(num_nodes: NodeId) -> Vec<GraphUpdate> {
    let mut stream = Vec::new();
    for i in 2..num_nodes {
        let mut multiple = 2 * i;
        while multiple < num_nodes {
            stream.push(GraphUpdate::insert(i, multiple));
            multiple += i;
        }
    }
    stream
}

/// A random update stream where each step toggles a uniformly chosen edge:
/// an insert if absent, a delete if present.
pub fn random_toggle_stream(num_nodes: NodeId, updates: usize, seed: u64) -> Vec<GraphUpdate> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut present: FxHashSet<Edge> = FxHashSet::default();
    let mut stream = Vec::with_capacity(updates);
    for _ in 0..updates {
        let u = rng.random_range(0..num_nodes);
        let mut v = rng.random_range(0..num_nodes);
        while v == u {
            v = rng.random_range(0..num_nodes);
        }
        let edge = Edge::new(u, v).canonical();
        let kind = if present.insert(edge) {
            UpdateType::Insert
        } else {
            present.remove(&edge);
            UpdateType::Delete
        };
        stream.push(GraphUpdate { edge, kind });
    }
    stream
}

/// Feed a stream through the single-edge ingest path.
pub fn ingest(engine: &ConnectivityEngine, stream: &[GraphUpdate]) -> Result<(), EngineError> {
    for &update in stream {
        engine.update(update)?;
    }
    Ok(())
}

/// Feed a stream the way the external buffering layer would: pre-insert
/// every update, group endpoint updates per source vertex, then commit one
/// batch per vertex, cycling over `workers` delta sketches.
pub fn ingest_batched(
    engine: &ConnectivityEngine,
    stream: &[GraphUpdate],
    workers: usize,
) -> Result<(), EngineError> {
    let workers = workers.max(1);
    engine.allocate_worker_sketches(workers);
    let mut batches: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
    for &update in stream {
        engine.pre_insert(update);
        let edge = update.edge.canonical();
        batches.entry(edge.src).or_default().push(edge.dst);
        batches.entry(edge.dst).or_default().push(edge.src);
    }
    let mut sources: Vec<NodeId> = batches.keys().copied().collect();
    sources.sort_unstable();
    for (i, src) in sources.iter().enumerate() {
        engine.apply_update_batch(i % workers, *src, &batches[src])?;
    }
    Ok(())
}
