//! # Connectivity Engine
//!
//! Owns one L0 sketch per vertex and answers connectivity queries by
//! emulating Boruvka's algorithm over them: each round samples one incident
//! non-tree edge per current supernode (the XOR-sum of its members'
//! sketches) and merges along every sampled edge, halving the number of
//! components in expectation until nothing changes.
//!
//! Ingest runs on parallel writer threads. Batches of destinations for one
//! source vertex are folded into a thread-private delta sketch first, then
//! XOR-merged into the shared per-vertex sketch under its mutex, so writers
//! to distinct sources never contend. An eager DSU mirrors pure insertions
//! so that queries on insert-only prefixes can skip Boruvka entirely.

use crate::bucket::Bucket;
use crate::config::CcConfig;
use crate::dsu::Dsu;
use crate::error::EngineError;
use crate::model::{edge_from_id, edge_id, GraphUpdate, NodeId};
use crate::sketch::{Sketch, SketchEncoding, SketchGeometry, SketchSample};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// One row of the Boruvka schedule: vertex `child` currently belongs to
/// supernode `root`. Sorted lexicographically so each supernode occupies a
/// contiguous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct MergeInstr {
    root: NodeId,
    child: NodeId,
}

/// Shared accumulator for a supernode that straddles partition boundaries.
/// Exactly one slot (the last partition covering the supernode) collects a
/// contribution from every covering thread and samples once complete.
struct MergeSlot {
    inner: Mutex<MergeSlotState>,
}

struct MergeSlotState {
    sketch: Sketch,
    /// Covering-thread count, set by the first (leftmost) covering thread.
    /// `usize::MAX` until then, so no thread can observe completion early.
    num_merge_needed: usize,
    num_merge_done: usize,
}

impl MergeSlot {
    fn new(geometry: SketchGeometry, seed: u64) -> Self {
        Self {
            inner: Mutex::new(MergeSlotState {
                sketch: Sketch::new(geometry, seed),
                num_merge_needed: usize::MAX,
                num_merge_done: 0,
            }),
        }
    }
}

/// Backup of every per-vertex sketch, taken before a query so a failed run
/// can restore ingest state.
enum SketchBackup {
    Mem(Vec<Vec<u8>>),
    Disk(PathBuf),
}

/// Streaming connectivity over per-vertex L0 sketches.
#[derive(Debug)]
pub struct ConnectivityEngine {
    num_nodes: NodeId,
    seed: u64,
    config: CcConfig,
    geometry: SketchGeometry,
    sketches: Vec<Mutex<Sketch>>,
    /// One scratch sketch per registered writer thread.
    delta_sketches: RwLock<Vec<Mutex<Sketch>>>,
    dsu: Dsu,
    /// Per-vertex tree adjacency, keyed by the lower endpoint.
    spanning_forest: Vec<Mutex<FxHashSet<NodeId>>>,
    /// Component roots as of the last successful query.
    representatives: Mutex<Vec<NodeId>>,
    /// True while the DSU mirrors the true components of the stream prefix.
    dsu_valid: AtomicBool,
    /// Relaxed mirror of `dsu_valid` for reader fast paths.
    shared_dsu_valid: AtomicBool,
    /// Set for the duration of a Boruvka run; updates fail while held.
    update_locked: AtomicBool,
    /// Serializes whole queries against each other.
    query_lock: Mutex<()>,
    last_query_rounds: AtomicUsize,
}

impl ConnectivityEngine {
    pub fn new(num_nodes: NodeId, config: CcConfig) -> Self {
        assert!(num_nodes >= 2, "need at least two vertices");
        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let geometry =
            SketchGeometry::for_connectivity(num_nodes, config.sketches_factor, config.cols_per_sample);
        let sketches = (0..num_nodes)
            .map(|_| Mutex::new(Sketch::new(geometry, seed)))
            .collect();
        Self::assemble(num_nodes, seed, config, geometry, sketches, true)
    }

    /// Rebuild an engine around restored sketches. The forest cache is not
    /// part of a snapshot, so the DSU starts invalid.
    pub(crate) fn from_parts(
        num_nodes: NodeId,
        seed: u64,
        config: CcConfig,
        sketches: Vec<Sketch>,
    ) -> Self {
        let geometry =
            SketchGeometry::for_connectivity(num_nodes, config.sketches_factor, config.cols_per_sample);
        let sketches = sketches.into_iter().map(Mutex::new).collect();
        Self::assemble(num_nodes, seed, config, geometry, sketches, false)
    }

    fn assemble(
        num_nodes: NodeId,
        seed: u64,
        config: CcConfig,
        geometry: SketchGeometry,
        sketches: Vec<Mutex<Sketch>>,
        dsu_valid: bool,
    ) -> Self {
        Self {
            num_nodes,
            seed,
            config,
            geometry,
            sketches,
            delta_sketches: RwLock::new(Vec::new()),
            dsu: Dsu::new(num_nodes),
            spanning_forest: (0..num_nodes).map(|_| Mutex::new(FxHashSet::default())).collect(),
            representatives: Mutex::new((0..num_nodes).collect()),
            dsu_valid: AtomicBool::new(dsu_valid),
            shared_dsu_valid: AtomicBool::new(dsu_valid),
            update_locked: AtomicBool::new(false),
            query_lock: Mutex::new(()),
            last_query_rounds: AtomicUsize::new(0),
        }
    }

    pub fn num_nodes(&self) -> NodeId {
        self.num_nodes
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &CcConfig {
        &self.config
    }

    pub fn geometry(&self) -> SketchGeometry {
        self.geometry
    }

    /// Rounds consumed by the most recent Boruvka run.
    pub fn last_query_rounds(&self) -> usize {
        self.last_query_rounds.load(Ordering::Relaxed)
    }

    /// Component roots as of the last successful query.
    pub fn representatives(&self) -> Vec<NodeId> {
        self.representatives.lock().clone()
    }

    pub(crate) fn with_each_sketch_mut<T>(
        &self,
        mut f: impl FnMut(&mut Sketch) -> Result<T, EngineError>,
    ) -> Result<Vec<T>, EngineError> {
        self.sketches.iter().map(|s| f(&mut s.lock())).collect()
    }

    /// How many destination endpoints upstream buffering should aim to pack
    /// into one `apply_update_batch` call: enough to amortize the delta
    /// merge across a full bucket array.
    pub fn suggested_batch_size(&self) -> usize {
        let bucket_bytes =
            (self.geometry.num_columns() * self.geometry.initial_bkt_per_col() + 1) * Bucket::BYTES;
        let base = bucket_bytes / std::mem::size_of::<NodeId>();
        ((base as f64 * self.config.batch_factor) as usize).max(1)
    }

    /// Allocate delta sketches for writer threads `0..workers`. Idempotent;
    /// existing deltas are kept.
    pub fn allocate_worker_sketches(&self, workers: usize) {
        let mut deltas = self.delta_sketches.write();
        while deltas.len() < workers {
            deltas.push(Mutex::new(Sketch::new(self.geometry, self.seed)));
        }
    }

    /// Observe one logical edge update before it reaches the sketches.
    ///
    /// While the DSU is valid, pure insertions keep it (and the cached
    /// spanning forest) exact. An update that touches a cached tree edge may
    /// be deleting it, so the cache is conservatively invalidated.
    pub fn pre_insert(&self, update: GraphUpdate) {
        if self.config.disable_eager_dsu {
            // the branch avoids write-sharing the flag on every update
            if self.dsu_valid.load(Ordering::Acquire) {
                self.dsu_valid.store(false, Ordering::Release);
                self.shared_dsu_valid.store(false, Ordering::Relaxed);
            }
            return;
        }
        if !self.dsu_valid.load(Ordering::Acquire) {
            return;
        }
        let edge = update.edge.canonical();
        let mut forest = self.spanning_forest[edge.src as usize].lock();
        if forest.contains(&edge.dst) {
            self.dsu_valid.store(false, Ordering::Release);
            self.shared_dsu_valid.store(false, Ordering::Relaxed);
        } else {
            // only record edges that actually join two components; an update
            // touching a cycle edge (insert or delete) leaves connectivity,
            // and therefore the cache, intact
            let merge = self.dsu.merge(edge.src, edge.dst);
            if merge.merged {
                forest.insert(edge.dst);
            }
        }
    }

    /// Apply a single edge update to both endpoint sketches. Prefer
    /// [`ConnectivityEngine::apply_update_batch`] on hot paths.
    pub fn update(&self, update: GraphUpdate) -> Result<(), EngineError> {
        if self.update_locked.load(Ordering::Acquire) {
            return Err(EngineError::UpdateLocked);
        }
        self.pre_insert(update);
        let edge = update.edge.canonical();
        let id = edge_id(edge.src, edge.dst);
        self.sketches[edge.src as usize].lock().update(id);
        self.sketches[edge.dst as usize].lock().update(id);
        Ok(())
    }

    /// Fold a batch of destination endpoints for `src` into its sketch.
    ///
    /// The batch is accumulated in worker `thr_id`'s private delta sketch
    /// and committed with a single XOR merge, so the per-vertex lock is held
    /// once per batch rather than once per update. Batches for distinct
    /// sources proceed fully in parallel.
    pub fn apply_update_batch(
        &self,
        thr_id: usize,
        src: NodeId,
        dsts: &[NodeId],
    ) -> Result<(), EngineError> {
        if self.update_locked.load(Ordering::Acquire) {
            return Err(EngineError::UpdateLocked);
        }
        let deltas = self.delta_sketches.read();
        let delta = deltas.get(thr_id).ok_or(EngineError::UnknownWorker {
            thr_id,
            allocated: deltas.len(),
        })?;
        let mut delta = delta.lock();
        delta.zero();
        for &dst in dsts {
            delta.update(edge_id(src, dst));
        }
        let mut sketch = self.sketches[src as usize].lock();
        sketch.merge(&delta);
        Ok(())
    }

    /// Merge an externally produced dense bucket array into `src`'s sketch.
    pub fn apply_raw_buckets(&self, src: NodeId, raw: &[Bucket]) -> Result<(), EngineError> {
        if self.update_locked.load(Ordering::Acquire) {
            return Err(EngineError::UpdateLocked);
        }
        self.sketches[src as usize].lock().merge_raw_buckets(raw);
        Ok(())
    }

    // ---- queries ----------------------------------------------------------

    /// The exact partition of vertices into connected components, with
    /// probability at least `1 - delta` per sketch-sample attempt.
    pub fn connected_components(&self) -> Result<Vec<Vec<NodeId>>, EngineError> {
        let _query = self.query_lock.lock();
        if self.shared_dsu_valid.load(Ordering::Relaxed) {
            return Ok(self.components_from_dsu());
        }
        self.run_boruvka_with_recovery()?;
        Ok(self.components_from_dsu())
    }

    /// A spanning forest of the current graph as adjacency lists keyed by
    /// the lower endpoint.
    pub fn calc_spanning_forest(&self) -> Result<Vec<(NodeId, Vec<NodeId>)>, EngineError> {
        self.connected_components()?;
        let mut forest = Vec::new();
        for (src, set) in self.spanning_forest.iter().enumerate() {
            let set = set.lock();
            if !set.is_empty() {
                let mut dsts: Vec<NodeId> = set.iter().copied().collect();
                dsts.sort_unstable();
                forest.push((src as NodeId, dsts));
            }
        }
        Ok(forest)
    }

    /// Whether `a` and `b` are connected in the current graph.
    pub fn point_query(&self, a: NodeId, b: NodeId) -> Result<bool, EngineError> {
        let _query = self.query_lock.lock();
        if !self.dsu_valid.load(Ordering::Acquire) {
            self.run_boruvka_with_recovery()?;
        }
        Ok(self.dsu.find_root(a) == self.dsu.find_root(b))
    }

    fn components_from_dsu(&self) -> Vec<Vec<NodeId>> {
        let mut groups: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for v in 0..self.num_nodes {
            groups.entry(self.dsu.find_root(v)).or_default().push(v);
        }
        let mut roots: Vec<NodeId> = groups.keys().copied().collect();
        roots.sort_unstable();
        *self.representatives.lock() = roots;
        let mut components: Vec<Vec<NodeId>> = groups.into_values().collect();
        components.sort_unstable_by_key(|c| c[0]);
        components
    }

    // ---- Boruvka emulation ------------------------------------------------

    /// Run Boruvka, restoring sketch state if it fails so that ingest can
    /// continue and the query can be retried later.
    fn run_boruvka_with_recovery(&self) -> Result<(), EngineError> {
        let backup = self.backup_sketches()?;
        let result = self.boruvka_emulation();
        for sketch in &self.sketches {
            sketch.lock().reset_sample_state();
        }
        match result {
            Ok(()) => {
                self.discard_backup(backup);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "connectivity query failed, restoring sketches");
                self.restore_sketches(backup)?;
                Err(err)
            }
        }
    }

    fn boruvka_emulation(&self) -> Result<(), EngineError> {
        struct UpdateLockGuard<'a>(&'a AtomicBool);
        impl Drop for UpdateLockGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Release);
            }
        }
        self.update_locked.store(true, Ordering::Release);
        let _unlock = UpdateLockGuard(&self.update_locked);

        let started = Instant::now();
        let n = self.num_nodes as usize;
        let num_threads = self.config.resolved_query_threads().clamp(1, n);
        let slots: Vec<MergeSlot> = (0..num_threads)
            .map(|_| MergeSlot::new(self.geometry, self.seed))
            .collect();

        self.dsu.reset();
        for forest in &self.spanning_forest {
            forest.lock().clear();
        }
        let mut merge_instr: Vec<MergeInstr> = (0..self.num_nodes)
            .map(|i| MergeInstr { root: i, child: i })
            .collect();

        let mut round = 0;
        loop {
            if round >= self.geometry.num_samples {
                return Err(EngineError::OutOfSamples {
                    seed: self.seed,
                    budget: self.geometry.num_samples,
                    used: round,
                });
            }
            let round_started = Instant::now();
            let modified = self.perform_boruvka_round(round, &merge_instr, &slots)?;
            debug!(round, elapsed = ?round_started.elapsed(), "boruvka round finished");
            if !modified {
                break;
            }

            // regroup vertices by supernode for the next round's range scan
            merge_instr
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, instr)| {
                    *instr = MergeInstr {
                        root: self.dsu.find_root(i as NodeId),
                        child: i as NodeId,
                    };
                });
            merge_instr.par_sort_unstable();
            round += 1;
        }
        self.last_query_rounds.store(round, Ordering::Relaxed);

        self.dsu_valid.store(true, Ordering::Release);
        self.shared_dsu_valid.store(true, Ordering::Relaxed);
        let roots: Vec<NodeId> = (0..self.num_nodes)
            .filter(|&v| self.dsu.find_root(v) == v)
            .collect();
        debug!(
            rounds = round,
            components = roots.len(),
            elapsed = ?started.elapsed(),
            "boruvka emulation complete"
        );
        *self.representatives.lock() = roots;
        Ok(())
    }

    /// One parallel Boruvka pass. Returns true iff any supernode merged or
    /// any sample failed (either way another round is warranted).
    fn perform_boruvka_round(
        &self,
        round: usize,
        merge_instr: &[MergeInstr],
        slots: &[MergeSlot],
    ) -> Result<bool, EngineError> {
        for slot in slots {
            let mut state = slot.inner.lock();
            state.sketch.zero();
            state.num_merge_needed = usize::MAX;
            state.num_merge_done = 0;
        }
        let modified = AtomicBool::new(false);
        let num_queried = AtomicUsize::new(0);
        let num_threads = slots.len();

        let mut worker_results: Vec<Result<(), EngineError>> = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..num_threads)
                .map(|thr_id| {
                    let modified = &modified;
                    let num_queried = &num_queried;
                    scope.spawn(move || {
                        self.boruvka_worker(
                            thr_id,
                            num_threads,
                            round,
                            merge_instr,
                            slots,
                            modified,
                            num_queried,
                        )
                    })
                })
                .collect();
            worker_results = handles
                .into_iter()
                .map(|handle| handle.join().expect("boruvka worker panicked"))
                .collect();
        });
        // every worker has quiesced; surface the first captured error
        for result in worker_results {
            result?;
        }
        debug!(
            round,
            queried = num_queried.load(Ordering::Relaxed),
            "supernodes queried this round"
        );
        Ok(modified.load(Ordering::Relaxed))
    }

    #[allow(clippy::too_many_arguments)]
    fn boruvka_worker(
        &self,
        thr_id: usize,
        num_threads: usize,
        round: usize,
        merge_instr: &[MergeInstr],
        slots: &[MergeSlot],
        modified: &AtomicBool,
        num_queried: &AtomicUsize,
    ) -> Result<(), EngineError> {
        let len = merge_instr.len();
        let (start, end) = ith_partition(len, thr_id, num_threads);
        if start >= end {
            return Ok(());
        }

        let mut local = Sketch::new(self.geometry, self.seed);
        let mut root_from_left = start > 0 && merge_instr[start - 1].root == merge_instr[start].root;
        let root_exits_right = end < len && merge_instr[end - 1].root == merge_instr[end].root;
        let mut cur_root = merge_instr[start].root;

        for instr in &merge_instr[start..end] {
            if instr.root != cur_root {
                if root_from_left {
                    // the straddler from the left ends inside this slice, so
                    // this thread's slot owns it and we contribute last
                    self.merge_into_slot(&slots[thr_id], &local, round, None, modified, num_queried)?;
                    root_from_left = false;
                } else {
                    // supernode wholly inside the slice
                    self.sample_local(&mut local, modified, num_queried)?;
                }
                cur_root = instr.root;
                local.zero();
            }
            let vertex_sketch = self.sketches[instr.child as usize].lock();
            local.range_merge(&vertex_sketch, round, 1);
        }

        if root_exits_right || root_from_left {
            let owner = find_last_partition_of_root(merge_instr, cur_root, start, num_threads);
            // the first covering thread announces how many contributions the
            // owning slot must collect before it may sample
            let set_needed = if root_from_left {
                None
            } else {
                Some(owner - thr_id + 1)
            };
            self.merge_into_slot(&slots[owner], &local, round, set_needed, modified, num_queried)?;
        } else {
            self.sample_local(&mut local, modified, num_queried)?;
        }
        Ok(())
    }

    /// Contribute `local` to a shared slot; the contribution that completes
    /// the slot samples it while still holding the slot lock.
    fn merge_into_slot(
        &self,
        slot: &MergeSlot,
        local: &Sketch,
        round: usize,
        set_needed: Option<usize>,
        modified: &AtomicBool,
        num_queried: &AtomicUsize,
    ) -> Result<(), EngineError> {
        let mut state = slot.inner.lock();
        if let Some(needed) = set_needed {
            state.num_merge_needed = needed;
        }
        state.sketch.range_merge(local, round, 1);
        state.num_merge_done += 1;
        debug_assert!(
            state.num_merge_needed == usize::MAX || state.num_merge_done <= state.num_merge_needed
        );
        if state.num_merge_done >= state.num_merge_needed {
            num_queried.fetch_add(1, Ordering::Relaxed);
            if self.sample_supernode(&mut state.sketch)? {
                modified.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn sample_local(
        &self,
        local: &mut Sketch,
        modified: &AtomicBool,
        num_queried: &AtomicUsize,
    ) -> Result<(), EngineError> {
        num_queried.fetch_add(1, Ordering::Relaxed);
        if self.sample_supernode(local)? {
            modified.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Sample one edge out of a supernode sketch and apply it.
    ///
    /// A failed sample forces another round; a good sample that actually
    /// merges two supernodes records the tree edge.
    fn sample_supernode(&self, sketch: &mut Sketch) -> Result<bool, EngineError> {
        match sketch.sample()? {
            SketchSample::Fail => Ok(true),
            SketchSample::Zero => Ok(false),
            SketchSample::Good(id) => {
                let edge = edge_from_id(id);
                let merge = self.dsu.merge(edge.src, edge.dst);
                if merge.merged {
                    self.spanning_forest[edge.src as usize].lock().insert(edge.dst);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    // ---- sketch backup ----------------------------------------------------

    fn backup_sketches(&self) -> Result<SketchBackup, EngineError> {
        if self.config.backup_in_mem {
            let mut blobs = Vec::with_capacity(self.sketches.len());
            for sketch in &self.sketches {
                let mut bytes = Vec::new();
                sketch.lock().serialize(SketchEncoding::Dense, &mut bytes)?;
                blobs.push(bytes);
            }
            Ok(SketchBackup::Mem(blobs))
        } else {
            let path = self.config.backup_dir.join(format!(
                "streamcc-backup-{:016x}-{}.bin",
                self.seed,
                std::process::id()
            ));
            let mut out = BufWriter::new(File::create(&path)?);
            for sketch in &self.sketches {
                sketch.lock().serialize(SketchEncoding::Dense, &mut out)?;
            }
            out.flush()?;
            debug!(path = %path.display(), "paged sketch backup to disk");
            Ok(SketchBackup::Disk(path))
        }
    }

    fn restore_sketches(&self, backup: SketchBackup) -> Result<(), EngineError> {
        match backup {
            SketchBackup::Mem(blobs) => {
                for (sketch, blob) in self.sketches.iter().zip(blobs) {
                    let restored = Sketch::deserialize(
                        self.geometry,
                        self.seed,
                        SketchEncoding::Dense,
                        &mut blob.as_slice(),
                    )?;
                    *sketch.lock() = restored;
                }
            }
            SketchBackup::Disk(path) => {
                let mut input = BufReader::new(File::open(&path)?);
                for sketch in &self.sketches {
                    let restored = Sketch::deserialize(
                        self.geometry,
                        self.seed,
                        SketchEncoding::Dense,
                        &mut input,
                    )?;
                    *sketch.lock() = restored;
                }
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn discard_backup(&self, backup: SketchBackup) {
        if let SketchBackup::Disk(path) = backup {
            let _ = std::fs::remove_file(&path);
        }
    }
}

/// The `i`th half-open range in the ceiling division of `[0, len)` into
/// `divisions` segments.
#[inline]
fn ith_partition(len: usize, i: usize, divisions: usize) -> (usize, usize) {
    ((len * i).div_ceil(divisions), (len * (i + 1)).div_ceil(divisions))
}

/// Inverse of [`ith_partition`]: which segment contains `idx`.
#[inline]
fn partition_of(len: usize, idx: usize, divisions: usize) -> usize {
    idx * divisions / len
}

/// Last partition containing an entry of `root`. `merge_instr` is sorted,
/// so the last entry of the root is found by binary search.
fn find_last_partition_of_root(
    merge_instr: &[MergeInstr],
    root: NodeId,
    min_hint: usize,
    divisions: usize,
) -> usize {
    let mut lo = min_hint;
    let mut hi = merge_instr.len() - 1;
    let target = MergeInstr {
        root,
        child: NodeId::MAX,
    };
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if merge_instr[mid] < target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if merge_instr[lo].root != root {
        lo -= 1;
    }
    debug_assert_eq!(merge_instr[lo].root, root);
    debug_assert!(lo == merge_instr.len() - 1 || merge_instr[lo + 1].root > root);
    partition_of(merge_instr.len(), lo, divisions)
}
