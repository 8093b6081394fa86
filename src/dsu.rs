//! # Lock-Free Multi-Threaded DSU
//!
//! Union-find over the dense vertex set `0..num_nodes` using only atomic
//! operations. Boruvka workers merge supernodes concurrently; no locks are
//! taken on this structure.
//!
//! Memory ordering: finds read `Relaxed` (path compression is best-effort),
//! unions CAS with `AcqRel` so a successful merge is visible to every
//! subsequent find.

use crate::model::NodeId;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Result of one merge attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsuMergeResult {
    /// True iff the two vertices were in distinct sets and are now joined.
    pub merged: bool,
    /// Root of the set containing both vertices afterwards.
    pub root: NodeId,
}

/// Lock-free DSU with atomic parent pointers and union-by-rank.
#[derive(Debug)]
pub struct Dsu {
    parent: Box<[AtomicU32]>,
    rank: Box<[AtomicU8]>,
}

impl Dsu {
    pub fn new(num_nodes: NodeId) -> Self {
        let n = num_nodes as usize;
        let mut parent = Vec::with_capacity(n);
        let mut rank = Vec::with_capacity(n);
        for i in 0..n {
            parent.push(AtomicU32::new(i as u32));
            rank.push(AtomicU8::new(0));
        }
        Self {
            parent: parent.into_boxed_slice(),
            rank: rank.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Find the root of `id`, compressing the traversed path.
    ///
    /// Two passes: walk to the root, then point every node on the path at
    /// it. Compression CASes are best-effort; a racing union invalidating
    /// one is harmless.
    #[inline]
    pub fn find_root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        loop {
            let parent = self.parent[current as usize].load(Ordering::Relaxed);
            if parent == current {
                break;
            }
            current = parent;
        }
        let root = current;

        current = id;
        while current != root {
            let parent = self.parent[current as usize].load(Ordering::Relaxed);
            if parent == root {
                break;
            }
            let _ = self.parent[current as usize].compare_exchange(
                parent,
                root,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
            current = parent;
        }
        root
    }

    /// Merge the sets containing `a` and `b`.
    ///
    /// Retries until either the roots coincide or this thread's CAS attaches
    /// the lower-ranked root under the higher-ranked one.
    pub fn merge(&self, a: NodeId, b: NodeId) -> DsuMergeResult {
        loop {
            let root_a = self.find_root(a);
            let root_b = self.find_root(b);

            if root_a == root_b {
                return DsuMergeResult {
                    merged: false,
                    root: root_a,
                };
            }

            let rank_a = self.rank[root_a as usize].load(Ordering::Relaxed);
            let rank_b = self.rank[root_b as usize].load(Ordering::Relaxed);
            let (child, parent, child_rank, parent_rank) = if rank_a < rank_b {
                (root_a, root_b, rank_a, rank_b)
            } else {
                (root_b, root_a, rank_b, rank_a)
            };

            match self.parent[child as usize].compare_exchange(
                child,
                parent,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if child_rank == parent_rank {
                        let _ = self.rank[parent as usize].compare_exchange(
                            parent_rank,
                            parent_rank.saturating_add(1),
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        );
                    }
                    return DsuMergeResult {
                        merged: true,
                        root: parent,
                    };
                }
                // the loser's parent changed under us; re-resolve roots
                Err(_) => continue,
            }
        }
    }

    /// Reset every vertex to a singleton set. Callers must guarantee no
    /// concurrent operations are in flight.
    pub fn reset(&self) {
        for (i, parent) in self.parent.iter().enumerate() {
            parent.store(i as u32, Ordering::Relaxed);
        }
        for rank in self.rank.iter() {
            rank.store(0, Ordering::Relaxed);
        }
    }
}
