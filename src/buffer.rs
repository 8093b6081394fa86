//! Overflow buffer for sketch updates whose depth exceeds the bucket
//! columns currently allocated.
//!
//! Entries accumulate XOR contributions keyed by `(col, row)`. The buffer is
//! bounded; when it cannot accept more even after compaction, the owning
//! sketch grows its column height and injects every entry that then fits.

use crate::bucket::Bucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BufferEntry {
    pub col: u32,
    pub row: u32,
    pub bucket: Bucket,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BucketBuffer {
    entries: Vec<BufferEntry>,
    cap: usize,
}

impl BucketBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry> {
        self.entries.iter()
    }

    /// Fold one deep update into the buffer. Returns false if the buffer is
    /// full even after compaction; the caller must then grow the sketch.
    pub fn insert(&mut self, col: u32, row: u32, bucket: Bucket) -> bool {
        if self.entries.len() >= self.cap {
            self.sort_and_compact();
        }
        if self.entries.len() >= self.cap {
            return false;
        }
        self.entries.push(BufferEntry { col, row, bucket });
        true
    }

    /// XOR-merge another buffer into this one. Returns false when the
    /// combined contents do not fit.
    pub fn merge(&mut self, other: &BucketBuffer) -> bool {
        self.entries.extend(other.entries.iter().copied());
        if self.entries.len() > self.cap {
            self.sort_and_compact();
        }
        self.entries.len() <= self.cap
    }

    /// Sort by `(col, row)`, XOR-merge entries sharing a cell, and drop the
    /// ones that cancel to empty.
    pub fn sort_and_compact(&mut self) {
        self.entries
            .sort_unstable_by_key(|e| (e.col, e.row, e.bucket.alpha, e.bucket.gamma));
        let mut compacted: Vec<BufferEntry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            match compacted.last_mut() {
                Some(last) if last.col == entry.col && last.row == entry.row => {
                    last.bucket.merge(&entry.bucket);
                }
                _ => compacted.push(entry),
            }
        }
        compacted.retain(|e| !e.bucket.is_empty());
        self.entries = compacted;
    }

    /// Remove and return every entry whose row now fits under `max_row`,
    /// compacting first so each cell is returned at most once.
    pub fn take_fitting(&mut self, max_row: u32) -> Vec<BufferEntry> {
        self.sort_and_compact();
        let mut fitting = Vec::new();
        self.entries.retain(|e| {
            if e.row < max_row {
                fitting.push(*e);
                false
            } else {
                true
            }
        });
        fitting
    }
}

impl PartialEq for BucketBuffer {
    /// Content equality up to compaction order.
    fn eq(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.sort_and_compact();
        let mut b = other.clone();
        b.sort_and_compact();
        a.entries == b.entries
    }
}
