//! # L0 Sampling Sketch
//!
//! The linear sketch maintained per vertex. A sketch is a grid of
//! [`Bucket`]s, `num_columns x bkt_per_col`, plus one deterministic bucket
//! that receives every update. Each update XORs `(index, checksum)` into the
//! deterministic bucket and, per column, into the row given by a geometric
//! depth hash. Because every cell is an XOR accumulator, sketches over the
//! same geometry and seed combine linearly, which is what lets supernodes be
//! represented as XOR-sums of their members during Boruvka rounds.
//!
//! Updates deeper than the allocated column height land in a bounded
//! overflow buffer; if that fills, the column height grows and the buffered
//! entries are injected back into the grid.

use crate::bucket::{self, Bucket};
use crate::buffer::BucketBuffer;
use crate::error::EngineError;
use crate::model::{vector_length, EdgeId, NodeId};
use std::io::{Read, Write};
use tracing::debug;

/// Rows scanned downward from the top of a column during sampling:
/// `log2(64)`, the deepest useful row of a 64-bit depth hash.
const SAMPLE_SCAN_WINDOW: usize = 6;

/// Hard ceiling on column height; depth hashes cannot exceed 64 bits.
const MAX_BKT_PER_COL: usize = 64;

/// `log2(3) - 1`: divisor turning `log2(n)` into the expected number of
/// Boruvka rounds plus headroom.
const SAMPLES_DIVISOR: f64 = 0.584_962_500_721_156_2;

fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        0
    } else {
        64 - (x - 1).leading_zeros() as usize
    }
}

/// Dimensions shared by every sketch in an engine. Sketches are linearly
/// combinable iff their geometry and seed agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SketchGeometry {
    /// Dimension of the conceptual update vector.
    pub vector_len: u64,
    /// Number of `sample()` calls the sketch supports.
    pub num_samples: usize,
    /// Independent retry columns per sample.
    pub cols_per_sample: usize,
}

impl SketchGeometry {
    /// Geometry for a connectivity engine over `num_nodes` vertices.
    pub fn for_connectivity(num_nodes: NodeId, sketches_factor: f64, cols_per_sample: usize) -> Self {
        let n = num_nodes.max(2) as f64;
        let num_samples = (sketches_factor * n.log2() / SAMPLES_DIVISOR).ceil() as usize;
        Self {
            vector_len: vector_length(num_nodes).max(1),
            num_samples: num_samples.max(1),
            cols_per_sample: cols_per_sample.max(1),
        }
    }

    pub fn num_columns(&self) -> usize {
        self.num_samples * self.cols_per_sample
    }

    /// Column height at construction; may grow over a sketch's lifetime.
    pub fn initial_bkt_per_col(&self) -> usize {
        (ceil_log2(self.vector_len) + 1).min(MAX_BKT_PER_COL)
    }
}

/// Outcome of one sampling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchSample {
    /// The sketch represents the zero vector: no edges at all.
    Zero,
    /// Exactly one index recovered from a good bucket.
    Good(EdgeId),
    /// Nonzero contents but no good bucket in this sample's columns.
    Fail,
}

/// On-disk encodings for a single sketch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SketchEncoding {
    /// Raw bucket array plus the nonempty masks.
    Dense,
    /// Per-column effective sizes, then only the occupied prefix of each
    /// column.
    ColumnCompressed,
    /// One global max depth, then all columns truncated to it, stored
    /// row-major.
    RowMajor,
}

impl SketchEncoding {
    pub fn as_byte(self) -> u8 {
        match self {
            SketchEncoding::Dense => 0,
            SketchEncoding::ColumnCompressed => 1,
            SketchEncoding::RowMajor => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(SketchEncoding::Dense),
            1 => Some(SketchEncoding::ColumnCompressed),
            2 => Some(SketchEncoding::RowMajor),
            _ => None,
        }
    }
}

/// The per-vertex (and per-worker scratch) L0 sketch.
#[derive(Debug, Clone)]
pub struct Sketch {
    seed: u64,
    geometry: SketchGeometry,
    bkt_per_col: usize,
    sample_idx: usize,
    /// `num_columns * bkt_per_col` grid cells, column-major, then the
    /// deterministic bucket at the end.
    buckets: Vec<Bucket>,
    /// One bit per row per column, set iff the cell is nonzero.
    nonempty: Vec<u64>,
    /// Entries whose depth exceeds `bkt_per_col`.
    buffer: BucketBuffer,
}

impl Sketch {
    pub fn new(geometry: SketchGeometry, seed: u64) -> Self {
        let bkt_per_col = geometry.initial_bkt_per_col();
        let num_columns = geometry.num_columns();
        Self {
            seed,
            geometry,
            bkt_per_col,
            sample_idx: 0,
            buckets: vec![Bucket::default(); num_columns * bkt_per_col + 1],
            nonempty: vec![0; num_columns],
            buffer: BucketBuffer::new(2 * num_columns),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn geometry(&self) -> SketchGeometry {
        self.geometry
    }

    pub fn bkt_per_col(&self) -> usize {
        self.bkt_per_col
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Size of the dense bucket array in bytes.
    pub fn bucket_array_bytes(&self) -> usize {
        self.buckets.len() * Bucket::BYTES
    }

    /// Sketches are linearly combinable iff this holds.
    pub fn compatible_with(&self, other: &Sketch) -> bool {
        self.seed == other.seed && self.geometry == other.geometry
    }

    #[inline]
    fn num_columns(&self) -> usize {
        self.geometry.num_columns()
    }

    #[inline]
    fn det_idx(&self) -> usize {
        self.buckets.len() - 1
    }

    #[inline]
    fn deterministic_bucket(&self) -> &Bucket {
        &self.buckets[self.det_idx()]
    }

    #[inline]
    fn bucket_at(&self, col: usize, row: usize) -> &Bucket {
        &self.buckets[col * self.bkt_per_col + row]
    }

    #[inline]
    fn bucket_at_mut(&mut self, col: usize, row: usize) -> &mut Bucket {
        let idx = col * self.bkt_per_col + row;
        &mut self.buckets[idx]
    }

    #[inline]
    fn set_flag(&mut self, col: usize, row: usize, occupied: bool) {
        if occupied {
            self.nonempty[col] |= 1 << row;
        } else {
            self.nonempty[col] &= !(1 << row);
        }
    }

    fn refresh_column_flags(&mut self, col: usize) {
        let mut mask = 0u64;
        for row in 0..self.bkt_per_col {
            if !self.bucket_at(col, row).is_empty() {
                mask |= 1 << row;
            }
        }
        self.nonempty[col] = mask;
    }

    /// 1-based index of the topmost nonempty row of `col`; 0 if the column
    /// (or the whole sketch, judged by the deterministic bucket) is empty.
    pub fn effective_size(&self, col: usize) -> usize {
        if self.deterministic_bucket().is_empty() {
            return 0;
        }
        64 - self.nonempty[col].leading_zeros() as usize
    }

    /// Largest effective size over all columns.
    pub fn effective_depth(&self) -> usize {
        if self.deterministic_bucket().is_empty() {
            return 0;
        }
        let all = self.nonempty.iter().fold(0u64, |acc, m| acc | m);
        64 - all.leading_zeros() as usize
    }

    /// Apply a point update. Insertion and deletion are the same operation.
    pub fn update(&mut self, index: EdgeId) {
        let cseed = bucket::checksum_seed(self.seed);
        let checksum = bucket::index_checksum(index, cseed);
        let det = self.det_idx();
        self.buckets[det].update(index, checksum);

        for col in 0..self.num_columns() {
            // depth is independent of the current column height so that the
            // same index always cancels with itself, even across growth
            let depth = bucket::index_depth(index, self.seed, col, MAX_BKT_PER_COL - 1);
            if depth < self.bkt_per_col {
                let cell = self.bucket_at_mut(col, depth);
                cell.update(index, checksum);
                let occupied = !self.bucket_at(col, depth).is_empty();
                self.set_flag(col, depth, occupied);
            } else {
                let contrib = Bucket {
                    alpha: index,
                    gamma: checksum,
                };
                if !self.buffer.insert(col as u32, depth as u32, contrib) {
                    let target = (self.bkt_per_col * 8 / 5).max(depth + 1);
                    self.grow(target);
                    // the entry now fits in the grid directly
                    let cell = self.bucket_at_mut(col, depth);
                    cell.merge(&contrib);
                    let occupied = !self.bucket_at(col, depth).is_empty();
                    self.set_flag(col, depth, occupied);
                }
            }
        }
    }

    /// Grow the column height to at least `new_bkt_per_col`, preserving all
    /// grid contents and injecting buffered entries that now fit.
    fn grow(&mut self, new_bkt_per_col: usize) {
        let new_bkt = new_bkt_per_col.min(MAX_BKT_PER_COL);
        if new_bkt <= self.bkt_per_col {
            self.inject_buffer();
            return;
        }
        debug!(
            old = self.bkt_per_col,
            new = new_bkt,
            "growing sketch column height"
        );
        let num_columns = self.num_columns();
        let mut buckets = vec![Bucket::default(); num_columns * new_bkt + 1];
        for col in 0..num_columns {
            for row in 0..self.bkt_per_col {
                buckets[col * new_bkt + row] = *self.bucket_at(col, row);
            }
        }
        buckets[num_columns * new_bkt] = *self.deterministic_bucket();
        self.buckets = buckets;
        self.bkt_per_col = new_bkt;
        self.inject_buffer();
    }

    /// XOR buffered entries whose rows fit under the current height into
    /// the grid.
    fn inject_buffer(&mut self) {
        let fitting = self.buffer.take_fitting(self.bkt_per_col as u32);
        for entry in fitting {
            let (col, row) = (entry.col as usize, entry.row as usize);
            self.bucket_at_mut(col, row).merge(&entry.bucket);
            let occupied = !self.bucket_at(col, row).is_empty();
            self.set_flag(col, row, occupied);
        }
    }

    /// Move every overflow entry into the grid, growing as needed. Called
    /// before serialization so the on-disk form carries no buffer.
    fn flush_overflow(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let deepest = self.buffer.iter().map(|e| e.row as usize).max().unwrap_or(0);
        self.grow(deepest + 1);
    }

    /// Linear merge: `self ^= other`. Requires identical geometry and seed.
    pub fn merge(&mut self, other: &Sketch) {
        debug_assert!(self.compatible_with(other), "merging incompatible sketches");
        if other.bkt_per_col > self.bkt_per_col {
            self.grow(other.bkt_per_col);
        }
        for col in 0..self.num_columns() {
            let rows = other.effective_size(col);
            if rows == 0 {
                continue;
            }
            for row in 0..rows {
                let contrib = *other.bucket_at(col, row);
                self.bucket_at_mut(col, row).merge(&contrib);
            }
            self.refresh_column_flags(col);
        }
        let det = self.det_idx();
        let other_det = *other.deterministic_bucket();
        self.buckets[det].merge(&other_det);
        self.merge_overflow(other);
    }

    /// Merge only the columns of samples `[start_sample, start_sample +
    /// n_samples)`, plus the deterministic bucket. Advances the sample
    /// cursor past any prefix this sketch did not receive.
    pub fn range_merge(&mut self, other: &Sketch, start_sample: usize, n_samples: usize) {
        debug_assert!(self.compatible_with(other), "merging incompatible sketches");
        if start_sample + n_samples > self.geometry.num_samples {
            debug_assert!(false, "range merge beyond sample budget");
            self.sample_idx = self.geometry.num_samples;
            return;
        }
        if other.bkt_per_col > self.bkt_per_col {
            self.grow(other.bkt_per_col);
        }
        self.sample_idx = self.sample_idx.max(start_sample);

        let det = self.det_idx();
        let other_det = *other.deterministic_bucket();
        self.buckets[det].merge(&other_det);

        let start_col = start_sample * self.geometry.cols_per_sample;
        let end_col = (start_sample + n_samples) * self.geometry.cols_per_sample;
        for col in start_col..end_col {
            let rows = other.effective_size(col);
            if rows == 0 {
                continue;
            }
            for row in 0..rows {
                let contrib = *other.bucket_at(col, row);
                self.bucket_at_mut(col, row).merge(&contrib);
            }
            self.refresh_column_flags(col);
        }
        self.merge_overflow(other);
    }

    fn merge_overflow(&mut self, other: &Sketch) {
        if other.buffer.is_empty() {
            self.inject_buffer();
            return;
        }
        if !self.buffer.merge(&other.buffer) {
            let deepest = self.buffer.iter().map(|e| e.row as usize).max().unwrap_or(0);
            self.grow((self.bkt_per_col * 8 / 5).max(deepest + 1));
        } else {
            self.inject_buffer();
        }
    }

    /// XOR a raw dense bucket array (e.g. from an external accelerator)
    /// into this sketch. The array must match the dense layout exactly.
    pub fn merge_raw_buckets(&mut self, raw: &[Bucket]) {
        debug_assert_eq!(raw.len(), self.buckets.len(), "raw bucket length mismatch");
        for (cell, contrib) in self.buckets.iter_mut().zip(raw) {
            cell.merge(contrib);
        }
        for col in 0..self.num_columns() {
            self.refresh_column_flags(col);
        }
    }

    /// Draw the next sample. Consumes one sample index per call.
    pub fn sample(&mut self) -> Result<SketchSample, EngineError> {
        if self.sample_idx >= self.geometry.num_samples {
            return Err(EngineError::OutOfSamples {
                seed: self.seed,
                budget: self.geometry.num_samples,
                used: self.sample_idx,
            });
        }
        let idx = self.sample_idx;
        self.sample_idx += 1;

        let cseed = bucket::checksum_seed(self.seed);
        let det = *self.deterministic_bucket();
        if det.is_empty() {
            return Ok(SketchSample::Zero);
        }
        if det.is_good(cseed) {
            return Ok(SketchSample::Good(det.alpha));
        }

        let first_col = idx * self.geometry.cols_per_sample;
        for col in first_col..first_col + self.geometry.cols_per_sample {
            let top = self.effective_size(col);
            if top == 0 {
                continue;
            }
            let mut row = top - 1;
            let stop = row.saturating_sub(SAMPLE_SCAN_WINDOW);
            loop {
                let cell = self.bucket_at(col, row);
                if cell.is_good(cseed) {
                    return Ok(SketchSample::Good(cell.alpha));
                }
                if row == stop {
                    break;
                }
                row -= 1;
            }
        }

        // deep entries that never made it into the grid
        for entry in self.buffer.iter() {
            let col = entry.col as usize;
            if col >= first_col
                && col < first_col + self.geometry.cols_per_sample
                && entry.bucket.is_good(cseed)
            {
                return Ok(SketchSample::Good(entry.bucket.alpha));
            }
        }
        Ok(SketchSample::Fail)
    }

    /// Restart sampling from index 0. Called after each query round so a
    /// later query can re-consume the budget.
    pub fn reset_sample_state(&mut self) {
        self.sample_idx = 0;
    }

    /// Clear all contents and the sample cursor.
    pub fn zero(&mut self) {
        self.buckets.fill(Bucket::default());
        self.nonempty.fill(0);
        self.buffer.clear();
        self.sample_idx = 0;
    }

    /// True iff the sketch represents the zero vector exactly.
    pub fn is_zero(&self) -> bool {
        let mut buffer = self.buffer.clone();
        buffer.sort_and_compact();
        self.buckets.iter().all(Bucket::is_empty) && buffer.is_empty()
    }

    // ---- serialization ----------------------------------------------------

    /// Write this sketch in the given encoding. Overflow entries are folded
    /// into the grid first, so this may grow the sketch.
    pub fn serialize(&mut self, encoding: SketchEncoding, out: &mut impl Write) -> Result<(), EngineError> {
        self.flush_overflow();
        out.write_all(&[self.bkt_per_col as u8])?;
        match encoding {
            SketchEncoding::Dense => {
                for cell in &self.buckets {
                    write_bucket(out, cell)?;
                }
                for mask in &self.nonempty {
                    out.write_all(&mask.to_le_bytes())?;
                }
            }
            SketchEncoding::ColumnCompressed => {
                let sizes: Vec<u8> = (0..self.num_columns())
                    .map(|col| self.effective_size(col) as u8)
                    .collect();
                out.write_all(&sizes)?;
                for mask in &self.nonempty {
                    out.write_all(&mask.to_le_bytes())?;
                }
                write_bucket(out, self.deterministic_bucket())?;
                for (col, &size) in sizes.iter().enumerate() {
                    for row in 0..size as usize {
                        write_bucket(out, self.bucket_at(col, row))?;
                    }
                }
            }
            SketchEncoding::RowMajor => {
                let max_depth = self.effective_depth();
                out.write_all(&[max_depth as u8])?;
                for mask in &self.nonempty {
                    out.write_all(&mask.to_le_bytes())?;
                }
                write_bucket(out, self.deterministic_bucket())?;
                for row in 0..max_depth {
                    for col in 0..self.num_columns() {
                        write_bucket(out, self.bucket_at(col, row))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read a sketch previously written by [`Sketch::serialize`] with the
    /// same geometry, seed, and encoding.
    pub fn deserialize(
        geometry: SketchGeometry,
        seed: u64,
        encoding: SketchEncoding,
        input: &mut impl Read,
    ) -> Result<Self, EngineError> {
        let bkt_per_col = read_u8(input)? as usize;
        if bkt_per_col == 0 || bkt_per_col > MAX_BKT_PER_COL {
            return Err(EngineError::Snapshot(format!(
                "column height {bkt_per_col} out of range"
            )));
        }
        let num_columns = geometry.num_columns();
        let mut sketch = Sketch {
            seed,
            geometry,
            bkt_per_col,
            sample_idx: 0,
            buckets: vec![Bucket::default(); num_columns * bkt_per_col + 1],
            nonempty: vec![0; num_columns],
            buffer: BucketBuffer::new(2 * num_columns),
        };
        match encoding {
            SketchEncoding::Dense => {
                for i in 0..sketch.buckets.len() {
                    sketch.buckets[i] = read_bucket(input)?;
                }
                for col in 0..num_columns {
                    sketch.nonempty[col] = read_u64(input)?;
                }
            }
            SketchEncoding::ColumnCompressed => {
                let mut sizes = vec![0u8; num_columns];
                input.read_exact(&mut sizes)?;
                for (col, &size) in sizes.iter().enumerate() {
                    if size as usize > bkt_per_col {
                        return Err(EngineError::Snapshot(format!(
                            "column {col} claims {size} rows but height is {bkt_per_col}"
                        )));
                    }
                }
                for col in 0..num_columns {
                    sketch.nonempty[col] = read_u64(input)?;
                }
                let det = sketch.det_idx();
                sketch.buckets[det] = read_bucket(input)?;
                for (col, &size) in sizes.iter().enumerate() {
                    for row in 0..size as usize {
                        let cell = read_bucket(input)?;
                        *sketch.bucket_at_mut(col, row) = cell;
                    }
                }
            }
            SketchEncoding::RowMajor => {
                let max_depth = read_u8(input)? as usize;
                if max_depth > bkt_per_col {
                    return Err(EngineError::Snapshot(format!(
                        "max depth {max_depth} exceeds column height {bkt_per_col}"
                    )));
                }
                for col in 0..num_columns {
                    sketch.nonempty[col] = read_u64(input)?;
                }
                let det = sketch.det_idx();
                sketch.buckets[det] = read_bucket(input)?;
                for row in 0..max_depth {
                    for col in 0..num_columns {
                        let cell = read_bucket(input)?;
                        *sketch.bucket_at_mut(col, row) = cell;
                    }
                }
            }
        }
        Ok(sketch)
    }
}

impl PartialEq for Sketch {
    /// Content equality: same parameters and the same represented vector.
    /// The sample cursor is transient state and does not participate.
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed
            && self.geometry == other.geometry
            && self.bkt_per_col == other.bkt_per_col
            && self.buckets == other.buckets
            && self.buffer == other.buffer
    }
}

fn write_bucket(out: &mut impl Write, bucket: &Bucket) -> std::io::Result<()> {
    out.write_all(&bucket.alpha.to_le_bytes())?;
    out.write_all(&bucket.gamma.to_le_bytes())
}

fn read_bucket(input: &mut impl Read) -> std::io::Result<Bucket> {
    Ok(Bucket {
        alpha: read_u64(input)?,
        gamma: read_u64(input)?,
    })
}

fn read_u8(input: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u64(input: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::edge_id;

    fn small_geometry() -> SketchGeometry {
        SketchGeometry::for_connectivity(64, 1.0, 1)
    }

    #[test]
    fn geometry_scales_with_nodes_and_factor() {
        let base = SketchGeometry::for_connectivity(1024, 1.0, 1);
        let scaled = SketchGeometry::for_connectivity(1024, 2.0, 1);
        assert!(scaled.num_samples >= 2 * base.num_samples - 1);
        assert_eq!(base.vector_len, 1024 * 1023 / 2);
        assert_eq!(base.num_columns(), base.num_samples);
        let wide = SketchGeometry::for_connectivity(1024, 1.0, 3);
        assert_eq!(wide.num_columns(), 3 * wide.num_samples);
    }

    #[test]
    fn double_update_cancels() {
        let mut sketch = Sketch::new(small_geometry(), 0x5eed);
        let edges = [edge_id(0, 1), edge_id(3, 17), edge_id(40, 63)];
        for &e in &edges {
            sketch.update(e);
        }
        // reverse order on the second pass: XOR does not care
        for &e in edges.iter().rev() {
            sketch.update(e);
        }
        assert!(sketch.is_zero());
    }

    #[test]
    fn merge_is_linear() {
        let geometry = small_geometry();
        let seed = 0xdead_beef;
        let mut combined = Sketch::new(geometry, seed);
        for e in [edge_id(1, 2), edge_id(5, 9), edge_id(33, 40)] {
            combined.update(e);
        }

        let mut a = Sketch::new(geometry, seed);
        a.update(edge_id(1, 2));
        a.update(edge_id(5, 9));
        let mut b = Sketch::new(geometry, seed);
        b.update(edge_id(33, 40));

        let mut ab = a.clone();
        ab.merge(&b);
        assert_eq!(ab, combined);

        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ba, combined);
    }

    #[test]
    fn merge_cancels_shared_updates() {
        let geometry = small_geometry();
        let mut a = Sketch::new(geometry, 9);
        let mut b = Sketch::new(geometry, 9);
        a.update(edge_id(7, 8));
        b.update(edge_id(7, 8));
        a.merge(&b);
        assert!(a.is_zero());
    }

    #[test]
    fn singleton_sketch_samples_its_edge() {
        for seed in [1u64, 42, 0xffff_ffff] {
            let mut sketch = Sketch::new(small_geometry(), seed);
            let e = edge_id(12, 50);
            sketch.update(e);
            assert_eq!(sketch.sample().unwrap(), SketchSample::Good(e));
        }
    }

    #[test]
    fn empty_sketch_samples_zero() {
        let mut sketch = Sketch::new(small_geometry(), 77);
        assert_eq!(sketch.sample().unwrap(), SketchSample::Zero);
    }

    #[test]
    fn sample_budget_is_enforced() {
        let geometry = small_geometry();
        let mut sketch = Sketch::new(geometry, 123);
        sketch.update(edge_id(0, 1));
        for _ in 0..geometry.num_samples {
            sketch.sample().unwrap();
        }
        assert!(matches!(
            sketch.sample(),
            Err(EngineError::OutOfSamples { .. })
        ));
        sketch.reset_sample_state();
        assert!(sketch.sample().is_ok());
    }

    #[test]
    fn range_merge_advances_sample_cursor() {
        let geometry = small_geometry();
        let seed = 4;
        let mut dst = Sketch::new(geometry, seed);
        let mut src = Sketch::new(geometry, seed);
        src.update(edge_id(2, 3));
        dst.range_merge(&src, 2, 1);
        assert_eq!(dst.sample_idx, 2);
        // full merge keeps the cursor at zero
        let mut full = Sketch::new(geometry, seed);
        full.merge(&src);
        assert_eq!(full.sample_idx, 0);
    }

    #[test]
    fn range_merged_sample_recovers_singleton() {
        let geometry = small_geometry();
        let seed = 31;
        let mut src = Sketch::new(geometry, seed);
        let e = edge_id(10, 20);
        src.update(e);
        for round in 0..geometry.num_samples {
            let mut dst = Sketch::new(geometry, seed);
            dst.range_merge(&src, round, 1);
            assert_eq!(dst.sample().unwrap(), SketchSample::Good(e));
        }
    }

    #[test]
    fn overflow_grows_columns_and_preserves_cancellation() {
        // tiny vector length forces a short column, so a large share of
        // updates overflows into the buffer and triggers growth
        let geometry = SketchGeometry {
            vector_len: 2,
            num_samples: 8,
            cols_per_sample: 1,
        };
        let initial = geometry.initial_bkt_per_col();
        let mut sketch = Sketch::new(geometry, 0xabc);
        for index in 0..200u64 {
            sketch.update(index);
        }
        assert!(
            sketch.bkt_per_col() > initial,
            "expected growth beyond {initial} rows"
        );
        for index in 0..200u64 {
            sketch.update(index);
        }
        assert!(sketch.is_zero());
    }

    #[test]
    fn merge_after_growth_aligns_heights() {
        let geometry = SketchGeometry {
            vector_len: 2,
            num_samples: 8,
            cols_per_sample: 1,
        };
        let mut grown = Sketch::new(geometry, 0xabc);
        for index in 0..200u64 {
            grown.update(index);
        }
        let mut flat = Sketch::new(geometry, 0xabc);
        for index in 0..200u64 {
            flat.update(index);
        }
        // merging two equal sketches cancels everything, regardless of how
        // their heights evolved
        grown.merge(&flat);
        assert!(grown.is_zero());
    }

    #[test]
    fn dense_round_trip_is_bitwise() {
        let geometry = small_geometry();
        let mut sketch = Sketch::new(geometry, 0x1234);
        for v in 1..30u32 {
            sketch.update(edge_id(0, v));
        }
        let mut bytes = Vec::new();
        sketch.serialize(SketchEncoding::Dense, &mut bytes).unwrap();
        let restored =
            Sketch::deserialize(geometry, 0x1234, SketchEncoding::Dense, &mut bytes.as_slice())
                .unwrap();
        assert_eq!(restored, sketch);
        let mut again = Vec::new();
        restored
            .clone()
            .serialize(SketchEncoding::Dense, &mut again)
            .unwrap();
        assert_eq!(again, bytes);
    }

    #[test]
    fn compressed_round_trips_preserve_contents() {
        let geometry = small_geometry();
        for encoding in [SketchEncoding::ColumnCompressed, SketchEncoding::RowMajor] {
            let mut sketch = Sketch::new(geometry, 0x9999);
            for v in 1..20u32 {
                sketch.update(edge_id(v, v + 5));
            }
            let mut bytes = Vec::new();
            sketch.serialize(encoding, &mut bytes).unwrap();
            let restored =
                Sketch::deserialize(geometry, 0x9999, encoding, &mut bytes.as_slice()).unwrap();
            assert_eq!(restored, sketch);
        }
    }

    #[test]
    fn truncated_input_is_rejected() {
        let geometry = small_geometry();
        let mut sketch = Sketch::new(geometry, 5);
        sketch.update(edge_id(1, 2));
        let mut bytes = Vec::new();
        sketch.serialize(SketchEncoding::Dense, &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);
        let result =
            Sketch::deserialize(geometry, 5, SketchEncoding::Dense, &mut bytes.as_slice());
        assert!(result.is_err());
    }

    #[test]
    fn zero_clears_everything() {
        let mut sketch = Sketch::new(small_geometry(), 8);
        sketch.update(edge_id(3, 4));
        sketch.sample().unwrap();
        sketch.zero();
        assert!(sketch.is_zero());
        assert_eq!(sketch.sample_idx, 0);
        assert_eq!(sketch.sample().unwrap(), SketchSample::Zero);
    }
}
