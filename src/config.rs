//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the connectivity engine.
///
/// All fields have workable defaults; `with_*` setters cover the common
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CcConfig {
    /// Scales the per-sketch sample budget (and with it the number of
    /// Boruvka rounds a query can survive). Raise above 1.0 to lower the
    /// query failure probability, lower it to save memory.
    pub sketches_factor: f64,
    /// Independent retry columns per sample.
    pub cols_per_sample: usize,
    /// Scales the batch size hint handed to upstream buffering.
    pub batch_factor: f64,
    /// Skip the eager DSU / spanning-forest cache on `pre_insert`. Every
    /// query then runs full Boruvka emulation.
    pub disable_eager_dsu: bool,
    /// Keep the query-time sketch backup in memory rather than paging it to
    /// a file under `backup_dir`.
    pub backup_in_mem: bool,
    /// Directory for paged sketch backups.
    pub backup_dir: PathBuf,
    /// Worker threads for Boruvka rounds. 0 means use the available
    /// hardware parallelism.
    pub query_threads: usize,
    /// Fixed sketch seed for reproducible runs. `None` draws one from OS
    /// entropy.
    pub seed: Option<u64>,
}

impl Default for CcConfig {
    fn default() -> Self {
        Self {
            sketches_factor: 1.0,
            cols_per_sample: 1,
            batch_factor: 1.0,
            disable_eager_dsu: false,
            backup_in_mem: true,
            backup_dir: std::env::temp_dir(),
            query_threads: 0,
            seed: None,
        }
    }
}

impl CcConfig {
    pub fn with_sketches_factor(mut self, factor: f64) -> Self {
        self.sketches_factor = factor;
        self
    }

    pub fn with_cols_per_sample(mut self, cols: usize) -> Self {
        self.cols_per_sample = cols.max(1);
        self
    }

    pub fn with_batch_factor(mut self, factor: f64) -> Self {
        self.batch_factor = factor;
        self
    }

    pub fn with_disable_eager_dsu(mut self, disable: bool) -> Self {
        self.disable_eager_dsu = disable;
        self
    }

    pub fn with_backup_in_mem(mut self, in_mem: bool) -> Self {
        self.backup_in_mem = in_mem;
        self
    }

    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    pub fn with_query_threads(mut self, threads: usize) -> Self {
        self.query_threads = threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Worker-thread count after resolving the hardware default.
    pub fn resolved_query_threads(&self) -> usize {
        if self.query_threads > 0 {
            self.query_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}
