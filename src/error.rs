//! Error types surfaced at the engine API boundary.
//!
//! Sampling outcomes on the hot path are ordinary enum values
//! ([`crate::sketch::SketchSample`]); only genuinely exceptional conditions
//! become errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A sketch was asked to sample past its budget. Fatal for the query
    /// that triggered it; the engine restores sketch state before surfacing
    /// this, so the caller may ingest more of the stream and retry.
    #[error("sample budget exhausted: {used} of {budget} samples consumed (sketch seed {seed:#x})")]
    OutOfSamples { seed: u64, budget: usize, used: usize },

    /// An update arrived while a connectivity query holds the stream. The
    /// caller may retry once the query completes.
    #[error("updates are locked: a connectivity query is running")]
    UpdateLocked,

    /// A worker id outside the allocated delta-sketch range.
    #[error("worker {thr_id} has no delta sketch (allocated {allocated})")]
    UnknownWorker { thr_id: usize, allocated: usize },

    /// A snapshot could not be decoded.
    #[error("snapshot corrupt: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
