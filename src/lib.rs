//! # streamcc
//!
//! A streaming graph-connectivity engine built on linear L0 sampling
//! sketches.
//!
//! Given an unbounded stream of edge insertions and deletions over an
//! undirected simple graph on a fixed vertex set, the engine answers
//! connectivity queries (connected components, point connectivity, and a
//! spanning forest) using sub-linear memory per vertex. Each vertex keeps
//! one [`sketch::Sketch`]; queries run a parallel Boruvka emulation that
//! repeatedly samples a non-tree edge per supernode from the XOR-sum of its
//! members' sketches.
//!
//! The engine is probabilistic: queries return an exact answer with
//! configurable failure probability, or fail with
//! [`EngineError::OutOfSamples`] after restoring ingest state.
//!
//! ```no_run
//! use streamcc::{CcConfig, ConnectivityEngine, GraphUpdate};
//!
//! let engine = ConnectivityEngine::new(4, CcConfig::default());
//! engine.update(GraphUpdate::insert(0, 1))?;
//! engine.update(GraphUpdate::insert(1, 2))?;
//! let components = engine.connected_components()?;
//! assert_eq!(components, vec![vec![0, 1, 2], vec![3]]);
//! # Ok::<(), streamcc::EngineError>(())
//! ```

pub mod bucket;
mod buffer;
pub mod config;
pub mod dsu;
pub mod engine;
pub mod error;
pub mod model;
pub mod sketch;
mod snapshot;
pub mod test_support;

pub use bucket::Bucket;
pub use config::CcConfig;
pub use dsu::{Dsu, DsuMergeResult};
pub use engine::ConnectivityEngine;
pub use error::EngineError;
pub use model::{edge_from_id, edge_id, Edge, EdgeId, GraphUpdate, NodeId, UpdateType};
pub use sketch::{Sketch, SketchEncoding, SketchGeometry, SketchSample};
