//! Binary dump and restore of full engine state.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! u64  seed
//! u32  num_nodes
//! f64  sketches_factor
//! u8   encoding          (0 dense, 1 column-compressed, 2 row-major)
//! for v in 0..num_nodes: sketch[v] bytes in that encoding
//! ```
//!
//! The eager DSU and spanning-forest cache are not persisted; a restored
//! engine recomputes them on its first query.

use crate::config::CcConfig;
use crate::engine::ConnectivityEngine;
use crate::error::EngineError;
use crate::model::NodeId;
use crate::sketch::{Sketch, SketchEncoding, SketchGeometry};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

impl ConnectivityEngine {
    /// Write the engine's sketch state to `path` in the dense encoding.
    pub fn write_snapshot(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        self.write_snapshot_with(path, SketchEncoding::Dense)
    }

    /// Write the engine's sketch state to `path` in a chosen encoding.
    pub fn write_snapshot_with(
        &self,
        path: impl AsRef<Path>,
        encoding: SketchEncoding,
    ) -> Result<(), EngineError> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&self.seed().to_le_bytes())?;
        out.write_all(&self.num_nodes().to_le_bytes())?;
        out.write_all(&self.config().sketches_factor.to_le_bytes())?;
        out.write_all(&[encoding.as_byte()])?;
        self.with_each_sketch_mut(|sketch| sketch.serialize(encoding, &mut out))?;
        out.flush()?;
        debug!(path = %path.display(), nodes = self.num_nodes(), "wrote engine snapshot");
        Ok(())
    }

    /// Reconstruct an engine from a snapshot written by
    /// [`ConnectivityEngine::write_snapshot`].
    ///
    /// `seed`, `num_nodes`, and `sketches_factor` come from the file and
    /// override whatever `config` carries; the remaining knobs (including
    /// `cols_per_sample`, which must match the writing engine) are taken
    /// from `config`.
    pub fn from_snapshot(
        path: impl AsRef<Path>,
        config: CcConfig,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let mut input = BufReader::new(File::open(path)?);

        let seed = read_u64(&mut input)?;
        let num_nodes: NodeId = read_u32(&mut input)?;
        if num_nodes < 2 {
            return Err(EngineError::Snapshot(format!(
                "implausible vertex count {num_nodes}"
            )));
        }
        let sketches_factor = f64::from_bits(read_u64(&mut input)?);
        if !sketches_factor.is_finite() || sketches_factor <= 0.0 {
            return Err(EngineError::Snapshot(format!(
                "implausible sketches factor {sketches_factor}"
            )));
        }
        let encoding_byte = read_u8(&mut input)?;
        let encoding = SketchEncoding::from_byte(encoding_byte).ok_or_else(|| {
            EngineError::Snapshot(format!("unknown sketch encoding {encoding_byte}"))
        })?;

        let config = config.with_sketches_factor(sketches_factor);
        let geometry =
            SketchGeometry::for_connectivity(num_nodes, sketches_factor, config.cols_per_sample);
        let sketches = (0..num_nodes)
            .map(|_| Sketch::deserialize(geometry, seed, encoding, &mut input))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(path = %path.display(), nodes = num_nodes, "restored engine snapshot");
        Ok(ConnectivityEngine::from_parts(num_nodes, seed, config, sketches))
    }
}

fn read_u8(input: &mut impl Read) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(input: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(input: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
