use anyhow::Result;
use streamcc::{CcConfig, ConnectivityEngine};

/// Config with a fixed seed and a generous sample budget, so the
/// probabilistic query path behaves deterministically across runs.
#[allow(dead_code)]
pub fn sketch_config(seed: u64) -> CcConfig {
    CcConfig::default()
        .with_seed(seed)
        .with_sketches_factor(2.0)
        .with_query_threads(4)
}

/// Dense snapshot of the whole engine as raw bytes, for bitwise
/// comparisons of sketch state.
#[allow(dead_code)]
pub fn snapshot_bytes(
    engine: &ConnectivityEngine,
    dir: &tempfile::TempDir,
    name: &str,
) -> Result<Vec<u8>> {
    let path = dir.path().join(name);
    engine.write_snapshot(&path)?;
    Ok(std::fs::read(path)?)
}
