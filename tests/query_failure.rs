mod support;

use anyhow::Result;
use streamcc::test_support::{ingest, path_stream};
use streamcc::{CcConfig, ConnectivityEngine, EngineError, GraphUpdate};
use support::snapshot_bytes;

/// A long path needs about `log2(n)` Boruvka rounds; a starved sample
/// budget guarantees the query runs out before converging.
fn starved_config(backup_in_mem: bool, backup_dir: &std::path::Path) -> CcConfig {
    CcConfig::default()
        .with_seed(0xF00D)
        .with_sketches_factor(0.15)
        .with_disable_eager_dsu(true)
        .with_query_threads(4)
        .with_backup_in_mem(backup_in_mem)
        .with_backup_dir(backup_dir)
}

#[test]
fn failed_query_surfaces_out_of_samples() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ConnectivityEngine::new(512, starved_config(true, dir.path()));
    ingest(&engine, &path_stream(512))?;
    assert!(matches!(
        engine.connected_components(),
        Err(EngineError::OutOfSamples { .. })
    ));
    Ok(())
}

#[test]
fn failed_query_restores_sketches_bitwise() -> Result<()> {
    for backup_in_mem in [true, false] {
        let dir = tempfile::tempdir()?;
        let engine = ConnectivityEngine::new(512, starved_config(backup_in_mem, dir.path()));
        ingest(&engine, &path_stream(512))?;

        let before = snapshot_bytes(&engine, &dir, "before.bin")?;
        assert!(engine.connected_components().is_err());
        let after = snapshot_bytes(&engine, &dir, "after.bin")?;
        assert_eq!(
            before, after,
            "sketch state must survive a failed query (backup_in_mem={backup_in_mem})"
        );
    }
    Ok(())
}

#[test]
fn ingest_continues_after_a_failed_query() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = ConnectivityEngine::new(512, starved_config(true, dir.path()));
    ingest(&engine, &path_stream(512))?;
    assert!(engine.connected_components().is_err());

    // the update lock must have been released on the failure path
    engine.update(GraphUpdate::insert(0, 511))?;
    engine.update(GraphUpdate::delete(0, 511))?;
    Ok(())
}

#[test]
fn retry_succeeds_with_a_restored_budget() -> Result<()> {
    // same stream, same seed, but a budget that comfortably covers the
    // rounds a 512-path needs
    let engine = ConnectivityEngine::new(
        512,
        CcConfig::default()
            .with_seed(0xF00D)
            .with_sketches_factor(2.0)
            .with_disable_eager_dsu(true)
            .with_query_threads(4),
    );
    ingest(&engine, &path_stream(512))?;
    assert_eq!(engine.connected_components()?.len(), 1);
    Ok(())
}
