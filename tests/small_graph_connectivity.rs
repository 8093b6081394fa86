mod support;

use anyhow::Result;
use streamcc::test_support::{expected_components, ingest, path_stream};
use streamcc::{ConnectivityEngine, GraphUpdate};
use support::sketch_config;

/// Every scenario runs twice: once with the eager DSU cache (insert-only
/// streams answer from it) and once with it disabled, which forces the full
/// Boruvka emulation over the sketches.
fn engines(seed: u64, num_nodes: u32) -> Vec<ConnectivityEngine> {
    vec![
        ConnectivityEngine::new(num_nodes, sketch_config(seed)),
        ConnectivityEngine::new(num_nodes, sketch_config(seed).with_disable_eager_dsu(true)),
    ]
}

#[test]
fn chain_of_four_is_one_component() -> Result<()> {
    let inserted = [(0, 1), (1, 2), (2, 3)];
    for engine in engines(0xC0FFEE, 4) {
        for (u, v) in inserted {
            engine.update(GraphUpdate::insert(u, v))?;
        }
        let components = engine.connected_components()?;
        assert_eq!(components, vec![vec![0, 1, 2, 3]]);

        let forest = engine.calc_spanning_forest()?;
        let mut edge_count = 0;
        for (src, dsts) in &forest {
            for dst in dsts {
                assert!(
                    inserted.contains(&(*src, *dst)),
                    "forest edge ({src}, {dst}) not in the input"
                );
                edge_count += 1;
            }
        }
        assert_eq!(edge_count, 3);
    }
    Ok(())
}

#[test]
fn two_pairs_stay_separate() -> Result<()> {
    for engine in engines(0xBEEF, 4) {
        engine.update(GraphUpdate::insert(0, 1))?;
        engine.update(GraphUpdate::insert(2, 3))?;
        assert_eq!(
            engine.connected_components()?,
            vec![vec![0, 1], vec![2, 3]]
        );
    }
    Ok(())
}

#[test]
fn deleting_the_bridge_splits_the_chain() -> Result<()> {
    for engine in engines(0xD00D, 4) {
        for (u, v) in [(0, 1), (1, 2), (2, 3)] {
            engine.update(GraphUpdate::insert(u, v))?;
        }
        engine.update(GraphUpdate::delete(1, 2))?;
        assert_eq!(
            engine.connected_components()?,
            vec![vec![0, 1], vec![2, 3]]
        );
    }
    Ok(())
}

#[test]
fn empty_stream_yields_singletons() -> Result<()> {
    for engine in engines(0x7777, 6) {
        let components = engine.connected_components()?;
        assert_eq!(components.len(), 6);
        for (v, component) in components.iter().enumerate() {
            assert_eq!(component, &vec![v as u32]);
        }
    }
    Ok(())
}

#[test]
fn point_query_along_a_hamiltonian_path() -> Result<()> {
    let n = 34;
    // a path over 0..=31 plus two isolated vertices
    let stream = path_stream(32);
    for engine in engines(0xABCD, n) {
        ingest(&engine, &stream)?;
        assert!(engine.point_query(0, 31)?);
        assert!(!engine.point_query(0, 32)?);
        assert!(!engine.point_query(32, 33)?);
    }
    Ok(())
}

#[test]
fn point_query_agrees_with_components() -> Result<()> {
    let stream = vec![
        GraphUpdate::insert(0, 1),
        GraphUpdate::insert(2, 3),
        GraphUpdate::insert(3, 4),
        GraphUpdate::delete(2, 3),
    ];
    let expected = expected_components(5, &stream);
    for engine in engines(0x1234, 5) {
        ingest(&engine, &stream)?;
        assert_eq!(engine.connected_components()?, expected);
        for a in 0..5u32 {
            for b in 0..5u32 {
                let same = expected.iter().any(|c| c.contains(&a) && c.contains(&b));
                assert_eq!(engine.point_query(a, b)?, same, "({a}, {b})");
            }
        }
    }
    Ok(())
}

#[test]
fn updates_resume_after_a_query() -> Result<()> {
    let engine =
        ConnectivityEngine::new(8, sketch_config(0x5150).with_disable_eager_dsu(true));
    ingest(&engine, &path_stream(8))?;
    assert_eq!(engine.connected_components()?.len(), 1);
    assert!(engine.last_query_rounds() > 0);

    // the update lock is released once the query completes
    engine.update(GraphUpdate::delete(3, 4))?;
    assert_eq!(
        engine.connected_components()?,
        vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7]]
    );
    Ok(())
}

#[test]
fn representatives_track_the_last_query() -> Result<()> {
    let engine = ConnectivityEngine::new(4, sketch_config(0x9898));
    engine.update(GraphUpdate::insert(0, 1))?;
    engine.update(GraphUpdate::insert(2, 3))?;
    let components = engine.connected_components()?;
    let reps = engine.representatives();
    assert_eq!(reps.len(), components.len());
    for rep in reps {
        assert!(components.iter().any(|c| c.contains(&rep)));
    }
    Ok(())
}
