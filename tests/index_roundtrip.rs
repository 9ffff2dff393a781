//! Prepare a cell index, reload it from disk and compare every lookup

use butterfly_cells::graph::NodeId;
use butterfly_cells::prepare::IndexOrigin;
use butterfly_cells::{
    CellIndex, CsrGraph, FastestWeighting, MaxEdgeLengthFilter, PartitionConfig, PartitionError,
    RoadGraph, ShortestWeighting, Weighting,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn perturbed_grid(w: usize, h: usize, seed: u64) -> CsrGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut coords = Vec::with_capacity(w * h);
    let mut edges = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let lat = 50.0 + y as f64 * 0.001 + rng.random_range(-0.0003..0.0003);
            let lon = 4.0 + x as f64 * 0.0015 + rng.random_range(-0.0004..0.0004);
            coords.push((lat, lon));
            let id = (y * w + x) as NodeId;
            if x + 1 < w {
                edges.push((id, id + 1, rng.random_range(80.0..140.0)));
            }
            if y + 1 < h {
                edges.push((id, id + w as NodeId, rng.random_range(80.0..140.0)));
            }
        }
    }
    CsrGraph::from_edges(coords, &edges).unwrap()
}

fn config() -> PartitionConfig {
    PartitionConfig {
        max_cell_nodes: 16,
        min_cell_nodes: 1,
        max_threads: 4,
        super_cell_level: 1,
        ..Default::default()
    }
}

fn prepare(dir: &TempDir, graph: &CsrGraph, config: &PartitionConfig) -> butterfly_cells::Result<CellIndex> {
    let filter = MaxEdgeLengthFilter::new(config.max_edge_length);
    let shortest = ShortestWeighting;
    let fastest = FastestWeighting::default();
    let weightings: [&dyn Weighting; 2] = [&shortest, &fastest];
    CellIndex::load_or_prepare(graph, config, &filter, &weightings, dir.path())
}

#[test]
fn test_reload_matches_prepared_index() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(12, 10, 11);
    let n = g.node_count() as NodeId;

    let prepared = prepare(&tmp, &g, &config()).unwrap();
    assert_eq!(prepared.origin(), IndexOrigin::Prepared);
    for name in ["node_cells", "cells", "border_distances_shortest", "eccentricities_fastest"] {
        assert!(tmp.path().join(format!("{}.bin", name)).exists(), "{} missing", name);
    }

    let cells: Vec<_> = (0..n).map(|v| prepared.cell_id_of(v).unwrap()).collect();
    let border: Vec<_> = (0..n).map(|v| prepared.is_border(v).unwrap()).collect();
    let eccentricities: Vec<_> = (0..n)
        .map(|v| prepared.eccentricity_of(v, "shortest").unwrap())
        .collect();
    let super_cells = prepared.super_cell_ids();
    prepared.close();

    let loaded = prepare(&tmp, &g, &config()).unwrap();
    assert_eq!(loaded.origin(), IndexOrigin::Loaded);
    assert_eq!(loaded.super_cell_ids(), super_cells);
    for v in 0..n {
        assert_eq!(loaded.cell_id_of(v).unwrap(), cells[v as usize]);
        assert_eq!(loaded.is_border(v).unwrap(), border[v as usize]);
        assert_eq!(loaded.eccentricity_of(v, "shortest").unwrap(), eccentricities[v as usize]);
    }

    let mut covered = BTreeSet::new();
    for cell in loaded.cell_ids() {
        for node in loaded.nodes_of_cell(cell).unwrap() {
            assert_eq!(cells[node as usize], cell);
            assert!(covered.insert(node));
        }
        let ring = loaded.contour_of(cell).unwrap();
        assert!(!ring.is_empty());
    }
    assert_eq!(covered.len(), n as usize);
}

#[test]
fn test_border_distances_cover_sibling_border_nodes() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(10, 10, 5);
    let n = g.node_count() as NodeId;
    let index = prepare(&tmp, &g, &config()).unwrap();

    for node in 0..n {
        if !index.is_border(node).unwrap() {
            assert_eq!(index.eccentricity_of(node, "fastest").unwrap(), 0);
            assert!(matches!(
                index.border_distances_from(node, "fastest"),
                Err(PartitionError::UnknownBorderNode(_))
            ));
            continue;
        }

        let cell = index.cell_id_of(node).unwrap();
        let expected: BTreeSet<NodeId> = index
            .nodes_of_cell(cell)
            .unwrap()
            .into_iter()
            .filter(|&v| v != node && index.is_border(v).unwrap())
            .collect();

        let set = index.border_distances_from(node, "shortest").unwrap();
        let got: BTreeSet<NodeId> = set.adjacent_nodes.iter().copied().collect();
        assert_eq!(got, expected);

        // undirected graph: distances agree in both directions
        for (&other, &d) in set.adjacent_nodes.iter().zip(&set.distances) {
            let back = index
                .border_distances_from(other, "shortest")
                .unwrap()
                .distance_to(node)
                .unwrap();
            assert!((d - back).abs() < 1e-6 || (d.is_infinite() && back.is_infinite()));
            if d.is_finite() {
                assert!(index.eccentricity_of(node, "shortest").unwrap() as f64 >= d.floor());
            }
        }
    }
}

#[test]
fn test_changed_config_prepares_again() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(8, 8, 1);

    prepare(&tmp, &g, &config()).unwrap().close();
    let changed = PartitionConfig {
        max_cell_nodes: 10,
        ..config()
    };
    let index = prepare(&tmp, &g, &changed).unwrap();
    assert_eq!(index.origin(), IndexOrigin::Prepared);
    index.close();

    let again = prepare(&tmp, &g, &changed).unwrap();
    assert_eq!(again.origin(), IndexOrigin::Loaded);
}

#[test]
fn test_corrupted_region_is_reported() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(6, 6, 9);
    prepare(&tmp, &g, &config()).unwrap().close();

    let path = tmp.path().join("node_cells.bin");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[130] ^= 0xff;
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        prepare(&tmp, &g, &config()),
        Err(PartitionError::CorruptRegion { .. })
    ));
}

#[test]
fn test_super_cells_partition_their_members() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(12, 12, 21);
    let index = prepare(&tmp, &g, &config()).unwrap();

    let base: BTreeSet<_> = index.cell_ids().into_iter().collect();
    for super_cell in index.super_cell_ids() {
        assert!(!base.contains(&super_cell));
        let members = index.cells_of_super_cell(super_cell).unwrap();
        assert!(!members.is_empty());
        for &cell in members {
            assert!(base.contains(&cell));
            assert_eq!(index.super_cell_of(cell), Some(super_cell));
        }
        assert!(!index.contour_of(super_cell).unwrap().is_empty());
    }
}

#[test]
fn test_super_super_cells_cover_their_super_cells() {
    let tmp = TempDir::new().unwrap();
    let g = perturbed_grid(12, 12, 21);
    prepare(&tmp, &g, &config()).unwrap().close();
    let index = prepare(&tmp, &g, &config()).unwrap();
    assert_eq!(index.origin(), IndexOrigin::Loaded);

    let base: BTreeSet<_> = index.cell_ids().into_iter().collect();
    let supers: BTreeSet<_> = index.super_cell_ids().into_iter().collect();
    let groups = index.super_super_cell_ids();
    assert!(!groups.is_empty());

    for group in groups {
        assert!(!base.contains(&group) && !supers.contains(&group));
        let mut expected = Vec::new();
        for &super_cell in index.super_cells_of_super_super_cell(group).unwrap() {
            assert!(supers.contains(&super_cell));
            assert_eq!(index.super_super_cell_of(super_cell), Some(group));
            expected.extend_from_slice(index.cells_of_super_cell(super_cell).unwrap());
        }
        expected.sort_unstable();
        assert_eq!(index.cells_of_super_super_cell(group).unwrap(), expected);
        assert!(!index.contour_of(group).unwrap().is_empty());
    }
}
