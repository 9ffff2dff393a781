//! Cell contours and the two super cell levels
//!
//! Base cell contours are concave hulls over node coordinates buffered by
//! [`BUFFER_DEGREES`]. Super cells group base cells under a shared ancestor id,
//! super-super cells group super cells the same way one level further up. Both
//! take their contour from the hull over the contours of their base cells.

use geo::{ConcaveHull, Coord, MultiPoint, Polygon};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::{CellId, NodeId, RoadGraph};

/// Offset (degrees) added to both axes of every node, in both directions
pub const BUFFER_DEGREES: f64 = 0.0003;

/// Concave hull ring of (lat, lon) points. Fewer than three distinct points
/// are returned as they are.
pub fn hull_ring(points: &[(f64, f64)], concavity: f64) -> Vec<(f64, f64)> {
    let mut distinct = points.to_vec();
    distinct.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    distinct.dedup();

    if distinct.len() < 3 {
        return distinct;
    }

    let multi_point: MultiPoint<f64> = distinct
        .iter()
        .map(|&(lat, lon)| Coord { x: lon, y: lat })
        .collect();
    let hull: Polygon<f64> = multi_point.concave_hull(concavity);
    hull.exterior().0.iter().map(|c| (c.y, c.x)).collect()
}

fn buffered(points: impl Iterator<Item = (f64, f64)>) -> Vec<(f64, f64)> {
    points
        .flat_map(|(lat, lon)| {
            [
                (lat + BUFFER_DEGREES, lon + BUFFER_DEGREES),
                (lat - BUFFER_DEGREES, lon - BUFFER_DEGREES),
            ]
        })
        .collect()
}

/// Contour of every cell from its buffered node coordinates.
pub fn cell_contours<G: RoadGraph>(
    graph: &G,
    cells: &BTreeMap<CellId, Vec<NodeId>>,
    concavity: f64,
) -> BTreeMap<CellId, Vec<(f64, f64)>> {
    cells
        .par_iter()
        .map(|(&cell, nodes)| {
            let points = buffered(nodes.iter().map(|&n| graph.coordinate(n)));
            (cell, hull_ring(&points, concavity))
        })
        .collect()
}

/// Group `ids` under their ancestor `id >> level`, skipping ancestors in `taken`.
fn group_by_ancestor(
    ids: &BTreeSet<CellId>,
    level: u32,
    taken: &BTreeSet<CellId>,
) -> BTreeMap<CellId, Vec<CellId>> {
    let mut groups: BTreeMap<CellId, Vec<CellId>> = BTreeMap::new();
    for &cell in ids {
        let mut shift = level.min(31);
        while shift > 0 && (cell >> shift) == 0 {
            shift -= 1;
        }
        if shift == 0 {
            continue;
        }
        let ancestor = cell >> shift;
        if taken.contains(&ancestor) {
            continue;
        }
        groups.entry(ancestor).or_default().push(cell);
    }
    groups
}

/// Group base cells under their ancestor `cell >> level`.
///
/// The level shrinks for cells too shallow to have such an ancestor. Cells
/// whose ancestor id is itself a stored cell are left out, so super cell ids
/// never collide with base cell ids.
pub fn identify_super_cells(cell_ids: &[CellId], level: u32) -> BTreeMap<CellId, Vec<CellId>> {
    let stored: BTreeSet<CellId> = cell_ids.iter().copied().collect();
    group_by_ancestor(&stored, level, &stored)
}

/// Group super cells under their ancestor `super_cell >> level`. Ancestors
/// already used as a base or super cell id are left out.
pub fn identify_super_super_cells(
    super_cells: &BTreeMap<CellId, Vec<CellId>>,
    cell_ids: &[CellId],
    level: u32,
) -> BTreeMap<CellId, Vec<CellId>> {
    let supers: BTreeSet<CellId> = super_cells.keys().copied().collect();
    let mut taken: BTreeSet<CellId> = cell_ids.iter().copied().collect();
    taken.extend(&supers);
    group_by_ancestor(&supers, level, &taken)
}

/// Base cells below every super-super cell, ascending.
pub fn base_cells_of_super_super_cells(
    super_super_cells: &BTreeMap<CellId, Vec<CellId>>,
    super_cells: &BTreeMap<CellId, Vec<CellId>>,
) -> BTreeMap<CellId, Vec<CellId>> {
    super_super_cells
        .iter()
        .map(|(&group, members)| {
            let base: BTreeSet<CellId> = members
                .iter()
                .filter_map(|s| super_cells.get(s))
                .flatten()
                .copied()
                .collect();
            (group, base.into_iter().collect())
        })
        .collect()
}

/// Hull over the contour points of each group's base cells.
pub fn super_cell_contours(
    groups: &BTreeMap<CellId, Vec<CellId>>,
    contours: &BTreeMap<CellId, Vec<(f64, f64)>>,
    concavity: f64,
) -> BTreeMap<CellId, Vec<(f64, f64)>> {
    groups
        .par_iter()
        .map(|(&group, members)| {
            let points: Vec<(f64, f64)> = members
                .iter()
                .filter_map(|cell| contours.get(cell))
                .flatten()
                .copied()
                .collect();
            (group, hull_ring(&points, concavity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CsrGraph;

    #[test]
    fn test_hull_drops_interior_points() {
        let points = [
            (0.0, 0.0),
            (0.0, 1.0),
            (1.0, 1.0),
            (1.0, 0.0),
            (0.5, 0.5),
        ];
        let ring = hull_ring(&points, 2.0);
        assert!(!ring.contains(&(0.5, 0.5)));
        // closed ring: four corners plus the repeated start
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_hull_follows_point_near_corner() {
        // (8, 1) sits inside the square but close to its (10, 0) corner
        let points = [
            (0.0, 0.0),
            (0.0, 10.0),
            (10.0, 10.0),
            (10.0, 0.0),
            (8.0, 1.0),
        ];
        let ring = hull_ring(&points, 2.0);
        assert!(ring.contains(&(8.0, 1.0)));
        assert_eq!(ring.len(), 6);
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn test_degenerate_cells_keep_points() {
        assert_eq!(hull_ring(&[(1.0, 2.0), (1.0, 2.0)], 2.0), vec![(1.0, 2.0)]);
        assert_eq!(hull_ring(&[], 2.0), Vec::<(f64, f64)>::new());
    }

    #[test]
    fn test_contours_are_buffered() {
        let g = CsrGraph::from_edges(
            vec![(50.0, 4.0), (50.0, 4.01), (50.01, 4.0)],
            &[(0, 1, 700.0), (0, 2, 1100.0)],
        )
        .unwrap();
        let mut cells = BTreeMap::new();
        cells.insert(2, vec![0, 1, 2]);
        cells.insert(3, vec![1]);

        let contours = cell_contours(&g, &cells, 2.0);
        let ring = &contours[&2];
        let min_lat = ring.iter().map(|p| p.0).fold(f64::MAX, f64::min);
        let max_lat = ring.iter().map(|p| p.0).fold(f64::MIN, f64::max);
        let min_lon = ring.iter().map(|p| p.1).fold(f64::MAX, f64::min);
        assert!((min_lat - (50.0 - BUFFER_DEGREES)).abs() < 1e-9);
        assert!((max_lat - (50.01 + BUFFER_DEGREES)).abs() < 1e-9);
        assert!((min_lon - (4.0 - BUFFER_DEGREES)).abs() < 1e-9);

        // a single node keeps its two buffered corners
        assert_eq!(contours[&3].len(), 2);
    }

    #[test]
    fn test_super_cells_group_by_ancestor() {
        // Leaves of a depth-3 tree plus one shallow leaf
        let cells = [8, 9, 10, 11, 12, 13, 3];
        let groups = identify_super_cells(&cells, 2);
        assert_eq!(groups[&2], vec![8, 9, 10, 11]);
        // 12 >> 2 == 3 is a stored cell
        assert!(!groups.contains_key(&3));
        // 3 >> 2 == 0, so level drops to 1
        assert_eq!(groups[&1], vec![3]);
    }

    #[test]
    fn test_root_only_has_no_super_cell() {
        assert!(identify_super_cells(&[1], 2).is_empty());
    }

    #[test]
    fn test_super_super_cells_collect_base_cells() {
        // sixteen leaves at depth 4
        let cells: Vec<CellId> = (16..32).collect();
        let supers = identify_super_cells(&cells, 2);
        assert_eq!(supers.keys().copied().collect::<Vec<_>>(), vec![4, 5, 6, 7]);

        let super_supers = identify_super_super_cells(&supers, &cells, 2);
        assert_eq!(super_supers.len(), 1);
        assert_eq!(super_supers[&1], vec![4, 5, 6, 7]);

        let base = base_cells_of_super_super_cells(&super_supers, &supers);
        assert_eq!(base[&1], cells);
    }

    #[test]
    fn test_super_super_ids_avoid_used_ids() {
        let mut supers = BTreeMap::new();
        supers.insert(8, vec![32, 33]);
        supers.insert(12, vec![48, 49]);
        // 8 >> 2 == 2 is a base cell, 12 >> 2 == 3 is free
        let groups = identify_super_super_cells(&supers, &[2, 32, 33, 48, 49], 2);
        assert_eq!(groups.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(groups[&3], vec![12]);
    }

    #[test]
    fn test_group_contour_covers_member_contours() {
        let mut contours = BTreeMap::new();
        contours.insert(4, vec![(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (0.0, 0.0)]);
        contours.insert(5, vec![(2.0, 2.0), (2.0, 3.0), (3.0, 2.0), (2.0, 2.0)]);
        let mut groups = BTreeMap::new();
        groups.insert(1, vec![4, 5, 9]);

        let ring = &super_cell_contours(&groups, &contours, 2.0)[&1];
        assert!(ring.contains(&(0.0, 0.0)));
        assert!(ring.contains(&(3.0, 2.0)));
        assert_eq!(ring.first(), ring.last());
    }
}
