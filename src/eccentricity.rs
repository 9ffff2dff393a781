//! Intra-cell distance passes over border nodes
//!
//! For every border node a Dijkstra restricted to the node's cell yields both
//! the distances to the other border nodes of the cell and the node's
//! eccentricity (largest settled distance).

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use crate::graph::{CellId, EdgeFilter, NodeId, RoadGraph};
use crate::partition::PartitionAssignment;
use crate::storage::BorderNodeDistanceSet;
use crate::weighting::Weighting;

/// Share of the cell that must be settled for a node to count as fully reachable
pub const FULLY_REACHABLE_FRACTION: f64 = 0.995;

#[derive(Clone, Copy, Debug)]
struct State {
    node: NodeId,
    cost: f64,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for State {}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

/// Settled distances from `source` without leaving its cell.
pub fn cell_dijkstra<G, F>(
    graph: &G,
    filter: &F,
    weighting: &dyn Weighting,
    cells: &[CellId],
    source: NodeId,
) -> FxHashMap<NodeId, f64>
where
    G: RoadGraph,
    F: EdgeFilter + ?Sized,
{
    let cell = cells[source as usize];
    let mut settled: FxHashMap<NodeId, f64> = FxHashMap::default();
    let mut best: FxHashMap<NodeId, f64> = FxHashMap::default();
    let mut heap = BinaryHeap::new();

    best.insert(source, 0.0);
    heap.push(State {
        node: source,
        cost: 0.0,
    });

    while let Some(State { node, cost }) = heap.pop() {
        if settled.contains_key(&node) {
            continue;
        }
        settled.insert(node, cost);

        for edge in graph.edges(node) {
            if cells[edge.adj as usize] != cell || !filter.accept(&edge) {
                continue;
            }
            if settled.contains_key(&edge.adj) {
                continue;
            }
            let weight = weighting.calc_weight(&edge);
            if !weight.is_finite() {
                continue;
            }
            let next = cost + weight;
            if best.get(&edge.adj).map_or(true, |&d| next < d) {
                best.insert(edge.adj, next);
                heap.push(State {
                    node: edge.adj,
                    cost: next,
                });
            }
        }
    }
    settled
}

/// Distance pass result for one border node
#[derive(Debug, Clone, PartialEq)]
pub struct BorderSummary {
    pub node: NodeId,
    pub distances: BorderNodeDistanceSet,
    /// Ceiling of the largest settled distance
    pub eccentricity: i32,
    pub fully_reachable: bool,
}

/// Run the restricted Dijkstra from every border node, in parallel.
///
/// Results are ordered by node id.
pub fn summarize_border_nodes<G, F>(
    graph: &G,
    filter: &F,
    weighting: &dyn Weighting,
    assignment: &PartitionAssignment,
    borderness: &[bool],
) -> Vec<BorderSummary>
where
    G: RoadGraph,
    F: EdgeFilter + ?Sized,
{
    let cells = assignment.cell_ids();
    let cell_sizes: FxHashMap<CellId, usize> =
        assignment.nodes_by_cell().into_iter().map(|(c, n)| (c, n.len())).collect();

    let mut border_by_cell: BTreeMap<CellId, Vec<NodeId>> = BTreeMap::new();
    for (node, &is_border) in borderness.iter().enumerate() {
        if is_border {
            border_by_cell
                .entry(cells[node])
                .or_default()
                .push(node as NodeId);
        }
    }

    let border_nodes: Vec<NodeId> = border_by_cell.values().flatten().copied().collect();

    let mut summaries: Vec<BorderSummary> = border_nodes
        .par_iter()
        .map(|&node| {
            let cell = cells[node as usize];
            let settled = cell_dijkstra(graph, filter, weighting, cells, node);

            let mut distances = BorderNodeDistanceSet::default();
            for &other in &border_by_cell[&cell] {
                if other == node {
                    continue;
                }
                distances.adjacent_nodes.push(other);
                distances
                    .distances
                    .push(settled.get(&other).copied().unwrap_or(f64::INFINITY));
            }

            let max_distance = settled.values().copied().fold(0.0f64, f64::max);
            let cell_size = cell_sizes.get(&cell).copied().unwrap_or(1);
            let fully_reachable =
                settled.len() as f64 >= FULLY_REACHABLE_FRACTION * cell_size as f64;

            BorderSummary {
                node,
                distances,
                eccentricity: max_distance.ceil() as i32,
                fully_reachable,
            }
        })
        .collect();

    summaries.sort_by_key(|s| s.node);
    summaries
}
