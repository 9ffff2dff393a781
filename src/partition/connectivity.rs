//! Connectivity repair for terminal cells
//!
//! A min-cut side is not necessarily connected. Before a side is stored as a
//! leaf it is split into its connected fragments (over accepted edges only).

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::debug;

use crate::graph::{CellId, EdgeFilter, NodeId, RoadGraph};

/// Split `nodes` into connected fragments of the induced subgraph.
///
/// BFS starts from the smallest unvisited node. Once `max_fragments` fragments
/// exist, every remaining node is folded into the last one.
pub fn split_disconnected<G, F>(
    graph: &G,
    filter: &F,
    nodes: &[NodeId],
    max_fragments: usize,
) -> Vec<Vec<NodeId>>
where
    G: RoadGraph,
    F: EdgeFilter + ?Sized,
{
    let max_fragments = max_fragments.max(1);
    let members: FxHashSet<NodeId> = nodes.iter().copied().collect();
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();

    let mut sorted = nodes.to_vec();
    sorted.sort_unstable();

    let mut fragments: Vec<Vec<NodeId>> = Vec::new();
    let mut queue = VecDeque::new();

    for (pos, &start) in sorted.iter().enumerate() {
        if visited.contains(&start) {
            continue;
        }

        if fragments.len() == max_fragments {
            let rest: Vec<NodeId> = sorted[pos..]
                .iter()
                .copied()
                .filter(|n| !visited.contains(n))
                .collect();
            debug!(
                folded = rest.len(),
                max_fragments, "fragment cap reached, folding remaining nodes"
            );
            if let Some(last) = fragments.last_mut() {
                last.extend(rest);
            }
            break;
        }

        let mut fragment = Vec::new();
        visited.insert(start);
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            fragment.push(node);
            for edge in graph.edges(node) {
                if !filter.accept(&edge) {
                    continue;
                }
                let next = edge.adj;
                if members.contains(&next) && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        fragments.push(fragment);
    }

    fragments
}

/// Name fragments of `cell_id`: the first keeps the id, the following ones
/// take `2c, 2c+1, 4c, 4c+1, ...`.
pub fn assign_fragment_ids(
    cell_id: CellId,
    fragments: Vec<Vec<NodeId>>,
) -> Vec<(CellId, Vec<NodeId>)> {
    fragments
        .into_iter()
        .enumerate()
        .map(|(i, fragment)| (fragment_id(cell_id, i), fragment))
        .collect()
}

fn fragment_id(cell_id: CellId, index: usize) -> CellId {
    if index == 0 {
        return cell_id;
    }
    let shift = (index + 1) / 2;
    (cell_id << shift) | ((index + 1) % 2) as CellId
}
