//! Node → cell assignment assembled from the leaf cells of a partition run

use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::error::{PartitionError, Result};
use crate::graph::{CellId, NodeId, RoadGraph};

const UNASSIGNED: CellId = 0;

/// One terminal cell emitted by a bisection task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub cell_id: CellId,
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    cells: Vec<CellId>,
}

impl PartitionAssignment {
    /// Assemble the assignment, rejecting overlap and gaps.
    pub fn from_cells(node_count: usize, leaves: &[LeafCell]) -> Result<Self> {
        let mut cells = vec![UNASSIGNED; node_count];

        for leaf in leaves {
            if leaf.cell_id == UNASSIGNED {
                return Err(PartitionError::InvalidConfig(
                    "cell id 0 is reserved".to_string(),
                ));
            }
            for &node in &leaf.nodes {
                let slot = cells.get_mut(node as usize).ok_or_else(|| {
                    PartitionError::InvalidConfig(format!(
                        "cell {} references node {} outside 0..{}",
                        leaf.cell_id, node, node_count
                    ))
                })?;
                if *slot != UNASSIGNED {
                    return Err(PartitionError::OverlappingCells {
                        node,
                        first: *slot,
                        second: leaf.cell_id,
                    });
                }
                *slot = leaf.cell_id;
            }
        }

        if let Some(node) = cells.iter().position(|&c| c == UNASSIGNED) {
            return Err(PartitionError::UnassignedNode { node: node as u32 });
        }

        Ok(Self { cells })
    }

    pub fn node_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_id(&self, node: NodeId) -> CellId {
        self.cells[node as usize]
    }

    pub fn cell_ids(&self) -> &[CellId] {
        &self.cells
    }

    /// Members of every cell, cells ascending, nodes ascending
    pub fn nodes_by_cell(&self) -> BTreeMap<CellId, Vec<NodeId>> {
        let mut map: BTreeMap<CellId, Vec<NodeId>> = BTreeMap::new();
        for (node, &cell) in self.cells.iter().enumerate() {
            map.entry(cell).or_default().push(node as NodeId);
        }
        map
    }

    pub fn cell_count(&self) -> usize {
        let mut ids = self.cells.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// A node is a border node iff one of its graph neighbours sits in another cell.
pub fn compute_borderness<G: RoadGraph>(graph: &G, assignment: &PartitionAssignment) -> Vec<bool> {
    let cells = assignment.cell_ids();
    (0..graph.node_count() as NodeId)
        .into_par_iter()
        .map(|node| {
            let own = cells[node as usize];
            graph.edges(node).any(|e| cells[e.adj as usize] != own)
        })
        .collect()
}
