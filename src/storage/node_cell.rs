//! Node → (cell, border flag) index
//!
//! Fixed 5-byte record per node at `node * 5`: border flag u8, cell id u32.

use chrono::{DateTime, Utc};

use super::region::{DataRegion, Directory};
use crate::error::{PartitionError, Result};
use crate::graph::{CellId, NodeId};
use crate::partition::PartitionAssignment;

pub const REGION_NAME: &str = "node_cells";
const RECORD_BYTES: u64 = 5;
const SLOT_NODE_COUNT: usize = 0;

pub struct NodeCellStorage {
    region: DataRegion,
    node_count: usize,
}

impl NodeCellStorage {
    pub fn new(dir: &Directory) -> Self {
        Self {
            region: dir.find(REGION_NAME),
            node_count: 0,
        }
    }

    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.region.load_existing()? {
            return Ok(false);
        }
        self.node_count = self.region.header(SLOT_NODE_COUNT) as usize;
        Ok(true)
    }

    pub fn create(&mut self, node_count: usize) -> Result<()> {
        self.region.create(node_count as u64 * RECORD_BYTES)?;
        self.region.set_header(SLOT_NODE_COUNT, node_count as u64);
        self.node_count = node_count;
        Ok(())
    }

    /// Write the whole assignment and its borderness.
    pub fn store(&mut self, assignment: &PartitionAssignment, borderness: &[bool]) -> Result<()> {
        for (node, (&cell, &border)) in assignment.cell_ids().iter().zip(borderness).enumerate() {
            self.set(node as NodeId, cell, border)?;
        }
        Ok(())
    }

    pub fn set(&mut self, node: NodeId, cell: CellId, border: bool) -> Result<()> {
        self.check(node)?;
        let pos = node as u64 * RECORD_BYTES;
        self.region.set_u8(pos, border as u8)?;
        self.region.set_u32(pos + 1, cell)
    }

    pub fn cell_id(&self, node: NodeId) -> Result<CellId> {
        self.check(node)?;
        self.region.get_u32(node as u64 * RECORD_BYTES + 1)
    }

    pub fn is_border(&self, node: NodeId) -> Result<bool> {
        self.check(node)?;
        Ok(self.region.get_u8(node as u64 * RECORD_BYTES)? != 0)
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if (node as usize) < self.node_count {
            Ok(())
        } else {
            Err(PartitionError::CorruptRegion {
                region: REGION_NAME.to_string(),
                reason: format!("node {} outside 0..{}", node, self.node_count),
            })
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.region.created_at()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.region.flush()
    }

    pub fn close(&mut self) {
        self.region.close()
    }

    pub fn capacity(&self) -> u64 {
        self.region.capacity()
    }
}
