//! Per-node eccentricity, one region per weighting
//!
//! Fixed 5-byte record at `node * 5`: fully-reachable flag u8, eccentricity i32.

use super::region::{DataRegion, Directory};
use crate::error::{PartitionError, Result};
use crate::graph::NodeId;

const RECORD_BYTES: u64 = 5;
const SLOT_NODE_COUNT: usize = 0;

pub fn region_name(weighting: &str) -> String {
    format!("eccentricities_{}", weighting)
}

pub struct EccentricityStorage {
    region: DataRegion,
    node_count: usize,
}

impl EccentricityStorage {
    pub fn new(dir: &Directory, weighting: &str) -> Self {
        Self {
            region: dir.find(&region_name(weighting)),
            node_count: 0,
        }
    }

    pub fn create(&mut self, node_count: usize) -> Result<()> {
        self.region.create(node_count as u64 * RECORD_BYTES)?;
        self.region.set_header(SLOT_NODE_COUNT, node_count as u64);
        self.node_count = node_count;
        Ok(())
    }

    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.region.load_existing()? {
            return Ok(false);
        }
        self.node_count = self.region.header(SLOT_NODE_COUNT) as usize;
        Ok(true)
    }

    pub fn set_eccentricity(&mut self, node: NodeId, eccentricity: i32) -> Result<()> {
        self.check(node)?;
        self.region.set_i32(node as u64 * RECORD_BYTES + 1, eccentricity)
    }

    pub fn eccentricity(&self, node: NodeId) -> Result<i32> {
        self.check(node)?;
        self.region.get_i32(node as u64 * RECORD_BYTES + 1)
    }

    pub fn set_fully_reachable(&mut self, node: NodeId, reachable: bool) -> Result<()> {
        self.check(node)?;
        self.region.set_u8(node as u64 * RECORD_BYTES, reachable as u8)
    }

    pub fn is_fully_reachable(&self, node: NodeId) -> Result<bool> {
        self.check(node)?;
        Ok(self.region.get_u8(node as u64 * RECORD_BYTES)? != 0)
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if (node as usize) < self.node_count {
            return Ok(());
        }
        Err(PartitionError::CorruptRegion {
            region: self.region.name().to_string(),
            reason: format!("node {} outside 0..{}", node, self.node_count),
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_records_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [1; 32]);

        let mut storage = EccentricityStorage::new(&dir, "shortest");
        storage.create(4).unwrap();
        storage.set_eccentricity(2, 1234).unwrap();
        storage.set_fully_reachable(2, true).unwrap();
        storage.set_eccentricity(3, 77).unwrap();
        storage.flush().unwrap();

        let mut loaded = EccentricityStorage::new(&dir, "shortest");
        assert!(loaded.load_existing().unwrap());
        assert_eq!(loaded.eccentricity(2).unwrap(), 1234);
        assert!(loaded.is_fully_reachable(2).unwrap());
        assert_eq!(loaded.eccentricity(3).unwrap(), 77);
        assert!(!loaded.is_fully_reachable(3).unwrap());
        assert_eq!(loaded.eccentricity(0).unwrap(), 0);
        assert!(loaded.eccentricity(4).is_err());
    }
}
