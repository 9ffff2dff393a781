//! Border node → (border node, distance) sets, one region per weighting
//!
//! Pointer table of `(node i32, offset i64)` entries, then per border node a
//! run of `(node i32, distance f64)` pairs closed by a `-1` node id.

use rustc_hash::FxHashMap;

use super::region::{DataRegion, Directory};
use crate::error::{PartitionError, Result};
use crate::graph::NodeId;

const ENTRY_BYTES: u64 = 12;
const PAIR_BYTES: u64 = 12;
const TERMINATOR: i32 = -1;

const SLOT_RESERVED: usize = 0;
const SLOT_STORED: usize = 1;
const SLOT_CURSOR: usize = 2;

pub fn region_name(weighting: &str) -> String {
    format!("border_distances_{}", weighting)
}

/// Distances from one border node to the other border nodes of its cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BorderNodeDistanceSet {
    pub adjacent_nodes: Vec<NodeId>,
    pub distances: Vec<f64>,
}

impl BorderNodeDistanceSet {
    pub fn len(&self) -> usize {
        self.adjacent_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacent_nodes.is_empty()
    }

    pub fn distance_to(&self, node: NodeId) -> Option<f64> {
        self.adjacent_nodes
            .iter()
            .position(|&n| n == node)
            .map(|i| self.distances[i])
    }
}

pub struct BorderNodeDistanceStorage {
    region: DataRegion,
    pointers: FxHashMap<NodeId, u64>,
}

impl BorderNodeDistanceStorage {
    pub fn new(dir: &Directory, weighting: &str) -> Self {
        Self {
            region: dir.find(&region_name(weighting)),
            pointers: FxHashMap::default(),
        }
    }

    /// Start a region with a pointer table for `border_nodes` entries.
    pub fn create(&mut self, border_nodes: usize) -> Result<()> {
        let table = border_nodes as u64 * ENTRY_BYTES;
        self.region.create(table)?;
        self.region.set_header(SLOT_RESERVED, border_nodes as u64);
        self.region.set_header(SLOT_STORED, 0);
        self.region.set_header(SLOT_CURSOR, table);
        Ok(())
    }

    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.region.load_existing()? {
            return Ok(false);
        }
        for i in 0..self.region.header(SLOT_STORED) {
            let entry = i * ENTRY_BYTES;
            let node = self.region.get_i32(entry)? as NodeId;
            let ptr = self.region.get_i64(entry + 4)? as u64;
            self.pointers.insert(node, ptr);
        }
        Ok(true)
    }

    pub fn store_border_node_distance_set(
        &mut self,
        node: NodeId,
        set: &BorderNodeDistanceSet,
    ) -> Result<()> {
        if set.adjacent_nodes.len() != set.distances.len() {
            return Err(PartitionError::LengthMismatch {
                node,
                ids: set.adjacent_nodes.len(),
                distances: set.distances.len(),
            });
        }
        if self.pointers.contains_key(&node) {
            return Err(PartitionError::RegionState {
                region: self.region.name().to_string(),
                reason: format!("border node {} stored twice", node),
            });
        }

        let stored = self.region.header(SLOT_STORED);
        let reserved = self.region.header(SLOT_RESERVED);
        if stored >= reserved {
            return Err(PartitionError::CapacityExhausted {
                region: self.region.name().to_string(),
                requested: stored + 1,
                max: reserved,
            });
        }

        let start = self.region.header(SLOT_CURSOR);
        let mut cursor = start;
        self.region
            .ensure_capacity(start + set.len() as u64 * PAIR_BYTES + 4)?;
        for (&adj, &distance) in set.adjacent_nodes.iter().zip(&set.distances) {
            self.region.set_i32(cursor, adj as i32)?;
            self.region.set_f64(cursor + 4, distance)?;
            cursor += PAIR_BYTES;
        }
        self.region.set_i32(cursor, TERMINATOR)?;
        cursor += 4;

        let entry = stored * ENTRY_BYTES;
        self.region.set_i32(entry, node as i32)?;
        self.region.set_i64(entry + 4, start as i64)?;
        self.region.set_header(SLOT_STORED, stored + 1);
        self.region.set_header(SLOT_CURSOR, cursor);
        self.pointers.insert(node, start);
        Ok(())
    }

    pub fn border_node_distance_set(&self, node: NodeId) -> Result<BorderNodeDistanceSet> {
        let mut pos = *self
            .pointers
            .get(&node)
            .ok_or(PartitionError::UnknownBorderNode(node))?;
        let mut set = BorderNodeDistanceSet::default();
        loop {
            let adj = self.region.get_i32(pos)?;
            if adj == TERMINATOR {
                return Ok(set);
            }
            set.adjacent_nodes.push(adj as NodeId);
            set.distances.push(self.region.get_f64(pos + 4)?);
            pos += PAIR_BYTES;
        }
    }

    pub fn border_node_count(&self) -> usize {
        self.pointers.len()
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
    fn test_sets_roundtrip_per_weighting() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [5; 32]).with_segment_size(16);

        let mut storage = BorderNodeDistanceStorage::new(&dir, "fastest");
        storage.create(2).unwrap();
        let a = BorderNodeDistanceSet {
            adjacent_nodes: vec![7, 9],
            distances: vec![12.5, f64::INFINITY],
        };
        storage.store_border_node_distance_set(3, &a).unwrap();
        storage
            .store_border_node_distance_set(7, &BorderNodeDistanceSet::default())
            .unwrap();
        storage.flush().unwrap();
        storage.close();

        let mut other = BorderNodeDistanceStorage::new(&dir, "shortest");
        assert!(!other.load_existing().unwrap());

        let mut loaded = BorderNodeDistanceStorage::new(&dir, "fastest");
        assert!(loaded.load_existing().unwrap());
        assert_eq!(loaded.border_node_count(), 2);
        assert_eq!(loaded.border_node_distance_set(3).unwrap(), a);
        assert!(loaded.border_node_distance_set(7).unwrap().is_empty());
        assert_eq!(
            loaded.border_node_distance_set(3).unwrap().distance_to(9),
            Some(f64::INFINITY)
        );
        assert!(matches!(
            loaded.border_node_distance_set(4),
            Err(PartitionError::UnknownBorderNode(4))
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [5; 32]);
        let mut storage = BorderNodeDistanceStorage::new(&dir, "shortest");
        storage.create(1).unwrap();

        let bad = BorderNodeDistanceSet {
            adjacent_nodes: vec![1, 2],
            distances: vec![3.0],
        };
        assert!(matches!(
            storage.store_border_node_distance_set(0, &bad),
            Err(PartitionError::LengthMismatch {
                node: 0,
                ids: 2,
                distances: 1
            })
        ));
    }

    #[test]
    fn test_pointer_table_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [5; 32]);
        let mut storage = BorderNodeDistanceStorage::new(&dir, "shortest");
        storage.create(1).unwrap();

        let empty = BorderNodeDistanceSet::default();
        storage.store_border_node_distance_set(0, &empty).unwrap();
        assert!(storage.store_border_node_distance_set(0, &empty).is_err());
        assert!(matches!(
            storage.store_border_node_distance_set(1, &empty),
            Err(PartitionError::CapacityExhausted { .. })
        ));
    }
}
