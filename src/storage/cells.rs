///! Cell → (nodes, contour) index
///!
///! Payload layout:
///!   cell table     cell_count x (cell id i32, offset i64)
///!   contour table  3 * cell_count x (cell id i32, offset i64), id 0 = unused
///!   data           node lists (i32 ..., -1)
///!                  contour rings ((lat, lon) as i32 * 1e7 ..., i32::MAX pair)
///!                  super cell block ([super, cell ..., -1] ..., -1)
///!                  super-super cell block ([group, super ..., -1] ..., -1)
///!
///! Reloading only scans the two tables and the two group blocks.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use super::region::{DataRegion, Directory};
use crate::error::{PartitionError, Result};
use crate::graph::{CellId, NodeId};

pub const REGION_NAME: &str = "cells";

const ENTRY_BYTES: u64 = 12;
const TERMINATOR: i32 = -1;
const CONTOUR_END: i32 = i32::MAX;
const FIXED_POINT: f64 = 1e7;

const SLOT_CELL_COUNT: usize = 0;
const SLOT_CONTOUR_COUNT: usize = 1;
const SLOT_CONTOUR_CAPACITY: usize = 2;
const SLOT_SUPER_CELLS: usize = 3;
const SLOT_CONTOURS_PREPARED: usize = 4;
const SLOT_CURSOR: usize = 5;
const SLOT_SUPER_SUPER_CELLS: usize = 6;

pub fn degree_to_fixed(deg: f64) -> i32 {
    (deg * FIXED_POINT).round() as i32
}

pub fn fixed_to_degree(value: i32) -> f64 {
    value as f64 / FIXED_POINT
}

/// One level of cell groups and the reverse member lookup
#[derive(Default)]
struct Groups {
    members: BTreeMap<CellId, Vec<CellId>>,
    group_of: FxHashMap<CellId, CellId>,
}

impl Groups {
    fn insert(&mut self, group: CellId, members: Vec<CellId>) {
        for &cell in &members {
            self.group_of.insert(cell, group);
        }
        self.members.insert(group, members);
    }

    fn members_of(&self, group: CellId) -> Result<&[CellId]> {
        self.members
            .get(&group)
            .map(Vec::as_slice)
            .ok_or(PartitionError::UnknownCell(group))
    }
}

pub struct CellStorage {
    region: DataRegion,
    cell_ptrs: FxHashMap<CellId, u64>,
    contour_slots: FxHashMap<CellId, (u64, u64)>, // cell -> (table entry, ring offset)
    super_cells: Groups,
    super_super_cells: Groups,
}

impl CellStorage {
    pub fn new(dir: &Directory) -> Self {
        Self {
            region: dir.find(REGION_NAME),
            cell_ptrs: FxHashMap::default(),
            contour_slots: FxHashMap::default(),
            super_cells: Groups::default(),
            super_super_cells: Groups::default(),
        }
    }

    fn cell_count(&self) -> u64 {
        self.region.header(SLOT_CELL_COUNT)
    }

    fn contour_table_start(&self) -> u64 {
        self.cell_count() * ENTRY_BYTES
    }

    fn corrupt(reason: String) -> PartitionError {
        PartitionError::CorruptRegion {
            region: REGION_NAME.to_string(),
            reason,
        }
    }

    /// Write the cell table and every node list. The contour table holds base
    /// cells plus both super levels, each at most one entry per base cell.
    pub fn create(&mut self, cells: &BTreeMap<CellId, Vec<NodeId>>) -> Result<()> {
        let cell_count = cells.len() as u64;
        let contour_capacity = cell_count * 3;
        let data_start = (cell_count + contour_capacity) * ENTRY_BYTES;
        let node_bytes: u64 = cells.values().map(|n| (n.len() as u64 + 1) * 4).sum();

        self.region.create(data_start + node_bytes)?;
        self.region.set_header(SLOT_CELL_COUNT, cell_count);
        self.region.set_header(SLOT_CONTOUR_CAPACITY, contour_capacity);

        let mut cursor = data_start;
        for (i, (&cell, nodes)) in cells.iter().enumerate() {
            let entry = i as u64 * ENTRY_BYTES;
            self.region.set_i32(entry, cell as i32)?;
            self.region.set_i64(entry + 4, cursor as i64)?;
            self.cell_ptrs.insert(cell, cursor);

            for &node in nodes {
                self.region.set_i32(cursor, node as i32)?;
                cursor += 4;
            }
            self.region.set_i32(cursor, TERMINATOR)?;
            cursor += 4;
        }
        self.region.set_header(SLOT_CURSOR, cursor);
        Ok(())
    }

    pub fn load_existing(&mut self) -> Result<bool> {
        if !self.region.load_existing()? {
            return Ok(false);
        }

        for i in 0..self.cell_count() {
            let entry = i * ENTRY_BYTES;
            let cell = self.region.get_i32(entry)? as CellId;
            let ptr = self.region.get_i64(entry + 4)? as u64;
            self.cell_ptrs.insert(cell, ptr);
        }

        let table = self.contour_table_start();
        for i in 0..self.region.header(SLOT_CONTOUR_COUNT) {
            let entry = table + i * ENTRY_BYTES;
            let cell = self.region.get_i32(entry)? as CellId;
            let ptr = self.region.get_i64(entry + 4)? as u64;
            self.contour_slots.insert(cell, (entry, ptr));
        }

        self.super_cells = self.read_groups(SLOT_SUPER_CELLS)?;
        self.super_super_cells = self.read_groups(SLOT_SUPER_SUPER_CELLS)?;
        Ok(true)
    }

    fn read_groups(&self, slot: usize) -> Result<Groups> {
        let mut groups = Groups::default();
        let mut pos = self.region.header(slot);
        if pos == 0 {
            return Ok(groups);
        }
        loop {
            let group = self.region.get_i32(pos)?;
            pos += 4;
            if group == TERMINATOR {
                return Ok(groups);
            }
            let mut members = Vec::new();
            loop {
                let cell = self.region.get_i32(pos)?;
                pos += 4;
                if cell == TERMINATOR {
                    break;
                }
                members.push(cell as CellId);
            }
            groups.insert(group as CellId, members);
        }
    }

    /// Stored cell ids, ascending
    pub fn cell_ids(&self) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self.cell_ptrs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn nodes_of_cell(&self, cell: CellId) -> Result<Vec<NodeId>> {
        let mut pos = *self
            .cell_ptrs
            .get(&cell)
            .ok_or(PartitionError::UnknownCell(cell))?;
        let mut nodes = Vec::new();
        loop {
            let node = self.region.get_i32(pos)?;
            if node == TERMINATOR {
                return Ok(nodes);
            }
            if node < 0 {
                return Err(Self::corrupt(format!("negative node id in cell {}", cell)));
            }
            nodes.push(node as NodeId);
            pos += 4;
        }
    }

    /// Append the contour ring of `cell` (base or super cell).
    pub fn set_cell_contour(&mut self, cell: CellId, ring: &[(f64, f64)]) -> Result<()> {
        let entry = match self.contour_slots.get(&cell) {
            Some(&(entry, _)) => entry,
            None => {
                let count = self.region.header(SLOT_CONTOUR_COUNT);
                let capacity = self.region.header(SLOT_CONTOUR_CAPACITY);
                if count >= capacity {
                    return Err(PartitionError::CapacityExhausted {
                        region: REGION_NAME.to_string(),
                        requested: count + 1,
                        max: capacity,
                    });
                }
                self.region.set_header(SLOT_CONTOUR_COUNT, count + 1);
                self.contour_table_start() + count * ENTRY_BYTES
            }
        };

        let start = self.region.header(SLOT_CURSOR);
        let mut cursor = start;
        self.region
            .ensure_capacity(start + (ring.len() as u64 + 1) * 8)?;
        for &(lat, lon) in ring {
            self.region.set_i32(cursor, degree_to_fixed(lat))?;
            self.region.set_i32(cursor + 4, degree_to_fixed(lon))?;
            cursor += 8;
        }
        self.region.set_i32(cursor, CONTOUR_END)?;
        self.region.set_i32(cursor + 4, CONTOUR_END)?;
        cursor += 8;

        self.region.set_i32(entry, cell as i32)?;
        self.region.set_i64(entry + 4, start as i64)?;
        self.region.set_header(SLOT_CURSOR, cursor);
        self.contour_slots.insert(cell, (entry, start));
        Ok(())
    }

    pub fn contour_of(&self, cell: CellId) -> Result<Vec<(f64, f64)>> {
        let &(_, mut pos) = self
            .contour_slots
            .get(&cell)
            .ok_or(PartitionError::UnknownCell(cell))?;
        let mut ring = Vec::new();
        loop {
            let lat = self.region.get_i32(pos)?;
            let lon = self.region.get_i32(pos + 4)?;
            if lat == CONTOUR_END && lon == CONTOUR_END {
                return Ok(ring);
            }
            ring.push((fixed_to_degree(lat), fixed_to_degree(lon)));
            pos += 8;
        }
    }

    /// Flag the contour table as complete.
    pub fn mark_contours_prepared(&mut self) {
        self.region.set_header(SLOT_CONTOURS_PREPARED, 1);
    }

    pub fn contours_prepared(&self) -> bool {
        self.region.header(SLOT_CONTOURS_PREPARED) != 0
    }

    fn write_groups(
        &mut self,
        slot: usize,
        groups: &BTreeMap<CellId, Vec<CellId>>,
        what: &str,
    ) -> Result<Groups> {
        if self.region.header(slot) != 0 {
            return Err(PartitionError::RegionState {
                region: REGION_NAME.to_string(),
                reason: format!("{} already stored", what),
            });
        }

        let start = self.region.header(SLOT_CURSOR);
        let mut cursor = start;
        let mut written = Groups::default();
        for (&group, members) in groups {
            self.region.set_i32(cursor, group as i32)?;
            cursor += 4;
            for &cell in members {
                self.region.set_i32(cursor, cell as i32)?;
                cursor += 4;
            }
            self.region.set_i32(cursor, TERMINATOR)?;
            cursor += 4;
            written.insert(group, members.clone());
        }
        self.region.set_i32(cursor, TERMINATOR)?;
        cursor += 4;

        self.region.set_header(slot, start);
        self.region.set_header(SLOT_CURSOR, cursor);
        Ok(written)
    }

    /// Append the super cell block (super cell -> base cells). Written once.
    pub fn store_super_cells(&mut self, super_cells: &BTreeMap<CellId, Vec<CellId>>) -> Result<()> {
        self.super_cells = self.write_groups(SLOT_SUPER_CELLS, super_cells, "super cells")?;
        Ok(())
    }

    /// Append the super-super cell block (group -> super cells). Written once.
    pub fn store_super_super_cells(
        &mut self,
        super_super_cells: &BTreeMap<CellId, Vec<CellId>>,
    ) -> Result<()> {
        self.super_super_cells =
            self.write_groups(SLOT_SUPER_SUPER_CELLS, super_super_cells, "super-super cells")?;
        Ok(())
    }

    pub fn super_cell_ids(&self) -> Vec<CellId> {
        self.super_cells.members.keys().copied().collect()
    }

    pub fn cells_of_super_cell(&self, super_cell: CellId) -> Result<&[CellId]> {
        self.super_cells.members_of(super_cell)
    }

    pub fn super_cell_of(&self, cell: CellId) -> Option<CellId> {
        self.super_cells.group_of.get(&cell).copied()
    }

    pub fn super_super_cell_ids(&self) -> Vec<CellId> {
        self.super_super_cells.members.keys().copied().collect()
    }

    pub fn super_cells_of_super_super_cell(&self, group: CellId) -> Result<&[CellId]> {
        self.super_super_cells.members_of(group)
    }

    pub fn super_super_cell_of(&self, super_cell: CellId) -> Option<CellId> {
        self.super_super_cells.group_of.get(&super_cell).copied()
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

    fn sample_cells() -> BTreeMap<CellId, Vec<NodeId>> {
        let mut cells = BTreeMap::new();
        cells.insert(4, vec![0, 3, 5]);
        cells.insert(5, vec![1]);
        cells.insert(3, vec![2, 4]);
        cells
    }

    #[test]
    fn test_nodes_contours_and_super_cells_survive_reload() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [9; 32]).with_segment_size(32);

        let mut storage = CellStorage::new(&dir);
        storage.create(&sample_cells()).unwrap();
        let ring = vec![(50.1234567, 4.7654321), (50.2, 4.8), (50.15, 4.9)];
        storage.set_cell_contour(4, &ring).unwrap();
        storage.set_cell_contour(3, &[(1.0, 2.0)]).unwrap();
        storage.mark_contours_prepared();

        let mut supers = BTreeMap::new();
        supers.insert(1, vec![4, 5]);
        storage.store_super_cells(&supers).unwrap();
        storage.set_cell_contour(1, &[(0.5, 0.5), (0.6, 0.6)]).unwrap();
        storage.flush().unwrap();
        storage.close();

        let mut loaded = CellStorage::new(&dir);
        assert!(loaded.load_existing().unwrap());
        assert_eq!(loaded.cell_ids(), vec![3, 4, 5]);
        assert_eq!(loaded.nodes_of_cell(4).unwrap(), vec![0, 3, 5]);
        assert_eq!(loaded.nodes_of_cell(5).unwrap(), vec![1]);
        assert!(loaded.contours_prepared());

        let back = loaded.contour_of(4).unwrap();
        assert_eq!(back.len(), 3);
        for (a, b) in back.iter().zip(&ring) {
            assert!((a.0 - b.0).abs() < 1e-7 && (a.1 - b.1).abs() < 1e-7);
        }
        assert_eq!(loaded.contour_of(1).unwrap().len(), 2);

        assert_eq!(loaded.cells_of_super_cell(1).unwrap(), &[4, 5]);
        assert_eq!(loaded.super_cell_of(5), Some(1));
        assert_eq!(loaded.super_cell_of(3), None);
        assert!(loaded.super_super_cell_ids().is_empty());
    }

    #[test]
    fn test_super_super_block_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [3; 32]);
        let mut cells = BTreeMap::new();
        for cell in 16..24 {
            cells.insert(cell, vec![cell - 16]);
        }

        let mut storage = CellStorage::new(&dir);
        storage.create(&cells).unwrap();
        let mut supers = BTreeMap::new();
        supers.insert(4, vec![16, 17, 18, 19]);
        supers.insert(5, vec![20, 21, 22, 23]);
        storage.store_super_cells(&supers).unwrap();
        let mut groups = BTreeMap::new();
        groups.insert(1, vec![4, 5]);
        storage.store_super_super_cells(&groups).unwrap();
        assert!(matches!(
            storage.store_super_super_cells(&groups),
            Err(PartitionError::RegionState { .. })
        ));
        storage.set_cell_contour(1, &[(0.5, 0.5)]).unwrap();
        storage.mark_contours_prepared();
        storage.flush().unwrap();
        storage.close();

        let mut loaded = CellStorage::new(&dir);
        assert!(loaded.load_existing().unwrap());
        assert_eq!(loaded.super_cell_ids(), vec![4, 5]);
        assert_eq!(loaded.super_super_cell_ids(), vec![1]);
        assert_eq!(loaded.super_cells_of_super_super_cell(1).unwrap(), &[4, 5]);
        assert_eq!(loaded.super_super_cell_of(5), Some(1));
        assert_eq!(loaded.super_cell_of(21), Some(5));
        assert!(matches!(
            loaded.super_cells_of_super_super_cell(4),
            Err(PartitionError::UnknownCell(4))
        ));
        assert_eq!(loaded.contour_of(1).unwrap(), vec![(0.5, 0.5)]);
    }

    #[test]
    fn test_unknown_cell() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [9; 32]);
        let mut storage = CellStorage::new(&dir);
        storage.create(&sample_cells()).unwrap();

        assert!(matches!(
            storage.nodes_of_cell(99),
            Err(PartitionError::UnknownCell(99))
        ));
        assert!(matches!(
            storage.contour_of(4),
            Err(PartitionError::UnknownCell(4))
        ));
    }

    #[test]
    fn test_contour_table_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let dir = Directory::new(tmp.path(), [9; 32]);
        let mut cells = BTreeMap::new();
        cells.insert(1, vec![0]);
        let mut storage = CellStorage::new(&dir);
        storage.create(&cells).unwrap();

        storage.set_cell_contour(1, &[(0.0, 0.0)]).unwrap();
        storage.set_cell_contour(2, &[(0.0, 0.0)]).unwrap();
        storage.set_cell_contour(3, &[(0.0, 0.0)]).unwrap();
        // Rewriting an existing contour reuses its entry
        storage.set_cell_contour(1, &[(1.0, 1.0)]).unwrap();
        assert!(matches!(
            storage.set_cell_contour(4, &[(0.0, 0.0)]),
            Err(PartitionError::CapacityExhausted { .. })
        ));
        assert_eq!(storage.contour_of(1).unwrap(), vec![(1.0, 1.0)]);
    }
}
