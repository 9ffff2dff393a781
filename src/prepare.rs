//! Preparation pipeline and read-side index
//!
//! [`CellIndex::load_or_prepare`] reuses the regions on disk when all of them
//! exist with the current cache key. Otherwise it runs partition, node/cell
//! index, contours, both super cell levels and the per-weighting distance
//! passes, then flushes every region.
//!
//! The cache key covers [`PartitionConfig`] only. The caller's edge filter is
//! always combined with `max_edge_length`; a filter that rejects more than
//! that must be named in `PartitionConfig::edge_filter`.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PartitionConfig;
use crate::contour::{
    base_cells_of_super_super_cells, cell_contours, identify_super_cells,
    identify_super_super_cells, super_cell_contours,
};
use crate::eccentricity::summarize_border_nodes;
use crate::error::{PartitionError, Result};
use crate::graph::{CellId, EdgeFilter, NodeId, RoadGraph};
use crate::partition::{compute_borderness, InertialFlow};
use crate::storage::{
    BorderNodeDistanceSet, BorderNodeDistanceStorage, CellStorage, Directory,
    EccentricityStorage, NodeCellStorage,
};
use crate::weighting::Weighting;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrigin {
    Loaded,
    Prepared,
}

struct WeightingIndex {
    name: String,
    borders: BorderNodeDistanceStorage,
    eccentricities: EccentricityStorage,
}

pub struct CellIndex {
    node_cells: NodeCellStorage,
    cells: CellStorage,
    weightings: Vec<WeightingIndex>,
    origin: IndexOrigin,
}

impl CellIndex {
    pub fn load_or_prepare<G, F, P>(
        graph: &G,
        config: &PartitionConfig,
        filter: &F,
        weightings: &[&dyn Weighting],
        dir: P,
    ) -> Result<Self>
    where
        G: RoadGraph,
        F: EdgeFilter + ?Sized,
        P: AsRef<Path>,
    {
        config.validate()?;
        check_weighting_names(weightings)?;

        let key = config.cache_key()?;
        let directory = Directory::new(dir, key);
        info!(
            dir = %directory.root().display(),
            cache_key = %hex::encode(&key[..8]),
            weightings = weightings.len(),
            "opening cell index"
        );

        let names: Vec<&str> = weightings.iter().map(|w| w.name()).collect();
        if let Some(index) = Self::load(&directory, &names)? {
            if index.node_count() == graph.node_count() {
                info!(
                    nodes = index.node_count(),
                    cells = index.cell_ids().len(),
                    "loaded prepared cell index"
                );
                return Ok(index);
            }
            warn!(
                stored = index.node_count(),
                graph = graph.node_count(),
                "stored index was built for another graph, preparing again"
            );
        }

        Self::prepare(graph, config, filter, weightings, &directory)
    }

    /// Open existing regions; `None` if any is absent or stale.
    pub fn load(directory: &Directory, weightings: &[&str]) -> Result<Option<Self>> {
        let mut node_cells = NodeCellStorage::new(directory);
        if !node_cells.load_existing()? {
            return Ok(None);
        }
        let mut cells = CellStorage::new(directory);
        if !cells.load_existing()? || !cells.contours_prepared() {
            return Ok(None);
        }

        let mut indexes = Vec::with_capacity(weightings.len());
        for &name in weightings {
            let mut borders = BorderNodeDistanceStorage::new(directory, name);
            let mut eccentricities = EccentricityStorage::new(directory, name);
            if !borders.load_existing()? || !eccentricities.load_existing()? {
                debug!(weighting = name, "distance regions missing");
                return Ok(None);
            }
            indexes.push(WeightingIndex {
                name: name.to_string(),
                borders,
                eccentricities,
            });
        }

        Ok(Some(Self {
            node_cells,
            cells,
            weightings: indexes,
            origin: IndexOrigin::Loaded,
        }))
    }

    fn prepare<G, F>(
        graph: &G,
        config: &PartitionConfig,
        filter: &F,
        weightings: &[&dyn Weighting],
        directory: &Directory,
    ) -> Result<Self>
    where
        G: RoadGraph,
        F: EdgeFilter + ?Sized,
    {
        let started = Instant::now();
        let n = graph.node_count();

        let flow = InertialFlow::new(graph, filter, config.clone());
        let assignment = flow.partition()?;
        let borderness = compute_borderness(graph, &assignment);
        let members = assignment.nodes_by_cell();
        let border_count = borderness.iter().filter(|&&b| b).count();
        info!(
            cells = members.len(),
            border_nodes = border_count,
            "partition assigned"
        );

        let mut node_cells = NodeCellStorage::new(directory);
        node_cells.create(n)?;
        node_cells.store(&assignment, &borderness)?;

        let mut cells = CellStorage::new(directory);
        cells.create(&members)?;

        let concavity = config.contour_concavity;
        let contours = cell_contours(graph, &members, concavity);
        for (&cell, ring) in &contours {
            cells.set_cell_contour(cell, ring)?;
        }

        let cell_ids = cells.cell_ids();
        let super_cells = identify_super_cells(&cell_ids, config.super_cell_level);
        let super_super_cells =
            identify_super_super_cells(&super_cells, &cell_ids, config.super_super_cell_level);
        cells.store_super_cells(&super_cells)?;
        cells.store_super_super_cells(&super_super_cells)?;

        let mut groups = base_cells_of_super_super_cells(&super_super_cells, &super_cells);
        groups.extend(super_cells.iter().map(|(&id, members)| (id, members.clone())));
        for (group, ring) in super_cell_contours(&groups, &contours, concavity) {
            cells.set_cell_contour(group, &ring)?;
        }
        cells.mark_contours_prepared();
        info!(
            contours = contours.len(),
            super_cells = super_cells.len(),
            super_super_cells = super_super_cells.len(),
            "contours stored"
        );

        let mut indexes = Vec::with_capacity(weightings.len());
        for weighting in weightings {
            let pass_started = Instant::now();
            let summaries = summarize_border_nodes(
                graph,
                flow.filter(),
                *weighting,
                &assignment,
                &borderness,
            );

            let mut borders = BorderNodeDistanceStorage::new(directory, weighting.name());
            borders.create(summaries.len())?;
            let mut eccentricities = EccentricityStorage::new(directory, weighting.name());
            eccentricities.create(n)?;

            let mut fully_reachable = 0usize;
            for summary in &summaries {
                borders.store_border_node_distance_set(summary.node, &summary.distances)?;
                eccentricities.set_eccentricity(summary.node, summary.eccentricity)?;
                eccentricities.set_fully_reachable(summary.node, summary.fully_reachable)?;
                fully_reachable += summary.fully_reachable as usize;
            }
            info!(
                weighting = weighting.name(),
                border_nodes = summaries.len(),
                fully_reachable,
                elapsed_ms = pass_started.elapsed().as_millis() as u64,
                "distance pass complete"
            );

            indexes.push(WeightingIndex {
                name: weighting.name().to_string(),
                borders,
                eccentricities,
            });
        }

        node_cells.flush()?;
        cells.flush()?;
        for index in &mut indexes {
            index.borders.flush()?;
            index.eccentricities.flush()?;
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cell index prepared"
        );

        Ok(Self {
            node_cells,
            cells,
            weightings: indexes,
            origin: IndexOrigin::Prepared,
        })
    }

    fn weighting(&self, name: &str) -> Result<&WeightingIndex> {
        self.weightings
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| PartitionError::UnknownWeighting(name.to_string()))
    }

    pub fn origin(&self) -> IndexOrigin {
        self.origin
    }

    pub fn node_count(&self) -> usize {
        self.node_cells.node_count()
    }

    pub fn weighting_names(&self) -> Vec<&str> {
        self.weightings.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.cells.cell_ids()
    }

    pub fn super_cell_ids(&self) -> Vec<CellId> {
        self.cells.super_cell_ids()
    }

    pub fn cell_id_of(&self, node: NodeId) -> Result<CellId> {
        self.node_cells.cell_id(node)
    }

    pub fn is_border(&self, node: NodeId) -> Result<bool> {
        self.node_cells.is_border(node)
    }

    pub fn border_node_count(&self) -> Result<usize> {
        let mut count = 0;
        for node in 0..self.node_count() as NodeId {
            count += self.is_border(node)? as usize;
        }
        Ok(count)
    }

    pub fn nodes_of_cell(&self, cell: CellId) -> Result<Vec<NodeId>> {
        self.cells.nodes_of_cell(cell)
    }

    pub fn contour_of(&self, cell: CellId) -> Result<Vec<(f64, f64)>> {
        self.cells.contour_of(cell)
    }

    pub fn cells_of_super_cell(&self, super_cell: CellId) -> Result<&[CellId]> {
        self.cells.cells_of_super_cell(super_cell)
    }

    pub fn super_cell_of(&self, cell: CellId) -> Option<CellId> {
        self.cells.super_cell_of(cell)
    }

    pub fn super_super_cell_ids(&self) -> Vec<CellId> {
        self.cells.super_super_cell_ids()
    }

    pub fn super_cells_of_super_super_cell(&self, group: CellId) -> Result<&[CellId]> {
        self.cells.super_cells_of_super_super_cell(group)
    }

    pub fn super_super_cell_of(&self, super_cell: CellId) -> Option<CellId> {
        self.cells.super_super_cell_of(super_cell)
    }

    /// Base cells below a super-super cell, ascending
    pub fn cells_of_super_super_cell(&self, group: CellId) -> Result<Vec<CellId>> {
        let mut base = Vec::new();
        for &super_cell in self.super_cells_of_super_super_cell(group)? {
            base.extend_from_slice(self.cells_of_super_cell(super_cell)?);
        }
        base.sort_unstable();
        Ok(base)
    }

    pub fn border_distances_from(
        &self,
        node: NodeId,
        weighting: &str,
    ) -> Result<BorderNodeDistanceSet> {
        self.weighting(weighting)?
            .borders
            .border_node_distance_set(node)
    }

    pub fn eccentricity_of(&self, node: NodeId, weighting: &str) -> Result<i32> {
        self.weighting(weighting)?.eccentricities.eccentricity(node)
    }

    pub fn is_fully_reachable(&self, node: NodeId, weighting: &str) -> Result<bool> {
        self.weighting(weighting)?
            .eccentricities
            .is_fully_reachable(node)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.node_cells.created_at()
    }

    pub fn close(mut self) {
        self.node_cells.close();
        self.cells.close();
        for index in &mut self.weightings {
            index.borders.close();
            index.eccentricities.close();
        }
    }
}

fn check_weighting_names(weightings: &[&dyn Weighting]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for w in weightings {
        if !seen.insert(w.name()) {
            return Err(PartitionError::InvalidConfig(format!(
                "weighting '{}' listed twice",
                w.name()
            )));
        }
    }
    Ok(())
}
