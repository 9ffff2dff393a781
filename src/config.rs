//! Build parameters for cell preparation
//!
//! Every field influences the produced artifacts, so the whole struct is hashed
//! into the cache key written to each storage region.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{PartitionError, Result};
use crate::partition::projection::PROJECTION_COUNT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Deepest bisection level a cell may reach (root is depth 0)
    pub max_splitting_depth: u32,
    /// Bisection is forced above this depth regardless of cell size
    pub min_splitting_depth: u32,
    /// Cells above this node count are split further
    pub max_cell_nodes: usize,
    /// Cells at or below this node count are never force-split
    pub min_cell_nodes: usize,
    /// Upper bound of connected fragments a terminal side is split into
    pub max_subcells: usize,
    /// Fraction of the projection order forced to source / sink
    pub split_fraction: f64,
    /// Best-ranked projections actually run through max-flow
    pub considered_projections: usize,
    /// Worker pool size (capped by available parallelism)
    pub max_threads: usize,
    /// Edges longer than this (meters) are ignored by the partitioner
    pub max_edge_length: f64,
    /// Name of the caller's edge predicate. Change it whenever the predicate
    /// passed to `CellIndex::load_or_prepare` changes.
    pub edge_filter: Option<String>,
    pub separate_disconnected: bool,
    /// Bisection levels folded into one super cell
    pub super_cell_level: u32,
    /// Further levels folded from super cells into one super-super cell
    pub super_super_cell_level: u32,
    /// Concave hull parameter for contours; larger values approach the convex hull
    pub contour_concavity: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_splitting_depth: 24,
            min_splitting_depth: 0,
            max_cell_nodes: 5000,
            min_cell_nodes: 4,
            max_subcells: 10,
            split_fraction: 0.2525,
            considered_projections: 3,
            max_threads: 4,
            max_edge_length: 25_000.0,
            edge_filter: None,
            separate_disconnected: true,
            super_cell_level: 2,
            super_super_cell_level: 2,
            contour_concavity: 2.0,
        }
    }
}

impl PartitionConfig {
    /// Load a config from a JSON file; missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: PartitionConfig = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    /// Reject parameter combinations before any work is scheduled.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PartitionError::InvalidConfig(msg));

        if self.max_cell_nodes == 0 {
            return fail("max_cell_nodes must be at least 1".into());
        }
        if self.min_cell_nodes > self.max_cell_nodes {
            return fail(format!(
                "min_cell_nodes ({}) exceeds max_cell_nodes ({})",
                self.min_cell_nodes, self.max_cell_nodes
            ));
        }
        if self.min_splitting_depth > self.max_splitting_depth {
            return fail(format!(
                "min_splitting_depth ({}) exceeds max_splitting_depth ({})",
                self.min_splitting_depth, self.max_splitting_depth
            ));
        }
        if self.max_subcells == 0 {
            return fail("max_subcells must be at least 1".into());
        }
        if !(self.split_fraction > 0.0 && self.split_fraction < 0.5) {
            return fail(format!(
                "split_fraction must lie in (0, 0.5), got {}",
                self.split_fraction
            ));
        }
        if self.considered_projections == 0 || self.considered_projections > PROJECTION_COUNT {
            return fail(format!(
                "considered_projections must lie in 1..={}, got {}",
                PROJECTION_COUNT, self.considered_projections
            ));
        }
        if self.max_threads == 0 {
            return fail("max_threads must be at least 1".into());
        }
        if !self.max_edge_length.is_finite() || self.max_edge_length <= 0.0 {
            return fail(format!(
                "max_edge_length must be a positive distance, got {}",
                self.max_edge_length
            ));
        }
        if !self.contour_concavity.is_finite() || self.contour_concavity <= 0.0 {
            return fail(format!(
                "contour_concavity must be positive, got {}",
                self.contour_concavity
            ));
        }
        // Leaf ids carry depth + 1 bits, fragments append one bit per pair.
        // Stored ids are i32 and -1 terminates the super cell block.
        let id_bits = self.max_splitting_depth as usize + 1 + self.max_subcells / 2;
        if id_bits > 31 {
            return fail(format!(
                "max_splitting_depth {} with max_subcells {} overflows 31-bit cell ids",
                self.max_splitting_depth, self.max_subcells
            ));
        }
        Ok(())
    }

    /// Worker pool size actually used on this machine.
    pub fn effective_threads(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_threads.min(available).max(1)
    }

    /// Child tasks above this node count are handed to the worker pool.
    pub fn parallel_threshold(&self) -> usize {
        self.max_cell_nodes.saturating_mul(4)
    }

    /// SHA-256 of the canonical JSON encoding.
    pub fn cache_key(&self) -> Result<[u8; 32]> {
        let encoded = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&encoded);
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Ok(key)
    }
}
