//! Edge cost functions used by the distance passes

use crate::error::{PartitionError, Result};
use crate::graph::EdgeRef;

pub trait Weighting: Sync {
    /// Stable name, used as the storage region suffix
    fn name(&self) -> &str;

    fn calc_weight(&self, edge: &EdgeRef) -> f64;
}

/// Cost = edge length in meters
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestWeighting;

impl Weighting for ShortestWeighting {
    fn name(&self) -> &str {
        "shortest"
    }

    fn calc_weight(&self, edge: &EdgeRef) -> f64 {
        edge.distance
    }
}

/// Cost = travel time in seconds at a constant speed
#[derive(Debug, Clone, Copy)]
pub struct FastestWeighting {
    pub speed_kmh: f64,
}

impl Default for FastestWeighting {
    fn default() -> Self {
        Self { speed_kmh: 50.0 }
    }
}

impl Weighting for FastestWeighting {
    fn name(&self) -> &str {
        "fastest"
    }

    fn calc_weight(&self, edge: &EdgeRef) -> f64 {
        edge.distance / (self.speed_kmh / 3.6)
    }
}

/// Resolve a weighting by name (`shortest`, `fastest`).
pub fn weighting_by_name(name: &str) -> Result<Box<dyn Weighting>> {
    match name.trim() {
        "shortest" => Ok(Box::new(ShortestWeighting)),
        "fastest" => Ok(Box::new(FastestWeighting::default())),
        other => Err(PartitionError::UnknownWeighting(other.to_string())),
    }
}
