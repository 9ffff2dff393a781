//! Error type for cell preparation and the on-disk indexes

use thiserror::Error;

/// Errors produced while partitioning a graph or reading/writing cell indexes.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// Build parameters that cannot produce a valid partition
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("graph has no nodes")]
    EmptyGraph,

    /// A flow network was requested for an empty node set
    #[error("empty flow network for cell {cell_id}")]
    EmptyNetwork { cell_id: u32 },

    #[error("node {node} claimed by cells {first} and {second}")]
    OverlappingCells { node: u32, first: u32, second: u32 },

    #[error("node {node} was not assigned to any cell")]
    UnassignedNode { node: u32 },

    #[error("border distance set for node {node} has {ids} ids but {distances} distances")]
    LengthMismatch {
        node: u32,
        ids: usize,
        distances: usize,
    },

    #[error("region '{region}' cannot grow to {requested} bytes (max {max})")]
    CapacityExhausted {
        region: String,
        requested: u64,
        max: u64,
    },

    #[error("region '{region}' is corrupt: {reason}")]
    CorruptRegion { region: String, reason: String },

    /// Lifecycle misuse: create after load, access before init, ...
    #[error("region '{region}': {reason}")]
    RegionState { region: String, reason: String },

    #[error("unknown cell {0}")]
    UnknownCell(u32),

    #[error("no border distances stored for node {0}")]
    UnknownBorderNode(u32),

    #[error("unknown weighting '{0}'")]
    UnknownWeighting(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PartitionError>;
