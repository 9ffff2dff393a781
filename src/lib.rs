//! # butterfly-cells
//!
//! InertialFlow partitioning of road graphs into cells, plus the on-disk
//! indexes (node cells, contours, border distances, eccentricities) used by
//! fast isochrone queries. Start with [`CellIndex::load_or_prepare`].

pub mod cli;
pub mod config;
pub mod contour;
pub mod eccentricity;
pub mod error;
pub mod graph;
pub mod partition;
pub mod prepare;
pub mod storage;
pub mod weighting;

pub use config::PartitionConfig;
pub use error::{PartitionError, Result};
pub use graph::{BoundedFilter, CsrGraph, EdgeFilter, EdgeRef, MaxEdgeLengthFilter, RoadGraph};
pub use partition::{InertialFlow, PartitionAssignment};
pub use prepare::CellIndex;
pub use weighting::{FastestWeighting, ShortestWeighting, Weighting};
