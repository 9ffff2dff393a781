//! On-disk cell indexes
//!
//! Every index lives in one [`region::DataRegion`]: a growable little-endian
//! payload with a versioned header, the config cache key and a CRC-64 footer.

pub mod border_distance;
pub mod cells;
pub mod crc;
pub mod eccentricity;
pub mod node_cell;
pub mod region;

pub use border_distance::{BorderNodeDistanceSet, BorderNodeDistanceStorage};
pub use cells::CellStorage;
pub use eccentricity::EccentricityStorage;
pub use node_cell::NodeCellStorage;
pub use region::{DataRegion, Directory};
