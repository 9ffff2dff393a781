//! InertialFlow graph partitioning
//!
//! Recursive min-cut bisection driven by geometric projections, solved with
//! Edmonds-Karp on a per-set flow network and scheduled on a bounded pool.

pub mod assignment;
pub mod connectivity;
pub mod flow_network;
pub mod inertial_flow;
pub mod max_flow;
pub mod projection;
pub mod scheduler;

pub use assignment::{compute_borderness, LeafCell, PartitionAssignment};
pub use connectivity::{assign_fragment_ids, split_disconnected};
pub use flow_network::{FlowEdge, FlowNetwork};
pub use inertial_flow::{Bisection, CutAttempt, InertialFlow, PartitionStats, ROOT_CELL};
pub use max_flow::EdmondsKarp;
pub use projection::{Projection, ProjectionSet, PROJECTION_COUNT};
pub use scheduler::{TaskGroup, TaskScope};
