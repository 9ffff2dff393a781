///! Road graph abstraction consumed by the partitioner
///!
///! The hosting routing engine owns the real graph. The partitioner only needs
///! node coordinates and an adjacency iterator, so both are exposed through
///! [`RoadGraph`]. [`CsrGraph`] is the in-crate implementation used by the CLI
///! and the tests.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PartitionError, Result};

pub type NodeId = u32;
pub type CellId = u32;

/// One directed view of a graph edge, as seen from `base`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeRef {
    pub edge: u32,
    pub base: NodeId,
    pub adj: NodeId,
    /// Edge length in meters
    pub distance: f64,
}

pub trait RoadGraph: Sync {
    fn node_count(&self) -> usize;

    /// Undirected edge count
    fn edge_count(&self) -> usize;

    /// (lat, lon) in degrees
    fn coordinate(&self, node: NodeId) -> (f64, f64);

    /// Outgoing edges of `node`. Undirected graphs list every edge from both ends.
    fn edges(&self, node: NodeId) -> impl Iterator<Item = EdgeRef> + '_;
}

/// Acceptance predicate for graph edges.
pub trait EdgeFilter: Sync {
    fn accept(&self, edge: &EdgeRef) -> bool;
}

impl<F> EdgeFilter for F
where
    F: Fn(&EdgeRef) -> bool + Sync,
{
    fn accept(&self, edge: &EdgeRef) -> bool {
        self(edge)
    }
}

/// Default partitioning filter: long edges (ferries, tunnels with sparse
/// geometry) would glue distant regions together, so they are left out.
#[derive(Debug, Clone, Copy)]
pub struct MaxEdgeLengthFilter {
    pub max_distance: f64,
}

impl MaxEdgeLengthFilter {
    pub fn new(max_distance: f64) -> Self {
        Self { max_distance }
    }
}

impl EdgeFilter for MaxEdgeLengthFilter {
    fn accept(&self, edge: &EdgeRef) -> bool {
        edge.distance <= self.max_distance
    }
}

/// A caller predicate restricted to edges within the configured length.
///
/// The length bound is part of [`crate::PartitionConfig`] and therefore of the
/// cache key. Any further restriction the caller's predicate applies must be
/// named in `PartitionConfig::edge_filter`, otherwise a stored index built
/// with another predicate is reused.
pub struct BoundedFilter<'a, F: ?Sized> {
    inner: &'a F,
    length: MaxEdgeLengthFilter,
}

impl<'a, F: EdgeFilter + ?Sized> BoundedFilter<'a, F> {
    pub fn new(inner: &'a F, max_distance: f64) -> Self {
        Self {
            inner,
            length: MaxEdgeLengthFilter::new(max_distance),
        }
    }
}

impl<F: EdgeFilter + ?Sized> EdgeFilter for BoundedFilter<'_, F> {
    fn accept(&self, edge: &EdgeRef) -> bool {
        self.length.accept(edge) && self.inner.accept(edge)
    }
}

/// Great-circle distance in meters between two (lat, lon) pairs
#[allow(deprecated)]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = Point::new(lon1, lat1);
    let p2 = Point::new(lon2, lat2);
    p1.haversine_distance(&p2)
}

/// JSON graph input: `{"nodes": [[lat, lon], ...], "edges": [[u, v, meters], ...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub nodes: Vec<[f64; 2]>,
    pub edges: Vec<(NodeId, NodeId, f64)>,
}

/// Undirected graph in CSR layout
#[derive(Debug, Clone)]
pub struct CsrGraph {
    coords: Vec<(f64, f64)>,
    offsets: Vec<u64>,  // n_nodes + 1
    adjacency: Vec<EdgeRef>,
    n_edges: usize,
}

impl CsrGraph {
    /// Build from coordinates and undirected `(u, v, meters)` edges.
    pub fn from_edges(coords: Vec<(f64, f64)>, edges: &[(NodeId, NodeId, f64)]) -> Result<Self> {
        let n = coords.len();
        if n > i32::MAX as usize {
            return Err(PartitionError::InvalidConfig(format!(
                "{} nodes exceed the 31-bit node id space",
                n
            )));
        }

        let mut degree = vec![0u64; n];
        for (idx, &(u, v, distance)) in edges.iter().enumerate() {
            if u as usize >= n || v as usize >= n {
                return Err(PartitionError::InvalidConfig(format!(
                    "edge {} references node outside 0..{}",
                    idx, n
                )));
            }
            if !distance.is_finite() || distance < 0.0 {
                return Err(PartitionError::InvalidConfig(format!(
                    "edge {} has invalid length {}",
                    idx, distance
                )));
            }
            degree[u as usize] += 1;
            if u != v {
                degree[v as usize] += 1;
            }
        }

        let mut offsets = Vec::with_capacity(n + 1);
        offsets.push(0u64);
        for d in &degree {
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + d);
        }

        let total = *offsets.last().unwrap_or(&0) as usize;
        let placeholder = EdgeRef {
            edge: 0,
            base: 0,
            adj: 0,
            distance: 0.0,
        };
        let mut adjacency = vec![placeholder; total];
        let mut cursor: Vec<u64> = offsets[..n].to_vec();

        for (idx, &(u, v, distance)) in edges.iter().enumerate() {
            let slot = cursor[u as usize] as usize;
            adjacency[slot] = EdgeRef {
                edge: idx as u32,
                base: u,
                adj: v,
                distance,
            };
            cursor[u as usize] += 1;
            if u != v {
                let slot = cursor[v as usize] as usize;
                adjacency[slot] = EdgeRef {
                    edge: idx as u32,
                    base: v,
                    adj: u,
                    distance,
                };
                cursor[v as usize] += 1;
            }
        }

        Ok(Self {
            coords,
            offsets,
            adjacency,
            n_edges: edges.len(),
        })
    }

    pub fn from_graph_file(file: &GraphFile) -> Result<Self> {
        let coords = file.nodes.iter().map(|c| (c[0], c[1])).collect();
        Self::from_edges(coords, &file.edges)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let file: GraphFile = serde_json::from_slice(&bytes)?;
        Self::from_graph_file(&file)
    }

}

impl RoadGraph for CsrGraph {
    fn node_count(&self) -> usize {
        self.coords.len()
    }

    fn edge_count(&self) -> usize {
        self.n_edges
    }

    fn coordinate(&self, node: NodeId) -> (f64, f64) {
        self.coords[node as usize]
    }

    fn edges(&self, node: NodeId) -> impl Iterator<Item = EdgeRef> + '_ {
        let start = self.offsets[node as usize] as usize;
        let end = self.offsets[node as usize + 1] as usize;
        self.adjacency[start..end].iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> CsrGraph {
        CsrGraph::from_edges(
            vec![(0.0, 0.0), (0.0, 0.001), (0.001, 0.0)],
            &[(0, 1, 111.0), (1, 2, 157.0), (2, 0, 111.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_edges_listed_from_both_ends() {
        let g = triangle();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);

        let mut adj: Vec<NodeId> = g.edges(0).map(|e| e.adj).collect();
        adj.sort_unstable();
        assert_eq!(adj, vec![1, 2]);
        assert!(g.edges(1).all(|e| e.base == 1));
    }

    #[test]
    fn test_rejects_out_of_range_edge() {
        let result = CsrGraph::from_edges(vec![(0.0, 0.0)], &[(0, 3, 1.0)]);
        assert!(matches!(result, Err(PartitionError::InvalidConfig(_))));
    }

    #[test]
    fn test_max_length_filter() {
        let filter = MaxEdgeLengthFilter::new(120.0);
        let g = triangle();
        let accepted = g.edges(1).filter(|e| filter.accept(e)).count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_bounded_filter_needs_both() {
        let g = triangle();
        let accept_all = |_: &EdgeRef| true;
        let bounded = BoundedFilter::new(&accept_all, 120.0);
        assert_eq!(g.edges(1).filter(|e| bounded.accept(e)).count(), 1);

        let skip_node_zero = |e: &EdgeRef| e.adj != 0;
        let bounded = BoundedFilter::new(&skip_node_zero, 1000.0);
        let adj: Vec<NodeId> = g.edges(1).filter(|e| bounded.accept(e)).map(|e| e.adj).collect();
        assert_eq!(adj, vec![2]);
    }

    #[test]
    fn test_haversine_one_millidegree() {
        let d = haversine_distance(0.0, 0.0, 0.001, 0.0);
        assert!((d - 111.2).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn test_graph_file_json() {
        let json = r#"{"nodes": [[49.0, 8.0], [49.001, 8.0]], "edges": [[0, 1, 111.0]]}"#;
        let file: GraphFile = serde_json::from_str(json).unwrap();
        let g = CsrGraph::from_graph_file(&file).unwrap();
        assert_eq!(g.coordinate(1), (49.001, 8.0));
        assert_eq!(g.edges(1).next().unwrap().adj, 0);
    }
}
