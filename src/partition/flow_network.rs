//! Ephemeral max-flow network over one node set
//!
//! Local ids `0..n` map to the set's members, `n` is the source and `n + 1`
//! the sink. Every member owns a source arc and a sink arc whose capacities are
//! switched between 0 and [`INF`] per projection, so the network is built once
//! per set and only re-banded for each tried projection.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{PartitionError, Result};
use crate::graph::{CellId, EdgeFilter, NodeId, RoadGraph};

/// Capacity of band arcs. Large enough to never saturate, small enough to add.
pub const INF: i64 = i64::MAX / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    pub base: u32,
    pub target: u32,
    /// Index of the paired reverse edge
    pub reverse: u32,
    pub capacity: i64,
    pub flow: i64,
}

impl FlowEdge {
    #[inline]
    pub fn residual(&self) -> i64 {
        self.capacity - self.flow
    }
}

#[derive(Debug, Clone)]
pub struct FlowNetwork {
    members: Vec<NodeId>,
    local: FxHashMap<NodeId, u32>,
    edges: Vec<FlowEdge>,
    offsets: Vec<u32>,   // n + 3
    adjacency: Vec<u32>, // edge ids grouped by base
    source_arcs: Vec<u32>,
    sink_arcs: Vec<u32>,
    real_edges: usize,
}

impl FlowNetwork {
    /// Build the network for `nodes`. Only edges between two members that the
    /// filter accepts are added; self-loops and parallel edges are dropped.
    pub fn build<G: RoadGraph, F: EdgeFilter + ?Sized>(
        graph: &G,
        nodes: &[NodeId],
        filter: &F,
        cell_id: CellId,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PartitionError::EmptyNetwork { cell_id });
        }

        let n = nodes.len() as u32;
        let source = n;
        let sink = n + 1;

        let mut local = FxHashMap::with_capacity_and_hasher(nodes.len(), Default::default());
        for (idx, &node) in nodes.iter().enumerate() {
            local.insert(node, idx as u32);
        }

        let mut edges: Vec<FlowEdge> = Vec::with_capacity(nodes.len() * 8);
        let mut source_arcs = Vec::with_capacity(nodes.len());
        let mut sink_arcs = Vec::with_capacity(nodes.len());

        for v in 0..n {
            source_arcs.push(push_pair(&mut edges, source, v, 0, 0));
            sink_arcs.push(push_pair(&mut edges, v, sink, 0, 0));
        }

        let mut seen: FxHashSet<(u32, u32)> = FxHashSet::default();
        for (u, &node) in nodes.iter().enumerate() {
            let u = u as u32;
            for edge in graph.edges(node) {
                if edge.adj == node || !filter.accept(&edge) {
                    continue;
                }
                let Some(&v) = local.get(&edge.adj) else {
                    continue;
                };
                if seen.insert((u.min(v), u.max(v))) {
                    push_pair(&mut edges, u, v, 1, 1);
                }
            }
        }
        let real_edges = seen.len();

        // CSR over edge ids
        let total_nodes = (n + 2) as usize;
        let mut offsets = vec![0u32; total_nodes + 1];
        for e in &edges {
            offsets[e.base as usize + 1] += 1;
        }
        for i in 0..total_nodes {
            offsets[i + 1] += offsets[i];
        }
        let mut cursor = offsets.clone();
        let mut adjacency = vec![0u32; edges.len()];
        for (idx, e) in edges.iter().enumerate() {
            let slot = &mut cursor[e.base as usize];
            adjacency[*slot as usize] = idx as u32;
            *slot += 1;
        }

        Ok(Self {
            members: nodes.to_vec(),
            local,
            edges,
            offsets,
            adjacency,
            source_arcs,
            sink_arcs,
            real_edges,
        })
    }

    /// Member count (excludes source and sink)
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member count plus source and sink
    pub fn node_count(&self) -> usize {
        self.members.len() + 2
    }

    pub fn source(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn sink(&self) -> u32 {
        self.members.len() as u32 + 1
    }

    /// Undirected graph edges inside the set
    pub fn real_edge_count(&self) -> usize {
        self.real_edges
    }

    pub fn local_of(&self, node: NodeId) -> Option<u32> {
        self.local.get(&node).copied()
    }

    pub fn global_of(&self, local: u32) -> NodeId {
        self.members[local as usize]
    }

    pub fn edge(&self, idx: u32) -> &FlowEdge {
        &self.edges[idx as usize]
    }

    pub fn out_edges(&self, v: u32) -> &[u32] {
        let start = self.offsets[v as usize] as usize;
        let end = self.offsets[v as usize + 1] as usize;
        &self.adjacency[start..end]
    }

    /// Push `amount` along `idx` and pull it back along its reverse.
    pub fn augment(&mut self, idx: u32, amount: i64) {
        let reverse = self.edges[idx as usize].reverse;
        self.edges[idx as usize].flow += amount;
        self.edges[reverse as usize].flow -= amount;
    }

    /// Zero all flow, keep capacities.
    pub fn reset(&mut self) {
        for e in &mut self.edges {
            e.flow = 0;
        }
    }

    /// Reset flow and tie the first `band` nodes of `order` to the source and
    /// the last `band` to the sink.
    pub fn assign_bands(&mut self, order: &[NodeId], band: usize) {
        self.reset();
        for i in 0..self.members.len() {
            self.edges[self.source_arcs[i] as usize].capacity = 0;
            self.edges[self.sink_arcs[i] as usize].capacity = 0;
        }

        let band = band.min(order.len());
        for &node in &order[..band] {
            if let Some(v) = self.local_of(node) {
                self.edges[self.source_arcs[v as usize] as usize].capacity = INF;
            }
        }
        for &node in &order[order.len() - band..] {
            if let Some(v) = self.local_of(node) {
                self.edges[self.sink_arcs[v as usize] as usize].capacity = INF;
            }
        }
    }
}

/// Append a forward edge and its reverse, return the forward index.
fn push_pair(edges: &mut Vec<FlowEdge>, a: u32, b: u32, forward: i64, backward: i64) -> u32 {
    let idx = edges.len() as u32;
    edges.push(FlowEdge {
        base: a,
        target: b,
        reverse: idx + 1,
        capacity: forward,
        flow: 0,
    });
    edges.push(FlowEdge {
        base: b,
        target: a,
        reverse: idx,
        capacity: backward,
        flow: 0,
    });
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CsrGraph, EdgeRef};

    fn square_with_duplicates() -> CsrGraph {
        CsrGraph::from_edges(
            vec![(0.0, 0.0), (0.0, 0.001), (0.001, 0.001), (0.001, 0.0)],
            &[
                (0, 1, 100.0),
                (1, 0, 100.0), // parallel
                (1, 2, 100.0),
                (2, 3, 100.0),
                (3, 0, 100.0),
                (2, 2, 5.0), // self-loop
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_empty_set_rejected() {
        let g = square_with_duplicates();
        let accept_all = |_: &EdgeRef| true;
        let result = FlowNetwork::build(&g, &[], &accept_all, 7);
        assert!(matches!(result, Err(PartitionError::EmptyNetwork { cell_id: 7 })));
    }

    #[test]
    fn test_dedup_and_self_loops() {
        let g = square_with_duplicates();
        let accept_all = |_: &EdgeRef| true;
        let net = FlowNetwork::build(&g, &[0, 1, 2, 3], &accept_all, 1).unwrap();

        assert_eq!(net.real_edge_count(), 4);
        assert_eq!(net.node_count(), 6);
        // per member: reverse source arc, sink arc, two real edges; plus source and sink fans
        let total: usize = (0..6).map(|v| net.out_edges(v).len()).sum();
        assert_eq!(total, 4 * 4 + 4 * 2);
    }

    #[test]
    fn test_filter_and_subset() {
        let g = square_with_duplicates();
        let short_only = |e: &EdgeRef| e.distance < 50.0;
        let net = FlowNetwork::build(&g, &[0, 1, 2], &short_only, 1).unwrap();
        assert_eq!(net.real_edge_count(), 0);

        let accept_all = |_: &EdgeRef| true;
        let net = FlowNetwork::build(&g, &[0, 1, 2], &accept_all, 1).unwrap();
        // 3-0 leaves the set
        assert_eq!(net.real_edge_count(), 2);
    }

    #[test]
    fn test_bands_and_reverse_pairs() {
        let g = square_with_duplicates();
        let accept_all = |_: &EdgeRef| true;
        let mut net = FlowNetwork::build(&g, &[0, 1, 2, 3], &accept_all, 1).unwrap();
        net.assign_bands(&[3, 0, 1, 2], 1);

        let source = net.source();
        let sink = net.sink();
        let banded_source: Vec<u32> = net
            .out_edges(source)
            .iter()
            .map(|&e| *net.edge(e))
            .filter(|e| e.capacity == INF)
            .map(|e| net.global_of(e.target))
            .collect();
        assert_eq!(banded_source, vec![3]);

        let into_sink = (0..4u32)
            .flat_map(|v| net.out_edges(v).to_vec())
            .map(|e| *net.edge(e))
            .filter(|e| e.target == sink && e.capacity == INF)
            .count();
        assert_eq!(into_sink, 1);

        for v in 0..net.node_count() as u32 {
            for &e in net.out_edges(v) {
                let edge = net.edge(e);
                assert_eq!(net.edge(edge.reverse).reverse, e);
                assert_eq!(net.edge(edge.reverse).target, edge.base);
            }
        }
    }
}
