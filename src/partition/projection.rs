///! Geometric projections used to seed the bisection bands
///!
///! Twelve directions at 15° steps. Each node set keeps one ordering per
///! direction; child sets inherit their side's sub-orderings so sorting only
///! happens once at the root.

use rayon::prelude::*;
use std::cmp::Ordering;

use crate::graph::{haversine_distance, NodeId, RoadGraph};

pub const PROJECTION_COUNT: usize = 12;
const STEP_DEGREES: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Projection(u8);

impl Projection {
    pub fn all() -> impl Iterator<Item = Projection> {
        (0..PROJECTION_COUNT as u8).map(Projection)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn angle_degrees(self) -> f64 {
        self.0 as f64 * STEP_DEGREES
    }

    /// The direction rotated by 90°
    pub fn orthogonal(self) -> Projection {
        Projection(((self.index() + PROJECTION_COUNT / 2) % PROJECTION_COUNT) as u8)
    }

    /// Sort key of a (lat, lon) coordinate along this direction
    pub fn key(self, lat: f64, lon: f64) -> f64 {
        let theta = self.angle_degrees().to_radians();
        lon * theta.cos() + lat * theta.sin()
    }
}

/// Index of the first band boundary: `floor(n * fraction)`
pub fn band_index(n: usize, fraction: f64) -> usize {
    (n as f64 * fraction).floor() as usize
}

/// Band width forced onto source and sink, never below one node
pub fn band_size(n: usize, fraction: f64) -> usize {
    band_index(n, fraction).max(1)
}

/// Per-projection orderings of one node set
#[derive(Debug, Clone, Default)]
pub struct ProjectionSet {
    orders: Vec<Vec<NodeId>>,
}

impl ProjectionSet {
    pub fn build<G: RoadGraph>(graph: &G, nodes: &[NodeId]) -> Self {
        let orders = Projection::all()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|projection| {
                let mut keyed: Vec<(f64, NodeId)> = nodes
                    .iter()
                    .map(|&node| {
                        let (lat, lon) = graph.coordinate(node);
                        (projection.key(lat, lon), node)
                    })
                    .collect();
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                keyed.into_iter().map(|(_, node)| node).collect()
            })
            .collect();
        Self { orders }
    }

    pub fn len(&self) -> usize {
        self.orders.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn order(&self, projection: Projection) -> &[NodeId] {
        &self.orders[projection.index()]
    }

    /// Members in the order of the first projection
    pub fn nodes(&self) -> &[NodeId] {
        self.orders.first().map_or(&[], Vec::as_slice)
    }

    pub fn into_nodes(mut self) -> Vec<NodeId> {
        if self.orders.is_empty() {
            Vec::new()
        } else {
            self.orders.swap_remove(0)
        }
    }

    /// Split every ordering by side, keeping relative order.
    pub fn split<P>(&self, in_first: P) -> (ProjectionSet, ProjectionSet)
    where
        P: Fn(NodeId) -> bool,
    {
        let mut first = Vec::with_capacity(self.orders.len());
        let mut second = Vec::with_capacity(self.orders.len());
        for order in &self.orders {
            let (a, b): (Vec<NodeId>, Vec<NodeId>) = order.iter().partition(|&&n| in_first(n));
            first.push(a);
            second.push(b);
        }
        (ProjectionSet { orders: first }, ProjectionSet { orders: second })
    }

    /// Haversine spread between ranks `i` and `n - i - 1` of a projection.
    pub fn spread<G: RoadGraph>(&self, graph: &G, projection: Projection, fraction: f64) -> f64 {
        let order = self.order(projection);
        let n = order.len();
        if n == 0 {
            return 0.0;
        }
        let i = band_index(n, fraction).min(n - 1);
        let (lat1, lon1) = graph.coordinate(order[i]);
        let (lat2, lon2) = graph.coordinate(order[n - i - 1]);
        haversine_distance(lat1, lon1, lat2, lon2)
    }

    /// Projections sorted by `spread² / spread(orthogonal)`, best first.
    pub fn rank<G: RoadGraph>(&self, graph: &G, fraction: f64) -> Vec<Projection> {
        let spreads: Vec<f64> = Projection::all()
            .map(|p| self.spread(graph, p, fraction))
            .collect();

        let mut scored: Vec<(Projection, f64)> = Projection::all()
            .map(|p| {
                let s = spreads[p.index()];
                let orth = spreads[p.orthogonal().index()].max(1e-9);
                (p, s * s / orth)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.into_iter().map(|(p, _)| p).collect()
    }
}
