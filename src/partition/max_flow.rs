//! Edmonds-Karp max-flow / min-cut
//!
//! BFS visits are stamped with a monotonically increasing token instead of
//! clearing a visited array per iteration; the array is only wiped when the
//! token wraps.

use std::collections::VecDeque;

use super::flow_network::{FlowNetwork, INF};

pub struct EdmondsKarp {
    visited: Vec<u32>,
    parent: Vec<u32>,
    token: u32,
    queue: VecDeque<u32>,
}

impl EdmondsKarp {
    pub fn new(node_count: usize) -> Self {
        Self {
            visited: vec![0; node_count],
            parent: vec![u32::MAX; node_count],
            token: 0,
            queue: VecDeque::new(),
        }
    }

    fn next_token(&mut self) {
        if self.token == u32::MAX {
            self.visited.fill(0);
            self.token = 1;
        } else {
            self.token += 1;
        }
    }

    /// Max flow from source to sink, aborted once it reaches `bound`.
    ///
    /// Returns `None` when the flow reaches `bound` (the cut cannot beat it),
    /// otherwise `Some(cut)`. After `Some`, [`Self::source_side`] reports the
    /// residual-reachable side of the minimum cut.
    pub fn solve(&mut self, network: &mut FlowNetwork, bound: u64) -> Option<u64> {
        let count = network.node_count();
        if self.visited.len() < count {
            self.visited.resize(count, 0);
            self.parent.resize(count, u32::MAX);
        }

        let source = network.source();
        let sink = network.sink();
        let mut flow: u64 = 0;

        loop {
            if flow >= bound {
                return None;
            }
            if !self.bfs(network, source, sink) {
                return Some(flow);
            }

            let mut bottleneck = INF;
            let mut v = sink;
            while v != source {
                let e = network.edge(self.parent[v as usize]);
                bottleneck = bottleneck.min(e.residual());
                v = e.base;
            }

            let mut v = sink;
            while v != source {
                let idx = self.parent[v as usize];
                network.augment(idx, bottleneck);
                v = network.edge(idx).base;
            }
            flow += bottleneck as u64;
        }
    }

    fn bfs(&mut self, network: &FlowNetwork, source: u32, sink: u32) -> bool {
        self.next_token();
        let token = self.token;
        self.queue.clear();
        self.visited[source as usize] = token;
        self.queue.push_back(source);

        while let Some(u) = self.queue.pop_front() {
            for &idx in network.out_edges(u) {
                let e = network.edge(idx);
                let t = e.target as usize;
                if e.residual() <= 0 || self.visited[t] == token {
                    continue;
                }
                self.visited[t] = token;
                self.parent[t] = idx;
                if e.target == sink {
                    return true;
                }
                self.queue.push_back(e.target);
            }
        }
        false
    }

    /// Membership of members `0..n` in the last BFS's source side.
    pub fn source_side(&self, network: &FlowNetwork) -> Vec<bool> {
        (0..network.len())
            .map(|v| self.visited[v] == self.token)
            .collect()
    }
}
