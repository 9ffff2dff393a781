///! InertialFlow recursive bisection
///!
///! Each node set is cut by max-flow between the two ends of a geometric
///! ordering. The best of the top ranked projections wins, both sides recurse
///! (large ones on the worker pool, small ones inline) and terminal sides are
///! split into connected fragments before being stored as leaf cells.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use super::assignment::{LeafCell, PartitionAssignment};
use super::connectivity::{assign_fragment_ids, split_disconnected};
use super::flow_network::FlowNetwork;
use super::max_flow::EdmondsKarp;
use super::projection::{band_size, Projection, ProjectionSet};
use super::scheduler::{TaskGroup, TaskScope};
use crate::config::PartitionConfig;
use crate::error::{PartitionError, Result};
use crate::graph::{BoundedFilter, CellId, EdgeFilter, NodeId, RoadGraph};

pub const ROOT_CELL: CellId = 1;

/// Floor of the estimated cut bound for small sets
const MIN_CUT_BOUND: u64 = 5;

/// Outcome of one tried projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutAttempt {
    pub projection: Projection,
    /// `None` when the solver hit the running bound
    pub cut: Option<u64>,
}

/// Result of bisecting one node set
#[derive(Debug, Clone)]
pub struct Bisection {
    pub source: ProjectionSet,
    pub sink: ProjectionSet,
    pub cut: Option<u64>,
    pub projection: Option<Projection>,
    pub attempts: Vec<CutAttempt>,
}

struct BisectionTask {
    cell_id: CellId,
    depth: u32,
    set: ProjectionSet,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionStats {
    pub bisections: usize,
    pub fallbacks: usize,
    pub fragmented: usize,
    pub spawned: usize,
}

pub struct InertialFlow<'g, G, F: ?Sized> {
    graph: &'g G,
    filter: BoundedFilter<'g, F>,
    config: PartitionConfig,
}

impl<'g, G, F> InertialFlow<'g, G, F>
where
    G: RoadGraph,
    F: EdgeFilter + ?Sized,
{
    /// `filter` is combined with the config's `max_edge_length`.
    pub fn new(graph: &'g G, filter: &'g F, config: PartitionConfig) -> Self {
        Self {
            graph,
            filter: BoundedFilter::new(filter, config.max_edge_length),
            config,
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// The edge predicate every pass of this partition uses
    pub fn filter(&self) -> &BoundedFilter<'g, F> {
        &self.filter
    }

    /// Initial cut bound for a set of `size` nodes: the graph's edges scaled
    /// by the set's share of all nodes, at least [`MIN_CUT_BOUND`].
    pub fn estimated_cut_bound(&self, size: usize) -> u64 {
        let nodes = self.graph.node_count().max(1) as f64;
        let scaled = (self.graph.edge_count() as f64 * size as f64 / nodes).ceil() as u64;
        scaled.max(MIN_CUT_BOUND)
    }

    /// Partition the whole graph.
    pub fn partition(&self) -> Result<PartitionAssignment> {
        self.partition_with_stats().map(|(assignment, _)| assignment)
    }

    pub fn partition_with_stats(&self) -> Result<(PartitionAssignment, PartitionStats)> {
        self.config.validate()?;
        let n = self.graph.node_count();
        if n == 0 {
            return Err(PartitionError::EmptyGraph);
        }
        if n > i32::MAX as usize {
            return Err(PartitionError::InvalidConfig(format!(
                "{} nodes exceed the 31-bit node id space",
                n
            )));
        }

        let started = Instant::now();
        let group = TaskGroup::new(self.config.effective_threads())?;
        info!(
            nodes = n,
            threads = group.threads(),
            max_cell_nodes = self.config.max_cell_nodes,
            "partitioning graph"
        );

        let run = Run {
            flow: self,
            leaves: Mutex::new(Vec::new()),
            bisections: AtomicUsize::new(0),
            fallbacks: AtomicUsize::new(0),
            fragmented: AtomicUsize::new(0),
        };
        let nodes: Vec<NodeId> = (0..n as NodeId).collect();

        group.run(|scope| {
            let set = ProjectionSet::build(self.graph, &nodes);
            run.process(
                scope,
                BisectionTask {
                    cell_id: ROOT_CELL,
                    depth: 0,
                    set,
                },
            )
        })?;

        let stats = PartitionStats {
            bisections: run.bisections.load(Ordering::Relaxed),
            fallbacks: run.fallbacks.load(Ordering::Relaxed),
            fragmented: run.fragmented.load(Ordering::Relaxed),
            spawned: group.spawned(),
        };
        let leaves = run.leaves.into_inner();
        let assignment = PartitionAssignment::from_cells(n, &leaves)?;

        info!(
            cells = leaves.len(),
            bisections = stats.bisections,
            fallbacks = stats.fallbacks,
            fragmented = stats.fragmented,
            tasks = stats.spawned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "partition complete"
        );
        Ok((assignment, stats))
    }

    /// Bisect an arbitrary node set once.
    pub fn bisect_nodes(&self, nodes: &[NodeId], cell_id: CellId) -> Result<Bisection> {
        let set = ProjectionSet::build(self.graph, nodes);
        self.bisect_set(set, cell_id)
    }

    fn bisect_set(&self, set: ProjectionSet, cell_id: CellId) -> Result<Bisection> {
        let fraction = self.config.split_fraction;
        let mut network = FlowNetwork::build(self.graph, set.nodes(), &self.filter, cell_id)?;
        let band = band_size(set.len(), fraction);
        let ranked = set.rank(self.graph, fraction);

        let mut solver = EdmondsKarp::new(network.node_count());
        let mut bound = self.estimated_cut_bound(set.len());
        let mut best: Option<(Projection, Vec<bool>)> = None;
        let mut attempts = Vec::with_capacity(self.config.considered_projections);

        for &projection in ranked.iter().take(self.config.considered_projections) {
            network.assign_bands(set.order(projection), band);
            let cut = solver.solve(&mut network, bound);
            attempts.push(CutAttempt { projection, cut });
            if let Some(cut) = cut {
                bound = cut;
                best = Some((projection, solver.source_side(&network)));
            }
        }

        let Some((projection, side)) = best else {
            debug!(
                cell_id,
                nodes = set.len(),
                bound,
                "no projection beat the cut bound, keeping all nodes on one side"
            );
            return Ok(Bisection {
                source: set,
                sink: ProjectionSet::default(),
                cut: None,
                projection: None,
                attempts,
            });
        };

        let (source, sink) = set.split(|node| {
            network
                .local_of(node)
                .is_some_and(|local| side[local as usize])
        });
        Ok(Bisection {
            source,
            sink,
            cut: Some(bound),
            projection: Some(projection),
            attempts,
        })
    }

    /// Whether a set of `size` nodes at `depth` is cut further.
    pub fn should_split(&self, size: usize, depth: u32) -> bool {
        let c = &self.config;
        size >= 2
            && ((depth < c.max_splitting_depth && size > c.max_cell_nodes)
                || (depth < c.min_splitting_depth && size > c.min_cell_nodes))
    }
}

/// Per-run state shared by all bisection tasks
struct Run<'f, 'g, G, F: ?Sized> {
    flow: &'f InertialFlow<'g, G, F>,
    leaves: Mutex<Vec<LeafCell>>,
    bisections: AtomicUsize,
    fallbacks: AtomicUsize,
    fragmented: AtomicUsize,
}

impl<'f, 'g, G, F> Run<'f, 'g, G, F>
where
    G: RoadGraph,
    F: EdgeFilter + ?Sized,
{
    fn process<'s>(&'s self, scope: &TaskScope<'_, 's>, task: BisectionTask) -> Result<()> {
        let flow = self.flow;
        if scope.is_failed() {
            return Ok(());
        }
        if !flow.should_split(task.set.len(), task.depth) {
            self.store_terminal(task.cell_id, task.depth, task.set.into_nodes());
            return Ok(());
        }

        let bisection = flow.bisect_set(task.set, task.cell_id)?;
        self.bisections.fetch_add(1, Ordering::Relaxed);
        if bisection.cut.is_none() {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }

        let child_depth = task.depth + 1;
        let children = [
            (bisection.source, task.cell_id << 1),
            (bisection.sink, (task.cell_id << 1) | 1),
        ];
        for (set, cell_id) in children {
            if set.is_empty() {
                continue;
            }
            let child = BisectionTask {
                cell_id,
                depth: child_depth,
                set,
            };
            if child.set.len() > flow.config.parallel_threshold() {
                scope.spawn(move |s| self.process(s, child));
            } else {
                self.process(scope, child)?;
            }
        }
        Ok(())
    }

    fn store_terminal(&self, cell_id: CellId, depth: u32, nodes: Vec<NodeId>) {
        let config = &self.flow.config;
        if nodes.is_empty() {
            return;
        }

        if !(config.separate_disconnected && depth < config.max_splitting_depth) {
            self.leaves.lock().push(LeafCell { cell_id, nodes });
            return;
        }

        let fragments = split_disconnected(
            self.flow.graph,
            &self.flow.filter,
            &nodes,
            config.max_subcells,
        );
        if fragments.len() > 1 {
            self.fragmented.fetch_add(1, Ordering::Relaxed);
            debug!(cell_id, fragments = fragments.len(), "split disconnected cell");
        }

        let named = assign_fragment_ids(cell_id, fragments);
        let mut leaves = self.leaves.lock();
        leaves.extend(
            named
                .into_iter()
                .map(|(cell_id, nodes)| LeafCell { cell_id, nodes }),
        );
    }
}
