///! CLI commands for butterfly-cells

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::PartitionConfig;
use crate::graph::{CsrGraph, EdgeRef, NodeId, RoadGraph};
use crate::prepare::{CellIndex, IndexOrigin};
use crate::storage::Directory;
use crate::weighting::{weighting_by_name, Weighting};

#[derive(Parser)]
#[command(name = "butterfly-cells")]
#[command(about = "InertialFlow cell partitioning and isochrone indexes for road graphs", long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Partition a graph and write the cell indexes
    Prepare {
        /// Graph JSON ({"nodes": [[lat, lon]], "edges": [[u, v, meters]]})
        #[arg(long)]
        graph: PathBuf,

        /// Output directory for the index regions
        #[arg(short, long)]
        outdir: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },

    /// Print what the prepared index knows about a node
    Inspect {
        /// Graph JSON the index was prepared from
        #[arg(long)]
        graph: PathBuf,

        /// Directory holding the index regions
        #[arg(short, long)]
        outdir: PathBuf,

        /// Node id to look up
        #[arg(long)]
        node: NodeId,

        #[command(flatten)]
        settings: Settings,
    },
}

/// Config file, per-field overrides and weightings shared by all commands
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// PartitionConfig JSON; missing fields take their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub max_cell_nodes: Option<usize>,

    #[arg(long)]
    pub min_cell_nodes: Option<usize>,

    #[arg(long)]
    pub max_depth: Option<u32>,

    #[arg(long)]
    pub min_depth: Option<u32>,

    #[arg(long)]
    pub max_subcells: Option<usize>,

    #[arg(long)]
    pub considered_projections: Option<usize>,

    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Edges longer than this (meters) are ignored by the partitioner
    #[arg(long)]
    pub max_edge_length: Option<f64>,

    #[arg(long)]
    pub super_cell_level: Option<u32>,

    #[arg(long)]
    pub super_super_cell_level: Option<u32>,

    /// Keep disconnected sides as single cells
    #[arg(long)]
    pub keep_disconnected: bool,

    /// Comma-separated weightings for the distance passes
    #[arg(long, value_delimiter = ',', default_value = "shortest,fastest")]
    pub weighting: Vec<String>,
}

impl Settings {
    pub fn resolve_config(&self) -> Result<PartitionConfig> {
        let mut config = match &self.config {
            Some(path) => PartitionConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => PartitionConfig::default(),
        };

        if let Some(v) = self.max_cell_nodes {
            config.max_cell_nodes = v;
        }
        if let Some(v) = self.min_cell_nodes {
            config.min_cell_nodes = v;
        }
        if let Some(v) = self.max_depth {
            config.max_splitting_depth = v;
        }
        if let Some(v) = self.min_depth {
            config.min_splitting_depth = v;
        }
        if let Some(v) = self.max_subcells {
            config.max_subcells = v;
        }
        if let Some(v) = self.considered_projections {
            config.considered_projections = v;
        }
        if let Some(v) = self.threads {
            config.max_threads = v;
        }
        if let Some(v) = self.max_edge_length {
            config.max_edge_length = v;
        }
        if let Some(v) = self.super_cell_level {
            config.super_cell_level = v;
        }
        if let Some(v) = self.super_super_cell_level {
            config.super_super_cell_level = v;
        }
        if self.keep_disconnected {
            config.separate_disconnected = false;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn resolve_weightings(&self) -> Result<Vec<Box<dyn Weighting>>> {
        let weightings = self
            .weighting
            .iter()
            .filter(|name| !name.trim().is_empty())
            .map(|name| weighting_by_name(name))
            .collect::<crate::Result<Vec<_>>>()?;
        if weightings.is_empty() {
            bail!("at least one weighting is required");
        }
        Ok(weightings)
    }
}

fn load_graph(path: &Path) -> Result<CsrGraph> {
    CsrGraph::from_json_file(path).with_context(|| format!("reading graph {}", path.display()))
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Prepare {
                graph,
                outdir,
                settings,
            } => prepare(&graph, &outdir, &settings),
            Commands::Inspect {
                graph,
                outdir,
                node,
                settings,
            } => inspect(&graph, &outdir, node, &settings),
        }
    }
}

fn prepare(graph_path: &Path, outdir: &Path, settings: &Settings) -> Result<()> {
    let config = settings.resolve_config()?;
    let owned = settings.resolve_weightings()?;
    let weightings: Vec<&dyn Weighting> = owned.iter().map(|w| w.as_ref()).collect();

    println!("Loading graph: {}", graph_path.display());
    let graph = load_graph(graph_path)?;
    println!(
        "  {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    std::fs::create_dir_all(outdir)
        .with_context(|| format!("creating {}", outdir.display()))?;

    let start = Instant::now();
    // max_edge_length from the config is the only edge restriction
    let all_edges = |_: &EdgeRef| true;
    let index = CellIndex::load_or_prepare(&graph, &config, &all_edges, &weightings, outdir)?;

    let verb = match index.origin() {
        IndexOrigin::Loaded => "Loaded existing",
        IndexOrigin::Prepared => "Prepared",
    };
    println!();
    println!(
        "{} cell index in {:.2}s",
        verb,
        start.elapsed().as_secs_f64()
    );
    println!("  cells:        {}", index.cell_ids().len());
    println!("  super cells:  {}", index.super_cell_ids().len());
    println!("  super-super:  {}", index.super_super_cell_ids().len());
    println!("  border nodes: {}", index.border_node_count()?);
    println!("  weightings:   {}", index.weighting_names().join(", "));
    println!("  output:       {}", outdir.display());
    Ok(())
}

fn inspect(graph_path: &Path, outdir: &Path, node: NodeId, settings: &Settings) -> Result<()> {
    let config = settings.resolve_config()?;
    let owned = settings.resolve_weightings()?;
    let names: Vec<&str> = owned.iter().map(|w| w.name()).collect();

    let graph = load_graph(graph_path)?;
    if node as usize >= graph.node_count() {
        bail!("node {} outside 0..{}", node, graph.node_count());
    }

    let directory = Directory::new(outdir, config.cache_key()?);
    let Some(index) = CellIndex::load(&directory, &names)? else {
        bail!(
            "no index for this config in {}, run `prepare` first",
            outdir.display()
        );
    };

    let cell = index.cell_id_of(node)?;
    let (lat, lon) = graph.coordinate(node);
    println!("Node {} ({:.6}, {:.6})", node, lat, lon);
    println!("  cell:        {}", cell);
    println!("  cell size:   {}", index.nodes_of_cell(cell)?.len());
    println!("  contour:     {} vertices", index.contour_of(cell)?.len());
    if let Some(super_cell) = index.super_cell_of(cell) {
        println!("  super cell:  {}", super_cell);
        if let Some(group) = index.super_super_cell_of(super_cell) {
            println!(
                "  super-super: {} ({} base cells)",
                group,
                index.cells_of_super_super_cell(group)?.len()
            );
        }
    }
    println!("  border:      {}", index.is_border(node)?);

    for name in &names {
        let eccentricity = index.eccentricity_of(node, name)?;
        let reachable = index.is_fully_reachable(node, name)?;
        println!(
            "  [{}] eccentricity {}, fully reachable: {}",
            name, eccentricity, reachable
        );
        if index.is_border(node)? {
            let set = index.border_distances_from(node, name)?;
            println!("  [{}] {} sibling border nodes", name, set.len());
        }
    }
    Ok(())
}
