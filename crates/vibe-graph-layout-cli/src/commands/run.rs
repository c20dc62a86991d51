//! `vgl run`: lay out a synthetic multi-component graph on the background
//! worker and report the result as JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{debug, info};
use vibe_graph_layout::{
    ComponentId, ForceDirectedLayoutFactory, GraphModel, Iterations,
    LayoutEvent, LayoutSetting, LayoutThread, NodePositions,
};

use crate::config::ConfigArgs;
use crate::sample::{self, SampleSpec};

/// Arguments for `vgl run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Number of connected components to generate.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub components: u32,

    /// Nodes in each component.
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u32).range(1..))]
    pub nodes: u32,

    /// Extra edges per node on top of each component's spanning tree.
    #[arg(long, default_value_t = 0.3)]
    pub edge_density: f32,

    /// Run exactly this many iterations per component instead of until convergence.
    #[arg(long)]
    pub iterations: Option<u32>,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Seed for the graph and the initial positions.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Half extent of the cube initial positions are scattered in.
    #[arg(long, default_value_t = 20.0)]
    pub spread: f32,

    /// Write the report to a file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Omit node positions from the report.
    #[arg(long)]
    pub no_positions: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Per-component outcome.
#[derive(Debug, Serialize)]
pub struct ComponentReport {
    pub id: ComponentId,
    pub nodes: usize,
    pub edges: usize,
    pub iterations: u64,
    pub complete: bool,
    pub progress: Option<u8>,
}

/// Everything `vgl run` prints.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub algorithm: String,
    pub elapsed_ms: u128,
    pub timed_out: bool,
    pub components: Vec<ComponentReport>,
    pub settings: Vec<LayoutSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<[f32; 3]>>,
}

/// Execute `vgl run`.
pub fn execute(args: &RunArgs) -> Result<RunReport> {
    let resolved = args.config.resolve()?;

    let graph = Arc::new(sample::generate(&SampleSpec {
        components: args.components,
        nodes_per_component: args.nodes,
        edge_density: args.edge_density,
        seed: args.seed,
    }));
    let positions = Arc::new(NodePositions::scattered(
        graph.node_capacity(),
        args.spread,
        args.seed,
    ));
    let settings = Arc::new(resolved.settings);

    let iterations = args
        .iterations
        .map_or(Iterations::Unbounded, Iterations::Bounded);
    let factory = ForceDirectedLayoutFactory::new(graph.clone(), positions.clone(), settings.clone())
        .with_convergence(resolved.layout.convergence.clone())
        .with_iterations(iterations);

    let thread = LayoutThread::new(Arc::new(factory));
    let events = thread.events();
    let ids = graph.component_ids();

    info!(
        components = ids.len(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        ?iterations,
        "layout_run_started"
    );

    let start = Instant::now();
    let deadline = start + Duration::from_secs(args.timeout_secs);
    for id in &ids {
        thread
            .try_add(*id)
            .with_context(|| format!("Failed to schedule component {id}"))?;
    }

    let mut complete = BTreeSet::new();
    let mut progress = BTreeMap::new();
    let mut timed_out = false;

    // Bounded layouts report completion when their count runs out
    while complete.len() < ids.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(LayoutEvent::Complete { component }) => {
                debug!(component = component.0, "layout_run_component_complete");
                complete.insert(component);
            }
            Ok(LayoutEvent::Progress {
                component,
                percentage,
            }) => {
                progress.insert(component, percentage);
            }
            Ok(LayoutEvent::Stopped) => break,
            Ok(_) => {}
            Err(_) => {
                timed_out = Instant::now() >= deadline;
                break;
            }
        }
    }

    thread.pause_and_wait();
    let elapsed = start.elapsed();

    let mut components = Vec::with_capacity(ids.len());
    for id in &ids {
        let view = graph
            .component(*id)
            .with_context(|| format!("Component {id} disappeared"))?;
        components.push(ComponentReport {
            id: *id,
            nodes: view.node_ids().len(),
            edges: view.edges().len(),
            iterations: thread.iterations_executed(*id).unwrap_or(0),
            complete: complete.contains(id),
            progress: progress.get(id).copied(),
        });
    }
    thread.stop();

    if !positions.all_finite() {
        bail!("Layout produced non-finite positions");
    }

    info!(
        elapsed_ms = elapsed.as_millis() as u64,
        complete = complete.len(),
        timed_out,
        "layout_run_finished"
    );

    Ok(RunReport {
        algorithm: "ForceDirected".to_string(),
        elapsed_ms: elapsed.as_millis(),
        timed_out,
        components,
        settings: settings.snapshot(),
        positions: (!args.no_positions)
            .then(|| positions.snapshot().iter().map(|p| [p.x, p.y, p.z]).collect()),
    })
}

/// Print a one-line-per-component summary to stderr.
pub fn print_summary(report: &RunReport) {
    eprintln!(
        "Laid out {} components in {} ms{}",
        report.components.len(),
        report.elapsed_ms,
        if report.timed_out { " (timed out)" } else { "" }
    );
    for c in &report.components {
        eprintln!(
            "  {:>4}: {:>4} nodes {:>4} edges {:>6} iterations  {}",
            c.id.to_string(),
            c.nodes,
            c.edges,
            c.iterations,
            if c.complete { "done" } else { "running" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(components: u32, nodes: u32, iterations: Option<u32>) -> RunArgs {
        RunArgs {
            components,
            nodes,
            edge_density: 0.3,
            iterations,
            timeout_secs: 30,
            seed: 7,
            spread: 20.0,
            output: None,
            no_positions: false,
            config: ConfigArgs::default(),
        }
    }

    #[test]
    fn test_bounded_run() {
        let report = execute(&args(3, 8, Some(12))).unwrap();
        assert!(!report.timed_out);
        assert_eq!(report.components.len(), 3);
        for c in &report.components {
            assert_eq!(c.iterations, 12);
            assert!(c.complete);
            assert_eq!(c.nodes, 8);
        }
        assert_eq!(report.positions.as_ref().map(Vec::len), Some(24));
    }

    #[test]
    fn test_run_to_convergence() {
        let report = execute(&args(2, 5, None)).unwrap();
        assert!(!report.timed_out);
        assert!(report.components.iter().all(|c| c.complete));
        assert!(report.components.iter().all(|c| c.progress == Some(100)));
    }
}
