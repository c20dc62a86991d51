//! Single large component, iterated directly without the worker thread.
//!
//! Run with: cargo run --example large_graph --release

use std::sync::Arc;
use std::time::Instant;

use vibe_graph_layout::{
    ComponentId, ConvergenceConfig, ForceDirectedLayout, GraphModel, Layout, LayoutSettings,
    NodePositions, StaticGraph,
};

fn main() {
    tracing_subscriber::fmt::init();

    let node_count: u32 = 5000;
    let extra_edges: u32 = 2000;

    // Path plus pseudo-random chords keeps everything in one component
    let mut edges: Vec<(u32, u32)> = (1..node_count).map(|i| (i - 1, i)).collect();
    for i in 0..extra_edges {
        let source = (i * 17) % node_count;
        let target = (i * 31 + 7) % node_count;
        if source != target {
            edges.push((source, target));
        }
    }

    println!("=== Barnes-Hut Force-Directed Layout ===");
    println!("Graph: {} nodes, {} edges", node_count, edges.len());

    let graph = Arc::new(StaticGraph::with_edges(node_count, &edges));
    let positions = Arc::new(NodePositions::scattered(graph.node_capacity(), 200.0, 42));
    let mut layout = ForceDirectedLayout::new(
        ComponentId(0),
        graph,
        positions.clone(),
        Arc::new(LayoutSettings::force_directed()),
        ConvergenceConfig::default(),
    )
    .expect("component 0 exists");

    let iterations = 200;
    let start = Instant::now();
    for i in 0..iterations {
        layout.execute();
        if i % 20 == 0 {
            let (mean, stddev) = layout.force_statistics();
            println!(
                "Iteration {:>4}: phase = {:?}, mean force = {:.4}, stddev = {:.4}",
                i,
                layout.phase(),
                mean,
                stddev
            );
        }
        if layout.finished() {
            println!("Converged at iteration {}", i);
            break;
        }
    }

    let elapsed = start.elapsed();
    let rate = layout.iteration_count() as f64 / elapsed.as_secs_f64();
    println!(
        "\nCompleted {} iterations in {:.2?} ({:.1} iterations/sec)",
        layout.iteration_count(),
        elapsed,
        rate
    );
    println!("All positions finite: {}", positions.all_finite());
}
