//! Lays out a handful of small components on the background worker.
//!
//! Run with: cargo run --example simple_layout

use std::sync::Arc;
use std::time::{Duration, Instant};

use vibe_graph_layout::{
    ComponentId, ForceDirectedLayoutFactory, GraphModel, LayoutEvent, LayoutSettings,
    LayoutThread, NodePositions, StaticGraph,
};

fn main() {
    tracing_subscriber::fmt::init();

    // Three components: a triangle, a square and a star
    let edges = [
        (0, 1),
        (1, 2),
        (2, 0),
        (3, 4),
        (4, 5),
        (5, 6),
        (6, 3),
        (7, 8),
        (7, 9),
        (7, 10),
        (7, 11),
    ];
    let graph = Arc::new(StaticGraph::with_edges(12, &edges));
    let positions = Arc::new(NodePositions::scattered(graph.node_capacity(), 20.0, 7));

    let factory = ForceDirectedLayoutFactory::new(
        graph.clone(),
        positions.clone(),
        Arc::new(LayoutSettings::force_directed()),
    );
    let thread = LayoutThread::new(Arc::new(factory));
    let events = thread.events();

    let components = graph.component_ids();
    println!("Laying out {} components...", components.len());
    for id in &components {
        thread.add(*id);
    }

    let start = Instant::now();
    let mut remaining = components.len();
    while remaining > 0 {
        match events.recv_timeout(Duration::from_secs(30)) {
            Ok(LayoutEvent::Complete { component }) => {
                remaining -= 1;
                println!(
                    "  {} converged after {} iterations ({:.2?})",
                    component,
                    thread.iterations_executed(component).unwrap_or(0),
                    start.elapsed()
                );
            }
            Ok(_) => {}
            Err(_) => {
                println!("Timed out waiting for convergence");
                break;
            }
        }
    }

    thread.pause_and_wait();
    println!("\nFinal positions:");
    for (i, p) in positions.snapshot().iter().enumerate() {
        println!("  n{}: ({:.2}, {:.2}, {:.2})", i, p.x, p.y, p.z);
    }

    thread.remove(ComponentId(0));
    println!("\nRemaining components: {:?}", thread.component_ids());
}
