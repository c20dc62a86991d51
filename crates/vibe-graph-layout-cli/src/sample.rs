//! Synthetic multi-component graphs for driving the layout worker.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vibe_graph_layout::StaticGraph;

/// Shape of a generated graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleSpec {
    pub components: u32,
    pub nodes_per_component: u32,
    /// Extra edges per node on top of the spanning tree.
    pub edge_density: f32,
    pub seed: u64,
}

/// Generate `components` disjoint random trees with extra chords.
///
/// Node ids are contiguous per component, so component `k` owns nodes
/// `k * nodes_per_component .. (k + 1) * nodes_per_component`.
pub fn generate(spec: &SampleSpec) -> StaticGraph {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let n = spec.nodes_per_component;
    let mut edges = Vec::new();

    for component in 0..spec.components {
        let base = component * n;

        for i in 1..n {
            let parent = rng.random_range(0..i);
            edges.push((base + parent, base + i));
        }

        if n > 1 {
            let extra = (spec.edge_density.max(0.0) * n as f32).round() as u32;
            for _ in 0..extra {
                let a = rng.random_range(0..n);
                let b = rng.random_range(0..n);
                if a != b {
                    edges.push((base + a, base + b));
                }
            }
        }
    }

    StaticGraph::with_edges(spec.components * n, &edges)
}
