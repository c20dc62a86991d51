//! Force-directed layout for one connected component.
//!
//! Each iteration:
//! 1. accumulates repulsion between every pair of nodes (exact below
//!    [`BARNES_HUT_THRESHOLD`] nodes, Barnes-Hut octree above it) and spring
//!    attraction along every edge,
//! 2. turns the forces into a clipped, damped displacement and moves the node,
//! 3. feeds the mean and standard deviation of the force magnitudes into a
//!    [`ConvergenceDetector`].
//!
//! Once the detector reports [`ConvergencePhase::Finished`] the layout stops
//! moving nodes until [`Layout::unfinish`] is called.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::convergence::{ConvergenceConfig, ConvergenceDetector, ConvergencePhase};
use crate::displacement::ForceDirectedDisplacement;
use crate::layout::{CancelFlag, Iterations, Layout, LayoutFactory};
use crate::model::GraphModel;
use crate::octree::Octree;
use crate::positions::NodePositions;
use crate::settings::{
    LayoutSettings, ATTRACTION_STRENGTH, BARNES_HUT_THETA, DAMPING, MAX_DISPLACEMENT,
    REPULSION_STRENGTH, SPRING_LENGTH,
};
use crate::{ComponentId, NodeId, Vec3};

/// Components with at least this many nodes use the octree for repulsion.
pub const BARNES_HUT_THRESHOLD: usize = 64;

/// Maximum octree depth.
pub const MAX_TREE_DEPTH: usize = 12;

/// Pairs closer than this are treated as being exactly this far apart.
const MIN_DISTANCE: f32 = 0.01;

/// Edges processed between cancellation checks.
const EDGE_CANCEL_STRIDE: usize = 256;

/// Parameter snapshot taken once per iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceDirectedParams {
    pub repulsion: f32,
    pub attraction: f32,
    pub spring_length: f32,
    pub max_displacement: f32,
    pub damping: f32,
    pub theta: f32,
}

impl Default for ForceDirectedParams {
    fn default() -> Self {
        Self {
            repulsion: 1.0,
            attraction: 0.1,
            spring_length: 5.0,
            max_displacement: 10.0,
            damping: 0.5,
            theta: 0.8,
        }
    }
}

impl ForceDirectedParams {
    /// Read the current values, falling back to defaults for missing names.
    pub fn from_settings(settings: &LayoutSettings) -> Self {
        let defaults = Self::default();
        Self {
            repulsion: settings.value_or(REPULSION_STRENGTH, defaults.repulsion),
            attraction: settings.value_or(ATTRACTION_STRENGTH, defaults.attraction),
            spring_length: settings.value_or(SPRING_LENGTH, defaults.spring_length),
            max_displacement: settings.value_or(MAX_DISPLACEMENT, defaults.max_displacement),
            damping: settings.value_or(DAMPING, defaults.damping),
            theta: settings.value_or(BARNES_HUT_THETA, defaults.theta),
        }
    }
}

/// Repulsion exerted on body `i` at `p` by body `j` at `q`.
///
/// Coincident bodies get a deterministic direction that depends only on the
/// pair, with opposite signs for (i, j) and (j, i), so the pair separates
/// instead of producing NaN.
pub(crate) fn repulse(p: &Vec3, q: &Vec3, i: usize, j: usize, strength: f32) -> Vec3 {
    let diff = p - q;
    let distance_sq = diff.norm_squared();

    if distance_sq >= MIN_DISTANCE * MIN_DISTANCE {
        return diff * (strength / distance_sq);
    }

    let direction = if distance_sq > f32::EPSILON * f32::EPSILON {
        diff / distance_sq.sqrt()
    } else {
        tie_break_direction(i, j)
    };
    direction * (strength / MIN_DISTANCE)
}

fn tie_break_direction(i: usize, j: usize) -> Vec3 {
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };

    // splitmix64 of the unordered pair
    let mut z = ((lo as u64) << 32 | (hi as u64 & 0xFFFF_FFFF)).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;

    let u = (z >> 40) as f32 / (1u64 << 24) as f32;
    let v = (z & 0xFF_FFFF) as f32 / (1u64 << 24) as f32;
    let height = 2.0 * u - 1.0;
    let radius = (1.0 - height * height).max(0.0).sqrt();
    let angle = std::f32::consts::TAU * v;
    let direction = Vec3::new(radius * angle.cos(), radius * angle.sin(), height);

    if i < j {
        direction
    } else {
        -direction
    }
}

/// Force-directed layout bound to one component.
pub struct ForceDirectedLayout {
    component_id: ComponentId,
    model: Arc<dyn GraphModel>,
    positions: Arc<NodePositions>,
    settings: Arc<LayoutSettings>,
    cancel: CancelFlag,
    iterations: Iterations,

    nodes: Vec<NodeId>,
    /// Edges as local node indices.
    edges: Vec<(usize, usize)>,
    displacements: Vec<ForceDirectedDisplacement>,
    local_positions: Vec<Vec3>,
    stack: Vec<usize>,

    detector: ConvergenceDetector,
    needs_refresh: bool,
    iteration: u64,
    force_mean: f32,
    force_std_deviation: f32,
}

impl ForceDirectedLayout {
    /// Create a layout for `component_id`, or `None` if the model does not know it.
    pub fn new(
        component_id: ComponentId,
        model: Arc<dyn GraphModel>,
        positions: Arc<NodePositions>,
        settings: Arc<LayoutSettings>,
        convergence: ConvergenceConfig,
    ) -> Option<Self> {
        model.component(component_id)?;

        Some(Self {
            component_id,
            model,
            positions,
            settings,
            cancel: CancelFlag::new(),
            iterations: Iterations::Unbounded,
            nodes: Vec::new(),
            edges: Vec::new(),
            displacements: Vec::new(),
            local_positions: Vec::new(),
            stack: Vec::new(),
            detector: ConvergenceDetector::new(convergence),
            needs_refresh: true,
            iteration: 0,
            force_mean: 0.0,
            force_std_deviation: 0.0,
        })
    }

    pub fn phase(&self) -> ConvergencePhase {
        self.detector.phase()
    }

    /// Completed (non-cancelled) iterations since creation.
    pub fn iteration_count(&self) -> u64 {
        self.iteration
    }

    /// Mean and standard deviation of force magnitudes in the last iteration.
    pub fn force_statistics(&self) -> (f32, f32) {
        (self.force_mean, self.force_std_deviation)
    }

    /// Nodes currently laid out. Empty until the first iteration.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    /// The last refresh left nothing to lay out: the component vanished from
    /// the model or none of its nodes fit the position mapping.
    fn is_vacant(&self) -> bool {
        !self.needs_refresh && self.nodes.is_empty()
    }

    /// Re-read the component view from the model and reset per-node state.
    fn refresh(&mut self) {
        self.needs_refresh = false;

        let Some(view) = self.model.component(self.component_id) else {
            warn!(component = self.component_id.0, "layout_component_missing");
            self.nodes.clear();
            self.edges.clear();
            self.displacements.clear();
            self.local_positions.clear();
            return;
        };

        let capacity = self.positions.capacity();
        let mut nodes = view.node_ids();
        let before = nodes.len();
        nodes.retain(|n| n.index() < capacity);
        if nodes.len() != before {
            warn!(
                component = self.component_id.0,
                dropped = before - nodes.len(),
                "layout_nodes_outside_position_capacity"
            );
        }

        let local: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        self.edges = view
            .edges()
            .into_iter()
            .filter_map(|(a, b)| Some((*local.get(&a)?, *local.get(&b)?)))
            .filter(|(a, b)| a != b)
            .collect();

        self.displacements = vec![ForceDirectedDisplacement::default(); nodes.len()];
        self.local_positions = vec![Vec3::zeros(); nodes.len()];
        self.nodes = nodes;

        debug!(
            component = self.component_id.0,
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "layout_component_loaded"
        );
    }

    /// Accumulate repulsion. Returns `false` if cancelled.
    fn accumulate_repulsion(&mut self, params: &ForceDirectedParams) -> bool {
        let n = self.nodes.len();

        if n >= BARNES_HUT_THRESHOLD {
            let tree = Octree::build(&self.local_positions, MAX_TREE_DEPTH);
            for i in 0..n {
                if self.should_cancel() {
                    return false;
                }
                self.displacements[i].repulsive = tree.repulsion(
                    i,
                    &self.local_positions,
                    params.theta,
                    params.repulsion,
                    &mut self.stack,
                );
            }
        } else {
            for i in 0..n {
                if self.should_cancel() {
                    return false;
                }
                for j in (i + 1)..n {
                    let force = repulse(
                        &self.local_positions[i],
                        &self.local_positions[j],
                        i,
                        j,
                        params.repulsion,
                    );
                    self.displacements[i].repulsive += force;
                    self.displacements[j].repulsive -= force;
                }
            }
        }

        true
    }

    /// Accumulate spring attraction. Returns `false` if cancelled.
    fn accumulate_attraction(&mut self, params: &ForceDirectedParams) -> bool {
        for (k, &(a, b)) in self.edges.iter().enumerate() {
            if k % EDGE_CANCEL_STRIDE == 0 && self.cancel.is_cancelled() {
                return false;
            }

            let diff = self.local_positions[b] - self.local_positions[a];
            let distance = diff.norm();
            if distance < f32::EPSILON {
                continue;
            }

            let force = diff * (params.attraction * (distance - params.spring_length) / distance);
            self.displacements[a].attractive += force;
            self.displacements[b].attractive -= force;
        }

        true
    }
}

impl Layout for ForceDirectedLayout {
    fn component_id(&self) -> ComponentId {
        self.component_id
    }

    fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    fn iterations(&self) -> Iterations {
        self.iterations
    }

    fn set_iterations(&mut self, iterations: Iterations) {
        self.iterations = iterations;
    }

    fn execute_real(&mut self) {
        if self.finished() {
            return;
        }

        if self.needs_refresh {
            self.refresh();
        }

        let n = self.nodes.len();
        if n == 0 {
            return;
        }

        let params = ForceDirectedParams::from_settings(&self.settings);

        for (slot, node) in self.local_positions.iter_mut().zip(&self.nodes) {
            let p = self.positions.get(*node).unwrap_or_else(Vec3::zeros);
            *slot = if p.iter().all(|c| c.is_finite()) {
                p
            } else {
                Vec3::zeros()
            };
        }
        for d in &mut self.displacements {
            d.clear_forces();
        }

        if !self.accumulate_repulsion(&params) || !self.accumulate_attraction(&params) {
            debug!(component = self.component_id.0, "layout_iteration_cancelled");
            return;
        }

        let magnitudes: Vec<f32> = self
            .displacements
            .iter()
            .map(|d| d.force_magnitude())
            .filter(|m| m.is_finite())
            .collect();
        let count = magnitudes.len().max(1) as f32;
        let mean = magnitudes.iter().sum::<f32>() / count;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f32>() / count;
        self.force_mean = mean;
        self.force_std_deviation = variance.sqrt();

        for i in 0..n {
            let displacement =
                self.displacements[i].compute_and_damp(params.max_displacement, params.damping);
            let next = self.local_positions[i] + displacement;
            if next.iter().all(|c| c.is_finite()) {
                self.positions.set(self.nodes[i], next);
            } else {
                self.positions.set(self.nodes[i], self.local_positions[i]);
            }
        }

        self.iteration += 1;
        trace!(
            component = self.component_id.0,
            iteration = self.iteration,
            mean_force = self.force_mean,
            stddev = self.force_std_deviation,
            "layout_iteration"
        );

        let before = self.detector.phase();
        let after = self
            .detector
            .observe(self.force_mean, self.force_std_deviation);
        if before != after {
            debug!(
                component = self.component_id.0,
                from = ?before,
                to = ?after,
                iteration = self.iteration,
                "convergence_phase_changed"
            );
        }
    }

    fn should_pause(&self) -> bool {
        self.finished()
    }

    fn finished(&self) -> bool {
        self.detector.finished() || self.is_vacant()
    }

    fn unfinish(&mut self) {
        self.detector.reset();
        self.needs_refresh = true;
    }

    fn progress(&self) -> Option<u8> {
        if self.is_vacant() {
            return Some(100);
        }
        Some(self.detector.progress())
    }
}

impl std::fmt::Debug for ForceDirectedLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForceDirectedLayout")
            .field("component_id", &self.component_id)
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .field("phase", &self.detector.phase())
            .field("iteration", &self.iteration)
            .finish()
    }
}

/// Builds [`ForceDirectedLayout`]s against a shared model, position mapping
/// and settings object.
pub struct ForceDirectedLayoutFactory {
    model: Arc<dyn GraphModel>,
    positions: Arc<NodePositions>,
    settings: Arc<LayoutSettings>,
    convergence: ConvergenceConfig,
    iterations: Iterations,
}

impl ForceDirectedLayoutFactory {
    pub fn new(
        model: Arc<dyn GraphModel>,
        positions: Arc<NodePositions>,
        settings: Arc<LayoutSettings>,
    ) -> Self {
        Self {
            model,
            positions,
            settings,
            convergence: ConvergenceConfig::default(),
            iterations: Iterations::Unbounded,
        }
    }

    /// Use custom convergence tuning for every layout created from now on.
    pub fn with_convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }

    /// Give created layouts a fixed iteration count instead of running unbounded.
    pub fn with_iterations(mut self, iterations: Iterations) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn model(&self) -> &Arc<dyn GraphModel> {
        &self.model
    }

    pub fn positions(&self) -> &Arc<NodePositions> {
        &self.positions
    }

    pub fn settings(&self) -> &Arc<LayoutSettings> {
        &self.settings
    }
}

impl LayoutFactory for ForceDirectedLayoutFactory {
    fn name(&self) -> &str {
        "ForceDirected"
    }

    fn create(&self, component: ComponentId) -> Option<Box<dyn Layout>> {
        let mut layout = ForceDirectedLayout::new(
            component,
            self.model.clone(),
            self.positions.clone(),
            self.settings.clone(),
            self.convergence.clone(),
        )?;
        layout.set_iterations(self.iterations);
        Some(Box::new(layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticGraph;

    fn two_node_layout() -> (ForceDirectedLayout, Arc<NodePositions>) {
        let model: Arc<dyn GraphModel> = Arc::new(StaticGraph::with_edges(2, &[(0, 1)]));
        let positions = Arc::new(NodePositions::from_slice(&[
            Vec3::zeros(),
            Vec3::new(10.0, 0.0, 0.0),
        ]));
        let layout = ForceDirectedLayout::new(
            ComponentId(0),
            model,
            positions.clone(),
            Arc::new(LayoutSettings::force_directed()),
            ConvergenceConfig::default(),
        )
        .unwrap();
        (layout, positions)
    }

    fn distance(positions: &NodePositions) -> f32 {
        (positions.get(NodeId(1)).unwrap() - positions.get(NodeId(0)).unwrap()).norm()
    }

    #[test]
    fn test_unknown_component() {
        let model: Arc<dyn GraphModel> = Arc::new(StaticGraph::with_edges(2, &[(0, 1)]));
        let layout = ForceDirectedLayout::new(
            ComponentId(7),
            model,
            Arc::new(NodePositions::new(2)),
            Arc::new(LayoutSettings::force_directed()),
            ConvergenceConfig::default(),
        );
        assert!(layout.is_none());
    }

    #[test]
    fn test_repulse_is_antisymmetric() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        let q = Vec3::new(-1.0, 0.5, 2.0);
        let a = repulse(&p, &q, 0, 1, 1.0);
        let b = repulse(&q, &p, 1, 0, 1.0);
        assert!((a + b).norm() < 1e-6);
        // Points away from q
        assert!(a.dot(&(p - q)) > 0.0);
    }

    #[test]
    fn test_coincident_tie_break() {
        let p = Vec3::repeat(3.0);
        let a = repulse(&p, &p, 4, 9, 1.0);
        let b = repulse(&p, &p, 9, 4, 1.0);
        assert!(a.iter().all(|c| c.is_finite()));
        assert!((a.norm() - 1.0 / MIN_DISTANCE).abs() < 1e-2);
        assert!((a + b).norm() < 1e-4);
        // Deterministic
        assert_eq!(a, repulse(&p, &p, 4, 9, 1.0));
        // Different pairs get different directions
        assert_ne!(a.normalize(), repulse(&p, &p, 4, 10, 1.0).normalize());
    }

    #[test]
    fn test_two_nodes_converge_monotonically() {
        let (mut layout, positions) = two_node_layout();
        let mut distances = vec![distance(&positions)];

        for _ in 0..5000 {
            layout.execute();
            distances.push(distance(&positions));
            if layout.should_pause() {
                break;
            }
        }

        assert!(layout.finished());
        assert_eq!(layout.phase(), ConvergencePhase::Finished);

        for pair in distances.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-4, "distance grew: {pair:?}");
        }

        // spring_length 5, repulsion 1, attraction 0.1: 0.1 (d - 5) = 1 / d
        let equilibrium = (5.0 + 65.0f32.sqrt()) / 2.0;
        let last = *distances.last().unwrap();
        assert!((last - equilibrium).abs() < 0.01, "last = {last}");

        let tail = &distances[distances.len() - 50..];
        let spread = tail.iter().cloned().fold(f32::MIN, f32::max)
            - tail.iter().cloned().fold(f32::MAX, f32::min);
        assert!(spread < 1e-3);
    }

    #[test]
    fn test_finished_layout_does_not_move_nodes() {
        let (mut layout, positions) = two_node_layout();
        while !layout.finished() {
            layout.execute();
        }
        let before = positions.snapshot();
        let iteration = layout.iteration_count();
        for _ in 0..10 {
            layout.execute();
        }
        assert_eq!(positions.snapshot(), before);
        assert_eq!(layout.iteration_count(), iteration);
    }

    #[test]
    fn test_unfinish_resets_phase() {
        let (mut layout, positions) = two_node_layout();
        while !layout.finished() {
            layout.execute();
        }
        assert!(layout.should_pause());

        layout.unfinish();
        assert_eq!(layout.phase(), ConvergencePhase::Initial);
        assert!(!layout.should_pause());

        // Disturb and make sure it settles again
        positions.set(NodeId(1), Vec3::new(30.0, 0.0, 0.0));
        for _ in 0..5000 {
            layout.execute();
            if layout.should_pause() {
                break;
            }
        }
        assert!(layout.finished());
    }

    #[test]
    fn test_cancelled_iteration_leaves_positions_untouched() {
        let (mut layout, positions) = two_node_layout();
        let before = positions.snapshot();

        // Cancel from inside the iteration by cancelling right before
        // `execute_real`, bypassing the reset done by `execute`.
        layout.cancel();
        layout.execute_real();

        assert_eq!(positions.snapshot(), before);
        assert_eq!(layout.iteration_count(), 0);

        layout.execute();
        assert_ne!(positions.snapshot(), before);
        assert_eq!(layout.iteration_count(), 1);
    }

    #[test]
    fn test_large_component_stays_finite_from_origin() {
        // Everything starts coincident; the tie-break has to separate it.
        let n = 150u32;
        let edges: Vec<(u32, u32)> = (1..n).map(|i| ((i * 7) % i, i)).collect();
        let model: Arc<dyn GraphModel> = Arc::new(StaticGraph::with_edges(n, &edges));
        let positions = Arc::new(NodePositions::new(n as usize));
        let mut layout = ForceDirectedLayout::new(
            ComponentId(0),
            model,
            positions.clone(),
            Arc::new(LayoutSettings::force_directed()),
            ConvergenceConfig::default(),
        )
        .unwrap();

        for _ in 0..100 {
            layout.execute();
            assert!(positions.all_finite());
        }
        assert_eq!(layout.node_ids().len(), n as usize);

        let snapshot = positions.snapshot();
        let spread = snapshot
            .iter()
            .map(|p| p.norm())
            .fold(0.0f32, f32::max);
        assert!(spread > 1.0);
    }

    #[test]
    fn test_component_without_positions_finishes() {
        // Component 1 holds nodes 1 and 2, neither of which has a position slot
        let model: Arc<dyn GraphModel> = Arc::new(StaticGraph::with_edges(3, &[(1, 2)]));
        let positions = Arc::new(NodePositions::new(1));
        let mut layout = ForceDirectedLayout::new(
            ComponentId(1),
            model,
            positions.clone(),
            Arc::new(LayoutSettings::force_directed()),
            ConvergenceConfig::default(),
        )
        .unwrap();

        assert!(!layout.should_pause());
        layout.execute();
        assert!(layout.node_ids().is_empty());
        assert!(layout.finished());
        assert!(layout.should_pause());
        assert_eq!(layout.progress(), Some(100));
        assert_eq!(positions.snapshot(), vec![Vec3::zeros()]);

        // Unfinish re-reads the view and lands in the same place
        layout.unfinish();
        assert!(!layout.should_pause());
        layout.execute();
        assert!(layout.should_pause());
    }

    #[test]
    fn test_settings_are_read_each_iteration() {
        let (mut layout, positions) = two_node_layout();
        layout.settings.set(ATTRACTION_STRENGTH, 0.005).unwrap();
        layout.settings.set(REPULSION_STRENGTH, 10.0).unwrap();
        layout.execute();
        // Repulsion dominates: the nodes move apart
        assert!(distance(&positions) > 10.0);
    }

    #[test]
    fn test_factory_creates_bound_layouts() {
        let model: Arc<dyn GraphModel> = Arc::new(StaticGraph::with_edges(4, &[(0, 1), (2, 3)]));
        let factory = ForceDirectedLayoutFactory::new(
            model,
            Arc::new(NodePositions::new(4)),
            Arc::new(LayoutSettings::force_directed()),
        )
        .with_iterations(Iterations::Bounded(3));

        assert_eq!(factory.name(), "ForceDirected");
        let layout = factory.create(ComponentId(1)).unwrap();
        assert_eq!(layout.component_id(), ComponentId(1));
        assert_eq!(layout.iterations(), Iterations::Bounded(3));
        assert!(factory.create(ComponentId(2)).is_none());
    }
}
