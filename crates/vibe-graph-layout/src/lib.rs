//! Background force-directed 3D layout for graphs with many connected components.
//!
//! This crate keeps one iterative layout algorithm per connected component and
//! multiplexes all of them onto a single worker thread. Client code (a document,
//! a UI session) adds and removes components as the topology changes; a renderer
//! reads the shared [`NodePositions`] once per frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Client threads                         │
//! │   add / remove / pause / pause_and_wait / resume / stop      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  LayoutThread (one worker)                   │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │ component 0 │──▶│ component 1 │──▶│ component n │──┐      │
//! │  │  execute()  │   │  execute()  │   │  execute()  │  │      │
//! │  └─────────────┘   └─────────────┘   └─────────────┘  │      │
//! │         ▲                                             │      │
//! │         └────────── next pass, or park ◀──────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │              NodePositions (read by the renderer)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each [`ForceDirectedLayout`] iteration accumulates repulsion (exact for small
//! components, Barnes-Hut octree for large ones) and edge attraction, damps the
//! resulting displacement against the previous one and feeds force statistics
//! into a [`ConvergenceDetector`]. Once every component reports that it has
//! converged the worker parks itself until something changes.

mod convergence;
mod displacement;
mod error;
mod events;
mod force_directed;
mod layout;
mod model;
mod octree;
mod positions;
mod scheduler;
mod settings;

use serde::{Deserialize, Serialize};

pub use convergence::{ConvergenceConfig, ConvergenceDetector, ConvergencePhase};
pub use displacement::ForceDirectedDisplacement;
pub use error::{LayoutError, LayoutResult};
pub use events::{LayoutEvent, EVENT_CHANNEL_CAPACITY};
pub use force_directed::{
    ForceDirectedLayout, ForceDirectedLayoutFactory, ForceDirectedParams, BARNES_HUT_THRESHOLD,
    MAX_TREE_DEPTH,
};
pub use layout::{CancelFlag, Iterations, Layout, LayoutFactory};
pub use model::{GraphComponent, GraphModel, StaticComponent, StaticGraph};
pub use octree::{Octree, OctreeNode};
pub use positions::NodePositions;
pub use scheduler::{LayoutThread, SchedulerState};
pub use settings::{
    LayoutConfig, LayoutSetting, LayoutSettings, ATTRACTION_STRENGTH, BARNES_HUT_THETA, DAMPING,
    MAX_DISPLACEMENT, REPULSION_STRENGTH, SPRING_LENGTH,
};

/// A 3D vector used for positions, forces and displacements.
pub type Vec3 = nalgebra::Vector3<f32>;

/// Handle of a node in the externally owned graph.
///
/// Node ids index the shared position mapping directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index into per-node arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a connected component in the externally owned graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}
