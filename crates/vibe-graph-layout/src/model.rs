//! Read-only graph views consumed by layout algorithms.
//!
//! The graph itself is owned elsewhere. Layouts only need to know which nodes
//! belong to a component and which edges join them, so the seam is two small
//! traits. [`StaticGraph`] is a ready-made model backed by petgraph.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, NodeIndexable};

use crate::{ComponentId, NodeId};

/// A read-only view of one connected component.
pub trait GraphComponent: Send + Sync {
    /// Nodes in the component.
    fn node_ids(&self) -> Vec<NodeId>;

    /// Edges in the component as (source, target) pairs.
    fn edges(&self) -> Vec<(NodeId, NodeId)>;
}

/// The external graph model a layout factory builds component views from.
pub trait GraphModel: Send + Sync {
    /// Look up the current view of a component.
    fn component(&self, id: ComponentId) -> Option<Arc<dyn GraphComponent>>;

    /// All component ids currently present.
    fn component_ids(&self) -> Vec<ComponentId>;

    /// Size of per-node tables (one past the largest node id ever issued).
    fn node_capacity(&self) -> usize;
}

/// An owned snapshot of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticComponent {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<(NodeId, NodeId)>,
}

impl GraphComponent for StaticComponent {
    fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.clone()
    }

    fn edges(&self) -> Vec<(NodeId, NodeId)> {
        self.edges.clone()
    }
}

#[derive(Debug, Default)]
struct StaticGraphInner {
    graph: StableUnGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
    next_node: u32,
    components: Vec<Arc<StaticComponent>>,
}

/// An undirected graph that partitions itself into connected components.
///
/// Component ids are assigned in order of each component's smallest node id,
/// so they are stable for a given topology. Mutations take `&self` so the
/// model can be shared with a layout factory and edited afterwards.
#[derive(Debug, Default)]
pub struct StaticGraph {
    inner: RwLock<StaticGraphInner>,
}

impl StaticGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with `nodes` nodes and the given edges.
    pub fn with_edges(nodes: u32, edges: &[(u32, u32)]) -> Self {
        let graph = Self::new();
        {
            let mut inner = graph.write();
            for _ in 0..nodes {
                inner.insert_node();
            }
            for &(a, b) in edges {
                inner.insert_edge(NodeId(a), NodeId(b));
            }
            inner.rebuild_components();
        }
        graph
    }

    /// Add an isolated node and return its id.
    pub fn add_node(&self) -> NodeId {
        let mut inner = self.write();
        let id = inner.insert_node();
        inner.rebuild_components();
        id
    }

    /// Join two nodes. Returns `false` if either node does not exist.
    pub fn add_edge(&self, a: NodeId, b: NodeId) -> bool {
        let mut inner = self.write();
        if !inner.insert_edge(a, b) {
            return false;
        }
        inner.rebuild_components();
        true
    }

    /// Remove a node and its incident edges.
    pub fn remove_node(&self, node: NodeId) -> bool {
        let mut inner = self.write();
        let Some(index) = inner.indices.remove(&node) else {
            return false;
        };
        inner.graph.remove_node(index);
        inner.rebuild_components();
        true
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.read().graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.read().graph.edge_count()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StaticGraphInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StaticGraphInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl StaticGraphInner {
    fn insert_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let index = self.graph.add_node(id);
        self.indices.insert(id, index);
        id
    }

    fn insert_edge(&mut self, a: NodeId, b: NodeId) -> bool {
        let (Some(&ia), Some(&ib)) = (self.indices.get(&a), self.indices.get(&b)) else {
            return false;
        };
        self.graph.add_edge(ia, ib, ());
        true
    }

    fn rebuild_components(&mut self) {
        let mut sets = UnionFind::<usize>::new(self.graph.node_bound());
        for edge in self.graph.edge_references() {
            sets.union(edge.source().index(), edge.target().index());
        }

        // Group by representative, ordered by smallest node id.
        let mut order: Vec<NodeId> = self.indices.keys().copied().collect();
        order.sort();

        let mut by_root: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<StaticComponent> = Vec::new();
        for node in order {
            let root = sets.find(self.indices[&node].index());
            let slot = *by_root.entry(root).or_insert_with(|| {
                components.push(StaticComponent::default());
                components.len() - 1
            });
            components[slot].nodes.push(node);
        }

        for edge in self.graph.edge_references() {
            let a = self.graph[edge.source()];
            let b = self.graph[edge.target()];
            let root = sets.find(edge.source().index());
            if let Some(&slot) = by_root.get(&root) {
                components[slot].edges.push((a, b));
            }
        }

        self.components = components.into_iter().map(Arc::new).collect();
    }
}

impl GraphModel for StaticGraph {
    fn component(&self, id: ComponentId) -> Option<Arc<dyn GraphComponent>> {
        self.read()
            .components
            .get(id.0 as usize)
            .map(|c| c.clone() as Arc<dyn GraphComponent>)
    }

    fn component_ids(&self) -> Vec<ComponentId> {
        (0..self.read().components.len())
            .map(|i| ComponentId(i as u32))
            .collect()
    }

    fn node_capacity(&self) -> usize {
        self.read().next_node as usize
    }
}
