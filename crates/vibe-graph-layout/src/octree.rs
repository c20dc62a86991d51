//! Barnes-Hut octree for O(n log n) repulsion.
//!
//! The octree recursively subdivides space and computes the center of mass
//! of each cell. Cells that are far away relative to their width are treated
//! as a single body, which turns the O(n²) pairwise repulsion into roughly
//! O(n log n) per iteration.

use crate::force_directed::repulse;
use crate::Vec3;

/// One cell of the flattened tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctreeNode {
    /// Center of mass of the bodies in this cell.
    pub center_of_mass: Vec3,
    /// Number of bodies in this cell.
    pub mass: f32,
    /// Minimum corner of the cell.
    pub origin: Vec3,
    /// Edge length of the (cubic) cell.
    pub width: f32,
    /// Child cell indices, -1 where empty. All -1 for leaves.
    pub children: [i32; 8],
    /// Range into the body order, only meaningful for leaves.
    pub first: u32,
    pub count: u32,
}

impl OctreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.iter().all(|&c| c < 0)
    }

    fn contains(&self, p: &Vec3) -> bool {
        let max = self.origin + Vec3::repeat(self.width);
        (0..3).all(|axis| p[axis] >= self.origin[axis] && p[axis] <= max[axis])
    }
}

/// A Barnes-Hut octree over a slice of body positions.
#[derive(Debug)]
pub struct Octree {
    nodes: Vec<OctreeNode>,
    /// Body indices grouped by leaf.
    order: Vec<usize>,
    bounds_min: Vec3,
    bounds_max: Vec3,
}

impl Octree {
    /// Build an octree from body positions.
    ///
    /// # Arguments
    /// * `positions` - Slice of body positions
    /// * `max_depth` - Maximum tree depth; bodies that still share a cell at
    ///   this depth end up in one leaf
    pub fn build(positions: &[Vec3], max_depth: usize) -> Self {
        if positions.is_empty() {
            return Self {
                nodes: Vec::new(),
                order: Vec::new(),
                bounds_min: Vec3::zeros(),
                bounds_max: Vec3::zeros(),
            };
        }

        let mut min = Vec3::repeat(f32::MAX);
        let mut max = Vec3::repeat(f32::MIN);
        for p in positions {
            min = min.inf(p);
            max = max.sup(p);
        }

        // Pad, then make it a cube
        let extent = max - min;
        let padding = (extent.max() * 0.1).max(1.0);
        min -= Vec3::repeat(padding);
        max += Vec3::repeat(padding);

        let width = (max - min).max();
        let center = (min + max) / 2.0;
        let bounds_min = center - Vec3::repeat(width / 2.0);
        let bounds_max = center + Vec3::repeat(width / 2.0);

        let mut nodes = Vec::with_capacity(positions.len() * 2);
        let mut order = Vec::with_capacity(positions.len());
        let mut builder = TreeBuilder {
            positions,
            nodes: &mut nodes,
            order: &mut order,
            max_depth,
        };

        let indices: Vec<usize> = (0..positions.len()).collect();
        builder.build_node(&indices, bounds_min, width, 0);

        Self {
            nodes,
            order,
            bounds_min,
            bounds_max,
        }
    }

    /// The flattened tree; the root is at index 0.
    pub fn nodes(&self) -> &[OctreeNode] {
        &self.nodes
    }

    /// Get the bounding cube.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bounds_min, self.bounds_max)
    }

    /// Approximate repulsion on body `index` from every other body.
    ///
    /// `stack` is scratch space reused across calls.
    pub fn repulsion(
        &self,
        index: usize,
        positions: &[Vec3],
        theta: f32,
        strength: f32,
        stack: &mut Vec<usize>,
    ) -> Vec3 {
        let mut force = Vec3::zeros();
        if self.nodes.is_empty() {
            return force;
        }

        let p = positions[index];
        stack.clear();
        stack.push(0);

        while let Some(k) = stack.pop() {
            let node = &self.nodes[k];

            if node.is_leaf() {
                let first = node.first as usize;
                for &j in &self.order[first..first + node.count as usize] {
                    if j != index {
                        force += repulse(&p, &positions[j], index, j, strength);
                    }
                }
                continue;
            }

            let diff = p - node.center_of_mass;
            let distance = diff.norm();
            if !node.contains(&p) && distance > 0.0 && node.width / distance < theta {
                force += diff * (strength * node.mass / (distance * distance));
            } else {
                stack.extend(node.children.iter().filter(|&&c| c >= 0).map(|&c| c as usize));
            }
        }

        force
    }
}

struct TreeBuilder<'a> {
    positions: &'a [Vec3],
    nodes: &'a mut Vec<OctreeNode>,
    order: &'a mut Vec<usize>,
    max_depth: usize,
}

impl<'a> TreeBuilder<'a> {
    fn build_node(&mut self, indices: &[usize], origin: Vec3, width: f32, depth: usize) -> i32 {
        if indices.is_empty() {
            return -1;
        }

        let node_idx = self.nodes.len();
        let mass = indices.len() as f32;
        let center_of_mass = indices
            .iter()
            .fold(Vec3::zeros(), |acc, &i| acc + self.positions[i])
            / mass;

        self.nodes.push(OctreeNode {
            center_of_mass,
            mass,
            origin,
            width,
            children: [-1; 8],
            first: 0,
            count: 0,
        });

        if indices.len() == 1 || depth >= self.max_depth {
            self.nodes[node_idx].first = self.order.len() as u32;
            self.nodes[node_idx].count = indices.len() as u32;
            self.order.extend_from_slice(indices);
            return node_idx as i32;
        }

        // Octant bit 0: x, bit 1: y, bit 2: z
        let half_width = width / 2.0;
        let mid = origin + Vec3::repeat(half_width);
        let mut octants: [Vec<usize>; 8] = Default::default();
        for &i in indices {
            let p = &self.positions[i];
            let octant = usize::from(p.x >= mid.x)
                | usize::from(p.y >= mid.y) << 1
                | usize::from(p.z >= mid.z) << 2;
            octants[octant].push(i);
        }

        let mut children = [-1; 8];
        for (octant, bodies) in octants.iter().enumerate() {
            let child_origin = Vec3::new(
                if octant & 1 != 0 { mid.x } else { origin.x },
                if octant & 2 != 0 { mid.y } else { origin.y },
                if octant & 4 != 0 { mid.z } else { origin.z },
            );
            children[octant] = self.build_node(bodies, child_origin, half_width, depth + 1);
        }
        self.nodes[node_idx].children = children;

        node_idx as i32
    }
}
