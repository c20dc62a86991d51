//! Shared node position mapping.
//!
//! The mapping is written by the layout worker and read by a renderer on
//! another thread without any locking. Each coordinate is stored as the bit
//! pattern of an `f32` in an `AtomicU32`, so individual coordinates are never
//! torn, but a reader may observe a vector whose x, y and z come from two
//! consecutive iterations. For a continuously animating view that is fine.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{NodeId, Vec3};

/// A fixed-capacity mapping from [`NodeId`] to a 3D position.
#[derive(Debug)]
pub struct NodePositions {
    slots: Vec<[AtomicU32; 3]>,
}

impl NodePositions {
    /// Create a mapping with every node at the origin.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Self::encode(Vec3::zeros())).collect();
        Self { slots }
    }

    /// Create a mapping from explicit positions, indexed by node id.
    pub fn from_slice(positions: &[Vec3]) -> Self {
        let slots = positions.iter().map(|p| Self::encode(*p)).collect();
        Self { slots }
    }

    /// Create a mapping with nodes scattered deterministically inside a cube
    /// of the given half extent.
    pub fn scattered(capacity: usize, half_extent: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let extent = half_extent.abs();

        let slots = (0..capacity)
            .map(|_| {
                let p = Vec3::new(
                    rng.random_range(-extent..=extent),
                    rng.random_range(-extent..=extent),
                    rng.random_range(-extent..=extent),
                );
                Self::encode(p)
            })
            .collect();
        Self { slots }
    }

    /// Number of node slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Read the position of a node.
    pub fn get(&self, node: NodeId) -> Option<Vec3> {
        self.slots.get(node.index()).map(|slot| {
            Vec3::new(
                f32::from_bits(slot[0].load(Ordering::Relaxed)),
                f32::from_bits(slot[1].load(Ordering::Relaxed)),
                f32::from_bits(slot[2].load(Ordering::Relaxed)),
            )
        })
    }

    /// Write the position of a node. Returns `false` if the id is out of range.
    pub fn set(&self, node: NodeId, position: Vec3) -> bool {
        match self.slots.get(node.index()) {
            Some(slot) => {
                slot[0].store(position.x.to_bits(), Ordering::Relaxed);
                slot[1].store(position.y.to_bits(), Ordering::Relaxed);
                slot[2].store(position.z.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Copy out every position, e.g. for one rendered frame.
    pub fn snapshot(&self) -> Vec<Vec3> {
        (0..self.slots.len())
            .filter_map(|i| self.get(NodeId(i as u32)))
            .collect()
    }

    /// Check that every stored coordinate is finite.
    pub fn all_finite(&self) -> bool {
        self.snapshot()
            .iter()
            .all(|p| p.iter().all(|c| c.is_finite()))
    }

    fn encode(position: Vec3) -> [AtomicU32; 3] {
        [
            AtomicU32::new(position.x.to_bits()),
            AtomicU32::new(position.y.to_bits()),
            AtomicU32::new(position.z.to_bits()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_origin() {
        let positions = NodePositions::new(3);
        assert_eq!(positions.capacity(), 3);
        assert_eq!(positions.get(NodeId(2)), Some(Vec3::zeros()));
        assert_eq!(positions.get(NodeId(3)), None);
    }

    #[test]
    fn test_set_and_get() {
        let positions = NodePositions::new(2);
        assert!(positions.set(NodeId(1), Vec3::new(1.0, -2.0, 3.5)));
        assert_eq!(positions.get(NodeId(1)), Some(Vec3::new(1.0, -2.0, 3.5)));
        assert!(!positions.set(NodeId(5), Vec3::zeros()));
    }

    #[test]
    fn test_scattered_is_deterministic_and_bounded() {
        let a = NodePositions::scattered(50, 10.0, 7);
        let b = NodePositions::scattered(50, 10.0, 7);
        assert_eq!(a.snapshot(), b.snapshot());
        assert!(a.all_finite());
        assert!(a
            .snapshot()
            .iter()
            .all(|p| p.iter().all(|c| c.abs() <= 10.0)));

        let c = NodePositions::scattered(50, 10.0, 8);
        assert_ne!(a.snapshot(), c.snapshot());
    }

    #[test]
    fn test_shared_across_threads() {
        let positions = std::sync::Arc::new(NodePositions::new(1));
        let writer = {
            let positions = positions.clone();
            std::thread::spawn(move || {
                for i in 0..1000 {
                    positions.set(NodeId(0), Vec3::repeat(i as f32));
                }
            })
        };
        for _ in 0..1000 {
            let p = positions.get(NodeId(0)).unwrap();
            assert!(p.iter().all(|c| c.is_finite()));
        }
        writer.join().unwrap();
        assert_eq!(positions.get(NodeId(0)), Some(Vec3::repeat(999.0)));
    }
}
