//! Per-node force accumulator for the force-directed layout.

use crate::Vec3;

/// Forces gathered for one node during an iteration, plus the displacement
/// applied in the previous iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceDirectedDisplacement {
    pub repulsive: Vec3,
    pub attractive: Vec3,

    pub previous: Vec3,
    pub previous_length: f32,
}

impl Default for ForceDirectedDisplacement {
    fn default() -> Self {
        Self {
            repulsive: Vec3::zeros(),
            attractive: Vec3::zeros(),
            previous: Vec3::zeros(),
            previous_length: 0.0,
        }
    }
}

impl ForceDirectedDisplacement {
    /// Clear the force accumulators, keeping the previous displacement.
    pub fn clear_forces(&mut self) {
        self.repulsive = Vec3::zeros();
        self.attractive = Vec3::zeros();
    }

    /// Magnitude of the combined force before clipping and damping.
    pub fn force_magnitude(&self) -> f32 {
        (self.repulsive + self.attractive).norm()
    }

    /// Combine the accumulated forces into the next displacement.
    ///
    /// The result is clipped to `max_displacement`. When it points against the
    /// previous displacement (cosine < 0) it is scaled by
    /// `1 + damping * cosine`, which suppresses back-and-forth motion while
    /// leaving steady motion untouched. The result then becomes `previous`.
    pub fn compute_and_damp(&mut self, max_displacement: f32, damping: f32) -> Vec3 {
        let mut next = self.repulsive + self.attractive;
        let mut length = next.norm();

        if !length.is_finite() {
            next = Vec3::zeros();
            length = 0.0;
        }

        if length > max_displacement {
            next *= max_displacement / length;
            length = max_displacement;
        }

        if self.previous_length > 0.0 && length > 0.0 {
            let cosine = next.dot(&self.previous) / (length * self.previous_length);
            if cosine < 0.0 {
                let scale = (1.0 + damping * cosine).max(0.0);
                next *= scale;
                length *= scale;
            }
        }

        self.previous = next;
        self.previous_length = length;

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combines_forces() {
        let mut d = ForceDirectedDisplacement {
            repulsive: Vec3::new(1.0, 0.0, 0.0),
            attractive: Vec3::new(0.0, 2.0, 0.0),
            ..Default::default()
        };
        let next = d.compute_and_damp(10.0, 0.5);
        assert_eq!(next, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(d.previous, next);
        assert!((d.previous_length - 5.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_clips_to_max() {
        let mut d = ForceDirectedDisplacement {
            repulsive: Vec3::new(30.0, 40.0, 0.0),
            ..Default::default()
        };
        let next = d.compute_and_damp(5.0, 0.5);
        assert!((next.norm() - 5.0).abs() < 1e-5);
        assert!((next.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_reversal_is_damped() {
        let mut d = ForceDirectedDisplacement::default();
        d.repulsive = Vec3::new(1.0, 0.0, 0.0);
        d.compute_and_damp(10.0, 0.5);

        d.clear_forces();
        d.repulsive = Vec3::new(-1.0, 0.0, 0.0);
        let next = d.compute_and_damp(10.0, 0.5);
        assert!((next.x + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_steady_motion_is_not_damped() {
        let mut d = ForceDirectedDisplacement::default();
        d.attractive = Vec3::new(0.0, 0.0, 2.0);
        d.compute_and_damp(10.0, 0.9);
        d.clear_forces();
        d.attractive = Vec3::new(0.0, 0.0, 1.0);
        let next = d.compute_and_damp(10.0, 0.9);
        assert_eq!(next, Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_non_finite_force_is_discarded() {
        let mut d = ForceDirectedDisplacement {
            repulsive: Vec3::new(f32::INFINITY, 0.0, 0.0),
            ..Default::default()
        };
        let next = d.compute_and_damp(10.0, 0.5);
        assert_eq!(next, Vec3::zeros());
        assert_eq!(d.previous_length, 0.0);
    }
}
