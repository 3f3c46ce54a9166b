//! Conserved-quantity aggregates used for diagnostics readback

use crate::element::{Body, Element, RopeNode};
use crate::kernels::{BodyConstants, RopeConstants};
use glam::Vec2;

/// Total momentum and energy of a readback.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregate {
    pub momentum: Vec2,
    pub energy: f32,
    /// `energy` minus the energy of the construction-time state
    pub energy_drift: f32,
}

impl Aggregate {
    pub fn new(momentum: Vec2, energy: f32) -> Self {
        Self {
            momentum,
            energy,
            energy_drift: 0.0,
        }
    }

    pub fn relative_to(self, initial_energy: f32) -> Self {
        Self {
            energy_drift: self.energy - initial_energy,
            ..self
        }
    }
}

/// Σ m v over all bodies.
pub fn body_momentum(bodies: &[Body]) -> Vec2 {
    bodies.iter().map(|b| b.mass * b.velocity_xy()).sum()
}

/// Σ ½ m v²
pub fn body_kinetic_energy(bodies: &[Body]) -> f32 {
    bodies
        .iter()
        .map(|b| 0.5 * b.mass * b.velocity_xy().length_squared())
        .sum()
}

/// Potential of the 1/r attraction: U = Σ_{i<j} G m_i m_j ln(max(r, r_th)).
pub fn body_potential_energy(c: &BodyConstants, bodies: &[Body]) -> f32 {
    let mut u = 0.0;
    for (i, a) in bodies.iter().enumerate() {
        for b in &bodies[i + 1..] {
            let r = (b.xy() - a.xy()).length().max(c.threshold);
            u += c.attraction * a.mass * b.mass * r.ln();
        }
    }
    u
}

pub fn body_aggregate(c: &BodyConstants, bodies: &[Body]) -> Aggregate {
    Aggregate::new(
        body_momentum(bodies),
        body_kinetic_energy(bodies) + body_potential_energy(c, bodies),
    )
}

/// Rope energy: kinetic, gravitational and elastic terms.
pub fn rope_aggregate(c: &RopeConstants, nodes: &[RopeNode]) -> Aggregate {
    let momentum: Vec2 = nodes.iter().map(|n| c.mass * n.velocity_xy()).sum();

    let kinetic: f32 = nodes
        .iter()
        .map(|n| 0.5 * c.mass * n.velocity_xy().length_squared())
        .sum();

    let gravitational: f32 = nodes
        .iter()
        .filter(|n| n.is_free())
        .map(|n| -c.mass * c.gravity.dot(n.xy()))
        .sum();

    let elastic: f32 = nodes
        .windows(2)
        .map(|pair| {
            let stretch = (pair[1].xy() - pair[0].xy()).length() - c.rest_length;
            0.5 * c.stiffness * stretch * stretch
        })
        .sum();

    Aggregate::new(momentum, kinetic + gravitational + elastic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn opposite_momenta_cancel() {
        let bodies = [
            Body::new(2.0, Vec2::new(-0.5, 0.0), Vec2::new(0.0, 1.0)),
            Body::new(1.0, Vec2::new(0.5, 0.0), Vec2::new(0.0, -2.0)),
        ];
        assert_eq!(body_momentum(&bodies), Vec2::ZERO);
        assert_eq!(body_kinetic_energy(&bodies), 1.0 + 2.0);
    }

    #[test]
    fn potential_is_clamped_at_threshold() {
        let c = BodyConstants {
            dt: 0.01,
            attraction: 1.0,
            threshold: 0.5,
        };
        let close = [
            Body::new(1.0, Vec2::ZERO, Vec2::ZERO),
            Body::new(1.0, Vec2::new(0.1, 0.0), Vec2::ZERO),
        ];
        assert!((body_potential_energy(&c, &close) - 0.5f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn relaxed_rope_at_rest_has_no_elastic_energy() {
        let c = RopeConstants {
            dt: 0.01,
            mass: 1.0,
            stiffness: 100.0,
            damping: 1.0,
            gravity: Vec2::ZERO,
            rest_length: 0.5,
        };
        let nodes: Vec<_> = (0..3)
            .map(|i| RopeNode::new(Vec3::new(i as f32 * 0.5, 0.0, 0.0), false))
            .collect();
        let aggregate = rope_aggregate(&c, &nodes);
        assert!(aggregate.energy.abs() < 1e-6);
        assert_eq!(aggregate.momentum, Vec2::ZERO);
    }

    #[test]
    fn drift_is_measured_against_initial_energy() {
        let aggregate = Aggregate::new(Vec2::ZERO, 3.5).relative_to(1.5);
        assert_eq!(aggregate.energy_drift, 2.0);
    }
}
