//! Parameter block bound to every compute stage

use crate::error::{SimError, SimResult};
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use std::fmt;
use pingpong_physics::{
    BodyConstants, RopeConstants, ATTRACTION, ATTRACTION_THRESHOLD, BODY_DT, ROPE_DAMPING,
    ROPE_DT, ROPE_LENGTH, ROPE_NODE_MASS, ROPE_STIFFNESS, STANDARD_GRAVITY,
};

/// Range a model-specific constant must fall in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    Positive,
    NonNegative,
}

impl Bound {
    pub fn holds(self, value: f32) -> bool {
        match self {
            Bound::Positive => value > 0.0,
            Bound::NonNegative => value >= 0.0,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Bound::Positive => "positive",
            Bound::NonNegative => "non-negative",
        })
    }
}

/// First `(name, value, bound)` entry whose value falls outside its bound.
pub(crate) fn check_bounds(checks: &[(&'static str, f32, Bound)]) -> SimResult<()> {
    match checks.iter().find(|(_, value, bound)| !bound.holds(*value)) {
        Some(&(name, value, bound)) => Err(SimError::OutOfBounds { name, value, bound }),
        None => Ok(()),
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ParameterBlock {
    // Group 1: Counts
    // x: element_count, y: generation, z: padding, w: padding
    pub counts: [u32; 4],

    // Group 2: Integration
    // x: dt, y: mass, z: stiffness, w: damping
    pub integration: [f32; 4],

    // Group 3: Force field
    // x: gravity (y acceleration per node), y: rest_length, z: attraction G, w: attraction threshold
    pub field: [f32; 4],
}

impl ParameterBlock {
    /// Rope of `n` nodes: the total length and weight are spread over the nodes.
    pub fn rope_default(n: usize) -> Self {
        let nodes = n.max(1) as f32;
        Self {
            counts: [n as u32, 0, 0, 0],
            integration: [
                ROPE_DT,        // dt
                ROPE_NODE_MASS, // mass
                ROPE_STIFFNESS, // stiffness
                ROPE_DAMPING,   // damping
            ],
            field: [
                -STANDARD_GRAVITY / nodes, // gravity
                ROPE_LENGTH / nodes,       // rest_length
                0.0,                       // attraction (unused)
                0.0,                       // threshold (unused)
            ],
        }
    }

    /// `n` bodies attracting each other with a 1/r force.
    pub fn nbody_default(n: usize) -> Self {
        Self {
            counts: [n as u32, 0, 0, 0],
            integration: [
                BODY_DT, // dt
                0.0,     // mass (per body)
                0.0,     // stiffness (unused)
                0.0,     // damping (unused)
            ],
            field: [
                0.0,                  // gravity (unused)
                0.0,                  // rest_length (unused)
                ATTRACTION,           // attraction
                ATTRACTION_THRESHOLD, // threshold
            ],
        }
    }

    pub fn with_timestep(mut self, dt: f32) -> Self {
        self.integration[0] = dt;
        self
    }

    pub fn with_spring(mut self, stiffness: f32, damping: f32) -> Self {
        self.integration[2] = stiffness;
        self.integration[3] = damping;
        self
    }

    pub fn element_count(&self) -> usize {
        self.counts[0] as usize
    }

    pub fn generation(&self) -> u32 {
        self.counts[1]
    }

    pub(crate) fn set_generation(&mut self, generation: u32) {
        self.counts[1] = generation;
    }

    pub fn timestep(&self) -> f32 {
        self.integration[0]
    }

    /// Rejects parameter sets that must never reach a compute stage. Model
    /// specific ranges are checked by [`Scheme::validate`](crate::Scheme::validate).
    pub fn validate(&self) -> SimResult<()> {
        if self.element_count() == 0 {
            return Err(SimError::EmptySimulation);
        }

        let named = [
            ("dt", self.integration[0]),
            ("mass", self.integration[1]),
            ("stiffness", self.integration[2]),
            ("damping", self.integration[3]),
            ("gravity", self.field[0]),
            ("rest_length", self.field[1]),
            ("attraction", self.field[2]),
            ("threshold", self.field[3]),
        ];
        if let Some((name, _)) = named.into_iter().find(|(_, v)| !v.is_finite()) {
            return Err(SimError::NonFiniteParameter { name });
        }

        if self.timestep() <= 0.0 {
            return Err(SimError::ZeroTimestep(self.timestep()));
        }
        Ok(())
    }

    pub fn rope_constants(&self) -> RopeConstants {
        RopeConstants {
            dt: self.integration[0],
            mass: self.integration[1],
            stiffness: self.integration[2],
            damping: self.integration[3],
            gravity: Vec2::new(0.0, self.field[0]),
            rest_length: self.field[1],
        }
    }

    pub fn body_constants(&self) -> BodyConstants {
        BodyConstants {
            dt: self.integration[0],
            attraction: self.field[2],
            threshold: self.field[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_three_vec4_groups() {
        assert_eq!(std::mem::size_of::<ParameterBlock>(), 48);
    }

    #[test]
    fn rope_default_spreads_length_and_weight() {
        let params = ParameterBlock::rope_default(100);
        let c = params.rope_constants();
        assert_eq!(params.element_count(), 100);
        assert!((c.rest_length - 0.02).abs() < 1e-7);
        assert!((c.gravity.y + 0.098).abs() < 1e-7);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn zero_elements_rejected() {
        assert!(matches!(
            ParameterBlock::nbody_default(0).validate(),
            Err(SimError::EmptySimulation)
        ));
    }

    #[test]
    fn zero_timestep_rejected() {
        let params = ParameterBlock::rope_default(10).with_timestep(0.0);
        assert!(matches!(params.validate(), Err(SimError::ZeroTimestep(_))));
    }

    #[test]
    fn bounds_report_first_violation() {
        let result = check_bounds(&[
            ("mass", 1.0, Bound::Positive),
            ("damping", 0.0, Bound::NonNegative),
            ("rest_length", 0.0, Bound::Positive),
            ("stiffness", -1.0, Bound::NonNegative),
        ]);
        assert!(matches!(
            result,
            Err(SimError::OutOfBounds {
                name: "rest_length",
                bound: Bound::Positive,
                ..
            })
        ));
    }

    #[test]
    fn nan_constant_rejected() {
        let params = ParameterBlock::rope_default(10).with_spring(f32::NAN, 1.0);
        assert!(matches!(
            params.validate(),
            Err(SimError::NonFiniteParameter { name: "stiffness" })
        ));
    }
}
