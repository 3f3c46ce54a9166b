//! Initial data for the rope and N-body scenes

use crate::constants::*;
use crate::element::{Body, RopeNode};
use glam::{Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A rope stretched in a straight line between two pinned anchors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RopeConfig {
    pub node_count: usize,
    pub left: Vec3,
    pub right: Vec3,
}

impl Default for RopeConfig {
    fn default() -> Self {
        Self {
            node_count: ROPE_NODE_COUNT,
            left: Vec3::from_array(ROPE_LEFT_END),
            right: Vec3::from_array(ROPE_RIGHT_END),
        }
    }
}

/// Nodes linearly interpolated between the anchors, at rest, endpoints pinned.
pub fn rope_line(config: &RopeConfig) -> Vec<RopeNode> {
    let n = config.node_count;
    let span = n.saturating_sub(1).max(1) as f32;
    (0..n)
        .map(|i| {
            let t = i as f32 / span;
            let pinned = i == 0 || i == n - 1;
            RopeNode::new(config.left.lerp(config.right, t), pinned)
        })
        .collect()
}

/// A heavy central body with lighter bodies orbiting it in a disc.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NBodyConfig {
    pub body_count: usize,
    pub central_mass: f32,
    /// Orbiting bodies get an integer mass in `1..=max_mass`
    pub max_mass: u32,
    pub max_radius: f32,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Fixed seed for reproducible runs; `None` draws from the thread RNG
    pub seed: Option<u64>,
}

impl Default for NBodyConfig {
    fn default() -> Self {
        Self {
            body_count: BODY_COUNT,
            central_mass: CENTRAL_MASS,
            max_mass: BODY_MAX_MASS,
            max_radius: BODY_MAX_RADIUS,
            min_speed: BODY_MIN_SPEED,
            max_speed: BODY_MAX_SPEED,
            seed: None,
        }
    }
}

/// Random disc of bodies on tangential (clockwise) launch velocities.
///
/// Radii are drawn so the bodies are uniform over the disc area. Body 0 is the
/// central mass at the origin. Momentum is not corrected; see [`remove_drift`].
pub fn random_bodies(config: &NBodyConfig) -> Vec<Body> {
    match config.seed {
        Some(seed) => scatter(config, &mut StdRng::seed_from_u64(seed)),
        None => scatter(config, &mut rand::rng()),
    }
}

fn scatter(config: &NBodyConfig, rng: &mut impl Rng) -> Vec<Body> {
    let mut bodies = Vec::with_capacity(config.body_count);
    if config.body_count == 0 {
        return bodies;
    }

    bodies.push(Body::new(config.central_mass, Vec2::ZERO, Vec2::ZERO));

    let max_mass = config.max_mass.max(1);
    let area = 0.5 * config.max_radius * config.max_radius;
    for _ in 1..config.body_count {
        let mass = rng.random_range(1..=max_mass) as f32;

        let r = (2.0 * rng.random_range(0.0..=area)).sqrt();
        let theta = rng.random_range(0.0..std::f32::consts::TAU);
        let position = Vec2::from_angle(theta) * r;

        let speed = rng.random_range(config.min_speed..=config.max_speed);
        let tangent = Vec2::new(position.y, -position.x).normalize_or_zero();

        bodies.push(Body::new(mass, position, tangent * speed));
    }
    bodies
}

/// Subtract the centre-of-mass velocity so the system does not drift.
pub fn remove_drift(bodies: &mut [Body]) {
    let total_mass: f32 = bodies.iter().map(|b| b.mass).sum();
    if total_mass <= 0.0 {
        return;
    }
    let momentum: Vec2 = bodies.iter().map(|b| b.mass * b.velocity_xy()).sum();
    let drift = momentum / total_mass;

    for body in bodies {
        let v = body.velocity_xy() - drift;
        body.velocity = [v.x, v.y, 0.0, 0.0];
        body.velocity_temp = body.velocity;
    }
}
