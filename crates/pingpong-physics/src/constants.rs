//! Physical defaults for the rope and N-body scenes
//!
//! Simulation units are normalized device coordinates: the visible area spans
//! `[-1, 1]` on both axes.

/// Default number of rope nodes
pub const ROPE_NODE_COUNT: usize = 100;

/// Rope timestep (one display frame at 60 Hz)
pub const ROPE_DT: f32 = 1.0 / 60.0;

/// Mass of a single rope node
pub const ROPE_NODE_MASS: f32 = 1.0;

/// Spring constant between neighbouring nodes
pub const ROPE_STIFFNESS: f32 = 250.0;

/// Damping coefficient applied to the relative velocity of neighbours
pub const ROPE_DAMPING: f32 = 25.0;

/// Gravitational acceleration, divided across the rope's node count
pub const STANDARD_GRAVITY: f32 = 9.8;

/// Total natural length of the rope; each segment rests at `ROPE_LENGTH / n`
pub const ROPE_LENGTH: f32 = 2.0;

/// Initial left anchor
pub const ROPE_LEFT_END: [f32; 3] = [-0.9, 0.5, 0.0];

/// Initial right anchor
pub const ROPE_RIGHT_END: [f32; 3] = [0.9, 0.5, 0.0];

/// Default number of bodies in the N-body scene
pub const BODY_COUNT: usize = 500;

/// N-body timestep
pub const BODY_DT: f32 = 1.0 / 300.0;

/// Attraction constant (force falls off with 1/r)
pub const ATTRACTION: f32 = 0.0002;

/// Bodies closer than this exert no attraction on each other
pub const ATTRACTION_THRESHOLD: f32 = 0.05;

/// Mass of the central body placed at the origin
pub const CENTRAL_MASS: f32 = 5000.0;

/// Upper bound for the integer mass of the orbiting bodies
pub const BODY_MAX_MASS: u32 = 5;

/// Radius of the disc the orbiting bodies are scattered in
pub const BODY_MAX_RADIUS: f32 = 0.8;

/// Lower bound of the tangential launch speed
pub const BODY_MIN_SPEED: f32 = 0.3;

/// Upper bound of the tangential launch speed
pub const BODY_MAX_SPEED: f32 = 1.2;

/// Value of the `w` lane of a free element's position word
pub const FREE: f32 = 1.0;

/// Value of the `w` lane of a pinned element's position word
pub const PINNED: f32 = 0.0;
