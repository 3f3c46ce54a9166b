//! GPU record layouts for simulated elements
//!
//! Every record starts with a `vec4` position word whose `w` lane is the free
//! flag (`1.0` free, `0.0` pinned). All fields are `[f32; 4]` groups so the
//! records match WGSL storage layout byte for byte and CPU-side partial writes
//! land at the offsets the kernels expect.

use crate::constants::{FREE, PINNED, ROPE_NODE_MASS};
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use std::mem::offset_of;

/// A record that can live in a simulation slot.
pub trait Element: Pod + Zeroable + std::fmt::Debug + PartialEq {
    /// Byte offset of the position word (xyz + free flag).
    const POSITION_OFFSET: usize;

    /// Byte offsets of the `vec4` motion fields cleared when the element is pinned.
    const MOTION_OFFSETS: &'static [usize];

    /// Byte offsets of `vec4` fields that shadow the position and must follow a move.
    const POSITION_MIRRORS: &'static [usize] = &[];

    fn position(&self) -> Vec3;

    fn velocity(&self) -> Vec3;

    fn is_free(&self) -> bool;

    fn set_free(&mut self, free: bool);

    fn mass(&self) -> f32;

    /// Byte offset of the free flag lane.
    fn flag_offset() -> usize {
        Self::POSITION_OFFSET + 3 * std::mem::size_of::<f32>()
    }

    /// Byte offset of element `index` inside a slot.
    fn record_offset(index: usize) -> usize {
        index * std::mem::size_of::<Self>()
    }
}

/// Position word written by a move edit. `z` is reset to the simulation plane.
pub fn position_word(x: f32, y: f32, pinned: bool) -> [f32; 4] {
    [x, y, 0.0, flag_value(pinned)]
}

/// Value stored in the `w` lane for the given pin state.
pub fn flag_value(pinned: bool) -> f32 {
    if pinned {
        PINNED
    } else {
        FREE
    }
}

/// Kernels treat any `w >= 0.5` as free.
pub fn lane_is_free(w: f32) -> bool {
    w >= 0.5
}

/// One rope joint.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RopeNode {
    /// xyz position, w free flag
    pub position: [f32; 4],
    /// xyz velocity, w unused
    pub velocity: [f32; 4],
    /// xyz force computed by the last velocity pass (velocity Verlet only)
    pub aux: [f32; 4],
}

impl RopeNode {
    pub fn new(position: Vec3, pinned: bool) -> Self {
        Self {
            position: [position.x, position.y, position.z, flag_value(pinned)],
            velocity: [0.0; 4],
            aux: [0.0; 4],
        }
    }

    pub fn xy(&self) -> Vec2 {
        Vec2::new(self.position[0], self.position[1])
    }

    pub fn velocity_xy(&self) -> Vec2 {
        Vec2::new(self.velocity[0], self.velocity[1])
    }

    pub fn force(&self) -> Vec3 {
        Vec3::new(self.aux[0], self.aux[1], self.aux[2])
    }
}

impl Element for RopeNode {
    const POSITION_OFFSET: usize = offset_of!(RopeNode, position);
    const MOTION_OFFSETS: &'static [usize] = &[offset_of!(RopeNode, velocity)];

    fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    fn velocity(&self) -> Vec3 {
        Vec3::new(self.velocity[0], self.velocity[1], self.velocity[2])
    }

    fn is_free(&self) -> bool {
        lane_is_free(self.position[3])
    }

    fn set_free(&mut self, free: bool) {
        self.position[3] = flag_value(!free);
    }

    fn mass(&self) -> f32 {
        ROPE_NODE_MASS
    }
}

/// One gravitating body.
///
/// `position_temp`/`velocity_temp` carry the half-step state of the multi-stage
/// schemes: `p(t+h)` and the partial `v(t+h)` for velocity Verlet, the running
/// final result for the Runge-Kutta family.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Body {
    pub position: [f32; 4],
    pub velocity: [f32; 4],
    pub position_temp: [f32; 4],
    pub velocity_temp: [f32; 4],
    pub mass: f32,
    pub _padding: [f32; 3],
}

impl Body {
    pub fn new(mass: f32, position: Vec2, velocity: Vec2) -> Self {
        let p = [position.x, position.y, 0.0, FREE];
        let v = [velocity.x, velocity.y, 0.0, 0.0];
        Self {
            position: p,
            velocity: v,
            position_temp: p,
            velocity_temp: v,
            mass,
            _padding: [0.0; 3],
        }
    }

    pub fn xy(&self) -> Vec2 {
        Vec2::new(self.position[0], self.position[1])
    }

    pub fn velocity_xy(&self) -> Vec2 {
        Vec2::new(self.velocity[0], self.velocity[1])
    }

    pub fn temp_xy(&self) -> Vec2 {
        Vec2::new(self.position_temp[0], self.position_temp[1])
    }
}

impl Element for Body {
    const POSITION_OFFSET: usize = offset_of!(Body, position);
    const MOTION_OFFSETS: &'static [usize] =
        &[offset_of!(Body, velocity), offset_of!(Body, velocity_temp)];
    const POSITION_MIRRORS: &'static [usize] = &[offset_of!(Body, position_temp)];

    fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    fn velocity(&self) -> Vec3 {
        Vec3::new(self.velocity[0], self.velocity[1], self.velocity[2])
    }

    fn is_free(&self) -> bool {
        lane_is_free(self.position[3])
    }

    fn set_free(&mut self, free: bool) {
        self.position[3] = flag_value(!free);
    }

    fn mass(&self) -> f32 {
        self.mass
    }
}
