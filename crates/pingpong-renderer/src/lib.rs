//! # Ping-pong Renderer
//!
//! Draws the current slot of a simulation straight from its storage buffer,
//! and resolves cursor picks through an offscreen index pass.

pub mod palette;
pub mod picking;
pub mod renderer;

pub use palette::*;
pub use picking::{GpuPicker, PickResult, PickingRenderer};
pub use renderer::*;
