//! # Ping-pong Simulation
//!
//! Double/triple-buffered GPU simulation state machine: slots rotated every
//! step, CPU edits against the current slot, a barrier after every compute
//! dispatch. Runs on wgpu or on a CPU reference backend.

pub mod backend;
pub mod driver;
pub mod error;
pub mod params;
pub mod scheme;

pub use backend::*;
pub use driver::*;
pub use error::*;
pub use params::*;
pub use scheme::*;
