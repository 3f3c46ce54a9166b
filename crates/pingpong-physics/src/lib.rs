//! # Ping-pong Physics
//!
//! GPU record layouts, pin flags, physical defaults and scalar reference
//! kernels for the rope and N-body simulations.

pub mod constants;
pub mod diagnostics;
pub mod element;
pub mod flags;
pub mod kernels;
pub mod scenario;

pub use constants::*;
pub use diagnostics::*;
pub use element::*;
pub use flags::*;
pub use kernels::*;
pub use scenario::*;
