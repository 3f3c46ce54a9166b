//! Error types for the simulation driver.

use crate::params::Bound;
use thiserror::Error;

/// Failures a caller can observe from construction, stepping or readback.
///
/// Out-of-range element indices are not represented here: they are programming
/// errors and panic.
#[derive(Debug, Error)]
pub enum SimError {
    /// The element count is zero.
    #[error("simulation has no elements")]
    EmptySimulation,

    /// The scheme needs more elements than were supplied.
    #[error("{model} needs at least {required} elements, got {actual}")]
    TooFewElements {
        model: &'static str,
        required: usize,
        actual: usize,
    },

    /// The timestep is zero or negative.
    #[error("timestep must be positive, got {0}")]
    ZeroTimestep(f32),

    /// A physical constant is NaN or infinite.
    #[error("parameter `{name}` is not finite")]
    NonFiniteParameter { name: &'static str },

    /// A constant is finite but outside the range the model accepts.
    #[error("parameter `{name}` must be {bound}, got {value}")]
    OutOfBounds {
        name: &'static str,
        value: f32,
        bound: Bound,
    },

    /// Initial data and parameter block disagree on the element count.
    #[error("expected {expected} elements, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The driver does not own enough slots for the requested scheme.
    #[error("{scheme} needs {required} slots, driver has {available}")]
    InsufficientSlots {
        scheme: String,
        required: usize,
        available: usize,
    },

    /// Slot capacity outside the supported range.
    #[error("slot count must be 2 or 3, got {0}")]
    SlotCount(usize),

    /// A device-level error surfaced by the backend.
    #[error("device error: {0}")]
    Device(String),

    /// Mapping a readback buffer failed.
    #[error("readback failed: {0}")]
    Readback(String),

    /// A previous step failed part-way; only `reset` recovers the driver.
    #[error("simulation state is inconsistent after a failed step; reset required")]
    Poisoned,
}

/// Convenience alias for `Result<T, SimError>`.
pub type SimResult<T> = Result<T, SimError>;
