//! Compute backends
//!
//! The driver only talks to slots through this trait. [`ReferenceBackend`]
//! executes the scalar kernels on the CPU and checks barrier placement;
//! [`WgpuBackend`] records the same dispatches into compute passes.

mod gpu;
mod reference;

pub use gpu::WgpuBackend;
pub use reference::{Command, ReferenceBackend};

use crate::error::SimResult;
use crate::params::ParameterBlock;
use crate::scheme::{Kernel, StageRange};

/// Physical slots a dispatch reads from and writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotBinding {
    /// Primary input (Runge-Kutta origin, Verlet previous positions)
    pub src: usize,
    /// Secondary input; equal to `src` for single-input kernels
    pub aux: usize,
    /// Output; never aliases an input
    pub dst: usize,
}

/// A fully resolved kernel invocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Dispatch {
    pub kernel: Kernel,
    pub range: StageRange,
    pub binding: SlotBinding,
    pub coefficients: [f32; 2],
    pub element_count: usize,
    /// Generation of the parameter block this dispatch was planned against
    pub generation: u32,
}

impl Dispatch {
    pub fn invocations(&self) -> usize {
        self.range.len(self.element_count)
    }
}

/// Device-side storage and execution for a simulation driver.
///
/// Writes and dispatches are ordered as issued. A dispatch or readback that
/// reads a slot written by an earlier dispatch is only valid after a
/// [`barrier`](ComputeBackend::barrier).
pub trait ComputeBackend {
    fn name(&self) -> &str;

    /// (Re)create `count` slots of `slot_size` bytes each.
    fn allocate_slots(&mut self, count: usize, slot_size: usize) -> SimResult<()>;

    /// Replace the whole contents of `slot`.
    fn upload_slot(&mut self, slot: usize, bytes: &[u8]);

    /// Write `bytes` into `slot` at byte `offset`.
    fn write_slot(&mut self, slot: usize, offset: usize, bytes: &[u8]);

    /// Copy `len` bytes at `offset` from slot `from` to the same place in
    /// slot `to`, ordered like a write.
    fn copy_range(&mut self, from: usize, to: usize, offset: usize, len: usize);

    fn upload_parameters(&mut self, params: &ParameterBlock);

    fn dispatch(&mut self, dispatch: &Dispatch);

    /// Make every preceding dispatch's writes visible to what follows.
    fn barrier(&mut self);

    /// Hand recorded work to the device.
    fn submit(&mut self) -> SimResult<()>;

    /// Blocking readback of a whole slot.
    fn read_slot(&mut self, slot: usize) -> SimResult<Vec<u8>>;

    /// Device errors raised since the last check.
    fn check_errors(&mut self) -> SimResult<()>;
}
