//! Integration schemes as dispatch plans
//!
//! A scheme is a tagged variant mapped to a fixed list of [`Pass`]es. Each pass
//! is a set of [`Stage`]s separated by barriers; slots are named relative to the
//! current slot so the same plan works at every rotation.

mod nbody;
mod rope;

pub use nbody::BodyScheme;
pub use rope::RopeScheme;

use crate::error::SimResult;
use crate::params::ParameterBlock;
use pingpong_physics::{Aggregate, Element, ElementFlags};
use std::fmt;

/// Compute kernels shared by the CPU and GPU backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    RopeModifiedEuler,
    RopePredict,
    RopeVelocity,
    RopeVerlet,
    RopePrimeForce,
    RopePrimePrevious,
    RopeDeriveVelocity,
    BodyRkPrime,
    BodyRkStage,
    BodyRkFinish,
    BodyVvPrime,
    BodyVv,
}

/// Which WGSL module a kernel lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelModule {
    Rope,
    Body,
}

impl Kernel {
    pub fn module(self) -> KernelModule {
        match self {
            Kernel::RopeModifiedEuler
            | Kernel::RopePredict
            | Kernel::RopeVelocity
            | Kernel::RopeVerlet
            | Kernel::RopePrimeForce
            | Kernel::RopePrimePrevious
            | Kernel::RopeDeriveVelocity => KernelModule::Rope,
            Kernel::BodyRkPrime
            | Kernel::BodyRkStage
            | Kernel::BodyRkFinish
            | Kernel::BodyVvPrime
            | Kernel::BodyVv => KernelModule::Body,
        }
    }

    /// Kernels that read neighbours come as a boundary/interior pair so the
    /// interior entry point never branches on out-of-range neighbours.
    pub fn is_split(self) -> bool {
        matches!(
            self,
            Kernel::RopeModifiedEuler | Kernel::RopeVelocity | Kernel::RopeVerlet
        )
    }

    pub fn entry_point(self, range: StageRange) -> &'static str {
        let boundary = range == StageRange::Boundary;
        match self {
            Kernel::RopeModifiedEuler if boundary => "modified_euler_boundary",
            Kernel::RopeModifiedEuler => "modified_euler_interior",
            Kernel::RopeVelocity if boundary => "velocity_boundary",
            Kernel::RopeVelocity => "velocity_interior",
            Kernel::RopeVerlet if boundary => "verlet_boundary",
            Kernel::RopeVerlet => "verlet_interior",
            Kernel::RopePredict => "predict",
            Kernel::RopePrimeForce => "prime_force",
            Kernel::RopePrimePrevious => "prime_previous",
            Kernel::RopeDeriveVelocity => "derive_velocity",
            Kernel::BodyRkPrime => "rk_prime",
            Kernel::BodyRkStage => "rk_stage",
            Kernel::BodyRkFinish => "rk_finish",
            Kernel::BodyVvPrime => "vv_prime",
            Kernel::BodyVv => "vv",
        }
    }
}

/// Subset of element indices a stage covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageRange {
    /// `[0, n)`
    All,
    /// `0` and `n - 1`
    Boundary,
    /// `[1, n - 1)`
    Interior,
}

impl StageRange {
    /// Number of invocations needed for `n` elements.
    pub fn len(self, n: usize) -> usize {
        match self {
            StageRange::All => n,
            StageRange::Boundary => n.min(2),
            StageRange::Interior => n.saturating_sub(2),
        }
    }

    /// Element index handled by invocation `local`.
    pub fn index(self, n: usize, local: usize) -> usize {
        match self {
            StageRange::All => local,
            StageRange::Boundary if local == 0 => 0,
            StageRange::Boundary => n - 1,
            StageRange::Interior => local + 1,
        }
    }

    pub fn indices(self, n: usize) -> impl Iterator<Item = usize> {
        (0..self.len(n)).map(move |local| self.index(n, local))
    }

    /// First element index, as uploaded to the stage uniform.
    pub fn first(self) -> usize {
        match self {
            StageRange::Interior => 1,
            _ => 0,
        }
    }
}

/// One kernel dispatch. Slot fields are offsets from the current slot
/// (`0` current, `1` next, `-1` previous).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stage {
    pub kernel: Kernel,
    pub range: StageRange,
    pub src: i8,
    pub aux: i8,
    pub dst: i8,
    /// Runge-Kutta `(x_dt1, x_dt2)`; zero elsewhere
    pub coefficients: [f32; 2],
}

impl Stage {
    /// Reads the current slot, writes the next one.
    pub const fn forward(kernel: Kernel, range: StageRange) -> Self {
        Self {
            kernel,
            range,
            src: 0,
            aux: 0,
            dst: 1,
            coefficients: [0.0, 0.0],
        }
    }

    pub const fn slots(self, src: i8, aux: i8, dst: i8) -> Self {
        Self {
            src,
            aux,
            dst,
            ..self
        }
    }

    pub const fn coefficients(self, x1: f32, x2: f32) -> Self {
        Self {
            coefficients: [x1, x2],
            ..self
        }
    }
}

/// Stages that may run without a barrier between them followed by a barrier,
/// then an optional rotation of the current slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pass {
    pub label: &'static str,
    pub stages: &'static [Stage],
    pub rotate: bool,
}

/// How the previous-state slot of a history-based scheme is seeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Priming {
    /// Derive the implied previous state analytically.
    #[default]
    Extrapolate,
    /// Copy the initial state verbatim; the simulation starts at rest.
    Duplicate,
}

/// An integration scheme for one kind of element.
pub trait Scheme: Copy + Eq + fmt::Debug + fmt::Display + 'static {
    type Element: Element;

    /// Model name used in logs and errors.
    const MODEL: &'static str;

    const MIN_ELEMENTS: usize;

    /// Every scheme in selection order.
    fn all() -> &'static [Self];

    fn slots_required(self) -> usize;

    /// Rejects constants the model's kernels cannot integrate, such as a
    /// zero mass they divide by.
    fn validate(params: &ParameterBlock) -> SimResult<()>;

    /// Slot offset holding the previous state, when the scheme reads one.
    fn history_slot(self) -> Option<i8> {
        None
    }

    /// Passes making up one `step()`.
    fn passes(self) -> &'static [Pass];

    /// Passes that re-derive scheme-specific state when switching `from -> to`.
    fn transition(from: Self, to: Self) -> &'static [Pass];

    /// GPU passes run after the initial data is uploaded.
    fn prime_passes(self) -> &'static [Pass] {
        &[]
    }

    /// Contents uploaded identically to every slot.
    fn prepare(self, _params: &ParameterBlock, initial: &[Self::Element]) -> Vec<Self::Element> {
        initial.to_vec()
    }

    /// Contents of the previous slot, when the scheme reads history.
    fn history(
        self,
        _priming: Priming,
        _params: &ParameterBlock,
        _prepared: &[Self::Element],
    ) -> Option<Vec<Self::Element>> {
        None
    }

    /// Pin layout of a freshly constructed simulation.
    fn initial_flags(n: usize) -> ElementFlags;

    fn aggregate(params: &ParameterBlock, elements: &[Self::Element]) -> Aggregate;
}

/// Resolves a relative slot offset against `current`.
pub fn resolve_slot(current: usize, offset: i8, slot_count: usize) -> usize {
    (current as isize + offset as isize).rem_euclid(slot_count as isize) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_range_maps_to_endpoints() {
        let indices: Vec<_> = StageRange::Boundary.indices(10).collect();
        assert_eq!(indices, vec![0, 9]);
    }

    #[test]
    fn interior_range_excludes_endpoints() {
        let indices: Vec<_> = StageRange::Interior.indices(5).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(StageRange::Interior.len(2), 0);
    }

    #[test]
    fn boundary_and_interior_cover_all_exactly_once() {
        for n in 2..8 {
            let mut seen: Vec<_> = StageRange::Boundary
                .indices(n)
                .chain(StageRange::Interior.indices(n))
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn relative_slots_wrap() {
        assert_eq!(resolve_slot(0, -1, 3), 2);
        assert_eq!(resolve_slot(2, 1, 3), 0);
        assert_eq!(resolve_slot(1, 2, 3), 0);
        assert_eq!(resolve_slot(1, 1, 2), 0);
    }

    #[test]
    fn split_kernels_have_distinct_entry_points() {
        for kernel in [
            Kernel::RopeModifiedEuler,
            Kernel::RopeVelocity,
            Kernel::RopeVerlet,
        ] {
            assert!(kernel.is_split());
            assert_ne!(
                kernel.entry_point(StageRange::Boundary),
                kernel.entry_point(StageRange::Interior)
            );
        }
    }

    /// Every plan must name a valid slot triple and use split kernels only on
    /// split ranges.
    fn check_plan<S: Scheme>(scheme: S, passes: &[Pass]) {
        let slots = scheme.slots_required();
        for pass in passes {
            for stage in pass.stages {
                assert_eq!(
                    stage.kernel.is_split(),
                    stage.range != StageRange::All,
                    "{scheme}: {} uses {:?} on {:?}",
                    pass.label,
                    stage.kernel,
                    stage.range
                );
                let dst = resolve_slot(0, stage.dst, slots);
                assert_ne!(dst, resolve_slot(0, stage.src, slots), "{scheme}: {}", pass.label);
                assert_ne!(dst, resolve_slot(0, stage.aux, slots), "{scheme}: {}", pass.label);
            }
        }
    }

    fn check_all<S: Scheme>() {
        for &scheme in S::all() {
            check_plan(scheme, scheme.passes());
            check_plan(scheme, scheme.prime_passes());
            for &from in S::all() {
                let slots = scheme.slots_required().max(from.slots_required());
                for pass in S::transition(from, scheme) {
                    for stage in pass.stages {
                        let dst = resolve_slot(0, stage.dst, slots);
                        assert_ne!(dst, resolve_slot(0, stage.src, slots));
                        assert_ne!(dst, resolve_slot(0, stage.aux, slots));
                    }
                }
            }
        }
    }

    #[test]
    fn rope_plans_are_well_formed() {
        check_all::<RopeScheme>();
    }

    #[test]
    fn body_plans_are_well_formed() {
        check_all::<BodyScheme>();
    }
}
