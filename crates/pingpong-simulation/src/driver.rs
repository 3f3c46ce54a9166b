//! Ping-pong simulation driver
//!
//! Owns the slot rotation state machine. Per frame a caller issues zero or
//! more edits (`move_element`, `trigger_fix`) against the current slot, one
//! `step()`, and then renders or reads the current slot. Every dispatch is
//! followed by a barrier, so boundary and interior stages of one pass are
//! ordered too.

use crate::backend::{ComputeBackend, Dispatch, SlotBinding};
use crate::error::{SimError, SimResult};
use crate::params::ParameterBlock;
use crate::scheme::{resolve_slot, BodyScheme, Pass, Priming, RopeScheme, Scheme};
use pingpong_physics::{flag_value, position_word, Aggregate, Element, ElementFlags};

/// Primitive topology used when drawing the current slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawMode {
    #[default]
    Points,
    LineStrip,
    /// Line strip with points on top
    PointsAndLines,
}

/// Something that can draw a slot owned by backend `B`.
pub trait SlotRenderer<B: ComputeBackend> {
    fn draw_slot(&mut self, backend: &B, slot: usize, element_count: usize, mode: DrawMode);
}

/// Construction options for a [`SimulationDriver`].
#[derive(Clone, Copy, Debug)]
pub struct DriverBuilder<S: Scheme> {
    scheme: S,
    slots: usize,
    priming: Priming,
}

impl<S: Scheme> DriverBuilder<S> {
    /// Starts with the slot count `scheme` needs.
    pub fn new(scheme: S) -> Self {
        Self {
            scheme,
            slots: scheme.slots_required(),
            priming: Priming::default(),
        }
    }

    /// Slot capacity (2 or 3). A third slot lets the driver switch into the
    /// history-based schemes later.
    pub fn slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn priming(mut self, priming: Priming) -> Self {
        self.priming = priming;
        self
    }

    pub fn build<B: ComputeBackend>(
        self,
        backend: B,
        mut initial: Vec<S::Element>,
        params: ParameterBlock,
    ) -> SimResult<SimulationDriver<S, B>> {
        if !(2..=3).contains(&self.slots) {
            return Err(SimError::SlotCount(self.slots));
        }
        params.validate()?;
        S::validate(&params)?;
        if initial.len() != params.element_count() {
            return Err(SimError::LengthMismatch {
                expected: params.element_count(),
                actual: initial.len(),
            });
        }
        if initial.len() < S::MIN_ELEMENTS {
            return Err(SimError::TooFewElements {
                model: S::MODEL,
                required: S::MIN_ELEMENTS,
                actual: initial.len(),
            });
        }
        check_capacity(self.scheme, self.slots)?;

        let flags = S::initial_flags(initial.len());
        for (element, &pinned) in initial.iter_mut().zip(flags.as_slice()) {
            element.set_free(!pinned);
        }

        let initial_energy = S::aggregate(&params, &initial).energy;
        let mut driver = SimulationDriver {
            backend,
            initial,
            params,
            flags,
            scheme: self.scheme,
            priming: self.priming,
            current: 0,
            slot_count: self.slots,
            initial_energy,
            poisoned: false,
        };

        let slot_size = driver.element_count() * std::mem::size_of::<S::Element>();
        driver.backend.allocate_slots(driver.slot_count, slot_size)?;
        driver.load()?;

        log::info!(
            "{} simulation ready: {} elements, {} slots, {} scheme on {} backend",
            S::MODEL,
            driver.element_count(),
            driver.slot_count,
            driver.scheme,
            driver.backend.name()
        );
        Ok(driver)
    }
}

/// Double or triple buffered simulation state on a compute backend.
pub struct SimulationDriver<S: Scheme, B: ComputeBackend> {
    backend: B,
    /// Construction-time records, flags already applied
    initial: Vec<S::Element>,
    params: ParameterBlock,
    flags: ElementFlags,
    scheme: S,
    priming: Priming,
    current: usize,
    slot_count: usize,
    initial_energy: f32,
    poisoned: bool,
}

pub type RopeDriver<B> = SimulationDriver<RopeScheme, B>;
pub type NBodyDriver<B> = SimulationDriver<BodyScheme, B>;

impl<S: Scheme, B: ComputeBackend> SimulationDriver<S, B> {
    /// Driver with the default slot count and priming for `scheme`.
    pub fn new(
        backend: B,
        scheme: S,
        initial: Vec<S::Element>,
        params: ParameterBlock,
    ) -> SimResult<Self> {
        DriverBuilder::new(scheme).build(backend, initial, params)
    }

    /// Fill every slot from the construction data and prime the active scheme.
    fn load(&mut self) -> SimResult<()> {
        self.current = 0;

        let prepared = self.scheme.prepare(&self.params, &self.initial);
        let bytes: &[u8] = bytemuck::cast_slice(&prepared);
        for slot in 0..self.slot_count {
            self.backend.upload_slot(slot, bytes);
        }
        if let Some(history) = self.scheme.history(self.priming, &self.params, &prepared) {
            let previous = resolve_slot(self.current, -1, self.slot_count);
            self.backend
                .upload_slot(previous, bytemuck::cast_slice(&history));
        }

        self.backend.upload_parameters(&self.params);
        self.run_passes(self.scheme.prime_passes());
        self.submit_checked()
    }

    fn run_passes(&mut self, passes: &[Pass]) {
        let n = self.element_count();
        for pass in passes {
            for stage in pass.stages {
                let dispatch = Dispatch {
                    kernel: stage.kernel,
                    range: stage.range,
                    binding: SlotBinding {
                        src: resolve_slot(self.current, stage.src, self.slot_count),
                        aux: resolve_slot(self.current, stage.aux, self.slot_count),
                        dst: resolve_slot(self.current, stage.dst, self.slot_count),
                    },
                    coefficients: stage.coefficients,
                    element_count: n,
                    generation: self.params.generation(),
                };
                self.backend.dispatch(&dispatch);
                self.backend.barrier();
            }
            if pass.rotate {
                self.current = resolve_slot(self.current, 1, self.slot_count);
            }
        }
    }

    fn submit_checked(&mut self) -> SimResult<()> {
        let result = match self.backend.submit() {
            Ok(()) => self.backend.check_errors(),
            Err(error) => Err(error),
        };
        if let Err(error) = &result {
            log::error!("{} step failed: {error}", S::MODEL);
            self.poisoned = true;
        }
        result
    }

    fn assert_index(&self, index: usize) {
        assert!(
            index < self.element_count(),
            "element index {index} out of range for {} elements",
            self.element_count()
        );
    }

    /// Write a new position and pin state for element `index` into the
    /// current slot. The next dispatch and any render before it see the edit.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn move_element(&mut self, index: usize, x: f32, y: f32, pinned: bool) {
        self.assert_index(index);

        let word = position_word(x, y, pinned);
        let bytes: &[u8] = bytemuck::cast_slice(&word);
        let base = S::Element::record_offset(index);

        self.backend
            .write_slot(self.current, base + S::Element::POSITION_OFFSET, bytes);
        for &mirror in S::Element::POSITION_MIRRORS {
            self.backend.write_slot(self.current, base + mirror, bytes);
        }
        self.flags.set(index, pinned);
    }

    /// Toggle the pin state of element `index` and clear its motion fields.
    /// Schemes that derive velocity from the previous slot get the current
    /// position copied there, so the element restarts from rest either way.
    /// Returns the new state (`true` = pinned).
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn trigger_fix(&mut self, index: usize) -> bool {
        self.assert_index(index);

        let pinned = self.flags.toggle(index);
        let base = S::Element::record_offset(index);
        let flag = [flag_value(pinned)];
        self.backend.write_slot(
            self.current,
            base + S::Element::flag_offset(),
            bytemuck::cast_slice(&flag),
        );

        let zero = [0.0f32; 4];
        for &offset in S::Element::MOTION_OFFSETS {
            self.backend
                .write_slot(self.current, base + offset, bytemuck::cast_slice(&zero));
        }
        if let Some(offset) = self.scheme.history_slot() {
            let previous = resolve_slot(self.current, offset, self.slot_count);
            self.backend.copy_range(
                self.current,
                previous,
                base + S::Element::POSITION_OFFSET,
                std::mem::size_of::<[f32; 4]>(),
            );
        }

        log::debug!(
            "{} element {index} {}",
            S::MODEL,
            if pinned { "pinned" } else { "released" }
        );
        pinned
    }

    /// Advance the simulation by one timestep.
    ///
    /// A failed submission leaves the slots in an unknown state; the driver
    /// then refuses to step until [`reset`](Self::reset).
    pub fn step(&mut self) -> SimResult<()> {
        if self.poisoned {
            return Err(SimError::Poisoned);
        }
        self.run_passes(self.scheme.passes());
        self.submit_checked()
    }

    /// Draw the current slot.
    pub fn render<R: SlotRenderer<B>>(&self, renderer: &mut R, mode: DrawMode) {
        renderer.draw_slot(&self.backend, self.current, self.element_count(), mode);
    }

    /// Slot that rendering and picking should read.
    pub fn render_slot(&self) -> usize {
        self.current
    }

    /// Restore construction-time state into the same slots. The active scheme
    /// is kept and re-primed.
    pub fn reset(&mut self) -> SimResult<()> {
        self.flags.reset();
        self.poisoned = false;
        self.load()?;
        log::info!("{} simulation reset ({} scheme)", S::MODEL, self.scheme);
        Ok(())
    }

    /// Reset with a new parameter block for the same element count.
    pub fn reset_with(&mut self, mut params: ParameterBlock) -> SimResult<()> {
        params.validate()?;
        S::validate(&params)?;
        if params.element_count() != self.element_count() {
            return Err(SimError::LengthMismatch {
                expected: self.element_count(),
                actual: params.element_count(),
            });
        }
        params.set_generation(self.params.generation().wrapping_add(1));
        self.params = params;
        self.initial_energy = S::aggregate(&self.params, &self.initial).energy;
        self.reset()
    }

    /// Switch integrator mid-simulation, re-deriving whatever state the new
    /// scheme reads.
    pub fn set_scheme(&mut self, scheme: S) -> SimResult<()> {
        if self.poisoned {
            return Err(SimError::Poisoned);
        }
        check_capacity(scheme, self.slot_count)?;
        if scheme == self.scheme {
            return Ok(());
        }

        let from = self.scheme;
        self.run_passes(S::transition(from, scheme));
        self.scheme = scheme;
        self.submit_checked()?;

        log::info!("{} scheme: {from} -> {scheme}", S::MODEL);
        Ok(())
    }

    /// Copy of the current slot. Blocks until the device is idle.
    pub fn snapshot(&mut self) -> SimResult<Vec<S::Element>> {
        let bytes = self.backend.read_slot(self.current)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<S::Element>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Momentum and energy of the current state. Blocks on a readback.
    pub fn aggregate(&mut self) -> SimResult<Aggregate> {
        let elements = self.snapshot()?;
        Ok(S::aggregate(&self.params, &elements).relative_to(self.initial_energy))
    }

    /// First element whose position lies within `tolerance` of `(x, y)` on
    /// both axes.
    pub fn pick_nearest(&mut self, x: f32, y: f32, tolerance: f32) -> SimResult<Option<usize>> {
        let elements = self.snapshot()?;
        Ok(elements.iter().position(|e| {
            let p = e.position();
            (p.x - x).abs() <= tolerance && (p.y - y).abs() <= tolerance
        }))
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn element_count(&self) -> usize {
        self.params.element_count()
    }

    pub fn flags(&self) -> &ElementFlags {
        &self.flags
    }

    pub fn parameters(&self) -> &ParameterBlock {
        &self.params
    }

    pub fn scheme(&self) -> S {
        self.scheme
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

fn check_capacity<S: Scheme>(scheme: S, available: usize) -> SimResult<()> {
    let required = scheme.slots_required();
    if required > available {
        return Err(SimError::InsufficientSlots {
            scheme: scheme.to_string(),
            required,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ReferenceBackend;
    use pingpong_physics::{rope_line, RopeConfig, RopeNode};

    fn rope(n: usize) -> Vec<RopeNode> {
        rope_line(&RopeConfig {
            node_count: n,
            ..Default::default()
        })
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let result = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(12),
        );
        assert!(matches!(
            result,
            Err(SimError::LengthMismatch {
                expected: 12,
                actual: 10
            })
        ));
    }

    #[test]
    fn rejects_single_node_rope() {
        let result = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            vec![RopeNode::default()],
            ParameterBlock::rope_default(1),
        );
        assert!(matches!(result, Err(SimError::TooFewElements { .. })));
    }

    #[test]
    fn rejects_zero_timestep_before_allocating() {
        let result = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(10).with_timestep(0.0),
        );
        assert!(matches!(result, Err(SimError::ZeroTimestep(_))));
    }

    #[test]
    fn body_parameters_rejected_for_rope() {
        let result = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::nbody_default(10),
        );
        assert!(matches!(
            result,
            Err(SimError::OutOfBounds { name: "mass", .. })
        ));
    }

    #[test]
    fn reset_with_rejects_zero_rest_length() {
        let mut driver = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(10),
        )
        .unwrap();
        let mut params = ParameterBlock::rope_default(10);
        params.field[1] = 0.0;
        assert!(matches!(
            driver.reset_with(params),
            Err(SimError::OutOfBounds {
                name: "rest_length",
                ..
            })
        ));
        assert_eq!(driver.parameters(), &ParameterBlock::rope_default(10));
        driver.step().unwrap();
        assert!(driver.snapshot().unwrap().iter().all(|n| n.position().is_finite()));
    }

    #[test]
    fn verlet_needs_third_slot() {
        let result = DriverBuilder::new(RopeScheme::Verlet).slots(2).build(
            ReferenceBackend::new(),
            rope(10),
            ParameterBlock::rope_default(10),
        );
        assert!(matches!(
            result,
            Err(SimError::InsufficientSlots {
                required: 3,
                available: 2,
                ..
            })
        ));
    }

    #[test]
    fn slot_count_outside_range_rejected() {
        for slots in [0, 1, 4] {
            let result = DriverBuilder::new(RopeScheme::ModifiedEuler).slots(slots).build(
                ReferenceBackend::new(),
                rope(10),
                ParameterBlock::rope_default(10),
            );
            assert!(matches!(result, Err(SimError::SlotCount(s)) if s == slots));
        }
    }

    #[test]
    fn set_scheme_checks_capacity() {
        let mut driver = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(10),
        )
        .unwrap();
        assert!(matches!(
            driver.set_scheme(RopeScheme::Verlet),
            Err(SimError::InsufficientSlots { .. })
        ));
        assert_eq!(driver.scheme(), RopeScheme::ModifiedEuler);
        assert!(!driver.is_poisoned());
    }

    #[test]
    fn reset_with_bumps_generation() {
        let mut driver = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(10),
        )
        .unwrap();
        driver
            .reset_with(ParameterBlock::rope_default(10).with_spring(100.0, 10.0))
            .unwrap();
        assert_eq!(driver.parameters().generation(), 1);
        assert_eq!(driver.backend().parameters().map(|p| p.generation()), Some(1));
        driver.step().unwrap();
    }

    #[test]
    fn reset_with_rejects_new_element_count() {
        let mut driver = RopeDriver::new(
            ReferenceBackend::new(),
            RopeScheme::ModifiedEuler,
            rope(10),
            ParameterBlock::rope_default(10),
        )
        .unwrap();
        assert!(matches!(
            driver.reset_with(ParameterBlock::rope_default(11)),
            Err(SimError::LengthMismatch { .. })
        ));
    }
}
