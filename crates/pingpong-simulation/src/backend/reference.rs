//! CPU reference backend
//!
//! Runs the scalar kernels from `pingpong_physics` against host memory. Every
//! call is appended to a command log, and reads of a slot that a dispatch has
//! written since the last barrier panic as read-after-write hazards.

use super::{ComputeBackend, Dispatch, SlotBinding};
use crate::error::SimResult;
use crate::params::ParameterBlock;
use crate::scheme::{Kernel, StageRange};
use bytemuck::Pod;
use pingpong_physics::*;

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Allocate { count: usize, slot_size: usize },
    Upload { slot: usize },
    Write { slot: usize, offset: usize, len: usize },
    Copy {
        from: usize,
        to: usize,
        offset: usize,
        len: usize,
    },
    Parameters { generation: u32 },
    Dispatch {
        kernel: Kernel,
        range: StageRange,
        binding: SlotBinding,
    },
    Barrier,
    Submit,
    Read { slot: usize },
}

#[derive(Debug, Default)]
pub struct ReferenceBackend {
    // [f32; 4] storage keeps every slot 16-byte aligned like a storage buffer
    slots: Vec<Vec<[f32; 4]>>,
    slot_size: usize,
    params: Option<ParameterBlock>,
    /// Slots written by a dispatch since the last barrier
    dirty: Vec<bool>,
    unsubmitted: usize,
    log: Vec<Command>,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &[Command] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Raw contents of `slot`, bypassing the command log and hazard checks.
    pub fn peek(&self, slot: usize) -> &[u8] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.slots[slot]);
        &bytes[..self.slot_size]
    }

    /// Typed copy of `slot`, bypassing the command log and hazard checks.
    pub fn peek_elements<E: Pod>(&self, slot: usize) -> Vec<E> {
        bytemuck::cast_slice::<u8, E>(self.peek(slot)).to_vec()
    }

    pub fn parameters(&self) -> Option<&ParameterBlock> {
        self.params.as_ref()
    }

    fn bytes_mut(&mut self, slot: usize) -> &mut [u8] {
        let size = self.slot_size;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.slots[slot]);
        &mut bytes[..size]
    }

    fn assert_readable(&self, slot: usize, reader: &str) {
        assert!(
            !self.dirty[slot],
            "read-after-write hazard: {reader} reads slot {slot} before a barrier"
        );
    }

    fn execute<E: Pod>(&mut self, dispatch: &Dispatch, kernel: impl Fn(&[E], &[E], usize) -> E) {
        let SlotBinding { src, aux, dst } = dispatch.binding;
        let src: Vec<E> = self.peek_elements(src);
        let aux: Vec<E> = self.peek_elements(aux);

        let outputs: Vec<(usize, E)> = dispatch
            .range
            .indices(dispatch.element_count)
            .map(|i| (i, kernel(&src, &aux, i)))
            .collect();

        let out: &mut [E] = bytemuck::cast_slice_mut(self.bytes_mut(dst));
        for (i, element) in outputs {
            out[i] = element;
        }
    }
}

impl ComputeBackend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn allocate_slots(&mut self, count: usize, slot_size: usize) -> SimResult<()> {
        let words = slot_size.div_ceil(16);
        self.slots = vec![vec![[0.0; 4]; words]; count];
        self.slot_size = slot_size;
        self.dirty = vec![false; count];
        self.unsubmitted = 0;
        self.log.push(Command::Allocate { count, slot_size });
        Ok(())
    }

    fn upload_slot(&mut self, slot: usize, bytes: &[u8]) {
        assert_eq!(bytes.len(), self.slot_size, "upload must cover the whole slot");
        self.bytes_mut(slot).copy_from_slice(bytes);
        self.log.push(Command::Upload { slot });
    }

    fn write_slot(&mut self, slot: usize, offset: usize, bytes: &[u8]) {
        self.bytes_mut(slot)[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.log.push(Command::Write {
            slot,
            offset,
            len: bytes.len(),
        });
    }

    fn copy_range(&mut self, from: usize, to: usize, offset: usize, len: usize) {
        self.assert_readable(from, "copy");
        let range = offset..offset + len;
        let bytes = self.peek(from)[range.clone()].to_vec();
        self.bytes_mut(to)[range].copy_from_slice(&bytes);
        self.log.push(Command::Copy {
            from,
            to,
            offset,
            len,
        });
    }

    fn upload_parameters(&mut self, params: &ParameterBlock) {
        self.params = Some(*params);
        self.log.push(Command::Parameters {
            generation: params.generation(),
        });
    }

    fn dispatch(&mut self, dispatch: &Dispatch) {
        let Some(params) = self.params else {
            panic!("{:?} dispatched before parameters were uploaded", dispatch.kernel);
        };
        assert_eq!(
            dispatch.generation,
            params.generation(),
            "{:?} planned against stale parameters",
            dispatch.kernel
        );

        let SlotBinding { src, aux, dst } = dispatch.binding;
        assert!(
            dst != src && dst != aux,
            "{:?} writes slot {dst} it also reads",
            dispatch.kernel
        );
        let reader = format!("{:?}", dispatch.kernel);
        self.assert_readable(src, &reader);
        self.assert_readable(aux, &reader);

        let rope = params.rope_constants();
        let body = params.body_constants();
        let [x1, x2] = dispatch.coefficients;

        match dispatch.kernel {
            Kernel::RopeModifiedEuler => {
                self.execute(dispatch, |s, _, i| rope_modified_euler(&rope, s, i))
            }
            Kernel::RopePredict => self.execute(dispatch, |s, _, i| rope_vv_predict(&rope, s, i)),
            Kernel::RopeVelocity => {
                self.execute(dispatch, |s, _, i| rope_vv_velocity(&rope, s, i))
            }
            Kernel::RopeVerlet => {
                self.execute(dispatch, |prev, cur, i| rope_verlet(&rope, prev, cur, i))
            }
            Kernel::RopePrimeForce => {
                self.execute(dispatch, |s, _, i| rope_prime_force(&rope, s, i))
            }
            Kernel::RopePrimePrevious => {
                self.execute(dispatch, |s, _, i| rope_prime_previous(&rope, s, i))
            }
            Kernel::RopeDeriveVelocity => self.execute(dispatch, |prev, cur, i| {
                rope_derive_velocity(&rope, prev, cur, i)
            }),
            Kernel::BodyRkPrime => self.execute(dispatch, |s, _, i| body_rk_prime(s, i)),
            Kernel::BodyRkStage => self.execute(dispatch, |org, cur, i| {
                body_rk_stage(&body, org, cur, i, x1, x2)
            }),
            Kernel::BodyRkFinish => {
                self.execute(dispatch, |s, _, i| body_rk_finish(&body, s, i, x2))
            }
            Kernel::BodyVvPrime => self.execute(dispatch, |s, _, i| body_vv_prime(&body, s, i)),
            Kernel::BodyVv => self.execute(dispatch, |s, _, i| body_vv(&body, s, i)),
        }

        self.dirty[dst] = true;
        self.unsubmitted += 1;
        self.log.push(Command::Dispatch {
            kernel: dispatch.kernel,
            range: dispatch.range,
            binding: dispatch.binding,
        });
    }

    fn barrier(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
        self.log.push(Command::Barrier);
    }

    fn submit(&mut self) -> SimResult<()> {
        self.unsubmitted = 0;
        self.log.push(Command::Submit);
        Ok(())
    }

    fn read_slot(&mut self, slot: usize) -> SimResult<Vec<u8>> {
        assert_eq!(
            self.unsubmitted, 0,
            "readback of slot {slot} with unsubmitted dispatches"
        );
        self.assert_readable(slot, "readback");
        self.log.push(Command::Read { slot });
        Ok(self.peek(slot).to_vec())
    }

    fn check_errors(&mut self) -> SimResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn rope_backend(n: usize) -> (ReferenceBackend, ParameterBlock) {
        let params = ParameterBlock::rope_default(n);
        let nodes = rope_line(&RopeConfig {
            node_count: n,
            ..Default::default()
        });
        let mut backend = ReferenceBackend::new();
        backend
            .allocate_slots(2, n * std::mem::size_of::<RopeNode>())
            .unwrap();
        backend.upload_slot(0, bytemuck::cast_slice(&nodes));
        backend.upload_slot(1, bytemuck::cast_slice(&nodes));
        backend.upload_parameters(&params);
        (backend, params)
    }

    fn euler(range: StageRange, n: usize) -> Dispatch {
        Dispatch {
            kernel: Kernel::RopeModifiedEuler,
            range,
            binding: SlotBinding { src: 0, aux: 0, dst: 1 },
            coefficients: [0.0; 2],
            element_count: n,
            generation: 0,
        }
    }

    #[test]
    fn partial_write_changes_only_target_bytes() {
        let (mut backend, _) = rope_backend(4);
        let before: Vec<RopeNode> = backend.peek_elements(0);
        let word = position_word(0.1, 0.2, true);
        backend.write_slot(0, RopeNode::record_offset(2), bytemuck::cast_slice(&word));

        let after: Vec<RopeNode> = backend.peek_elements(0);
        assert_eq!(after[2].position(), Vec3::new(0.1, 0.2, 0.0));
        assert!(!after[2].is_free());
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1], before[1]);
        assert_eq!(after[3], before[3]);
    }

    #[test]
    fn copy_range_moves_one_record_between_slots() {
        let (mut backend, _) = rope_backend(4);
        let word = position_word(0.3, -0.3, false);
        let offset = RopeNode::record_offset(1);
        backend.write_slot(0, offset, bytemuck::cast_slice(&word));
        backend.copy_range(0, 1, offset, 16);

        let copied: Vec<RopeNode> = backend.peek_elements(1);
        assert_eq!(copied[1].position, word);
        assert_eq!(copied[2], backend.peek_elements::<RopeNode>(0)[2]);
    }

    #[test]
    fn boundary_and_interior_write_disjoint_ranges() {
        let (mut backend, params) = rope_backend(6);
        let n = params.element_count();
        backend.dispatch(&euler(StageRange::Boundary, n));
        backend.dispatch(&euler(StageRange::Interior, n));
        backend.barrier();
        backend.submit().unwrap();

        let src: Vec<RopeNode> = backend.peek_elements(0);
        let out: Vec<RopeNode> = backend.peek_elements(1);
        let c = params.rope_constants();
        for i in 0..n {
            assert_eq!(out[i], rope_modified_euler(&c, &src, i));
        }
    }

    #[test]
    #[should_panic(expected = "read-after-write hazard")]
    fn reading_unsynchronised_output_panics() {
        let (mut backend, params) = rope_backend(4);
        backend.dispatch(&euler(StageRange::All, params.element_count()));
        let mut back = euler(StageRange::All, params.element_count());
        back.binding = SlotBinding { src: 1, aux: 1, dst: 0 };
        backend.dispatch(&back);
    }

    #[test]
    #[should_panic(expected = "unsubmitted")]
    fn readback_before_submit_panics() {
        let (mut backend, params) = rope_backend(4);
        backend.dispatch(&euler(StageRange::All, params.element_count()));
        backend.barrier();
        let _ = backend.read_slot(1);
    }

    #[test]
    #[should_panic(expected = "stale parameters")]
    fn stale_generation_panics() {
        let (mut backend, params) = rope_backend(4);
        let mut dispatch = euler(StageRange::All, params.element_count());
        dispatch.generation = 1;
        backend.dispatch(&dispatch);
    }
}
