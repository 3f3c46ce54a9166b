//! wgpu compute backend
//!
//! Dispatches are recorded until `submit`. Each run of dispatches between two
//! barriers becomes one compute pass; per-stage constants (index range and
//! Runge-Kutta coefficients) live in one uniform buffer addressed with dynamic
//! offsets. CPU writes flush recorded work first, so `queue.write_buffer` can
//! never overtake a dispatch issued before it.
//!
//! In debug builds every call that touches the device runs inside its own
//! validation scope. Errors are held until `check_errors`, so work other code
//! records on the same device is never reported as a simulation failure.

use super::{ComputeBackend, Dispatch, SlotBinding};
use crate::error::{SimError, SimResult};
use crate::params::ParameterBlock;
use crate::scheme::{Kernel, KernelModule, StageRange};
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// Threads per workgroup (matches `@workgroup_size` in the kernels)
const WORKGROUP_SIZE: u32 = 64;

/// Stage constant slots available per submission
const MAX_STAGES_PER_SUBMIT: usize = 16;

/// Per-dispatch uniform (matches WGSL `Stage`)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct StageConstants {
    first: u32,
    count: u32,
    x_dt1: f32,
    x_dt2: f32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Buffers
    slots: Vec<wgpu::Buffer>,
    slot_size: u64,
    params_buffer: wgpu::Buffer,
    stage_buffer: wgpu::Buffer,
    stage_stride: u64,
    readback_buffer: Option<wgpu::Buffer>,

    // Pipelines
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    rope_shader: wgpu::ShaderModule,
    body_shader: wgpu::ShaderModule,
    pipelines: HashMap<(KernelModule, &'static str), wgpu::ComputePipeline>,
    bind_groups: HashMap<SlotBinding, wgpu::BindGroup>,

    // Recorded work, split at barriers
    batches: Vec<Vec<Dispatch>>,
    recorded: usize,

    /// First validation error caught since the last `check_errors`
    pending_error: Option<String>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        log::info!("Initializing WgpuBackend...");

        if cfg!(debug_assertions) {
            device.push_error_scope(wgpu::ErrorFilter::Validation);
        }

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Parameter Block Buffer"),
            contents: bytemuck::cast_slice(&[ParameterBlock::zeroed()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // One aligned slot per stage constant
        let stage_stride = u64::from(device.limits().min_uniform_buffer_offset_alignment)
            .max(std::mem::size_of::<StageConstants>() as u64);
        let stage_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Stage Constants Buffer"),
            size: stage_stride * MAX_STAGES_PER_SUBMIT as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let rope_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Rope Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/rope.wgsl").into()),
        });

        let body_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Body Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/body.wgsl").into()),
        });

        log::info!("Shaders loaded");

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Simulation Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<StageConstants>() as u64,
                        ),
                    },
                    count: None,
                },
                storage(2, true),
                storage(3, true),
                storage(4, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Simulation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pending_error = if cfg!(debug_assertions) {
            pollster::block_on(device.pop_error_scope()).map(|e| e.to_string())
        } else {
            None
        };

        Self {
            device,
            queue,
            slots: Vec::new(),
            slot_size: 0,
            params_buffer,
            stage_buffer,
            stage_stride,
            readback_buffer: None,
            bind_group_layout,
            pipeline_layout,
            rope_shader,
            body_shader,
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            batches: vec![Vec::new()],
            recorded: 0,
            pending_error,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Storage buffer backing `slot`, for binding in render passes.
    pub fn slot_buffer(&self, slot: usize) -> &wgpu::Buffer {
        &self.slots[slot]
    }

    /// Run `f` under a validation scope and keep the first error it raises.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        if !cfg!(debug_assertions) {
            return f(self);
        }
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(self);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            log::error!("Simulation validation error: {error}");
            self.pending_error.get_or_insert_with(|| error.to_string());
        }
        out
    }

    fn ensure_pipeline(&mut self, kernel: Kernel, range: StageRange) -> (KernelModule, &'static str) {
        let key = (kernel.module(), kernel.entry_point(range));
        if !self.pipelines.contains_key(&key) {
            log::debug!("Creating compute pipeline `{}`", key.1);
            let module = match key.0 {
                KernelModule::Rope => &self.rope_shader,
                KernelModule::Body => &self.body_shader,
            };
            let pipeline = self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(key.1),
                    layout: Some(&self.pipeline_layout),
                    module,
                    entry_point: Some(key.1),
                    compilation_options: Default::default(),
                    cache: None,
                });
            self.pipelines.insert(key, pipeline);
        }
        key
    }

    fn ensure_bind_group(&mut self, binding: SlotBinding) {
        if self.bind_groups.contains_key(&binding) {
            return;
        }
        let whole = |slot: usize| self.slots[slot].as_entire_binding();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Simulation Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.stage_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<StageConstants>() as u64),
                    }),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: whole(binding.src),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: whole(binding.aux),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: whole(binding.dst),
                },
            ],
        });
        self.bind_groups.insert(binding, bind_group);
    }

    /// Submit everything recorded so far.
    fn flush(&mut self) {
        if self.recorded > 0 {
            self.scoped(Self::encode_recorded);
        }
    }

    fn encode_recorded(&mut self) {
        let stride = self.stage_stride as usize;
        let mut constants = vec![0u8; stride * self.recorded];
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Simulation Encoder"),
            });

        let mut index = 0;
        for batch in self.batches.iter().filter(|b| !b.is_empty()) {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Simulation Compute Pass"),
                timestamp_writes: None,
            });
            for dispatch in batch {
                let invocations = dispatch.invocations() as u32;
                let stage = StageConstants {
                    first: dispatch.range.first() as u32,
                    count: invocations,
                    x_dt1: dispatch.coefficients[0],
                    x_dt2: dispatch.coefficients[1],
                };
                let offset = index * stride;
                constants[offset..offset + std::mem::size_of::<StageConstants>()]
                    .copy_from_slice(bytemuck::bytes_of(&stage));

                let key = (dispatch.kernel.module(), dispatch.kernel.entry_point(dispatch.range));
                compute_pass.set_pipeline(&self.pipelines[&key]);
                compute_pass.set_bind_group(0, &self.bind_groups[&dispatch.binding], &[offset as u32]);
                compute_pass.dispatch_workgroups(invocations.div_ceil(WORKGROUP_SIZE), 1, 1);
                index += 1;
            }
        }

        // Lands before the command buffer below
        self.queue.write_buffer(&self.stage_buffer, 0, &constants);
        self.queue.submit(std::iter::once(encoder.finish()));

        self.batches.clear();
        self.batches.push(Vec::new());
        self.recorded = 0;
    }

    /// Staging buffer sized to one slot, recreated after reallocation.
    fn readback_buffer(&mut self) -> wgpu::Buffer {
        let size = self.slot_size;
        match &self.readback_buffer {
            Some(buffer) if buffer.size() == size => buffer.clone(),
            _ => {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("Slot Readback Staging Buffer"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.readback_buffer = Some(buffer.clone());
                buffer
            }
        }
    }

    fn create_slots(&mut self, count: usize, slot_size: usize) -> SimResult<()> {
        let size = (slot_size as u64).next_multiple_of(16);
        let limit = u64::from(self.device.limits().max_storage_buffer_binding_size);
        if size > limit {
            return Err(SimError::Device(format!(
                "slot of {size} bytes exceeds the storage binding limit of {limit}"
            )));
        }

        self.slots = (0..count)
            .map(|i| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Simulation Slot {i}")),
                    size,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();
        self.slot_size = slot_size as u64;
        self.bind_groups.clear();

        log::info!("Allocated {count} slots of {slot_size} bytes");
        Ok(())
    }

    /// Copy `slot` into the readback staging buffer.
    fn copy_to_staging(&mut self, slot: usize) -> wgpu::Buffer {
        let size = self.slot_size;
        let staging = self.readback_buffer();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Slot Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.slots[slot], 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));
        staging
    }
}

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn allocate_slots(&mut self, count: usize, slot_size: usize) -> SimResult<()> {
        self.flush();
        self.scoped(|backend| backend.create_slots(count, slot_size))
    }

    fn upload_slot(&mut self, slot: usize, bytes: &[u8]) {
        self.flush();
        self.scoped(|backend| backend.queue.write_buffer(&backend.slots[slot], 0, bytes));
    }

    fn write_slot(&mut self, slot: usize, offset: usize, bytes: &[u8]) {
        self.flush();
        self.scoped(|backend| {
            backend
                .queue
                .write_buffer(&backend.slots[slot], offset as u64, bytes)
        });
    }

    fn copy_range(&mut self, from: usize, to: usize, offset: usize, len: usize) {
        self.flush();
        self.scoped(|backend| {
            let mut encoder = backend
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Slot Copy Encoder"),
                });
            let offset = offset as u64;
            encoder.copy_buffer_to_buffer(
                &backend.slots[from],
                offset,
                &backend.slots[to],
                offset,
                len as u64,
            );
            backend.queue.submit(std::iter::once(encoder.finish()));
        });
    }

    fn upload_parameters(&mut self, params: &ParameterBlock) {
        self.flush();
        self.scoped(|backend| {
            backend
                .queue
                .write_buffer(&backend.params_buffer, 0, bytemuck::cast_slice(&[*params]))
        });
    }

    fn dispatch(&mut self, dispatch: &Dispatch) {
        if dispatch.invocations() == 0 {
            return;
        }
        if self.recorded == MAX_STAGES_PER_SUBMIT {
            self.flush();
        }

        self.scoped(|backend| {
            backend.ensure_pipeline(dispatch.kernel, dispatch.range);
            backend.ensure_bind_group(dispatch.binding);
        });

        if let Some(batch) = self.batches.last_mut() {
            batch.push(*dispatch);
        }
        self.recorded += 1;
    }

    fn barrier(&mut self) {
        if self.batches.last().is_some_and(|b| !b.is_empty()) {
            self.batches.push(Vec::new());
        }
    }

    fn submit(&mut self) -> SimResult<()> {
        self.flush();
        Ok(())
    }

    fn read_slot(&mut self, slot: usize) -> SimResult<Vec<u8>> {
        self.flush();
        let staging = self.scoped(|backend| backend.copy_to_staging(slot));

        let size = self.slot_size;
        let slice = staging.slice(..size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| SimError::Readback(e.to_string()))?;

        rx.recv()
            .map_err(|e| SimError::Readback(e.to_string()))?
            .map_err(|e| SimError::Readback(e.to_string()))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();

        log::debug!("Read back slot {slot} ({size} bytes)");
        Ok(bytes)
    }

    fn check_errors(&mut self) -> SimResult<()> {
        match self.pending_error.take() {
            Some(error) => Err(SimError::Device(error)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Option<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()
    }

    #[test]
    fn errors_from_other_device_users_stay_with_them() {
        let Some((device, queue)) = device() else {
            eprintln!("no adapter available, skipping");
            return;
        };
        let mut backend = WgpuBackend::new(device.clone(), queue);
        backend.allocate_slots(2, 64).unwrap();
        backend.check_errors().unwrap();

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        // MAP_READ may only be combined with COPY_DST
        let _ = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Renderer Buffer"),
            size: 16,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        backend.upload_slot(0, &[0u8; 64]);
        backend.submit().unwrap();

        assert!(backend.check_errors().is_ok());
        assert!(pollster::block_on(device.pop_error_scope()).is_some());
    }
}
