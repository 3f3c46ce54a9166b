//! Picking renderer: draws element indices into the offscreen pick target.
//!
//! Used together with [`GpuPicker`], which owns the target and readback
//! buffer. Elements are drawn as discs of `pick_size` pixels; when discs
//! overlap the later index wins.

use super::{GpuPicker, NO_ELEMENT, PICK_FORMAT};
use crate::renderer::ElementLayout;
use pingpong_simulation::{DrawMode, SlotRenderer, WgpuBackend};

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct PickUniform {
    viewport: [f32; 2],
    point_size: f32,
    stride: u32,
    position_word: u32,
    _padding: [u32; 3],
}

pub struct PickingRenderer {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    view_buffer: wgpu::Buffer,
    layout: ElementLayout,
    /// Pick disc diameter in pixels; larger than the drawn point so small
    /// elements are easy to grab.
    pub pick_size: f32,
}

impl PickingRenderer {
    pub fn new(device: &wgpu::Device, layout: ElementLayout) -> Self {
        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Picking View Buffer"),
            size: std::mem::size_of::<PickUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Picking Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/picking.wgsl").into()),
        });

        // Bind group layout:
        // 0: view uniform
        // 1: slot storage
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Picking Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Picking Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        log::debug!("Creating picking pipeline...");
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Picking Element Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_pick"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_pick"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: PICK_FORMAT,
                    // Integer targets cannot blend.
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self {
            pipeline,
            bind_group_layout,
            view_buffer,
            layout,
            pick_size: 20.0,
        }
    }

    /// Bind this renderer to a picker and cursor pixel for one pick.
    pub fn frame<'a>(&'a self, picker: &'a GpuPicker, x: u32, y: u32) -> PickFrame<'a> {
        PickFrame {
            renderer: self,
            picker,
            x,
            y,
        }
    }

    /// Render indices into the pick target, then copy the cursor pixel out.
    fn render(
        &self,
        backend: &WgpuBackend,
        picker: &GpuPicker,
        slot: usize,
        element_count: usize,
        cursor: (u32, u32),
    ) {
        let device = backend.device();
        let queue = backend.queue();
        let (width, height) = picker.dimensions();

        queue.write_buffer(
            &self.view_buffer,
            0,
            bytemuck::bytes_of(&PickUniform {
                viewport: [width as f32, height as f32],
                point_size: self.pick_size,
                stride: self.layout.stride,
                position_word: self.layout.position_word,
                _padding: [0; 3],
            }),
        );

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Picking Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.view_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: backend.slot_buffer(slot).as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Picking Encoder"),
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Picking Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &picker.id_texture_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: NO_ELEMENT as f64,
                            g: 0.0,
                            b: 0.0,
                            a: 0.0,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..6, 0..element_count as u32);
        }

        picker.encode_read_pixel(&mut encoder, cursor.0, cursor.1);
        queue.submit(std::iter::once(encoder.finish()));
    }
}

/// [`PickingRenderer`] bound to a picker and the cursor pixel.
pub struct PickFrame<'a> {
    renderer: &'a PickingRenderer,
    picker: &'a GpuPicker,
    x: u32,
    y: u32,
}

impl SlotRenderer<WgpuBackend> for PickFrame<'_> {
    fn draw_slot(&mut self, backend: &WgpuBackend, slot: usize, element_count: usize, _mode: DrawMode) {
        self.renderer
            .render(backend, self.picker, slot, element_count, (self.x, self.y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_uniform_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<PickUniform>(), 32);
    }
}
