//! Element rendering straight out of the current simulation slot.

use crate::palette::ElementPalette;
use pingpong_physics::Element;
use pingpong_simulation::{DrawMode, SlotRenderer, WgpuBackend};

/// Where positions live inside a slot buffer, in 16-byte words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElementLayout {
    pub stride: u32,
    pub position_word: u32,
}

impl ElementLayout {
    pub fn of<E: Element>() -> Self {
        Self {
            stride: (std::mem::size_of::<E>() / 16) as u32,
            position_word: (E::POSITION_OFFSET / 16) as u32,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ViewUniform {
    free_color: [f32; 4],
    pinned_color: [f32; 4],
    line_color: [f32; 4],
    viewport: [f32; 2],
    point_size: f32,
    stride: u32,
    position_word: u32,
    _padding: [u32; 3],
}

pub struct ElementRenderer {
    point_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    view_buffer: wgpu::Buffer,
    layout: ElementLayout,
    pub palette: ElementPalette,
    /// Point diameter in pixels.
    pub point_size: f32,
    viewport: [f32; 2],
}

impl ElementRenderer {
    pub fn new(
        device: &wgpu::Device,
        surface_config: &wgpu::SurfaceConfiguration,
        layout: ElementLayout,
        palette: ElementPalette,
    ) -> Self {
        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Element View Buffer"),
            size: std::mem::size_of::<ViewUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Element Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/elements.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Element Bind Group Layout"),
            entries: &[
                // View (Uniform) - Binding 0
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Slot (Storage) - Binding 1
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
            label: Some("Element Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, vertex: &str, fragment: &str, topology: wgpu::PrimitiveTopology| {
            log::debug!("Creating {label}...");
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some(vertex),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some(fragment),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_config.format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
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
            })
        };

        let point_pipeline = pipeline(
            "Element Point Pipeline",
            "vs_point",
            "fs_point",
            wgpu::PrimitiveTopology::TriangleList,
        );
        let line_pipeline = pipeline(
            "Element Line Pipeline",
            "vs_line",
            "fs_line",
            wgpu::PrimitiveTopology::LineStrip,
        );

        log::info!(
            "Element renderer ready (stride {} words, position word {})",
            layout.stride,
            layout.position_word
        );

        Self {
            point_pipeline,
            line_pipeline,
            bind_group_layout,
            view_buffer,
            layout,
            palette,
            point_size: 8.0,
            viewport: [
                surface_config.width.max(1) as f32,
                surface_config.height.max(1) as f32,
            ],
        }
    }

    pub fn resize(&mut self, new_config: &wgpu::SurfaceConfiguration) {
        self.viewport = [
            new_config.width.max(1) as f32,
            new_config.height.max(1) as f32,
        ];
    }

    pub fn layout(&self) -> ElementLayout {
        self.layout
    }

    /// Bind this renderer to a surface texture for one frame.
    pub fn frame<'a>(&'a self, surface_view: &'a wgpu::TextureView) -> ElementFrame<'a> {
        ElementFrame {
            renderer: self,
            surface_view,
        }
    }

    fn uniform(&self) -> ViewUniform {
        ViewUniform {
            free_color: self.palette.free,
            pinned_color: self.palette.pinned,
            line_color: self.palette.line,
            viewport: self.viewport,
            point_size: self.point_size,
            stride: self.layout.stride,
            position_word: self.layout.position_word,
            _padding: [0; 3],
        }
    }

    fn render(
        &self,
        backend: &WgpuBackend,
        surface_view: &wgpu::TextureView,
        slot: usize,
        element_count: usize,
        mode: DrawMode,
    ) {
        let device = backend.device();
        let queue = backend.queue();
        queue.write_buffer(&self.view_buffer, 0, bytemuck::bytes_of(&self.uniform()));

        // Slots are rotated every step, so the bind group is built per frame.
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Element Bind Group"),
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
            label: Some("Element Render Encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Element Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.palette.background),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let count = element_count as u32;
            render_pass.set_bind_group(0, &bind_group, &[]);

            if matches!(mode, DrawMode::LineStrip | DrawMode::PointsAndLines) {
                render_pass.set_pipeline(&self.line_pipeline);
                render_pass.draw(0..count, 0..1);
            }
            if matches!(mode, DrawMode::Points | DrawMode::PointsAndLines) {
                render_pass.set_pipeline(&self.point_pipeline);
                render_pass.draw(0..6, 0..count);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
    }
}

/// [`ElementRenderer`] bound to the surface texture of the frame being drawn.
pub struct ElementFrame<'a> {
    renderer: &'a ElementRenderer,
    surface_view: &'a wgpu::TextureView,
}

impl SlotRenderer<WgpuBackend> for ElementFrame<'_> {
    fn draw_slot(&mut self, backend: &WgpuBackend, slot: usize, element_count: usize, mode: DrawMode) {
        self.renderer
            .render(backend, self.surface_view, slot, element_count, mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pingpong_physics::{Body, RopeNode};

    #[test]
    fn layouts_match_element_records() {
        assert_eq!(
            ElementLayout::of::<RopeNode>(),
            ElementLayout {
                stride: 3,
                position_word: 0
            }
        );
        assert_eq!(
            ElementLayout::of::<Body>(),
            ElementLayout {
                stride: 5,
                position_word: 0
            }
        );
    }

    #[test]
    fn view_uniform_matches_shader_layout() {
        assert_eq!(std::mem::size_of::<ViewUniform>(), 80);
    }
}
