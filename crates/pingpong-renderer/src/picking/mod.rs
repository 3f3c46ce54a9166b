//! GPU picking support (offscreen index pass + one-pixel readback).
//!
//! The pick target is `R32Uint`. Elements write their own index and the
//! background is cleared to [`NO_ELEMENT`].

pub mod renderer;

pub use renderer::{PickFrame, PickingRenderer};

use wgpu::util::DeviceExt;

/// Format of the pick target.
pub const PICK_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;

/// Background value of the pick target.
pub const NO_ELEMENT: u32 = u32::MAX;

/// Result of a pick, as returned by the GPU readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickResult {
    /// The raw value written by the picking shader.
    pub id: u32,
}

impl PickResult {
    pub fn is_hit(&self) -> bool {
        self.id != NO_ELEMENT
    }

    /// Index of the element under the cursor, if any.
    pub fn element(&self) -> Option<u32> {
        self.is_hit().then_some(self.id)
    }
}

/// Offscreen resources used for GPU picking.
pub struct GpuPicker {
    /// Pick target view the index pass renders into.
    pub id_texture_view: wgpu::TextureView,
    id_texture: wgpu::Texture,

    /// Buffer the picked pixel is copied into for mapping.
    staging: wgpu::Buffer,

    width: u32,
    height: u32,
}

impl GpuPicker {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let (id_texture, id_texture_view) = create_id_texture(device, width, height);

        // `bytes_per_row` must be aligned to COPY_BYTES_PER_ROW_ALIGNMENT even for
        // a single pixel, so the staging buffer is one aligned row.
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Picking Readback Buffer"),
            contents: &[0u8; wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize],
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        });

        Self {
            id_texture_view,
            id_texture,
            staging,
            width,
            height,
        }
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);

        if self.width == width && self.height == height {
            return;
        }

        log::debug!("Resizing pick target to {width}x{height}");
        self.width = width;
        self.height = height;
        (self.id_texture, self.id_texture_view) = create_id_texture(device, width, height);
    }

    /// Copy the pixel at `(x, y)` from the pick target into the staging buffer.
    /// Coordinates are clamped to the target.
    pub fn encode_read_pixel(&self, encoder: &mut wgpu::CommandEncoder, x: u32, y: u32) {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.id_texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
                    rows_per_image: Some(1),
                },
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Decode the staging buffer.
    ///
    /// The caller maps the staging buffer after submitting the copy, and
    /// unmaps it afterwards.
    pub fn read_mapped(&self) -> PickResult {
        let data = self.staging.slice(..).get_mapped_range();
        decode_pixel(&data)
    }

    /// Access the staging buffer for mapping control (caller-driven).
    pub fn staging_buffer(&self) -> &wgpu::Buffer {
        &self.staging
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn decode_pixel(data: &[u8]) -> PickResult {
    let id = match data {
        [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]),
        _ => NO_ELEMENT,
    };
    PickResult { id }
}

fn create_id_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Picking ID Texture"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: PICK_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_a_miss() {
        let result = decode_pixel(&[0xff; 256]);
        assert!(!result.is_hit());
        assert_eq!(result.element(), None);
    }

    #[test]
    fn index_zero_is_a_hit() {
        let mut row = [0u8; 256];
        assert_eq!(decode_pixel(&row).element(), Some(0));

        row[..4].copy_from_slice(&17u32.to_le_bytes());
        assert_eq!(decode_pixel(&row).element(), Some(17));
    }

    #[test]
    fn short_readback_is_a_miss() {
        assert_eq!(decode_pixel(&[1, 2]).element(), None);
    }
}
