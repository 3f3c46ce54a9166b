//! Catppuccin Mocha colours, converted to linear space for sRGB surfaces.

use catppuccin::PALETTE;

/// Decode one sRGB channel into linear light.
pub fn srgb_to_linear(channel: u8) -> f32 {
    let c = channel as f32 / 255.0;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Opaque linear RGBA for a palette colour.
pub fn linear(color: &catppuccin::Color) -> [f32; 4] {
    [
        srgb_to_linear(color.rgb.r),
        srgb_to_linear(color.rgb.g),
        srgb_to_linear(color.rgb.b),
        1.0,
    ]
}

/// Colours used by [`crate::ElementRenderer`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ElementPalette {
    pub free: [f32; 4],
    pub pinned: [f32; 4],
    pub line: [f32; 4],
    pub background: wgpu::Color,
}

impl ElementPalette {
    pub fn rope() -> Self {
        let mocha = &PALETTE.mocha.colors;
        Self {
            free: linear(&mocha.sky),
            pinned: linear(&mocha.peach),
            line: linear(&mocha.lavender),
            background: background(),
        }
    }

    pub fn nbody() -> Self {
        let mocha = &PALETTE.mocha.colors;
        Self {
            free: linear(&mocha.yellow),
            pinned: linear(&mocha.red),
            line: linear(&mocha.overlay1),
            background: background(),
        }
    }
}

impl Default for ElementPalette {
    fn default() -> Self {
        Self::rope()
    }
}

/// Mocha base, used as the clear colour.
pub fn background() -> wgpu::Color {
    let [r, g, b, a] = linear(&PALETTE.mocha.colors.base);
    wgpu::Color {
        r: r as f64,
        g: g as f64,
        b: b as f64,
        a: a as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_function_endpoints() {
        assert_eq!(srgb_to_linear(0), 0.0);
        assert!((srgb_to_linear(255) - 1.0).abs() < 1e-6);
        assert!(srgb_to_linear(128) < 0.5);
    }

    #[test]
    fn mocha_base_is_dark_blue_grey() {
        // #1e1e2e
        let base = background();
        assert!((base.r - 0.01298).abs() < 1e-4);
        assert!((base.g - 0.01298).abs() < 1e-4);
        assert!((base.b - 0.02732).abs() < 1e-4);
        assert_eq!(base.a, 1.0);
    }

    #[test]
    fn pinned_stands_out_from_free() {
        for palette in [ElementPalette::rope(), ElementPalette::nbody()] {
            assert_ne!(palette.free, palette.pinned);
        }
    }
}
