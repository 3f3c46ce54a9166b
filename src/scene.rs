//! Rope and N-body scenes: a driver plus its renderers and drag state.

use glam::Vec2;
use pingpong_physics::{
    random_bodies, remove_drift, rope_line, Aggregate, NBodyConfig, RopeConfig,
};
use pingpong_renderer::{
    ElementLayout, ElementPalette, ElementRenderer, GpuPicker, PickResult, PickingRenderer,
};
use pingpong_simulation::{
    BodyScheme, DrawMode, DriverBuilder, ParameterBlock, RopeScheme, Scheme, SimError, SimResult,
    SimulationDriver, WgpuBackend,
};

/// Element being dragged with the left mouse button.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Drag {
    index: usize,
    was_pinned: bool,
    last: Vec2,
}

/// What the window loop needs from a scene, independent of its scheme type.
pub trait SceneControl {
    fn name(&self) -> &'static str;
    fn step(&mut self) -> SimResult<()>;
    fn draw(&self, surface_view: &wgpu::TextureView);
    fn resize(&mut self, config: &wgpu::SurfaceConfiguration);

    /// Element under pixel `(x, y)` of the pick target.
    fn pick(&self, picker: &GpuPicker, x: u32, y: u32) -> SimResult<Option<usize>>;

    fn begin_drag(&mut self, index: usize, at: Vec2);
    fn drag_to(&mut self, at: Vec2);
    fn end_drag(&mut self);
    fn toggle_pin(&mut self, index: usize);

    /// Select the scheme under number key `number` (1-based).
    fn select_scheme(&mut self, number: usize) -> SimResult<()>;
    fn reset(&mut self) -> SimResult<()>;
    fn aggregate(&mut self) -> SimResult<Aggregate>;
}

pub struct Scene<S: Scheme> {
    name: &'static str,
    driver: SimulationDriver<S, WgpuBackend>,
    renderer: ElementRenderer,
    picking: PickingRenderer,
    draw_mode: DrawMode,
    steps_per_frame: usize,
    drag: Option<Drag>,
}

impl Scene<RopeScheme> {
    pub fn rope(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: &wgpu::SurfaceConfiguration,
    ) -> SimResult<Self> {
        let nodes = rope_line(&RopeConfig::default());
        let params = ParameterBlock::rope_default(nodes.len());
        let driver = DriverBuilder::new(RopeScheme::ModifiedEuler)
            .slots(3)
            .build(WgpuBackend::new(device.clone(), queue.clone()), nodes, params)?;

        Ok(Self::new(
            "rope",
            driver,
            device,
            config,
            ElementPalette::rope(),
            DrawMode::PointsAndLines,
            1,
        ))
    }
}

impl Scene<BodyScheme> {
    pub fn nbody(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: &wgpu::SurfaceConfiguration,
    ) -> SimResult<Self> {
        let mut bodies = random_bodies(&NBodyConfig::default());
        remove_drift(&mut bodies);
        let params = ParameterBlock::nbody_default(bodies.len());
        let driver = DriverBuilder::new(BodyScheme::VelocityVerlet)
            .slots(3)
            .build(WgpuBackend::new(device.clone(), queue.clone()), bodies, params)?;

        let mut scene = Self::new(
            "n-body",
            driver,
            device,
            config,
            ElementPalette::nbody(),
            DrawMode::Points,
            4,
        );
        scene.renderer.point_size = 4.0;
        Ok(scene)
    }
}

impl<S: Scheme> Scene<S> {
    fn new(
        name: &'static str,
        driver: SimulationDriver<S, WgpuBackend>,
        device: &wgpu::Device,
        config: &wgpu::SurfaceConfiguration,
        palette: ElementPalette,
        draw_mode: DrawMode,
        steps_per_frame: usize,
    ) -> Self {
        let layout = ElementLayout::of::<S::Element>();
        Self {
            name,
            driver,
            renderer: ElementRenderer::new(device, config, layout, palette),
            picking: PickingRenderer::new(device, layout),
            draw_mode,
            steps_per_frame,
            drag: None,
        }
    }
}

impl<S: Scheme> SceneControl for Scene<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn step(&mut self) -> SimResult<()> {
        for _ in 0..self.steps_per_frame {
            self.driver.step()?;
        }
        Ok(())
    }

    fn draw(&self, surface_view: &wgpu::TextureView) {
        self.driver
            .render(&mut self.renderer.frame(surface_view), self.draw_mode);
    }

    fn resize(&mut self, config: &wgpu::SurfaceConfiguration) {
        self.renderer.resize(config);
    }

    fn pick(&self, picker: &GpuPicker, x: u32, y: u32) -> SimResult<Option<usize>> {
        self.driver
            .render(&mut self.picking.frame(picker, x, y), DrawMode::Points);
        let result = read_pick(self.driver.backend().device(), picker)?;
        Ok(result
            .element()
            .map(|index| index as usize)
            .filter(|&index| index < self.driver.element_count()))
    }

    fn begin_drag(&mut self, index: usize, at: Vec2) {
        let was_pinned = self.driver.flags().is_pinned(index);
        self.driver.move_element(index, at.x, at.y, true);
        self.drag = Some(Drag {
            index,
            was_pinned,
            last: at,
        });
        log::debug!("Dragging {} element {index}", self.name);
    }

    fn drag_to(&mut self, at: Vec2) {
        if let Some(drag) = &mut self.drag {
            drag.last = at;
            self.driver.move_element(drag.index, at.x, at.y, true);
        }
    }

    fn end_drag(&mut self) {
        if let Some(drag) = self.drag.take() {
            self.driver
                .move_element(drag.index, drag.last.x, drag.last.y, drag.was_pinned);
        }
    }

    fn toggle_pin(&mut self, index: usize) {
        let pinned = self.driver.trigger_fix(index);
        log::info!(
            "{} element {index} {}",
            self.name,
            if pinned { "pinned" } else { "released" }
        );
    }

    fn select_scheme(&mut self, number: usize) -> SimResult<()> {
        let Some(&scheme) = number.checked_sub(1).and_then(|i| S::all().get(i)) else {
            log::warn!("{} has no scheme {number}", self.name);
            return Ok(());
        };
        self.driver.set_scheme(scheme)
    }

    fn reset(&mut self) -> SimResult<()> {
        self.drag = None;
        self.driver.reset()
    }

    fn aggregate(&mut self) -> SimResult<Aggregate> {
        self.driver.aggregate()
    }
}

/// Map the picker's staging buffer and decode the copied pixel.
fn read_pick(device: &wgpu::Device, picker: &GpuPicker) -> SimResult<PickResult> {
    let slice = picker.staging_buffer().slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| SimError::Readback(e.to_string()))?;
    rx.recv()
        .map_err(|e| SimError::Readback(e.to_string()))?
        .map_err(|e| SimError::Readback(e.to_string()))?;

    let result = picker.read_mapped();
    picker.staging_buffer().unmap();
    Ok(result)
}

/// Window pixel coordinates (origin top-left) to simulation coordinates,
/// which span `[-1, 1]` with y pointing up.
pub fn window_to_sim(x: f64, y: f64, width: u32, height: u32) -> Vec2 {
    let w = width.max(1) as f64;
    let h = height.max(1) as f64;
    Vec2::new((2.0 * x / w - 1.0) as f32, (1.0 - 2.0 * y / h) as f32)
}

/// Pick target pixel under window position `(x, y)`, clamped to the target.
pub fn pick_pixel(x: f64, y: f64, width: u32, height: u32) -> (u32, u32) {
    let clamp = |v: f64, extent: u32| v.max(0.0).min(extent.saturating_sub(1) as f64) as u32;
    (clamp(x.floor(), width), clamp(y.floor(), height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_corners_map_to_clip_corners() {
        assert_eq!(window_to_sim(0.0, 0.0, 800, 600), Vec2::new(-1.0, 1.0));
        assert_eq!(window_to_sim(800.0, 600.0, 800, 600), Vec2::new(1.0, -1.0));
        assert_eq!(window_to_sim(400.0, 300.0, 800, 600), Vec2::ZERO);
    }

    #[test]
    fn zero_sized_window_does_not_divide_by_zero() {
        assert!(window_to_sim(10.0, 10.0, 0, 0).is_finite());
    }

    #[test]
    fn pick_pixel_clamps_to_target() {
        assert_eq!(pick_pixel(-5.0, 12.7, 100, 50), (0, 12));
        assert_eq!(pick_pixel(250.0, 80.0, 100, 50), (99, 49));
    }
}
