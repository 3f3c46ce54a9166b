//! Ping-pong Simulation Demo
//!
//! A hanging rope and a gravitating N-body disc, both integrated on the GPU by
//! rotating storage-buffer slots.

mod scene;

use pingpong_renderer::GpuPicker;
use scene::{pick_pixel, window_to_sim, Scene, SceneControl};
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

struct GpuState {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    config: wgpu::SurfaceConfiguration,

    scenes: Vec<Box<dyn SceneControl>>,
    active: usize,

    // GPU picking (index render + 1px readback)
    picker: GpuPicker,

    paused: bool,
    report: bool,
    last_report: Option<Instant>,
}

impl GpuState {
    async fn new(window: Arc<Window>) -> Result<Self, Box<dyn Error>> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;

        log::info!("✓ Using GPU: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or("surface reports no formats")?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let scenes: Vec<Box<dyn SceneControl>> = vec![
            Box::new(Scene::rope(&device, &queue, &config)?),
            Box::new(Scene::nbody(&device, &queue, &config)?),
        ];
        log::info!("✓ Scenes initialized");

        let picker = GpuPicker::new(&device, config.width, config.height);

        Ok(Self {
            surface,
            device,
            config,
            scenes,
            active: 0,
            picker,
            paused: false,
            report: false,
            last_report: None,
        })
    }

    fn scene(&mut self) -> &mut dyn SceneControl {
        self.scenes[self.active].as_mut()
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            for scene in &mut self.scenes {
                scene.resize(&self.config);
            }
            self.picker
                .resize(&self.device, self.config.width, self.config.height);
        }
    }

    fn update(&mut self) {
        if !self.paused {
            if let Err(err) = self.scene().step() {
                log::error!("Step failed: {err} (press R to reset)");
                self.paused = true;
            }
        }

        let due = self
            .last_report
            .is_none_or(|last| last.elapsed() >= REPORT_INTERVAL);
        if self.report && due {
            self.last_report = Some(Instant::now());
            let name = self.scene().name();
            match self.scene().aggregate() {
                Ok(a) => log::info!(
                    "{name}: momentum ({:.5}, {:.5}), energy {:.5}, drift {:+.5}",
                    a.momentum.x,
                    a.momentum.y,
                    a.energy,
                    a.energy_drift
                ),
                Err(err) => log::warn!("{name}: aggregate readback failed: {err}"),
            }
        }
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.scenes[self.active].draw(&view);
        output.present();
        Ok(())
    }

    fn pick(&self, cursor: (f64, f64)) -> Option<usize> {
        let (x, y) = pick_pixel(cursor.0, cursor.1, self.config.width, self.config.height);
        match self.scenes[self.active].pick(&self.picker, x, y) {
            Ok(hit) => hit,
            Err(err) => {
                log::warn!("Pick failed: {err}");
                None
            }
        }
    }

    fn cursor_to_sim(&self, cursor: (f64, f64)) -> glam::Vec2 {
        window_to_sim(cursor.0, cursor.1, self.config.width, self.config.height)
    }

    fn handle_key(&mut self, key: KeyCode) {
        let result = match key {
            KeyCode::Tab => {
                self.scene().end_drag();
                self.active = (self.active + 1) % self.scenes.len();
                log::info!("Switched to {} scene", self.scene().name());
                Ok(())
            }
            KeyCode::Space => {
                self.paused = !self.paused;
                log::info!("{}", if self.paused { "Paused" } else { "Resumed" });
                Ok(())
            }
            KeyCode::KeyR => {
                self.paused = false;
                self.scene().reset()
            }
            KeyCode::KeyM => {
                self.report = !self.report;
                self.last_report = None;
                Ok(())
            }
            KeyCode::Digit1 => self.scene().select_scheme(1),
            KeyCode::Digit2 => self.scene().select_scheme(2),
            KeyCode::Digit3 => self.scene().select_scheme(3),
            KeyCode::Digit4 => self.scene().select_scheme(4),
            _ => Ok(()),
        };
        if let Err(err) = result {
            log::error!("{err}");
        }
    }
}

#[derive(Default)]
struct App {
    window: Option<Arc<Window>>,
    gpu_state: Option<GpuState>,
    last_cursor_pos: Option<(f64, f64)>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = Window::default_attributes()
            .with_title("Ping-pong Simulation")
            .with_inner_size(winit::dpi::LogicalSize::new(1024, 1024));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {err}");
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(GpuState::new(window.clone())) {
            Ok(state) => {
                self.gpu_state = Some(state);
                self.window = Some(window);
            }
            Err(err) => {
                log::error!("Failed to initialize GPU state: {err}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(gpu_state) = &mut self.gpu_state else {
            return;
        };

        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),

            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => gpu_state.handle_key(key),

            WindowEvent::Resized(physical_size) => gpu_state.resize(physical_size),

            WindowEvent::CursorMoved { position, .. } => {
                let cursor = (position.x, position.y);
                self.last_cursor_pos = Some(cursor);
                let at = gpu_state.cursor_to_sim(cursor);
                gpu_state.scene().drag_to(at);
            }

            WindowEvent::MouseInput { state, button, .. } => {
                let Some(cursor) = self.last_cursor_pos else {
                    return;
                };
                match (button, state) {
                    (MouseButton::Left, ElementState::Pressed) => {
                        if let Some(index) = gpu_state.pick(cursor) {
                            let at = gpu_state.cursor_to_sim(cursor);
                            gpu_state.scene().begin_drag(index, at);
                        }
                    }
                    (MouseButton::Left, ElementState::Released) => gpu_state.scene().end_drag(),
                    (MouseButton::Right, ElementState::Pressed) => {
                        if let Some(index) = gpu_state.pick(cursor) {
                            gpu_state.scene().toggle_pin(index);
                        }
                    }
                    _ => {}
                }
            }

            WindowEvent::RedrawRequested => {
                gpu_state.update();
                match gpu_state.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = winit::dpi::PhysicalSize::new(
                            gpu_state.config.width,
                            gpu_state.config.height,
                        );
                        gpu_state.resize(size);
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => {
                        log::error!("Surface out of memory");
                        event_loop.exit();
                    }
                    Err(err) => log::warn!("Surface error: {err}"),
                }
            }

            _ => {}
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logger (RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting ping-pong simulation...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    event_loop.run_app(&mut app)?;
    Ok(())
}
