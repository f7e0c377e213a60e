// ABOUTME: Demo application entry point.
// ABOUTME: Opens a window, drives frames through the retro renderer and hot-reloads the config.

mod frame;
mod headless;
mod scene;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

use retro_core::{Config, ConfigSource, FileConfigSource, StaticConfigSource};
use retro_renderer::{BackendError, GpuBackend, RenderError, RetroRenderer};
use scene::DemoScene;
use watcher::ConfigWatcher;

/// Low-resolution render pipeline demo
#[derive(Parser, Debug)]
#[command(name = "retro-demo", version, about)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render without a window using the software backend and write a PNG
    #[arg(long, value_name = "PNG")]
    snapshot: Option<PathBuf>,

    /// Frames to simulate before writing the snapshot
    #[arg(long, default_value_t = 1)]
    frames: u32,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

/// Messages delivered to the event loop from other threads
#[derive(Debug, Clone, Copy)]
pub enum AppEvent {
    ConfigChanged,
}

struct RenderState {
    window: Arc<Window>,
    backend: GpuBackend,
    renderer: RetroRenderer<GpuBackend>,
}

struct App {
    source: Option<Box<dyn ConfigSource>>,
    config_path: Option<PathBuf>,
    initial: Config,
    proxy: EventLoopProxy<AppEvent>,
    state: Option<RenderState>,
    _watcher: Option<ConfigWatcher>,
    demo: DemoScene,
    last_frame: Instant,
    reload_pending: bool,
}

impl App {
    fn new(
        source: Box<dyn ConfigSource>,
        config_path: Option<PathBuf>,
        proxy: EventLoopProxy<AppEvent>,
    ) -> Self {
        let initial = match source.load() {
            Ok(config) => config.sanitized(),
            Err(e) => {
                tracing::warn!("Using default config: {}", e);
                Config::default()
            }
        };
        Self {
            source: Some(source),
            config_path,
            initial,
            proxy,
            state: None,
            _watcher: None,
            demo: DemoScene::new(),
            last_frame: Instant::now(),
            reload_pending: false,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(source) = self.source.take() else {
            return Ok(());
        };

        let attrs = WindowAttributes::default()
            .with_title("retro-demo")
            .with_inner_size(PhysicalSize::new(
                self.initial.window_width.max(1),
                self.initial.window_height.max(1),
            ));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let mut backend = pollster::block_on(GpuBackend::new(
            Arc::clone(&window),
            self.initial.shader_dir.clone(),
        ))?;
        let renderer = RetroRenderer::new(&mut backend, source)?;
        tracing::info!(
            "Renderer ready: render {}x{}, display {}x{}",
            renderer.render_resolution().width,
            renderer.render_resolution().height,
            renderer.display_resolution().width,
            renderer.display_resolution().height
        );

        if let Some(path) = &self.config_path {
            match ConfigWatcher::spawn(path, self.proxy.clone()) {
                Ok(watcher) => self._watcher = Some(watcher),
                Err(e) => tracing::warn!("Config hot reload unavailable: {}", e),
            }
        }

        window.request_redraw();
        self.state = Some(RenderState {
            window,
            backend,
            renderer,
        });
        Ok(())
    }

    /// Runs at a frame boundary, before the next scene pass
    fn apply_pending_reload(&mut self) {
        if !std::mem::take(&mut self.reload_pending) {
            return;
        }
        let Some(state) = &mut self.state else {
            return;
        };
        match state.renderer.reload_config(&mut state.backend) {
            Ok(()) => {
                let shader_dir = state.renderer.config().shader_dir.clone();
                state.backend.set_shader_dir(shader_dir);
            }
            Err(e) => tracing::warn!("Config reload failed: {}", e),
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        self.apply_pending_reload();

        let now = Instant::now();
        self.demo
            .advance(now.duration_since(self.last_frame).as_secs_f32());
        self.last_frame = now;

        let Some(state) = &mut self.state else {
            return;
        };
        match frame::render_frame(&mut state.renderer, &mut state.backend, &self.demo) {
            Ok(()) => {}
            Err(RenderError::Backend(BackendError::Surface(wgpu::SurfaceError::OutOfMemory))) => {
                tracing::error!("Out of GPU memory, exiting");
                event_loop.exit();
                return;
            }
            Err(RenderError::Backend(BackendError::Surface(e))) => {
                tracing::debug!("Skipping frame: {}", e);
            }
            Err(e) => tracing::warn!("Frame failed: {}", e),
        }
        state.window.request_redraw();
    }
}

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            tracing::error!("Failed to initialize: {:#}", e);
            event_loop.exit();
        }
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::ConfigChanged => {
                tracing::info!("Config file changed");
                self.reload_pending = true;
                if let Some(state) = &self.state {
                    state.window.request_redraw();
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                tracing::info!("Close requested, exiting");
                if let Some(state) = self.state.take() {
                    let RenderState {
                        mut backend,
                        renderer,
                        ..
                    } = state;
                    renderer.dispose(&mut backend);
                }
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(state) = &mut self.state {
                    state.backend.resize(new_size.width, new_size.height);
                    if new_size.width > 0 && new_size.height > 0 {
                        if let Err(e) = state.renderer.on_resolution_changed(&mut state.backend) {
                            tracing::warn!("Resize refused: {}", e);
                        }
                    }
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                match event.logical_key {
                    Key::Named(NamedKey::F5) => {
                        tracing::info!("Reload requested");
                        self.reload_pending = true;
                    }
                    Key::Named(NamedKey::Escape) => event_loop.exit(),
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().or_else(Config::default_path);

    if args.write_default_config {
        let path = config_path.context("Could not determine config directory")?;
        Config::default().save(&path)?;
        tracing::info!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let source: Box<dyn ConfigSource> = match &config_path {
        Some(path) => {
            tracing::info!("Using config {}", path.display());
            Box::new(FileConfigSource::new(path))
        }
        None => Box::new(StaticConfigSource::default()),
    };

    if let Some(output) = &args.snapshot {
        return headless::render_snapshot(source, args.frames, output);
    }

    tracing::info!("Starting retro-demo");
    let event_loop = EventLoop::<AppEvent>::with_user_event().build()?;
    let mut app = App::new(source, config_path, event_loop.create_proxy());
    event_loop.run_app(&mut app)?;
    Ok(())
}
