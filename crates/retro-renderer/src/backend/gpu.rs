// ABOUTME: wgpu implementation of the render backend.
// ABOUTME: Owns device, queue and surface; caches one pipeline per program and target format.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use retro_core::{Rect, ScaleFilter, Size};
use wgpu::util::DeviceExt;
use wgpu::{Device, Queue, Surface, SurfaceConfiguration};
use winit::window::Window;

use super::{check_target_size, clip_rect, BackendError, DrawOptions, RenderBackend, Target};
use crate::pass::{Blend, Pass, Program};

/// Offscreen targets store raw 8-bit values; effects work on them directly
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const COMMON_SOURCE: &str = include_str!("../../../../shaders/common.wgsl");

fn embedded_source(program: Program) -> &'static str {
    match program {
        Program::Blit => include_str!("../../../../shaders/blit.wgsl"),
        Program::Solid => include_str!("../../../../shaders/solid.wgsl"),
        Program::Tint => include_str!("../../../../shaders/tint.wgsl"),
        Program::Dither => include_str!("../../../../shaders/dither.wgsl"),
        Program::BrightPass => include_str!("../../../../shaders/bright_pass.wgsl"),
        Program::Blur => include_str!("../../../../shaders/blur.wgsl"),
        Program::BloomCombine => include_str!("../../../../shaders/bloom_combine.wgsl"),
        Program::Composite => include_str!("../../../../shaders/composite.wgsl"),
    }
}

/// Window surface and its current configuration
struct Presenter {
    surface: Surface<'static>,
    config: SurfaceConfiguration,
}

impl Presenter {
    fn size(&self) -> Size {
        Size::new(self.config.width, self.config.height)
    }

    fn reconfigure(&self, device: &Device) {
        self.surface.configure(device, &self.config);
    }
}

const PRESENT_MODES: [wgpu::PresentMode; 2] = [wgpu::PresentMode::Mailbox, wgpu::PresentMode::Fifo];

/// Non-sRGB first, so the display pass writes the same bytes the offscreen buffers hold
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|f| !f.is_srgb())
        .or_else(|| formats.first().copied())
}

fn pick_present_mode(available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    PRESENT_MODES
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(wgpu::PresentMode::AutoVsync)
}

async fn connect(window: Arc<Window>) -> Result<(Device, Queue, Presenter), BackendError> {
    let inner = window.inner_size();
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance.create_surface(window)?;

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            compatible_surface: Some(&surface),
            ..Default::default()
        })
        .await
        .ok_or(BackendError::NoAdapter)?;
    let info = adapter.get_info();
    tracing::info!("Adapter {} on {:?}", info.name, info.backend);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Retro Device"),
                ..Default::default()
            },
            None,
        )
        .await?;

    let caps = surface.get_capabilities(&adapter);
    let format = pick_surface_format(&caps.formats).ok_or(BackendError::SurfaceUnsupported)?;
    let present_mode = pick_present_mode(&caps.present_modes);
    tracing::info!("Surface format {:?}, present mode {:?}", format, present_mode);

    let config = SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: inner.width.max(1),
        height: inner.height.max(1),
        present_mode,
        alpha_mode: caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto),
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    let presenter = Presenter { surface, config };
    presenter.reconfigure(&device);
    Ok((device, queue, presenter))
}

pub struct GpuTexture {
    id: u64,
    size: Size,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

struct Frame {
    output: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
}

pub struct GpuBackend {
    device: Device,
    queue: Queue,
    presenter: Presenter,
    shader_dir: Option<PathBuf>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    modules: HashMap<Program, wgpu::ShaderModule>,
    pipelines: HashMap<(Program, wgpu::TextureFormat), wgpu::RenderPipeline>,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    empty_input: GpuTexture,
    frame: Option<Frame>,
    next_id: u64,
    live: usize,
}

impl GpuBackend {
    pub async fn new(
        window: Arc<Window>,
        shader_dir: Option<PathBuf>,
    ) -> Result<Self, BackendError> {
        let (device, queue, presenter) = connect(window).await?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pass Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pass Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let nearest_sampler = create_sampler(&device, "Nearest Sampler", wgpu::FilterMode::Nearest);
        let linear_sampler = create_sampler(&device, "Linear Sampler", wgpu::FilterMode::Linear);

        // Bound in place of missing inputs (solid fills)
        let empty = create_texture(&device, "Empty Input", Size::new(1, 1));
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &empty,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let empty_input = GpuTexture {
            id: 0,
            size: Size::new(1, 1),
            view: empty.create_view(&wgpu::TextureViewDescriptor::default()),
            texture: empty,
        };

        Ok(Self {
            device,
            queue,
            presenter,
            shader_dir,
            bind_group_layout,
            pipeline_layout,
            modules: HashMap::new(),
            pipelines: HashMap::new(),
            nearest_sampler,
            linear_sampler,
            empty_input,
            frame: None,
            next_id: 1,
            live: 0,
        })
    }

    /// Follow the window size; zero-sized (minimized) windows keep the old configuration
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.presenter.config.width = width;
        self.presenter.config.height = height;
        self.presenter.reconfigure(&self.device);
    }

    /// Switch the directory shader overrides are read from; compiled programs are dropped
    pub fn set_shader_dir(&mut self, shader_dir: Option<PathBuf>) {
        if self.shader_dir != shader_dir {
            self.shader_dir = shader_dir;
            self.modules.clear();
            self.pipelines.clear();
        }
    }

    fn max_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn read_override(dir: &Path, stem: &str) -> Result<Option<String>, BackendError> {
        let path = dir.join(format!("{stem}.wgsl"));
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|e| BackendError::ProgramMissing {
                program: "shader override",
                reason: format!("{}: {e}", path.display()),
            })
    }

    fn program_source(&self, program: Program) -> Result<String, BackendError> {
        let (common, body) = match &self.shader_dir {
            Some(dir) => (
                Self::read_override(dir, "common")?,
                Self::read_override(dir, program.name())?,
            ),
            None => (None, None),
        };
        let common = common.as_deref().unwrap_or(COMMON_SOURCE);
        let body = body.as_deref().unwrap_or(embedded_source(program));
        Ok(format!("{common}\n{body}"))
    }

    fn ensure_pipeline(
        &mut self,
        program: Program,
        format: wgpu::TextureFormat,
    ) -> Result<(), BackendError> {
        self.load_program(program)?;
        if self.pipelines.contains_key(&(program, format)) {
            return Ok(());
        }
        let Some(module) = self.modules.get(&program) else {
            return Err(BackendError::ProgramMissing {
                program: program.name(),
                reason: "module not loaded".to_string(),
            });
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.name()),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: blend_state(program.blend()),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCompile {
                program: program.name(),
                reason: error.to_string(),
            });
        }

        self.pipelines.insert((program, format), pipeline);
        Ok(())
    }
}

impl RenderBackend for GpuBackend {
    type Texture = GpuTexture;

    fn create_target(&mut self, label: &str, size: Size) -> Result<GpuTexture, BackendError> {
        check_target_size(label, size, self.max_dimension())?;
        let texture = create_texture(&self.device, label, size);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_id;
        self.next_id += 1;
        self.live += 1;
        tracing::debug!("Created render target '{}' {}x{}", label, size.width, size.height);
        Ok(GpuTexture {
            id,
            size,
            texture,
            view,
        })
    }

    fn release(&mut self, texture: GpuTexture) {
        texture.texture.destroy();
        self.live = self.live.saturating_sub(1);
    }

    fn texture_size(&self, texture: &GpuTexture) -> Size {
        texture.size
    }

    fn display_size(&self) -> Size {
        self.presenter.size()
    }

    fn load_program(&mut self, program: Program) -> Result<(), BackendError> {
        if self.modules.contains_key(&program) {
            return Ok(());
        }
        let source = self.program_source(program)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(program.name()),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCompile {
                program: program.name(),
                reason: error.to_string(),
            });
        }

        tracing::debug!("Compiled program '{}'", program.name());
        self.modules.insert(program, module);
        Ok(())
    }

    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[&GpuTexture],
        target: Target<'_, GpuTexture>,
        options: &DrawOptions,
    ) -> Result<(), BackendError> {
        let program = pass.program();
        let (format, size, target_id) = match target {
            Target::Texture(texture) => (TARGET_FORMAT, texture.size, Some(texture.id)),
            Target::Display => (self.presenter.config.format, self.display_size(), None),
        };
        if target_id.is_some_and(|id| inputs.iter().any(|input| input.id == id)) {
            return Err(BackendError::FeedbackLoop);
        }
        self.ensure_pipeline(program, format)?;

        let Some(frame) = self.frame.as_mut() else {
            return Err(BackendError::NoActiveFrame);
        };
        let Some(pipeline) = self.pipelines.get(&(program, format)) else {
            return Err(BackendError::ProgramMissing {
                program: program.name(),
                reason: "pipeline not built".to_string(),
            });
        };

        let uniforms = pass.uniforms(size, inputs.first().map(|t| t.size));
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Pass Uniform Buffer"),
                contents: bytemuck::cast_slice(&[uniforms]),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let input = inputs.first().copied().unwrap_or(&self.empty_input);
        let aux = inputs.get(1).copied().unwrap_or(input);
        let sampler = match options.filter {
            ScaleFilter::Nearest => &self.nearest_sampler,
            ScaleFilter::Linear => &self.linear_sampler,
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Pass Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&aux.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let view = match target {
            Target::Texture(texture) => &texture.view,
            Target::Display => &frame.view,
        };
        let load = match options.clear {
            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: c.r as f64,
                g: c.g as f64,
                b: c.b as f64,
                a: c.a as f64,
            }),
            None => wgpu::LoadOp::Load,
        };

        let mut render_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.name()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let viewport = options.viewport.unwrap_or_else(|| size.full_rect());
        let area: Option<Rect> = clip_rect(viewport, size);
        if let Some(area) = area {
            render_pass.set_viewport(area.x, area.y, area.width, area.height, 0.0, 1.0);
            render_pass.set_pipeline(pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        if self.frame.take().is_some() {
            tracing::warn!("Discarding unpresented frame");
        }
        let output = match self.presenter.surface.get_current_texture() {
            Ok(output) => output,
            Err(e @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                self.presenter.reconfigure(&self.device);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        self.frame = Some(Frame {
            output,
            view,
            encoder,
        });
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        let frame = self.frame.take().ok_or(BackendError::NoActiveFrame)?;
        self.queue.submit(std::iter::once(frame.encoder.finish()));
        frame.output.present();
        Ok(())
    }

    fn live_targets(&self) -> usize {
        self.live
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn create_sampler(device: &Device, label: &str, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn create_texture(device: &Device, label: &str, size: Size) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

fn blend_state(blend: Blend) -> Option<wgpu::BlendState> {
    match blend {
        Blend::Replace => None,
        Blend::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        Blend::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::{PresentMode, TextureFormat};

    #[test]
    fn surface_format_prefers_linear_storage() {
        let formats = [TextureFormat::Bgra8UnormSrgb, TextureFormat::Bgra8Unorm];
        assert_eq!(pick_surface_format(&formats), Some(TextureFormat::Bgra8Unorm));
        assert_eq!(
            pick_surface_format(&[TextureFormat::Rgba8UnormSrgb]),
            Some(TextureFormat::Rgba8UnormSrgb)
        );
        assert_eq!(pick_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_falls_back_to_auto_vsync() {
        assert_eq!(
            pick_present_mode(&[PresentMode::Fifo, PresentMode::Mailbox]),
            PresentMode::Mailbox
        );
        assert_eq!(pick_present_mode(&[PresentMode::Fifo]), PresentMode::Fifo);
        assert_eq!(pick_present_mode(&[PresentMode::Immediate]), PresentMode::AutoVsync);
    }
}
