// ABOUTME: Dual-resolution pipeline: scene and effects at render size, one upscale to the display.
// ABOUTME: Owns the scene, scratch pair and resolved buffers and reallocates them on resize.

use retro_core::{destination_rect, AspectPolicy, Color, Config, Rect, ScaleFilter, Size};

use crate::backend::{BackendError, DrawOptions, RenderBackend, Target};
use crate::chain::{EffectChain, ScratchPair};
use crate::effects::FrameContext;
use crate::pass::Pass;

const TARGET_LABELS: [&str; 4] = ["Scene", "Scratch A", "Scratch B", "Resolved"];

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to allocate render targets at {}x{}: {source}", size.width, size.height)]
    Allocation {
        size: Size,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Immutable geometry and presentation settings; replaced as a whole
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub render: Size,
    pub display: Size,
    pub aspect: AspectPolicy,
    pub filter: ScaleFilter,
    pub post_processing: bool,
    pub letterbox_color: Color,
}

impl PipelineConfig {
    pub fn from_config(config: &Config, display: Size) -> Self {
        Self {
            render: config.render_size(),
            display,
            aspect: config.render.aspect,
            filter: config.render.filter,
            post_processing: config.post_processing,
            letterbox_color: config.render.letterbox_color,
        }
    }

    /// Where the upscaled image lands on the display
    pub fn destination_rect(&self) -> Rect {
        destination_rect(self.render, self.display, self.aspect)
    }
}

struct RenderTargets<T> {
    scene: T,
    scratch: ScratchPair<T>,
    resolved: T,
}

impl<T> RenderTargets<T> {
    fn allocate<B: RenderBackend<Texture = T>>(
        backend: &mut B,
        size: Size,
    ) -> Result<Self, BackendError> {
        let [scene, first, second, resolved] =
            TARGET_LABELS.map(|label| backend.create_target(label, size));
        match (scene, first, second, resolved) {
            (Ok(scene), Ok(first), Ok(second), Ok(resolved)) => Ok(Self {
                scene,
                scratch: ScratchPair::new(first, second),
                resolved,
            }),
            (Err(e), a, b, c) | (a, Err(e), b, c) | (a, b, Err(e), c) | (a, b, c, Err(e)) => {
                for texture in [a, b, c].into_iter().flatten() {
                    backend.release(texture);
                }
                Err(e)
            }
        }
    }

    fn release<B: RenderBackend<Texture = T>>(self, backend: &mut B) {
        let [first, second] = self.scratch.into_inner();
        for texture in [self.scene, first, second, self.resolved] {
            backend.release(texture);
        }
    }
}

/// A validated resize whose buffers exist but are not in use yet
pub struct PreparedResize<T> {
    config: PipelineConfig,
    targets: Option<RenderTargets<T>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    Idle,
    /// Between `begin_scene` and `end_scene`
    Scene,
    /// The display holds this frame's upscaled image
    Resolved,
}

pub struct RenderPipeline<B: RenderBackend> {
    config: PipelineConfig,
    targets: RenderTargets<B::Texture>,
    chain: EffectChain<B>,
    phase: PipelinePhase,
}

impl<B: RenderBackend> RenderPipeline<B> {
    pub fn new(backend: &mut B, config: PipelineConfig) -> Result<Self, PipelineError> {
        let targets = RenderTargets::allocate(backend, config.render).map_err(|source| {
            PipelineError::Allocation {
                size: config.render,
                source,
            }
        })?;
        tracing::info!(
            "Render pipeline at {}x{} for display {}x{}",
            config.render.width,
            config.render.height,
            config.display.width,
            config.display.height
        );
        Ok(Self {
            config,
            targets,
            chain: EffectChain::new(),
            phase: PipelinePhase::Idle,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn chain(&self) -> &EffectChain<B> {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain<B> {
        &mut self.chain
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    pub fn render_resolution(&self) -> Size {
        self.config.render
    }

    pub fn display_resolution(&self) -> Size {
        self.config.display
    }

    pub fn destination_rect(&self) -> Rect {
        self.config.destination_rect()
    }

    /// Render-resolution buffers owned by the pipeline
    pub fn buffer_count(&self) -> usize {
        TARGET_LABELS.len()
    }

    pub fn scene(&self) -> &B::Texture {
        &self.targets.scene
    }

    /// Chain output at render resolution, before upscaling
    pub fn resolved(&self) -> &B::Texture {
        &self.targets.resolved
    }

    /// Clear the scene buffer and hand it out for 3D drawing
    pub fn begin_scene(&mut self, backend: &mut B) -> Result<&B::Texture, PipelineError> {
        assert!(
            self.phase != PipelinePhase::Scene,
            "begin_scene called twice without end_scene"
        );
        backend.clear(Target::Texture(&self.targets.scene), Color::BLACK)?;
        self.phase = PipelinePhase::Scene;
        Ok(&self.targets.scene)
    }

    /// Run the effect chain and upscale the result onto the display
    pub fn end_scene(&mut self, backend: &mut B) -> Result<(), PipelineError> {
        assert!(
            self.phase == PipelinePhase::Scene,
            "end_scene called without begin_scene"
        );
        self.phase = PipelinePhase::Idle;

        let targets = &self.targets;
        if self.config.post_processing {
            let frame = FrameContext {
                scene: &targets.scene,
                render_size: self.config.render,
            };
            self.chain.execute(
                backend,
                &frame,
                &targets.scratch,
                Target::Texture(&targets.resolved),
            )?;
        } else {
            backend.draw(
                &Pass::Blit,
                &[&targets.scene],
                Target::Texture(&targets.resolved),
                &DrawOptions::nearest(),
            )?;
        }

        let options = DrawOptions {
            viewport: Some(self.config.destination_rect()),
            filter: self.config.filter,
            clear: Some(self.config.letterbox_color),
        };
        backend.draw(&Pass::Blit, &[&targets.resolved], Target::Display, &options)?;

        self.phase = PipelinePhase::Resolved;
        Ok(())
    }

    /// Close the frame after the UI has been composited
    pub fn finish_frame(&mut self) {
        self.phase = PipelinePhase::Idle;
    }

    /// Allocate buffers for `config` without touching the current ones
    pub fn prepare_resize(
        &self,
        backend: &mut B,
        config: PipelineConfig,
    ) -> Result<PreparedResize<B::Texture>, PipelineError> {
        assert!(
            self.phase != PipelinePhase::Scene,
            "resolution change requested mid-frame"
        );
        let targets = if config.render == self.config.render {
            None
        } else {
            let targets = RenderTargets::allocate(backend, config.render).map_err(|source| {
                PipelineError::Allocation {
                    size: config.render,
                    source,
                }
            })?;
            Some(targets)
        };
        Ok(PreparedResize { config, targets })
    }

    /// Swap in prepared buffers and release the old ones
    pub fn commit_resize(&mut self, backend: &mut B, prepared: PreparedResize<B::Texture>) {
        if let Some(targets) = prepared.targets {
            let old = std::mem::replace(&mut self.targets, targets);
            old.release(backend);
            tracing::info!(
                "Render targets reallocated at {}x{}",
                prepared.config.render.width,
                prepared.config.render.height
            );
        }
        self.config = prepared.config;
    }

    pub fn discard_resize(&self, backend: &mut B, prepared: PreparedResize<B::Texture>) {
        if let Some(targets) = prepared.targets {
            targets.release(backend);
        }
    }

    /// Apply new geometry; on failure the previous buffers stay in use
    pub fn on_resolution_changed(
        &mut self,
        backend: &mut B,
        config: PipelineConfig,
    ) -> Result<(), PipelineError> {
        let prepared = self.prepare_resize(backend, config)?;
        self.commit_resize(backend, prepared);
        Ok(())
    }

    /// Release all buffers and effect resources
    pub fn dispose(mut self, backend: &mut B) {
        self.chain.dispose_all(backend);
        self.targets.release(backend);
    }
}
