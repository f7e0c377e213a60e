// ABOUTME: Low-resolution rendering with a post-processing effect chain and native-resolution UI.
// ABOUTME: Backend-agnostic pipeline plus wgpu and software backends.

pub mod backend;
pub mod chain;
pub mod compositor;
pub mod effects;
pub mod pass;
pub mod pipeline;
pub mod renderer;

pub use backend::{
    BackendError, DrawOptions, GpuBackend, GpuTexture, RenderBackend, SoftwareBackend,
    SoftwareTexture, Target,
};
pub use chain::{ChainError, EffectChain, ScratchPair};
pub use compositor::{PreparedUi, UiCompositor};
pub use effects::{
    ApplyStatus, BloomEffect, DitherEffect, Effect, EffectDescriptor, EffectError, EffectHandle,
    FrameContext, SharedEffect, TintEffect,
};
pub use pass::{Pass, Program};
pub use pipeline::{PipelineConfig, PipelineError, PipelinePhase, PreparedResize, RenderPipeline};
pub use renderer::{RenderError, RetroRenderer};
