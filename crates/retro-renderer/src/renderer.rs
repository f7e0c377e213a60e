// ABOUTME: Orchestrator tying configuration, pipeline, effect chain and UI compositor together.
// ABOUTME: Drives the per-frame lifecycle and applies config reloads and resizes between frames.

use std::collections::HashMap;
use std::sync::Arc;

use retro_core::{
    check_effect_order, Config, ConfigError, ConfigSource, EffectConfig, EffectKind, EffectParams,
    Size,
};

use crate::backend::{BackendError, RenderBackend, Target};
use crate::chain::ChainError;
use crate::compositor::UiCompositor;
use crate::effects::{
    BloomEffect, DitherEffect, Effect, EffectDescriptor, EffectHandle, SharedEffect, TintEffect,
};
use crate::pipeline::{PipelineConfig, PipelineError, RenderPipeline};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Effect chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Effects created from configuration entries, keyed by name
enum BuiltinEffect<B: RenderBackend> {
    Tint(EffectHandle<TintEffect>),
    Dither(EffectHandle<DitherEffect>),
    Bloom(EffectHandle<BloomEffect<B>>),
}

impl<B: RenderBackend> BuiltinEffect<B> {
    fn kind(&self) -> EffectKind {
        match self {
            BuiltinEffect::Tint(_) => EffectKind::Tint,
            BuiltinEffect::Dither(_) => EffectKind::Dither,
            BuiltinEffect::Bloom(_) => EffectKind::Bloom,
        }
    }

    /// Push new parameters into the live instance; false if it is borrowed elsewhere
    fn update(&self, params: &EffectParams) -> bool {
        match (self, params) {
            (BuiltinEffect::Tint(h), EffectParams::Tint(s)) => h
                .try_borrow_mut()
                .map(|mut e| e.set_settings(s.clone()))
                .is_some(),
            (BuiltinEffect::Dither(h), EffectParams::Dither(s)) => h
                .try_borrow_mut()
                .map(|mut e| e.set_settings(s.clone()))
                .is_some(),
            (BuiltinEffect::Bloom(h), EffectParams::Bloom(s)) => h
                .try_borrow_mut()
                .map(|mut e| e.set_settings(s.clone()))
                .is_some(),
            _ => false,
        }
    }
}

/// Where the renderer is inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    Scene,
    Resolved,
    Ui,
}

pub struct RetroRenderer<B: RenderBackend> {
    source: Box<dyn ConfigSource>,
    config: Arc<Config>,
    pipeline: RenderPipeline<B>,
    compositor: UiCompositor<B>,
    builtins: HashMap<String, BuiltinEffect<B>>,
    phase: FramePhase,
}

impl<B: RenderBackend> RetroRenderer<B> {
    pub fn new(backend: &mut B, source: Box<dyn ConfigSource>) -> Result<Self, RenderError> {
        let config = resolve_config(source.as_ref())?;
        let display = backend.display_size();

        let pipeline = RenderPipeline::new(backend, PipelineConfig::from_config(&config, display))?;
        let compositor = match UiCompositor::new(backend, &config.ui, display) {
            Ok(compositor) => compositor,
            Err(e) => {
                pipeline.dispose(backend);
                return Err(e.into());
            }
        };

        let mut renderer = Self {
            source,
            config: Arc::new(config),
            pipeline,
            compositor,
            builtins: HashMap::new(),
            phase: FramePhase::Idle,
        };
        renderer.sync_effects(backend)?;
        Ok(renderer)
    }

    /// Current configuration snapshot
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub fn pipeline(&self) -> &RenderPipeline<B> {
        &self.pipeline
    }

    pub fn render_resolution(&self) -> Size {
        self.pipeline.render_resolution()
    }

    pub fn display_resolution(&self) -> Size {
        self.pipeline.display_resolution()
    }

    pub fn ui_size(&self) -> Size {
        self.compositor.ui_size()
    }

    /// Start the frame: clears and returns the render-resolution scene buffer
    pub fn begin_scene(&mut self, backend: &mut B) -> Result<&B::Texture, RenderError> {
        assert!(
            self.phase == FramePhase::Idle,
            "begin_scene called in phase {:?}",
            self.phase
        );
        self.phase = FramePhase::Scene;
        match self.pipeline.begin_scene(backend) {
            Ok(scene) => Ok(scene),
            Err(e) => {
                self.phase = FramePhase::Idle;
                Err(e.into())
            }
        }
    }

    /// Run post-processing and upscale onto the display
    pub fn end_scene(&mut self, backend: &mut B) -> Result<(), RenderError> {
        assert!(
            self.phase == FramePhase::Scene,
            "end_scene called in phase {:?}",
            self.phase
        );
        match self.pipeline.end_scene(backend) {
            Ok(()) => {
                self.phase = FramePhase::Resolved;
                Ok(())
            }
            Err(e) => {
                self.phase = FramePhase::Idle;
                Err(e.into())
            }
        }
    }

    /// Target for UI drawing, laid out in `ui_size()` pixels
    pub fn begin_ui(&mut self, backend: &mut B) -> Result<Target<'_, B::Texture>, RenderError> {
        assert!(
            self.phase == FramePhase::Resolved,
            "begin_ui called in phase {:?}",
            self.phase
        );
        match self.compositor.begin_ui(backend, &self.pipeline) {
            Ok(target) => {
                self.phase = FramePhase::Ui;
                Ok(target)
            }
            Err(e) => {
                // The frame is abandoned; the next one starts from begin_scene
                self.phase = FramePhase::Idle;
                self.pipeline.finish_frame();
                Err(e.into())
            }
        }
    }

    pub fn end_ui(&mut self, backend: &mut B) -> Result<(), RenderError> {
        assert!(
            self.phase == FramePhase::Ui,
            "end_ui called in phase {:?}",
            self.phase
        );
        self.phase = FramePhase::Idle;
        self.compositor.end_ui(backend, &mut self.pipeline)?;
        Ok(())
    }

    /// Re-read configuration and apply it in place.
    ///
    /// Invalid configuration and failed buffer allocation leave the previous state untouched.
    pub fn reload_config(&mut self, backend: &mut B) -> Result<(), RenderError> {
        self.assert_frame_boundary("reload_config");
        let config = match resolve_config(self.source.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Refusing configuration from {}: {}",
                    self.source.describe(),
                    e
                );
                return Err(e.into());
            }
        };

        let pipeline_config = PipelineConfig::from_config(&config, backend.display_size());
        self.apply_geometry(backend, pipeline_config, &config)?;
        self.config = Arc::new(config);
        self.sync_effects(backend)?;
        tracing::info!("Configuration reloaded from {}", self.source.describe());
        Ok(())
    }

    /// Follow a display size change; on failure the previous buffers remain in use
    pub fn on_resolution_changed(&mut self, backend: &mut B) -> Result<(), RenderError> {
        self.assert_frame_boundary("on_resolution_changed");
        let display = backend.display_size();
        if display.is_empty() {
            tracing::debug!("Ignoring resize to empty display");
            return Ok(());
        }
        let config = Arc::clone(&self.config);
        let pipeline_config = PipelineConfig::from_config(&config, display);
        self.apply_geometry(backend, pipeline_config, &config)
    }

    /// Register an application-defined effect
    pub fn add_effect<E: Effect<B> + 'static>(
        &mut self,
        descriptor: EffectDescriptor,
        effect: E,
    ) -> Result<EffectHandle<E>, RenderError> {
        Ok(self.pipeline.chain_mut().add_effect(descriptor, effect)?)
    }

    pub fn remove_effect(
        &mut self,
        backend: &mut B,
        name: &str,
    ) -> Result<EffectDescriptor, RenderError> {
        let descriptor = self.pipeline.chain_mut().remove_effect(backend, name)?;
        self.builtins.remove(name);
        Ok(descriptor)
    }

    /// Toggle an effect; refused if it would put a standalone bloom after a dither
    pub fn set_effect_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RenderError> {
        let chain = self.pipeline.chain_mut();
        let previous = chain
            .descriptor(name)
            .map(|d| d.enabled)
            .ok_or_else(|| ChainError::UnknownEffect(name.to_string()))?;
        chain.set_enabled(name, enabled)?;
        if let Err(e) = self.check_effect_order() {
            tracing::warn!("Refusing to toggle '{}': {}", name, e);
            self.pipeline.chain_mut().set_enabled(name, previous)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Move an effect; refused if it would put a standalone bloom after a dither
    pub fn set_effect_priority(&mut self, name: &str, priority: i32) -> Result<(), RenderError> {
        let chain = self.pipeline.chain_mut();
        let previous = chain
            .descriptor(name)
            .map(|d| d.priority)
            .ok_or_else(|| ChainError::UnknownEffect(name.to_string()))?;
        chain.set_priority(name, priority)?;
        if let Err(e) = self.check_effect_order() {
            tracing::warn!("Refusing to move '{}': {}", name, e);
            self.pipeline.chain_mut().set_priority(name, previous)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Look up any effect by name
    pub fn effect(&self, name: &str) -> Option<(&EffectDescriptor, SharedEffect<B>)> {
        self.pipeline.chain().get(name)
    }

    /// Names in execution order
    pub fn effect_order(&self) -> Vec<&str> {
        self.pipeline.chain().order()
    }

    pub fn tint(&self, name: &str) -> Option<EffectHandle<TintEffect>> {
        match self.builtins.get(name)? {
            BuiltinEffect::Tint(h) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn dither(&self, name: &str) -> Option<EffectHandle<DitherEffect>> {
        match self.builtins.get(name)? {
            BuiltinEffect::Dither(h) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn bloom(&self, name: &str) -> Option<EffectHandle<BloomEffect<B>>> {
        match self.builtins.get(name)? {
            BuiltinEffect::Bloom(h) => Some(h.clone()),
            _ => None,
        }
    }

    /// Release every buffer and effect resource
    pub fn dispose(self, backend: &mut B) {
        self.compositor.dispose(backend);
        self.pipeline.dispose(backend);
    }

    /// Ordering rule over the live chain, using configured built-in parameters
    fn check_effect_order(&self) -> Result<(), ConfigError> {
        let chain = self.pipeline.chain();
        let enabled = chain
            .enabled_order()
            .into_iter()
            .filter(|name| self.builtins.contains_key(*name))
            .filter_map(|name| self.config.effect(name));
        check_effect_order(enabled)
    }

    fn assert_frame_boundary(&self, operation: &str) {
        assert!(
            self.phase == FramePhase::Idle,
            "{} is only allowed between frames (phase {:?})",
            operation,
            self.phase
        );
    }

    /// Resize pipeline and compositor together, or neither
    fn apply_geometry(
        &mut self,
        backend: &mut B,
        pipeline_config: PipelineConfig,
        config: &Config,
    ) -> Result<(), RenderError> {
        let prepared = match self.pipeline.prepare_resize(backend, pipeline_config) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Keeping previous render targets: {}", e);
                return Err(e.into());
            }
        };
        let ui = match self
            .compositor
            .prepare_resize(backend, &config.ui, pipeline_config.display)
        {
            Ok(ui) => ui,
            Err(e) => {
                tracing::warn!("Keeping previous UI buffer: {}", e);
                self.pipeline.discard_resize(backend, prepared);
                return Err(e.into());
            }
        };
        self.pipeline.commit_resize(backend, prepared);
        self.compositor.commit_resize(backend, ui);
        Ok(())
    }

    /// Bring chain membership and parameters in line with the current config
    fn sync_effects(&mut self, backend: &mut B) -> Result<(), RenderError> {
        let config = Arc::clone(&self.config);
        let wanted: Vec<&EffectConfig> = if config.post_processing {
            config.effects.iter().collect()
        } else {
            Vec::new()
        };

        let stale: Vec<String> = self
            .builtins
            .iter()
            .filter(|(name, builtin)| {
                !wanted
                    .iter()
                    .any(|e| &e.name == *name && e.kind() == builtin.kind())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            self.builtins.remove(&name);
            self.pipeline.chain_mut().remove_effect(backend, &name)?;
            tracing::info!("Removed effect '{}'", name);
        }

        for entry in wanted {
            if let Some(builtin) = self.builtins.get(&entry.name) {
                if !builtin.update(&entry.params) {
                    tracing::warn!(
                        "Effect '{}' is borrowed; parameters not updated",
                        entry.name
                    );
                }
                let chain = self.pipeline.chain_mut();
                chain.set_enabled(&entry.name, entry.enabled)?;
                chain.set_priority(&entry.name, entry.priority)?;
                continue;
            }

            let chain = self.pipeline.chain_mut();
            if chain.contains(&entry.name) {
                tracing::warn!(
                    "Configured effect '{}' clashes with an application effect; ignored",
                    entry.name
                );
                continue;
            }

            let mut descriptor = EffectDescriptor::new(&entry.name, entry.kind(), entry.priority);
            descriptor.enabled = entry.enabled;
            let builtin = match &entry.params {
                EffectParams::Tint(s) => {
                    BuiltinEffect::Tint(chain.add_effect(descriptor, TintEffect::new(s.clone()))?)
                }
                EffectParams::Dither(s) => BuiltinEffect::Dither(
                    chain.add_effect(descriptor, DitherEffect::new(s.clone()))?,
                ),
                EffectParams::Bloom(s) => BuiltinEffect::Bloom(
                    chain.add_effect(descriptor, BloomEffect::<B>::new(s.clone()))?,
                ),
            };
            tracing::info!("Added effect '{}' ({})", entry.name, entry.kind().label());
            self.builtins.insert(entry.name.clone(), builtin);
        }

        // Equal priorities run in config file order, matching what validation checked
        let builtins = &self.builtins;
        self.pipeline.chain_mut().resequence(
            config
                .effects
                .iter()
                .map(|e| e.name.as_str())
                .filter(|name| builtins.contains_key(*name)),
        );
        Ok(())
    }
}

/// Load, clamp and validate one configuration snapshot
fn resolve_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let loaded = source.load()?;
    let config = loaded.sanitized();
    if config != loaded {
        tracing::warn!(
            "Configuration from {} had out-of-range values; clamped",
            source.describe()
        );
    }
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use retro_core::{BloomCombine, StaticConfigSource};

    type Fixture = (
        SoftwareBackend,
        StaticConfigSource,
        RetroRenderer<SoftwareBackend>,
    );

    fn renderer(config: Config) -> Fixture {
        let mut backend = SoftwareBackend::new(Size::new(640, 360));
        let source = StaticConfigSource::new(config);
        let renderer = RetroRenderer::new(&mut backend, Box::new(source.clone())).unwrap();
        (backend, source, renderer)
    }

    #[test]
    fn default_catalog_is_registered_in_priority_order() {
        let (_, _, renderer) = renderer(Config::default());
        assert_eq!(renderer.effect_order(), vec!["tint", "dither", "bloom"]);
        assert!(renderer.tint("tint").is_some());
        assert!(renderer.dither("tint").is_none());
    }

    #[test]
    fn invalid_reload_keeps_previous_config() {
        let (mut backend, source, mut renderer) = renderer(Config::default());
        source.update(|c| {
            if let Some(EffectParams::Bloom(b)) = c.effect_mut("bloom").map(|e| &mut e.params) {
                b.combine = BloomCombine::Standalone;
            }
        });
        let result = renderer.reload_config(&mut backend);
        assert!(matches!(
            result,
            Err(RenderError::Config(ConfigError::StandaloneBloomAfterDither { .. }))
        ));
        assert_eq!(*renderer.config(), Config::default());
    }

    #[test]
    fn kind_change_replaces_instance() {
        let (mut backend, source, mut renderer) = renderer(Config::default());
        source.update(|c| {
            if let Some(e) = c.effect_mut("tint") {
                e.params = EffectParams::Dither(Default::default());
            }
        });
        renderer.reload_config(&mut backend).unwrap();
        assert!(renderer.tint("tint").is_none());
        assert!(renderer.dither("tint").is_some());
    }

    #[test]
    fn reload_restores_configured_priority() {
        let (mut backend, source, mut renderer) = renderer(Config::default());
        renderer.set_effect_priority("tint", 200).unwrap();
        assert_eq!(renderer.effect_order(), vec!["dither", "bloom", "tint"]);

        source.set(Config::default());
        renderer.reload_config(&mut backend).unwrap();
        assert_eq!(renderer.effect_order(), vec!["tint", "dither", "bloom"]);
    }

    #[test]
    fn disabling_post_processing_empties_chain() {
        let (mut backend, source, mut renderer) = renderer(Config::default());
        source.update(|c| c.post_processing = false);
        renderer.reload_config(&mut backend).unwrap();
        assert!(renderer.effect_order().is_empty());
        assert!(!renderer.pipeline().config().post_processing);
    }

    #[test]
    #[should_panic(expected = "reload_config is only allowed between frames")]
    fn reload_mid_frame_panics() {
        let (mut backend, _, mut renderer) = renderer(Config::default());
        renderer.begin_scene(&mut backend).unwrap();
        let _ = renderer.reload_config(&mut backend);
    }
}
