// ABOUTME: Constant color tint blended over the image.
// ABOUTME: rgb' = mix(rgb, rgb * tint, intensity).

use retro_core::{EffectKind, Size, TintSettings};

use super::{ApplyStatus, Effect, EffectError, FrameContext};
use crate::backend::{DrawOptions, RenderBackend, Target};
use crate::pass::{Pass, Program};

#[derive(Debug, Clone, Default)]
pub struct TintEffect {
    settings: TintSettings,
}

impl TintEffect {
    pub fn new(settings: TintSettings) -> Self {
        Self {
            settings: settings.sanitized(),
        }
    }

    pub fn settings(&self) -> &TintSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: TintSettings) {
        self.settings = settings.sanitized();
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.settings.intensity = intensity.clamp(0.0, 1.0);
    }

    fn pass(&self) -> Pass {
        Pass::Tint {
            color: self.settings.color,
            intensity: self.settings.intensity,
        }
    }
}

impl<B: RenderBackend> Effect<B> for TintEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Tint
    }

    fn initialize(&mut self, backend: &mut B, _resolution: Size) -> Result<(), EffectError> {
        backend.load_program(Program::Tint)?;
        Ok(())
    }

    fn apply(
        &mut self,
        backend: &mut B,
        _frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> ApplyStatus {
        backend
            .draw(&self.pass(), &[input], output, &DrawOptions::nearest())
            .into()
    }
}
