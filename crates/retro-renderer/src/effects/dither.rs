// ABOUTME: Color quantization with ordered (Bayer 4x4) or noise dithering.
// ABOUTME: The pixel grid comes from the buffer being drawn into, queried on every apply.

use retro_core::{DitherSettings, EffectKind, Size};

use super::{ApplyStatus, Effect, EffectError, FrameContext};
use crate::backend::{DrawOptions, RenderBackend, Target};
use crate::pass::{Pass, Program};

#[derive(Debug, Clone, Default)]
pub struct DitherEffect {
    settings: DitherSettings,
    last_target_size: Option<Size>,
}

impl DitherEffect {
    pub fn new(settings: DitherSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            last_target_size: None,
        }
    }

    pub fn settings(&self) -> &DitherSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: DitherSettings) {
        self.settings = settings.sanitized();
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.settings.strength = strength.clamp(0.0, 1.0);
    }

    /// Size of the target written by the most recent apply
    pub fn last_target_size(&self) -> Option<Size> {
        self.last_target_size
    }
}

impl<B: RenderBackend> Effect<B> for DitherEffect {
    fn kind(&self) -> EffectKind {
        EffectKind::Dither
    }

    fn initialize(&mut self, backend: &mut B, _resolution: Size) -> Result<(), EffectError> {
        backend.load_program(Program::Dither)?;
        Ok(())
    }

    fn apply(
        &mut self,
        backend: &mut B,
        _frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> ApplyStatus {
        let resolution = backend.target_size(output);
        self.last_target_size = Some(resolution);
        let pass = Pass::Dither {
            levels: self.settings.levels,
            strength: self.settings.strength,
            pattern: self.settings.pattern,
            resolution,
        };
        backend
            .draw(&pass, &[input], output, &DrawOptions::nearest())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use retro_core::{Color, DitherPattern};

    fn run(settings: DitherSettings, value: f32, size: Size) -> (DitherEffect, Vec<[u8; 4]>) {
        let mut backend = SoftwareBackend::new(size);
        let scene = backend.create_target("scene", size).unwrap();
        backend
            .clear(Target::Texture(&scene), Color::rgb(value, value, value))
            .unwrap();
        let out = backend.create_target("out", size).unwrap();
        let mut dither = DitherEffect::new(settings);
        let frame = FrameContext {
            scene: &scene,
            render_size: size,
        };
        let status = dither.apply(&mut backend, &frame, &scene, Target::Texture(&out));
        assert!(status.is_applied());
        (dither, out.pixels())
    }

    #[test]
    fn two_levels_produce_only_black_and_white() {
        let settings = DitherSettings {
            strength: 1.0,
            levels: 2,
            pattern: DitherPattern::Bayer4,
        };
        let (_, pixels) = run(settings, 0.5, Size::new(8, 8));
        assert!(pixels.iter().all(|p| p[0] == 0 || p[0] == 255));
        let white = pixels.iter().filter(|p| p[0] == 255).count();
        assert!(white > 0 && white < pixels.len());
    }

    #[test]
    fn zero_strength_rounds_to_nearest_level() {
        let settings = DitherSettings {
            strength: 0.0,
            levels: 2,
            pattern: DitherPattern::Noise,
        };
        let (_, pixels) = run(settings, 0.8, Size::new(4, 4));
        assert!(pixels.iter().all(|p| p[0] == 255));
    }

    #[test]
    fn strength_is_clamped() {
        let mut dither = DitherEffect::new(DitherSettings::default());
        dither.set_strength(3.0);
        assert_eq!(dither.settings().strength, 1.0);
        dither.set_strength(-1.0);
        assert_eq!(dither.settings().strength, 0.0);
    }

    #[test]
    fn resolution_is_taken_from_output() {
        let (dither, _) = run(DitherSettings::default(), 0.5, Size::new(6, 3));
        assert_eq!(dither.last_target_size(), Some(Size::new(6, 3)));
    }
}
