// ABOUTME: Multi-pass bloom: bright-pass extract, separable Gaussian blur, combine.
// ABOUTME: Extract and blur run in bloom-owned buffers at a fraction of the input size.

use retro_core::{BloomCombine, BloomSettings, EffectKind, Size};

use super::{ApplyStatus, Effect, EffectError, FrameContext};
use crate::backend::{BackendError, DrawOptions, RenderBackend, Target};
use crate::pass::{BlurDirection, Pass, Program};

const PROGRAMS: [Program; 3] = [Program::BrightPass, Program::Blur, Program::BloomCombine];

struct BloomBuffers<T> {
    size: Size,
    bright: T,
    blur: T,
}

pub struct BloomEffect<B: RenderBackend> {
    settings: BloomSettings,
    buffers: Option<BloomBuffers<B::Texture>>,
}

impl<B: RenderBackend> BloomEffect<B> {
    pub fn new(settings: BloomSettings) -> Self {
        Self {
            settings: settings.sanitized(),
            buffers: None,
        }
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    /// Takes effect on the next apply; buffers follow a changed downscale lazily
    pub fn set_settings(&mut self, settings: BloomSettings) {
        self.settings = settings.sanitized();
    }

    /// Size of the extract/blur buffers, if allocated
    pub fn buffer_size(&self) -> Option<Size> {
        self.buffers.as_ref().map(|b| b.size)
    }

    fn ensure_buffers(&mut self, backend: &mut B, size: Size) -> Result<(), BackendError> {
        if self.buffers.as_ref().is_some_and(|b| b.size == size) {
            return Ok(());
        }

        let bright = backend.create_target("Bloom Bright", size)?;
        let blur = match backend.create_target("Bloom Blur", size) {
            Ok(blur) => blur,
            Err(e) => {
                backend.release(bright);
                return Err(e);
            }
        };

        if let Some(old) = self.buffers.replace(BloomBuffers { size, bright, blur }) {
            backend.release(old.bright);
            backend.release(old.blur);
        }
        tracing::debug!("Bloom buffers at {}x{}", size.width, size.height);
        Ok(())
    }

    fn run(
        &mut self,
        backend: &mut B,
        frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> Result<(), EffectError> {
        let small = backend.texture_size(input).divided(self.settings.downscale);
        self.ensure_buffers(backend, small)?;
        let Some(buffers) = self.buffers.as_ref() else {
            return Err(EffectError::Failed("bloom buffers missing".to_string()));
        };

        let preset = self.settings.preset();
        let base = match self.settings.combine {
            BloomCombine::Standalone => frame.scene,
            BloomCombine::Additive => input,
        };

        backend.draw(
            &Pass::BrightPass {
                threshold: preset.threshold,
            },
            &[base],
            Target::Texture(&buffers.bright),
            &DrawOptions::linear(),
        )?;
        backend.draw(
            &Pass::Blur {
                direction: BlurDirection::Horizontal,
                sigma: preset.blur_amount,
            },
            &[&buffers.bright],
            Target::Texture(&buffers.blur),
            &DrawOptions::nearest(),
        )?;
        backend.draw(
            &Pass::Blur {
                direction: BlurDirection::Vertical,
                sigma: preset.blur_amount,
            },
            &[&buffers.blur],
            Target::Texture(&buffers.bright),
            &DrawOptions::nearest(),
        )?;
        backend.draw(
            &Pass::BloomCombine {
                mode: self.settings.combine,
                bloom_intensity: preset.bloom_intensity,
                base_intensity: preset.base_intensity,
                bloom_saturation: preset.bloom_saturation,
                base_saturation: preset.base_saturation,
            },
            &[base, &buffers.bright],
            output,
            &DrawOptions::linear(),
        )?;
        Ok(())
    }
}

impl<B: RenderBackend> Effect<B> for BloomEffect<B> {
    fn kind(&self) -> EffectKind {
        EffectKind::Bloom
    }

    fn initialize(&mut self, backend: &mut B, resolution: Size) -> Result<(), EffectError> {
        for program in PROGRAMS {
            backend.load_program(program)?;
        }
        self.ensure_buffers(backend, resolution.divided(self.settings.downscale))?;
        Ok(())
    }

    fn apply(
        &mut self,
        backend: &mut B,
        frame: &FrameContext<'_, B>,
        input: &B::Texture,
        output: Target<'_, B::Texture>,
    ) -> ApplyStatus {
        self.run(backend, frame, input, output).into()
    }

    fn dispose(&mut self, backend: &mut B) {
        if let Some(buffers) = self.buffers.take() {
            backend.release(buffers.bright);
            backend.release(buffers.blur);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use retro_core::{Color, Rect};

    fn scene_with_square(backend: &mut SoftwareBackend, size: Size) -> crate::SoftwareTexture {
        let scene = backend.create_target("scene", size).unwrap();
        backend.clear(Target::Texture(&scene), Color::BLACK).unwrap();
        backend
            .fill_rect(
                Target::Texture(&scene),
                Rect::new(12.0, 12.0, 8.0, 8.0),
                Color::WHITE,
            )
            .unwrap();
        scene
    }

    #[test]
    fn bloom_spreads_light_outside_the_square() {
        let size = Size::new(32, 32);
        let mut backend = SoftwareBackend::new(size);
        let scene = scene_with_square(&mut backend, size);
        let out = backend.create_target("out", size).unwrap();

        let mut bloom = BloomEffect::<SoftwareBackend>::new(BloomSettings {
            downscale: 2,
            ..BloomSettings::default()
        });
        bloom.initialize(&mut backend, size).unwrap();
        let frame = FrameContext {
            scene: &scene,
            render_size: size,
        };
        let status = bloom.apply(&mut backend, &frame, &scene, Target::Texture(&out));
        assert_eq!(status, ApplyStatus::Applied);

        assert_eq!(scene.pixel(10, 16)[0], 0);
        let near = out.pixel(10, 16)[0];
        assert!(near > 0, "glow expected next to the square");
        assert_eq!(out.pixel(16, 16)[0], 255);
        assert!(out.pixel(0, 0)[0] < near / 4);
    }

    #[test]
    fn buffers_follow_input_size_and_dispose_is_idempotent() {
        let mut backend = SoftwareBackend::new(Size::new(64, 64));
        let mut bloom = BloomEffect::<SoftwareBackend>::new(BloomSettings::default());
        bloom.initialize(&mut backend, Size::new(64, 64)).unwrap();
        assert_eq!(bloom.buffer_size(), Some(Size::new(16, 16)));
        assert_eq!(backend.live_targets(), 2);

        let scene = scene_with_square(&mut backend, Size::new(32, 32));
        let out = backend.create_target("out", Size::new(32, 32)).unwrap();
        let frame = FrameContext {
            scene: &scene,
            render_size: Size::new(32, 32),
        };
        assert!(bloom
            .apply(&mut backend, &frame, &scene, Target::Texture(&out))
            .is_applied());
        assert_eq!(bloom.buffer_size(), Some(Size::new(8, 8)));
        assert_eq!(backend.live_targets(), 4);

        bloom.dispose(&mut backend);
        bloom.dispose(&mut backend);
        assert_eq!(backend.live_targets(), 2);
    }

    #[test]
    fn missing_program_skips() {
        let size = Size::new(16, 16);
        let mut backend = SoftwareBackend::new(size);
        backend.remove_program(Program::Blur);
        let scene = scene_with_square(&mut backend, Size::new(16, 16));
        let out = backend.create_target("out", size).unwrap();
        let mut bloom = BloomEffect::<SoftwareBackend>::new(BloomSettings::default());
        let frame = FrameContext {
            scene: &scene,
            render_size: size,
        };
        let status = bloom.apply(&mut backend, &frame, &scene, Target::Texture(&out));
        assert!(matches!(status, ApplyStatus::Skipped(_)));
    }
}
