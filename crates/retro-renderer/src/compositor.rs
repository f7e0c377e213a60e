// ABOUTME: UI layer compositing over the upscaled world image.
// ABOUTME: UI draws into a transparent buffer at display size times scale, point-sampled on blend.

use retro_core::{Color, Size, UiSettings};

use crate::backend::{BackendError, DrawOptions, RenderBackend, Target};
use crate::pass::Pass;
use crate::pipeline::{PipelinePhase, RenderPipeline};

/// A UI buffer allocated ahead of a resize
pub struct PreparedUi<T> {
    settings: UiSettings,
    display: Size,
    buffer: Option<Option<T>>,
}

pub struct UiCompositor<B: RenderBackend> {
    settings: UiSettings,
    display: Size,
    buffer: Option<B::Texture>,
    active: bool,
}

impl<B: RenderBackend> UiCompositor<B> {
    pub fn new(
        backend: &mut B,
        settings: &UiSettings,
        display: Size,
    ) -> Result<Self, BackendError> {
        let buffer = Self::allocate(backend, settings, display)?;
        Ok(Self {
            settings: settings.clone(),
            display,
            buffer,
            active: false,
        })
    }

    fn buffer_size(settings: &UiSettings, display: Size) -> Size {
        display.scaled(settings.scale)
    }

    fn allocate(
        backend: &mut B,
        settings: &UiSettings,
        display: Size,
    ) -> Result<Option<B::Texture>, BackendError> {
        if !settings.native_resolution {
            return Ok(None);
        }
        let size = Self::buffer_size(settings, display);
        let buffer = backend.create_target("UI", size)?;
        tracing::info!("UI buffer at {}x{}", size.width, size.height);
        Ok(Some(buffer))
    }

    /// Size UI content is laid out in
    pub fn ui_size(&self) -> Size {
        match &self.buffer {
            Some(_) => Self::buffer_size(&self.settings, self.display),
            None => self.display,
        }
    }

    pub fn uses_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Hand out the UI target: a cleared transparent buffer, or the display itself
    pub fn begin_ui(
        &mut self,
        backend: &mut B,
        pipeline: &RenderPipeline<B>,
    ) -> Result<Target<'_, B::Texture>, BackendError> {
        assert!(
            pipeline.phase() == PipelinePhase::Resolved,
            "begin_ui called before end_scene"
        );
        assert!(!self.active, "begin_ui called twice without end_ui");

        let target = match &self.buffer {
            Some(buffer) => {
                backend.clear(Target::Texture(buffer), Color::TRANSPARENT)?;
                Target::Texture(buffer)
            }
            None => Target::Display,
        };
        self.active = true;
        Ok(target)
    }

    /// Blend the UI buffer over the display and close the frame
    pub fn end_ui(
        &mut self,
        backend: &mut B,
        pipeline: &mut RenderPipeline<B>,
    ) -> Result<(), BackendError> {
        assert!(self.active, "end_ui called without begin_ui");
        self.active = false;
        pipeline.finish_frame();

        if let Some(buffer) = &self.buffer {
            backend.draw(
                &Pass::Composite,
                &[buffer],
                Target::Display,
                &DrawOptions::nearest(),
            )?;
        }
        Ok(())
    }

    pub fn prepare_resize(
        &self,
        backend: &mut B,
        settings: &UiSettings,
        display: Size,
    ) -> Result<PreparedUi<B::Texture>, BackendError> {
        assert!(!self.active, "UI resize requested mid-frame");
        let unchanged = settings.native_resolution == self.settings.native_resolution
            && Self::buffer_size(settings, display)
                == Self::buffer_size(&self.settings, self.display);
        let buffer = if unchanged {
            None
        } else {
            Some(Self::allocate(backend, settings, display)?)
        };
        Ok(PreparedUi {
            settings: settings.clone(),
            display,
            buffer,
        })
    }

    pub fn commit_resize(&mut self, backend: &mut B, prepared: PreparedUi<B::Texture>) {
        if let Some(buffer) = prepared.buffer {
            if let Some(old) = std::mem::replace(&mut self.buffer, buffer) {
                backend.release(old);
            }
        }
        self.settings = prepared.settings;
        self.display = prepared.display;
    }

    pub fn discard_resize(&self, backend: &mut B, prepared: PreparedUi<B::Texture>) {
        if let Some(Some(buffer)) = prepared.buffer {
            backend.release(buffer);
        }
    }

    /// Reallocate for a new display size; keeps the current buffer on failure
    pub fn resize(
        &mut self,
        backend: &mut B,
        settings: &UiSettings,
        display: Size,
    ) -> Result<(), BackendError> {
        let prepared = self.prepare_resize(backend, settings, display)?;
        self.commit_resize(backend, prepared);
        Ok(())
    }

    pub fn dispose(self, backend: &mut B) {
        if let Some(buffer) = self.buffer {
            backend.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::pipeline::PipelineConfig;
    use retro_core::{AspectPolicy, Rect, ScaleFilter};

    type Fixture = (
        SoftwareBackend,
        RenderPipeline<SoftwareBackend>,
        UiCompositor<SoftwareBackend>,
    );

    fn setup(settings: &UiSettings) -> Fixture {
        let display = Size::new(8, 8);
        let mut backend = SoftwareBackend::new(display);
        let pipeline = RenderPipeline::new(
            &mut backend,
            PipelineConfig {
                render: Size::new(4, 4),
                display,
                aspect: AspectPolicy::Stretch,
                filter: ScaleFilter::Nearest,
                post_processing: false,
                letterbox_color: Color::BLACK,
            },
        )
        .unwrap();
        let compositor = UiCompositor::new(&mut backend, settings, display).unwrap();
        (backend, pipeline, compositor)
    }

    #[test]
    #[should_panic(expected = "begin_ui called before end_scene")]
    fn ui_before_scene_panics() {
        let (mut backend, pipeline, mut compositor) = setup(&UiSettings::default());
        let _ = compositor.begin_ui(&mut backend, &pipeline);
    }

    #[test]
    fn translucent_ui_blends_over_world() {
        let (mut backend, mut pipeline, mut compositor) = setup(&UiSettings::default());
        pipeline.begin_scene(&mut backend).unwrap();
        pipeline.end_scene(&mut backend).unwrap();

        let target = compositor.begin_ui(&mut backend, &pipeline).unwrap();
        backend
            .fill_rect(target, Rect::new(0.0, 0.0, 4.0, 8.0), Color::rgba(1.0, 1.0, 1.0, 0.5))
            .unwrap();
        compositor.end_ui(&mut backend, &mut pipeline).unwrap();

        assert_eq!(backend.display().pixel(1, 1), [128, 128, 128, 255]);
        assert_eq!(backend.display().pixel(6, 1), [0, 0, 0, 255]);
        assert_eq!(pipeline.phase(), PipelinePhase::Idle);
    }

    #[test]
    fn scaled_buffer_size() {
        let settings = UiSettings {
            native_resolution: true,
            scale: 0.5,
        };
        let (_, _, compositor) = setup(&settings);
        assert_eq!(compositor.ui_size(), Size::new(4, 4));
    }

    #[test]
    fn direct_mode_draws_to_display() {
        let settings = UiSettings {
            native_resolution: false,
            scale: 1.0,
        };
        let (mut backend, mut pipeline, mut compositor) = setup(&settings);
        assert!(!compositor.uses_buffer());
        pipeline.begin_scene(&mut backend).unwrap();
        pipeline.end_scene(&mut backend).unwrap();
        let target = compositor.begin_ui(&mut backend, &pipeline).unwrap();
        assert!(matches!(target, Target::Display));
        compositor.end_ui(&mut backend, &mut pipeline).unwrap();
        assert_eq!(backend.live_targets(), 4);
    }
}
