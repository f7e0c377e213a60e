// ABOUTME: Shared helpers for renderer integration tests on the software backend.
// ABOUTME: Recording effects, bare configs and a one-call frame driver.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use retro_core::{Config, Size, StaticConfigSource};
use retro_renderer::{
    ApplyStatus, DrawOptions, Effect, EffectError, FrameContext, Pass, RenderBackend,
    RetroRenderer, SoftwareBackend, SoftwareTexture, Target,
};

pub type Log = Rc<RefCell<Vec<(&'static str, Size)>>>;

/// Copies its input and records its name and input size
pub struct Recorder {
    pub name: &'static str,
    pub log: Log,
    pub fail: bool,
}

impl Recorder {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Rc::clone(log),
            fail: false,
        }
    }

    pub fn failing(name: &'static str, log: &Log) -> Self {
        Self {
            fail: true,
            ..Self::new(name, log)
        }
    }
}

impl Effect<SoftwareBackend> for Recorder {
    fn initialize(
        &mut self,
        _backend: &mut SoftwareBackend,
        _resolution: Size,
    ) -> Result<(), EffectError> {
        Ok(())
    }

    fn apply(
        &mut self,
        backend: &mut SoftwareBackend,
        _frame: &FrameContext<'_, SoftwareBackend>,
        input: &SoftwareTexture,
        output: Target<'_, SoftwareTexture>,
    ) -> ApplyStatus {
        self.log
            .borrow_mut()
            .push((self.name, backend.texture_size(input)));
        if self.fail {
            return ApplyStatus::Skipped("forced failure".to_string());
        }
        backend
            .draw(&Pass::Blit, &[input], output, &DrawOptions::nearest())
            .into()
    }
}

pub fn names(log: &Log) -> Vec<&'static str> {
    log.borrow().iter().map(|(name, _)| *name).collect()
}

/// Default settings with an empty effect list
pub fn bare_config(render: Size) -> Config {
    let mut config = Config::default();
    config.render.width = render.width;
    config.render.height = render.height;
    config.effects.clear();
    config
}

pub fn setup(
    config: Config,
    display: Size,
) -> (SoftwareBackend, StaticConfigSource, RetroRenderer<SoftwareBackend>) {
    let mut backend = SoftwareBackend::new(display);
    let source = StaticConfigSource::new(config);
    let renderer = RetroRenderer::new(&mut backend, Box::new(source.clone()))
        .expect("renderer should initialize");
    (backend, source, renderer)
}

/// Run one complete frame, letting `draw` paint the scene
pub fn render_frame(
    renderer: &mut RetroRenderer<SoftwareBackend>,
    backend: &mut SoftwareBackend,
    draw: impl FnOnce(&mut SoftwareBackend, &SoftwareTexture),
) {
    backend.begin_frame().unwrap();
    let scene = renderer.begin_scene(backend).unwrap();
    draw(backend, scene);
    renderer.end_scene(backend).unwrap();
    renderer.begin_ui(backend).unwrap();
    renderer.end_ui(backend).unwrap();
    backend.present().unwrap();
}
