// ABOUTME: One frame of the demo: scene pass, post-processing, UI pass, present.
// ABOUTME: Shared by the windowed and headless drivers.

use retro_renderer::{RenderBackend, RenderError, RetroRenderer};

use crate::scene::DemoScene;

pub fn render_frame<B: RenderBackend>(
    renderer: &mut RetroRenderer<B>,
    backend: &mut B,
    demo: &DemoScene,
) -> Result<(), RenderError> {
    backend.begin_frame()?;

    let render_size = renderer.render_resolution();
    let scene = renderer.begin_scene(backend)?;
    let world = demo.draw_world(backend, retro_renderer::Target::Texture(scene), render_size);
    renderer.end_scene(backend)?;
    world?;

    let ui_size = renderer.ui_size();
    let ui_target = renderer.begin_ui(backend)?;
    let hud = demo.draw_ui(backend, ui_target, ui_size);
    renderer.end_ui(backend)?;
    hud?;

    backend.present()?;
    Ok(())
}
