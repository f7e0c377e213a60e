// ABOUTME: Window-less rendering on the software backend, saved as a PNG snapshot.
// ABOUTME: Steps the demo at a fixed rate so snapshots are reproducible.

use std::path::Path;

use anyhow::{Context, Result};
use retro_core::{ConfigSource, Size};
use retro_renderer::{RetroRenderer, SoftwareBackend};

use crate::frame::render_frame;
use crate::scene::DemoScene;

const FRAME_TIME: f32 = 1.0 / 60.0;

pub fn render_snapshot(source: Box<dyn ConfigSource>, frames: u32, output: &Path) -> Result<()> {
    let config = source.load()?.sanitized();
    let display_size = Size::new(config.window_width.max(1), config.window_height.max(1));
    tracing::info!(
        "Rendering {} headless frame(s) at {}x{} from {}",
        frames.max(1),
        display_size.width,
        display_size.height,
        source.describe()
    );

    let mut backend = SoftwareBackend::new(display_size);
    let mut renderer = RetroRenderer::new(&mut backend, source)?;
    let mut demo = DemoScene::new();
    for _ in 0..frames.max(1) {
        demo.advance(FRAME_TIME);
        render_frame(&mut renderer, &mut backend, &demo)?;
    }

    backend
        .display_image()
        .save(output)
        .with_context(|| format!("Failed to write snapshot to {}", output.display()))?;
    renderer.dispose(&mut backend);
    tracing::info!("Snapshot written to {}", output.display());
    Ok(())
}
