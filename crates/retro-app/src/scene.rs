// ABOUTME: Animated demo content drawn with solid fills through the render backend.
// ABOUTME: A low-resolution landscape for the world pass and a small HUD for the UI pass.

use retro_core::{Color, Rect, Size};
use retro_renderer::{BackendError, RenderBackend, Target};

const SKY_TOP: Color = Color::rgb(0.05, 0.07, 0.2);
const SKY_HORIZON: Color = Color::rgb(0.55, 0.3, 0.45);
const GROUND: Color = Color::rgb(0.08, 0.12, 0.08);
const GRID: Color = Color::rgb(0.2, 0.8, 0.5);
const SUN: Color = Color::rgb(1.0, 0.95, 0.75);
const SKY_BANDS: u32 = 12;
const GRID_LINES: u32 = 6;

fn mix(a: Color, b: Color, t: f32) -> Color {
    Color::rgba(
        a.r + (b.r - a.r) * t,
        a.g + (b.g - a.g) * t,
        a.b + (b.b - a.b) * t,
        a.a + (b.a - a.a) * t,
    )
}

/// Time-driven demo scene
#[derive(Debug, Default)]
pub struct DemoScene {
    time: f32,
    frames: u64,
}

impl DemoScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, seconds: f32) {
        self.time += seconds;
        self.frames += 1;
    }

    /// World content at render resolution
    pub fn draw_world<B: RenderBackend>(
        &self,
        backend: &mut B,
        target: Target<'_, B::Texture>,
        size: Size,
    ) -> Result<(), BackendError> {
        let w = size.width as f32;
        let h = size.height as f32;
        let horizon = (h * 0.65).floor();

        let band = horizon / SKY_BANDS as f32;
        for i in 0..SKY_BANDS {
            let t = i as f32 / (SKY_BANDS - 1) as f32;
            let rect = Rect::new(0.0, (band * i as f32).floor(), w, band.ceil() + 1.0);
            backend.fill_rect(target, rect, mix(SKY_TOP, SKY_HORIZON, t))?;
        }

        let sun = (h * 0.2).round();
        let sun_x = w * 0.5 + (self.time * 0.3).sin() * w * 0.3 - sun * 0.5;
        backend.fill_rect(target, Rect::new(sun_x.round(), horizon * 0.3, sun, sun), SUN)?;

        backend.fill_rect(target, Rect::new(0.0, horizon, w, h - horizon), GROUND)?;

        // Horizontal grid lines scroll toward the viewer, spacing grows with depth
        let depth = h - horizon;
        for i in 0..GRID_LINES {
            let t = (i as f32 + self.time * 0.8).rem_euclid(GRID_LINES as f32) / GRID_LINES as f32;
            let y = horizon + depth * t * t;
            backend.fill_rect(target, Rect::new(0.0, y.floor(), w, 1.0), GRID)?;
        }
        for i in 0..=8 {
            let x = w * i as f32 / 8.0;
            backend.fill_rect(target, Rect::new(x.floor(), horizon, 1.0, depth), GRID)?;
        }

        // Bobbing pillar
        let pillar_h = h * 0.3;
        let bob = (self.time * 2.0).sin() * h * 0.03;
        let pillar = Rect::new(
            (w * 0.15).round(),
            (horizon - pillar_h + bob).round(),
            (w * 0.06).round(),
            pillar_h,
        );
        backend.fill_rect(target, pillar, Color::rgb(0.9, 0.3, 0.2))?;
        Ok(())
    }

    /// HUD overlay laid out in UI pixels
    pub fn draw_ui<B: RenderBackend>(
        &self,
        backend: &mut B,
        target: Target<'_, B::Texture>,
        size: Size,
    ) -> Result<(), BackendError> {
        let unit = (size.height as f32 / 360.0).max(0.25);
        let panel = Rect::new(8.0 * unit, 8.0 * unit, 120.0 * unit, 36.0 * unit);
        backend.fill_rect(target, panel, Color::rgba(0.0, 0.0, 0.0, 0.6))?;
        backend.fill_rect(
            target,
            Rect::new(panel.x, panel.y, panel.width, 1.0 * unit),
            Color::rgba(1.0, 1.0, 1.0, 0.8),
        )?;

        let progress = (self.frames % 120) as f32 / 120.0;
        let bar = Rect::new(
            panel.x + 6.0 * unit,
            panel.y + 14.0 * unit,
            (panel.width - 12.0 * unit) * progress,
            8.0 * unit,
        );
        backend.fill_rect(target, bar, Color::rgba(0.3, 0.9, 1.0, 0.9))?;
        Ok(())
    }
}
