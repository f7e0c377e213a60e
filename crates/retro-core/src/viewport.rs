// ABOUTME: Resolution and viewport geometry for the dual-resolution pipeline.
// ABOUTME: Computes where the render-resolution image lands on the display (stretch or letterbox).

use serde::{Deserialize, Serialize};

/// Pixel dimensions of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Scale both axes, never going below one pixel
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            width: ((self.width as f32 * factor).round() as u32).max(1),
            height: ((self.height as f32 * factor).round() as u32).max(1),
        }
    }

    /// Integer division of both axes, never going below one pixel
    pub fn divided(&self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        Self {
            width: (self.width / divisor).max(1),
            height: (self.height / divisor).max(1),
        }
    }

    pub fn full_rect(&self) -> Rect {
        Rect {
            x: 0.0,
            y: 0.0,
            width: self.width as f32,
            height: self.height as f32,
        }
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Rectangle in pixel coordinates, origin top-left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// How the render-resolution image is fitted to the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AspectPolicy {
    /// Fill the whole display, distorting if aspect ratios differ
    Stretch,
    /// Preserve the render aspect ratio with solid borders
    #[default]
    Letterbox,
}

/// Sampling filter used for the final upscale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleFilter {
    /// Point sampling, keeps hard pixel edges
    #[default]
    Nearest,
    Linear,
}

/// Destination rectangle on the display for an image rendered at `render`.
///
/// Letterbox fits to width when the render image is wider than the display
/// and to height otherwise, centering the result.
pub fn destination_rect(render: Size, display: Size, policy: AspectPolicy) -> Rect {
    let full = display.full_rect();
    if policy == AspectPolicy::Stretch || render.is_empty() || display.is_empty() {
        return full;
    }

    let render_aspect = render.aspect();
    let display_aspect = display.aspect();
    let (dw, dh) = (display.width as f32, display.height as f32);

    if render_aspect > display_aspect {
        let scaled_height = dw / render_aspect;
        Rect::new(0.0, (dh - scaled_height) / 2.0, dw, scaled_height)
    } else {
        let scaled_width = dh * render_aspect;
        Rect::new((dw - scaled_width) / 2.0, 0.0, scaled_width, dh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 0.01
    }

    #[test]
    fn same_aspect_letterbox_fills_display() {
        let rect = destination_rect(
            Size::new(320, 180),
            Size::new(1920, 1080),
            AspectPolicy::Letterbox,
        );
        assert!(approx(rect.x, 0.0) && approx(rect.y, 0.0));
        assert!(approx(rect.width, 1920.0) && approx(rect.height, 1080.0));
    }

    #[test]
    fn narrower_render_is_pillarboxed() {
        let rect = destination_rect(
            Size::new(320, 240),
            Size::new(1920, 1080),
            AspectPolicy::Letterbox,
        );
        assert!(rect.width < 1920.0);
        assert!(approx(rect.width, 1440.0));
        assert!(approx(rect.height, 1080.0));
        let left = rect.x;
        let right = 1920.0 - rect.right();
        assert!(approx(left, right));
        assert!(approx(left, 240.0));
    }

    #[test]
    fn wider_render_is_letterboxed() {
        let rect = destination_rect(
            Size::new(400, 100),
            Size::new(800, 600),
            AspectPolicy::Letterbox,
        );
        assert!(approx(rect.width, 800.0));
        assert!(approx(rect.height, 200.0));
        assert!(approx(rect.y, 200.0));
        assert!(approx(rect.x, 0.0));
    }

    #[test]
    fn stretch_always_uses_full_display() {
        let rect = destination_rect(
            Size::new(320, 240),
            Size::new(1920, 1080),
            AspectPolicy::Stretch,
        );
        assert_eq!(rect, Size::new(1920, 1080).full_rect());
    }

    #[test]
    fn scaled_and_divided_never_reach_zero() {
        assert_eq!(Size::new(3, 1).divided(4), Size::new(1, 1));
        assert_eq!(Size::new(10, 10).scaled(0.01), Size::new(1, 1));
        assert_eq!(Size::new(640, 360).scaled(0.5), Size::new(320, 180));
    }
}
