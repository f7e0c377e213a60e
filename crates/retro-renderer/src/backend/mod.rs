// ABOUTME: Graphics backend seam used by every pipeline stage.
// ABOUTME: Render-target allocation, program loading, fullscreen passes and presentation.

mod gpu;
mod software;

pub use gpu::{GpuBackend, GpuTexture};
pub use software::{SoftwareBackend, SoftwareTexture};

use retro_core::{Color, Rect, ScaleFilter, Size};

use crate::pass::{Pass, Program};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Cannot create render target '{label}' with degenerate size {size:?}")]
    DegenerateSize { label: String, size: Size },

    #[error("Render target '{label}' size {size:?} exceeds device limit {limit}")]
    SizeExceedsLimit { label: String, size: Size, limit: u32 },

    #[error("Program '{program}' is unavailable: {reason}")]
    ProgramMissing { program: &'static str, reason: String },

    #[error("Program '{program}' failed to compile: {reason}")]
    ProgramCompile { program: &'static str, reason: String },

    #[error("A pass cannot sample the target it renders into")]
    FeedbackLoop,

    #[error("No frame in progress; call begin_frame first")]
    NoActiveFrame,

    #[error("No suitable graphics adapter found")]
    NoAdapter,

    #[error("The window surface offers no usable format")]
    SurfaceUnsupported,

    #[error("Failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error("Failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),

    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

/// Where a pass writes: an owned render target or the active display backbuffer
pub enum Target<'a, T> {
    Texture(&'a T),
    Display,
}

impl<T> Clone for Target<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Target<'_, T> {}

impl<T> std::fmt::Debug for Target<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Texture(_) => f.write_str("Target::Texture"),
            Target::Display => f.write_str("Target::Display"),
        }
    }
}

/// Per-draw state
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawOptions {
    /// Sub-rectangle of the target to cover; `None` covers the whole target
    pub viewport: Option<Rect>,
    /// Sampler filter for all inputs
    pub filter: ScaleFilter,
    /// Clear the entire target to this color before drawing
    pub clear: Option<Color>,
}

impl DrawOptions {
    pub fn nearest() -> Self {
        Self::default()
    }

    pub fn linear() -> Self {
        Self {
            filter: ScaleFilter::Linear,
            ..Self::default()
        }
    }
}

/// The graphics API as seen by effects, the chain, the pipeline and the compositor.
///
/// All calls happen on the thread owning the graphics context, inside a frame
/// opened with `begin_frame` for anything that records GPU work.
pub trait RenderBackend: 'static {
    type Texture: 'static;

    /// Allocate a color target usable both as render attachment and as pass input
    fn create_target(&mut self, label: &str, size: Size) -> Result<Self::Texture, BackendError>;

    /// Destroy a target created by `create_target`
    fn release(&mut self, texture: Self::Texture);

    fn texture_size(&self, texture: &Self::Texture) -> Size;

    /// Current size of the display backbuffer
    fn display_size(&self) -> Size;

    /// Make sure the program behind a pass is available, compiling it if needed
    fn load_program(&mut self, program: Program) -> Result<(), BackendError>;

    /// Run one fullscreen pass reading `inputs` and writing `target`
    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[&Self::Texture],
        target: Target<'_, Self::Texture>,
        options: &DrawOptions,
    ) -> Result<(), BackendError>;

    fn begin_frame(&mut self) -> Result<(), BackendError>;

    /// Submit recorded work and show the display backbuffer
    fn present(&mut self) -> Result<(), BackendError>;

    /// Number of targets created and not yet released
    fn live_targets(&self) -> usize;

    fn target_size(&self, target: Target<'_, Self::Texture>) -> Size {
        match target {
            Target::Texture(texture) => self.texture_size(texture),
            Target::Display => self.display_size(),
        }
    }

    /// Alpha-blend a solid rectangle into a target
    fn fill_rect(
        &mut self,
        target: Target<'_, Self::Texture>,
        rect: Rect,
        color: Color,
    ) -> Result<(), BackendError> {
        let options = DrawOptions {
            viewport: Some(rect),
            ..DrawOptions::default()
        };
        self.draw(&Pass::Solid { color }, &[], target, &options)
    }

    /// Overwrite a whole target with one color
    fn clear(
        &mut self,
        target: Target<'_, Self::Texture>,
        color: Color,
    ) -> Result<(), BackendError> {
        // Zero-area viewport: only the clear takes effect
        let options = DrawOptions {
            viewport: Some(Rect::new(0.0, 0.0, 0.0, 0.0)),
            clear: Some(color),
            ..DrawOptions::default()
        };
        self.draw(&Pass::Solid { color }, &[], target, &options)
    }
}

/// Validate a requested target size against a per-dimension limit
pub(crate) fn check_target_size(label: &str, size: Size, limit: u32) -> Result<(), BackendError> {
    if size.is_empty() {
        return Err(BackendError::DegenerateSize {
            label: label.to_string(),
            size,
        });
    }
    if size.width > limit || size.height > limit {
        return Err(BackendError::SizeExceedsLimit {
            label: label.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Intersect a viewport with the target bounds; `None` when nothing is left
pub(crate) fn clip_rect(rect: Rect, size: Size) -> Option<Rect> {
    let x0 = rect.x.max(0.0);
    let y0 = rect.y.max(0.0);
    let x1 = rect.right().min(size.width as f32);
    let y1 = rect.bottom().min(size.height as f32);
    if x1 - x0 < f32::EPSILON || y1 - y0 < f32::EPSILON {
        return None;
    }
    Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_rect_trims_to_bounds() {
        let clipped = clip_rect(Rect::new(-10.0, 5.0, 50.0, 100.0), Size::new(30, 40)).unwrap();
        assert_eq!(clipped, Rect::new(0.0, 5.0, 30.0, 35.0));
    }

    #[test]
    fn clip_rect_outside_is_none() {
        assert!(clip_rect(Rect::new(40.0, 0.0, 10.0, 10.0), Size::new(30, 40)).is_none());
    }

    #[test]
    fn degenerate_and_oversized_targets_are_rejected() {
        assert!(matches!(
            check_target_size("x", Size::new(0, 10), 100),
            Err(BackendError::DegenerateSize { .. })
        ));
        assert!(matches!(
            check_target_size("x", Size::new(101, 10), 100),
            Err(BackendError::SizeExceedsLimit { .. })
        ));
        check_target_size("x", Size::new(100, 100), 100).unwrap();
    }
}
