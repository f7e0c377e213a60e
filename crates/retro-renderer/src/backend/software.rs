// ABOUTME: Deterministic CPU backend executing the same pass math as the WGSL programs.
// ABOUTME: Used for headless snapshots and pixel-exact tests; targets are 8-bit RGBA like on GPU.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;

use retro_core::{Color, Rect, ScaleFilter, Size};

use super::{check_target_size, clip_rect, BackendError, DrawOptions, RenderBackend, Target};
use crate::pass::{
    adjust_saturation, bayer4_threshold, gaussian_weight, hash_noise, Blend, Pass, PassUniforms,
    Program, BLUR_TAPS,
};

/// Matches the common 2D texture limit of desktop GPUs
const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// CPU render target holding unorm RGBA texels
pub struct SoftwareTexture {
    id: u64,
    label: String,
    size: Size,
    pixels: RefCell<Vec<[u8; 4]>>,
}

impl SoftwareTexture {
    fn new(id: u64, label: &str, size: Size) -> Self {
        let count = size.width as usize * size.height as usize;
        Self {
            id,
            label: label.to_string(),
            size,
            pixels: RefCell::new(vec![[0, 0, 0, 0]; count]),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.borrow()[(y * self.size.width + x) as usize]
    }

    /// Copy of all texels, row-major
    pub fn pixels(&self) -> Vec<[u8; 4]> {
        self.pixels.borrow().clone()
    }

    /// Overwrite all texels, e.g. to upload a test frame
    pub fn write_pixels(&self, data: &[[u8; 4]]) {
        let mut pixels = self.pixels.borrow_mut();
        let n = pixels.len().min(data.len());
        pixels[..n].copy_from_slice(&data[..n]);
    }

    pub fn to_image(&self) -> image::RgbaImage {
        let raw: Vec<u8> = self.pixels.borrow().iter().flatten().copied().collect();
        image::RgbaImage::from_raw(self.size.width, self.size.height, raw)
            .unwrap_or_else(|| image::RgbaImage::new(self.size.width, self.size.height))
    }
}

impl std::fmt::Debug for SoftwareTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareTexture")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.size)
            .finish()
    }
}

pub struct SoftwareBackend {
    display: SoftwareTexture,
    next_id: u64,
    live: usize,
    max_dimension: u32,
    loaded: HashSet<Program>,
    missing: HashSet<Program>,
    frames_presented: u64,
}

impl SoftwareBackend {
    pub fn new(display: Size) -> Self {
        Self {
            display: SoftwareTexture::new(0, "Display", display),
            next_id: 1,
            live: 0,
            max_dimension: DEFAULT_MAX_DIMENSION,
            loaded: HashSet::new(),
            missing: HashSet::new(),
            frames_presented: 0,
        }
    }

    /// Lower the per-dimension target limit
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Make a program unavailable, as if its shader file were missing
    pub fn remove_program(&mut self, program: Program) {
        self.missing.insert(program);
        self.loaded.remove(&program);
    }

    pub fn restore_program(&mut self, program: Program) {
        self.missing.remove(&program);
    }

    /// Resize the backbuffer, as a window resize would
    pub fn resize_display(&mut self, size: Size) {
        self.display = SoftwareTexture::new(0, "Display", size);
    }

    pub fn display(&self) -> &SoftwareTexture {
        &self.display
    }

    pub fn display_image(&self) -> image::RgbaImage {
        self.display.to_image()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_loaded(&self, program: Program) -> bool {
        self.loaded.contains(&program)
    }
}

impl RenderBackend for SoftwareBackend {
    type Texture = SoftwareTexture;

    fn create_target(&mut self, label: &str, size: Size) -> Result<SoftwareTexture, BackendError> {
        check_target_size(label, size, self.max_dimension)?;
        let texture = SoftwareTexture::new(self.next_id, label, size);
        self.next_id += 1;
        self.live += 1;
        Ok(texture)
    }

    fn release(&mut self, texture: SoftwareTexture) {
        drop(texture);
        self.live = self.live.saturating_sub(1);
    }

    fn texture_size(&self, texture: &SoftwareTexture) -> Size {
        texture.size
    }

    fn display_size(&self) -> Size {
        self.display.size
    }

    fn load_program(&mut self, program: Program) -> Result<(), BackendError> {
        if self.missing.contains(&program) {
            return Err(BackendError::ProgramMissing {
                program: program.name(),
                reason: "program removed from backend".to_string(),
            });
        }
        self.loaded.insert(program);
        Ok(())
    }

    fn draw(
        &mut self,
        pass: &Pass,
        inputs: &[&SoftwareTexture],
        target: Target<'_, SoftwareTexture>,
        options: &DrawOptions,
    ) -> Result<(), BackendError> {
        let program = pass.program();
        self.load_program(program)?;

        let out = match target {
            Target::Texture(texture) => texture,
            Target::Display => &self.display,
        };
        if inputs.iter().any(|input| input.id == out.id) {
            return Err(BackendError::FeedbackLoop);
        }

        let size = out.size;
        let uniforms = pass.uniforms(size, inputs.first().map(|t| t.size));
        let samplers: Vec<Sampler<'_>> = inputs
            .iter()
            .map(|t| Sampler {
                size: t.size,
                texels: t.pixels.borrow(),
                filter: options.filter,
            })
            .collect();

        let mut pixels = out.pixels.borrow_mut();
        if let Some(color) = options.clear {
            pixels.fill(to_unorm(color.to_array()));
        }

        let viewport = match options.viewport {
            Some(rect) => clip_rect(rect, size),
            None => clip_rect(size.full_rect(), size),
        };
        let Some(area) = viewport else {
            return Ok(());
        };

        let blend = program.blend();
        let (x_start, x_end) = covered_range(area.x, area.right(), size.width);
        let (y_start, y_end) = covered_range(area.y, area.bottom(), size.height);
        for y in y_start..y_end {
            for x in x_start..x_end {
                let uv = viewport_uv(&area, x, y);
                let src = shade(pass, &uniforms, uv, &samplers);
                let index = (y * size.width + x) as usize;
                let dst = from_unorm(pixels[index]);
                pixels[index] = to_unorm(blend_pixel(blend, src, dst));
            }
        }
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn present(&mut self) -> Result<(), BackendError> {
        self.frames_presented += 1;
        Ok(())
    }

    fn live_targets(&self) -> usize {
        self.live
    }
}

struct Sampler<'a> {
    size: Size,
    texels: Ref<'a, Vec<[u8; 4]>>,
    filter: ScaleFilter,
}

impl Sampler<'_> {
    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.size.width as i64 - 1) as u32;
        let y = y.clamp(0, self.size.height as i64 - 1) as u32;
        from_unorm(self.texels[(y * self.size.width + x) as usize])
    }

    fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        let w = self.size.width as f32;
        let h = self.size.height as f32;
        match self.filter {
            ScaleFilter::Nearest => {
                self.texel((uv[0] * w).floor() as i64, (uv[1] * h).floor() as i64)
            }
            ScaleFilter::Linear => {
                let fx = uv[0] * w - 0.5;
                let fy = uv[1] * h - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = lerp4(self.texel(x0, y0), self.texel(x0 + 1, y0), tx);
                let bottom = lerp4(self.texel(x0, y0 + 1), self.texel(x0 + 1, y0 + 1), tx);
                lerp4(top, bottom, ty)
            }
        }
    }
}

/// Pixels whose centers fall inside [start, end)
fn covered_range(start: f32, end: f32, limit: u32) -> (u32, u32) {
    let first = (start - 0.5).ceil().max(0.0) as u32;
    let last = ((end - 0.5).ceil().max(0.0) as u32).min(limit);
    (first.min(last), last)
}

fn viewport_uv(viewport: &Rect, x: u32, y: u32) -> [f32; 2] {
    [
        (x as f32 + 0.5 - viewport.x) / viewport.width,
        (y as f32 + 0.5 - viewport.y) / viewport.height,
    ]
}

fn shade(pass: &Pass, u: &PassUniforms, uv: [f32; 2], inputs: &[Sampler<'_>]) -> [f32; 4] {
    let sample = |index: usize, uv: [f32; 2]| {
        inputs
            .get(index)
            .or_else(|| inputs.first())
            .map(|s| s.sample(uv))
            .unwrap_or([0.0; 4])
    };

    match pass {
        Pass::Blit | Pass::Composite => sample(0, uv),
        Pass::Solid { .. } => u.color,
        Pass::Tint { .. } => {
            let c = sample(0, uv);
            let i = u.params[0];
            [
                mix(c[0], c[0] * u.color[0], i),
                mix(c[1], c[1] * u.color[1], i),
                mix(c[2], c[2] * u.color[2], i),
                c[3],
            ]
        }
        Pass::Dither { .. } => {
            let c = sample(0, uv);
            let px = (uv[0] * u.target_size[0]).floor();
            let py = (uv[1] * u.target_size[1]).floor();
            let threshold = if u.params[2] > 0.5 {
                hash_noise(px, py)
            } else {
                bayer4_threshold(px.max(0.0) as u32, py.max(0.0) as u32)
            };
            let steps = (u.params[0] - 1.0).max(1.0);
            let quantize = |v: f32| {
                let v = v * steps + (threshold - 0.5) * u.params[1];
                (v + 0.5).floor().clamp(0.0, steps) / steps
            };
            [quantize(c[0]), quantize(c[1]), quantize(c[2]), c[3]]
        }
        Pass::BrightPass { .. } => {
            let c = sample(0, uv);
            let t = u.params[0];
            let denom = (1.0 - t).max(0.0001);
            [
                ((c[0] - t) / denom).clamp(0.0, 1.0),
                ((c[1] - t) / denom).clamp(0.0, 1.0),
                ((c[2] - t) / denom).clamp(0.0, 1.0),
                1.0,
            ]
        }
        Pass::Blur { .. } => {
            let step = [u.params[0] * u.source_texel[0], u.params[1] * u.source_texel[1]];
            let mut sum = [0.0f32; 4];
            let mut total = 0.0;
            for i in -BLUR_TAPS..=BLUR_TAPS {
                let w = gaussian_weight(i as f32, u.params[2]);
                let s = sample(0, [uv[0] + step[0] * i as f32, uv[1] + step[1] * i as f32]);
                for (acc, v) in sum.iter_mut().zip(s) {
                    *acc += v * w;
                }
                total += w;
            }
            sum.map(|v| v / total)
        }
        Pass::BloomCombine { .. } => {
            let base = sample(0, uv);
            let highlights = sample(1, uv);
            let highlights = [highlights[0], highlights[1], highlights[2]];
            let bloom = adjust_saturation(highlights, u.params[2]).map(|v| v * u.params[0]);
            if u.color[0] > 0.5 {
                return [
                    (base[0] + bloom[0]).clamp(0.0, 1.0),
                    (base[1] + bloom[1]).clamp(0.0, 1.0),
                    (base[2] + bloom[2]).clamp(0.0, 1.0),
                    base[3],
                ];
            }
            let adjusted = adjust_saturation([base[0], base[1], base[2]], u.params[3])
                .map(|v| v * u.params[1]);
            let mut out = [0.0f32; 4];
            for i in 0..3 {
                let darkened = adjusted[i] * (1.0 - bloom[i].clamp(0.0, 1.0));
                out[i] = (darkened + bloom[i]).clamp(0.0, 1.0);
            }
            out[3] = base[3];
            out
        }
    }
}

fn blend_pixel(blend: Blend, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    match blend {
        Blend::Replace => src,
        Blend::Alpha => {
            let a = src[3];
            [
                src[0] * a + dst[0] * (1.0 - a),
                src[1] * a + dst[1] * (1.0 - a),
                src[2] * a + dst[2] * (1.0 - a),
                a + dst[3] * (1.0 - a),
            ]
        }
        Blend::Premultiplied => {
            let a = src[3];
            [
                src[0] + dst[0] * (1.0 - a),
                src[1] + dst[1] * (1.0 - a),
                src[2] + dst[2] * (1.0 - a),
                a + dst[3] * (1.0 - a),
            ]
        }
    }
}

fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn lerp4(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        mix(a[0], b[0], t),
        mix(a[1], b[1], t),
        mix(a[2], b[2], t),
        mix(a[3], b[3], t),
    ]
}

fn to_unorm(c: [f32; 4]) -> [u8; 4] {
    c.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn from_unorm(c: [u8; 4]) -> [f32; 4] {
    c.map(|v| v as f32 / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(backend: &mut SoftwareBackend, size: Size, color: Color) -> SoftwareTexture {
        let texture = backend.create_target("test", size).unwrap();
        backend.clear(Target::Texture(&texture), color).unwrap();
        texture
    }

    #[test]
    fn clear_and_fill_rect_blend() {
        let mut backend = SoftwareBackend::new(Size::new(8, 8));
        let texture = filled(&mut backend, Size::new(4, 4), Color::BLACK);
        backend
            .fill_rect(
                Target::Texture(&texture),
                Rect::new(0.0, 0.0, 2.0, 4.0),
                Color::rgba(1.0, 1.0, 1.0, 0.5),
            )
            .unwrap();
        assert_eq!(texture.pixel(0, 0), [128, 128, 128, 255]);
        assert_eq!(texture.pixel(3, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn blit_copies_exactly() {
        let mut backend = SoftwareBackend::new(Size::new(8, 8));
        let src = backend.create_target("src", Size::new(5, 3)).unwrap();
        let data: Vec<[u8; 4]> = (0..15).map(|i| [i * 10, 255 - i * 10, i, 255]).collect();
        src.write_pixels(&data);
        let dst = backend.create_target("dst", Size::new(5, 3)).unwrap();
        backend
            .draw(&Pass::Blit, &[&src], Target::Texture(&dst), &DrawOptions::nearest())
            .unwrap();
        assert_eq!(dst.pixels(), data);
    }

    #[test]
    fn nearest_upscale_repeats_texels() {
        let mut backend = SoftwareBackend::new(Size::new(4, 2));
        let src = backend.create_target("src", Size::new(2, 1)).unwrap();
        src.write_pixels(&[[255, 0, 0, 255], [0, 0, 255, 255]]);
        backend
            .draw(&Pass::Blit, &[&src], Target::Display, &DrawOptions::nearest())
            .unwrap();
        let display = backend.display();
        assert_eq!(display.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(display.pixel(1, 1), [255, 0, 0, 255]);
        assert_eq!(display.pixel(2, 0), [0, 0, 255, 255]);
        assert_eq!(display.pixel(3, 1), [0, 0, 255, 255]);
    }

    #[test]
    fn sampling_own_target_is_rejected() {
        let mut backend = SoftwareBackend::new(Size::new(4, 4));
        let texture = backend.create_target("t", Size::new(4, 4)).unwrap();
        let result = backend.draw(
            &Pass::Blit,
            &[&texture],
            Target::Texture(&texture),
            &DrawOptions::nearest(),
        );
        assert!(matches!(result, Err(BackendError::FeedbackLoop)));
    }

    #[test]
    fn removed_program_fails_to_draw() {
        let mut backend = SoftwareBackend::new(Size::new(4, 4));
        backend.remove_program(Program::Tint);
        let src = filled(&mut backend, Size::new(4, 4), Color::WHITE);
        let dst = backend.create_target("dst", Size::new(4, 4)).unwrap();
        let pass = Pass::Tint {
            color: Color::BLACK,
            intensity: 1.0,
        };
        let result = backend.draw(&pass, &[&src], Target::Texture(&dst), &DrawOptions::nearest());
        assert!(matches!(result, Err(BackendError::ProgramMissing { .. })));
    }

    #[test]
    fn restored_program_loads_on_next_draw() {
        let mut backend = SoftwareBackend::new(Size::new(4, 4));
        let src = filled(&mut backend, Size::new(2, 2), Color::WHITE);
        let dst = backend.create_target("dst", Size::new(2, 2)).unwrap();
        let pass = Pass::Tint {
            color: Color::BLACK,
            intensity: 1.0,
        };

        backend.draw(&pass, &[&src], Target::Texture(&dst), &DrawOptions::nearest()).unwrap();
        assert!(backend.is_loaded(Program::Tint));

        backend.remove_program(Program::Tint);
        assert!(!backend.is_loaded(Program::Tint));
        assert!(backend.load_program(Program::Tint).is_err());

        backend.restore_program(Program::Tint);
        backend.draw(&pass, &[&src], Target::Texture(&dst), &DrawOptions::nearest()).unwrap();
        assert!(backend.is_loaded(Program::Tint));
        assert_eq!(dst.pixel(1, 1), [0, 0, 0, 255]);
    }

    #[test]
    fn live_target_accounting() {
        let mut backend = SoftwareBackend::new(Size::new(4, 4));
        let a = backend.create_target("a", Size::new(2, 2)).unwrap();
        let b = backend.create_target("b", Size::new(2, 2)).unwrap();
        assert_eq!(backend.live_targets(), 2);
        backend.release(a);
        backend.release(b);
        assert_eq!(backend.live_targets(), 0);
        assert!(backend.create_target("zero", Size::new(0, 2)).is_err());
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn covered_range_uses_pixel_centers() {
        assert_eq!(covered_range(0.0, 4.0, 10), (0, 4));
        assert_eq!(covered_range(240.0, 1680.0, 1920), (240, 1680));
        assert_eq!(covered_range(0.6, 1.4, 10), (1, 1));
    }
}
