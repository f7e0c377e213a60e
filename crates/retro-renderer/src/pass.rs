// ABOUTME: Fullscreen pass definitions shared by the GPU and software backends.
// ABOUTME: Each pass maps to one WGSL program and packs its parameters into one uniform block.

use bytemuck::{Pod, Zeroable};

use retro_core::{BloomCombine, Color, DitherPattern, Size};

/// Number of taps on each side of the blur center
pub const BLUR_TAPS: i32 = 7;

/// Compiled shader programs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Blit,
    Solid,
    Tint,
    Dither,
    BrightPass,
    Blur,
    BloomCombine,
    Composite,
}

/// How a program's output is merged into the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blend {
    Replace,
    /// Straight alpha: `src * a + dst * (1 - a)`
    Alpha,
    /// Premultiplied alpha: `src + dst * (1 - a)`
    Premultiplied,
}

impl Program {
    pub const ALL: [Program; 8] = [
        Program::Blit,
        Program::Solid,
        Program::Tint,
        Program::Dither,
        Program::BrightPass,
        Program::Blur,
        Program::BloomCombine,
        Program::Composite,
    ];

    /// Stable name, also the WGSL file stem
    pub fn name(&self) -> &'static str {
        match self {
            Program::Blit => "blit",
            Program::Solid => "solid",
            Program::Tint => "tint",
            Program::Dither => "dither",
            Program::BrightPass => "bright_pass",
            Program::Blur => "blur",
            Program::BloomCombine => "bloom_combine",
            Program::Composite => "composite",
        }
    }

    pub fn blend(&self) -> Blend {
        match self {
            Program::Solid => Blend::Alpha,
            Program::Composite => Blend::Premultiplied,
            _ => Blend::Replace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlurDirection {
    Horizontal,
    Vertical,
}

impl BlurDirection {
    fn vector(&self) -> [f32; 2] {
        match self {
            BlurDirection::Horizontal => [1.0, 0.0],
            BlurDirection::Vertical => [0.0, 1.0],
        }
    }
}

/// One fullscreen pass with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Pass {
    /// Copy the input, resampling with the draw filter
    Blit,
    /// Constant color
    Solid { color: Color },
    Tint { color: Color, intensity: f32 },
    /// Quantize to `levels` per channel; `resolution` is the pixel grid of the target
    Dither {
        levels: u32,
        strength: f32,
        pattern: DitherPattern,
        resolution: Size,
    },
    BrightPass { threshold: f32 },
    Blur { direction: BlurDirection, sigma: f32 },
    /// Inputs: base image, blurred highlights
    BloomCombine {
        mode: BloomCombine,
        bloom_intensity: f32,
        base_intensity: f32,
        bloom_saturation: f32,
        base_saturation: f32,
    },
    /// Premultiplied layer over the target, point sampled
    Composite,
}

/// Uniform block layout shared by every program (48 bytes, std140 compatible)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PassUniforms {
    pub target_size: [f32; 2],
    /// Size of one texel of the first input in UV units
    pub source_texel: [f32; 2],
    pub color: [f32; 4],
    pub params: [f32; 4],
}

impl Pass {
    pub fn program(&self) -> Program {
        match self {
            Pass::Blit => Program::Blit,
            Pass::Solid { .. } => Program::Solid,
            Pass::Tint { .. } => Program::Tint,
            Pass::Dither { .. } => Program::Dither,
            Pass::BrightPass { .. } => Program::BrightPass,
            Pass::Blur { .. } => Program::Blur,
            Pass::BloomCombine { .. } => Program::BloomCombine,
            Pass::Composite => Program::Composite,
        }
    }

    pub fn uniforms(&self, target: Size, source: Option<Size>) -> PassUniforms {
        let source_texel = source
            .map(|s| [1.0 / s.width.max(1) as f32, 1.0 / s.height.max(1) as f32])
            .unwrap_or([0.0, 0.0]);
        let mut u = PassUniforms {
            target_size: [target.width as f32, target.height as f32],
            source_texel,
            ..PassUniforms::default()
        };

        match *self {
            Pass::Blit | Pass::Composite => {}
            Pass::Solid { color } => u.color = color.to_array(),
            Pass::Tint { color, intensity } => {
                u.color = color.to_array();
                u.params[0] = intensity;
            }
            Pass::Dither {
                levels,
                strength,
                pattern,
                resolution,
            } => {
                u.target_size = [resolution.width as f32, resolution.height as f32];
                u.params = [levels as f32, strength, pattern.index() as f32, 0.0];
            }
            Pass::BrightPass { threshold } => u.params[0] = threshold,
            Pass::Blur { direction, sigma } => {
                let [dx, dy] = direction.vector();
                u.params = [dx, dy, sigma, 0.0];
            }
            Pass::BloomCombine {
                mode,
                bloom_intensity,
                base_intensity,
                bloom_saturation,
                base_saturation,
            } => {
                u.color[0] = if mode == BloomCombine::Additive { 1.0 } else { 0.0 };
                u.params = [bloom_intensity, base_intensity, bloom_saturation, base_saturation];
            }
        }
        u
    }
}

// CPU versions of the shader helpers. Keep in sync with shaders/*.wgsl.

const BAYER4: [f32; 16] = [
    0.0, 8.0, 2.0, 10.0, 12.0, 4.0, 14.0, 6.0, 3.0, 11.0, 1.0, 9.0, 15.0, 7.0, 13.0, 5.0,
];

/// Ordered-dither threshold in (0, 1) for a pixel
pub(crate) fn bayer4_threshold(x: u32, y: u32) -> f32 {
    (BAYER4[((y % 4) * 4 + (x % 4)) as usize] + 0.5) / 16.0
}

/// Hash noise threshold in [0, 1) for a pixel
pub(crate) fn hash_noise(x: f32, y: f32) -> f32 {
    let v = (x * 12.9898 + y * 78.233).sin() * 43758.547;
    v - v.floor()
}

pub(crate) fn gaussian_weight(n: f32, sigma: f32) -> f32 {
    let sigma = sigma.max(0.001);
    (-(n * n) / (2.0 * sigma * sigma)).exp()
}

pub(crate) fn adjust_saturation(c: [f32; 3], saturation: f32) -> [f32; 3] {
    let grey = c[0] * 0.3 + c[1] * 0.59 + c[2] * 0.11;
    [
        grey + (c[0] - grey) * saturation,
        grey + (c[1] - grey) * saturation,
        grey + (c[2] - grey) * saturation,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_block_is_48_bytes() {
        assert_eq!(std::mem::size_of::<PassUniforms>(), 48);
    }

    #[test]
    fn dither_uniforms_use_pass_resolution() {
        let pass = Pass::Dither {
            levels: 4,
            strength: 0.5,
            pattern: DitherPattern::Noise,
            resolution: Size::new(320, 180),
        };
        let u = pass.uniforms(Size::new(1, 1), Some(Size::new(320, 180)));
        assert_eq!(u.target_size, [320.0, 180.0]);
        assert_eq!(u.params, [4.0, 0.5, 1.0, 0.0]);
    }

    #[test]
    fn bayer_thresholds_cover_unit_interval() {
        let mut values: Vec<f32> = (0..4)
            .flat_map(|y| (0..4).map(move |x| bayer4_threshold(x, y)))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((values[0] - 0.5 / 16.0).abs() < 1e-6);
        assert!((values[15] - 15.5 / 16.0).abs() < 1e-6);
    }

    #[test]
    fn zero_saturation_is_grey() {
        let c = adjust_saturation([1.0, 0.0, 0.0], 0.0);
        assert!((c[0] - c[1]).abs() < 1e-6 && (c[1] - c[2]).abs() < 1e-6);
    }
}
