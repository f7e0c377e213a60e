// ABOUTME: Post-processing effect parameters.
// ABOUTME: Tint, dither and bloom settings plus the bloom preset table.

use serde::{Deserialize, Serialize};

use crate::Color;

/// Kind tag for effects in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Tint,
    Dither,
    Bloom,
    /// Effects supplied by the embedding application
    Custom,
}

impl EffectKind {
    pub fn label(&self) -> &'static str {
        match self {
            EffectKind::Tint => "tint",
            EffectKind::Dither => "dither",
            EffectKind::Bloom => "bloom",
            EffectKind::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TintSettings {
    /// Color multiplied into the image
    pub color: Color,

    /// Blend amount (0.0 = untouched, 1.0 = fully tinted)
    pub intensity: f32,
}

impl Default for TintSettings {
    fn default() -> Self {
        Self {
            color: Color::SEPIA,
            intensity: 0.35,
        }
    }
}

impl TintSettings {
    pub fn sanitized(&self) -> Self {
        Self {
            color: self.color.clamped(),
            intensity: self.intensity.clamp(0.0, 1.0),
        }
    }
}

/// Threshold pattern used by the dither pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DitherPattern {
    /// Ordered 4x4 Bayer matrix
    #[default]
    Bayer4,
    /// Per-pixel hash noise
    Noise,
}

impl DitherPattern {
    pub fn index(&self) -> u32 {
        match self {
            DitherPattern::Bayer4 => 0,
            DitherPattern::Noise => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DitherSettings {
    /// How far the pattern pushes values across quantization steps (0.0 - 1.0)
    pub strength: f32,

    /// Number of output levels per channel
    pub levels: u32,

    pub pattern: DitherPattern,
}

impl Default for DitherSettings {
    fn default() -> Self {
        Self {
            strength: 0.3,
            levels: 8,
            pattern: DitherPattern::Bayer4,
        }
    }
}

impl DitherSettings {
    pub const MIN_LEVELS: u32 = 2;
    pub const MAX_LEVELS: u32 = 256;

    pub fn sanitized(&self) -> Self {
        Self {
            strength: self.strength.clamp(0.0, 1.0),
            levels: self.levels.clamp(Self::MIN_LEVELS, Self::MAX_LEVELS),
            pattern: self.pattern,
        }
    }
}

/// How the blurred highlights are merged back into the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BloomCombine {
    /// Blend against the untouched scene, discarding earlier effects
    Standalone,
    /// Add highlights on top of whatever the chain produced so far
    #[default]
    Additive,
}

/// Named bloom look
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomPreset {
    pub name: &'static str,
    /// Brightness above which pixels contribute to bloom
    pub threshold: f32,
    /// Gaussian sigma in (downscaled) texels
    pub blur_amount: f32,
    pub bloom_intensity: f32,
    pub base_intensity: f32,
    pub bloom_saturation: f32,
    pub base_saturation: f32,
}

impl BloomPreset {
    pub const ALL: [BloomPreset; 6] = [
        BloomPreset::new("Default", 0.25, 4.0, 1.25, 1.0, 1.0, 1.0),
        BloomPreset::new("Soft", 0.0, 3.0, 1.0, 1.0, 1.0, 1.0),
        BloomPreset::new("Desaturated", 0.5, 8.0, 2.0, 1.0, 0.0, 1.0),
        BloomPreset::new("Saturated", 0.25, 4.0, 2.0, 1.0, 2.0, 0.0),
        BloomPreset::new("Blurry", 0.0, 2.0, 1.0, 0.1, 1.0, 1.0),
        BloomPreset::new("Subtle", 0.5, 2.0, 1.0, 1.0, 1.0, 1.0),
    ];

    const fn new(
        name: &'static str,
        threshold: f32,
        blur_amount: f32,
        bloom_intensity: f32,
        base_intensity: f32,
        bloom_saturation: f32,
        base_saturation: f32,
    ) -> Self {
        Self {
            name,
            threshold,
            blur_amount,
            bloom_intensity,
            base_intensity,
            bloom_saturation,
            base_saturation,
        }
    }

    /// Look up a preset, clamping out-of-range indices to the last entry
    pub fn by_index(index: usize) -> &'static BloomPreset {
        &Self::ALL[index.min(Self::ALL.len() - 1)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    /// Index into `BloomPreset::ALL`
    pub preset: usize,

    pub combine: BloomCombine,

    /// Resolution divisor for the extract/blur passes
    pub downscale: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            preset: 0,
            combine: BloomCombine::Additive,
            downscale: 4,
        }
    }
}

impl BloomSettings {
    pub fn preset(&self) -> &'static BloomPreset {
        BloomPreset::by_index(self.preset)
    }

    pub fn sanitized(&self) -> Self {
        let downscale = match self.downscale {
            0 | 1 => 1,
            2 | 3 => 2,
            4..=7 => 4,
            _ => 8,
        };
        Self {
            preset: self.preset.min(BloomPreset::ALL.len() - 1),
            combine: self.combine,
            downscale,
        }
    }
}

/// Parameter block for one configured effect, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectParams {
    Tint(TintSettings),
    Dither(DitherSettings),
    Bloom(BloomSettings),
}

impl EffectParams {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParams::Tint(_) => EffectKind::Tint,
            EffectParams::Dither(_) => EffectKind::Dither,
            EffectParams::Bloom(_) => EffectKind::Bloom,
        }
    }

    pub fn sanitized(&self) -> Self {
        match self {
            EffectParams::Tint(s) => EffectParams::Tint(s.sanitized()),
            EffectParams::Dither(s) => EffectParams::Dither(s.sanitized()),
            EffectParams::Bloom(s) => EffectParams::Bloom(s.sanitized()),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// One entry of the configured effect list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    /// Unique lookup key
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ascending priority runs earlier
    #[serde(default)]
    pub priority: i32,

    #[serde(flatten)]
    pub params: EffectParams,
}

impl EffectConfig {
    pub fn new(name: impl Into<String>, priority: i32, params: EffectParams) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            priority,
            params,
        }
    }

    pub fn kind(&self) -> EffectKind {
        self.params.kind()
    }

    /// Default catalog: tint first, then dither, then additive bloom
    pub fn default_catalog() -> Vec<EffectConfig> {
        vec![
            EffectConfig::new("tint", 10, EffectParams::Tint(TintSettings::default())),
            EffectConfig::new("dither", 50, EffectParams::Dither(DitherSettings::default())),
            EffectConfig::new("bloom", 100, EffectParams::Bloom(BloomSettings::default())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_index_is_clamped() {
        assert_eq!(BloomPreset::by_index(0).name, "Default");
        assert_eq!(BloomPreset::by_index(99).name, "Subtle");
    }

    #[test]
    fn dither_levels_are_clamped() {
        let s = DitherSettings {
            strength: 3.0,
            levels: 1,
            pattern: DitherPattern::Noise,
        }
        .sanitized();
        assert_eq!(s.levels, 2);
        assert_eq!(s.strength, 1.0);
    }

    #[test]
    fn bloom_downscale_snaps_to_power_of_two() {
        let s = BloomSettings {
            downscale: 5,
            ..Default::default()
        };
        assert_eq!(s.sanitized().downscale, 4);
        let s = BloomSettings {
            downscale: 0,
            ..Default::default()
        };
        assert_eq!(s.sanitized().downscale, 1);
    }
}
