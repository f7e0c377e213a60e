// ABOUTME: Shared types and configuration for the retro render pipeline.
// ABOUTME: Defines colors, effect settings, viewport math, and config file handling.

pub mod color;
pub mod config;
pub mod effects;
pub mod viewport;

pub use color::Color;
pub use config::{
    check_effect_order, Config, ConfigError, ConfigSource, FileConfigSource, RenderSettings,
    StaticConfigSource, UiSettings,
};
pub use effects::{
    BloomCombine, BloomPreset, BloomSettings, DitherPattern, DitherSettings, EffectConfig,
    EffectKind, EffectParams, TintSettings,
};
pub use viewport::{destination_rect, AspectPolicy, Rect, ScaleFilter, Size};
