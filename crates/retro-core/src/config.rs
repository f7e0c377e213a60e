// ABOUTME: Application configuration handling.
// ABOUTME: Loads and saves pipeline settings from TOML files and validates effect ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::effects::{BloomCombine, EffectConfig, EffectParams};
use crate::{AspectPolicy, Color, ScaleFilter, Size};

/// Internal render resolution and upscale behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub aspect: AspectPolicy,
    pub filter: ScaleFilter,
    /// Border color used around a letterboxed image
    pub letterbox_color: Color,
}

impl RenderSettings {
    pub const MIN_SIZE: Size = Size::new(160, 90);
    pub const MAX_SIZE: Size = Size::new(1920, 1080);

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            aspect: AspectPolicy::Letterbox,
            filter: ScaleFilter::Nearest,
            letterbox_color: Color::BLACK,
        }
    }
}

/// Interface layer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Draw UI into its own buffer at display resolution instead of directly to the backbuffer
    pub native_resolution: bool,

    /// Scale applied to the UI buffer relative to the display
    pub scale: f32,
}

impl UiSettings {
    pub const MIN_SCALE: f32 = 0.25;
    pub const MAX_SCALE: f32 = 4.0;
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            native_resolution: true,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Internal resolution and upscaling
    pub render: RenderSettings,

    /// Run the effect chain at all
    pub post_processing: bool,

    /// UI compositing
    pub ui: UiSettings,

    /// Directory with WGSL overrides (falls back to built-in programs when unset)
    pub shader_dir: Option<PathBuf>,

    /// Initial window dimensions
    pub window_width: u32,
    pub window_height: u32,

    /// Configured effects, each with a unique name
    pub effects: Vec<EffectConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            render: RenderSettings::default(),
            post_processing: true,
            ui: UiSettings::default(),
            shader_dir: None,
            window_width: 1280,
            window_height: 720,
            effects: EffectConfig::default_catalog(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Effect name '{0}' is configured more than once")]
    DuplicateEffect(String),

    #[error("Bloom '{bloom}' runs after dither '{dither}' and must use additive combine")]
    StandaloneBloomAfterDither { bloom: String, dither: String },
}

impl Config {
    /// Get the default config file path (~/.config/retro-pipeline/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("retro-pipeline").join("config.toml"))
    }

    /// Load config from a path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config = toml::from_str(content)?;
        Ok(config)
    }

    /// Save config to a path
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn render_size(&self) -> Size {
        self.render.size()
    }

    pub fn effect(&self, name: &str) -> Option<&EffectConfig> {
        self.effects.iter().find(|e| e.name == name)
    }

    pub fn effect_mut(&mut self, name: &str) -> Option<&mut EffectConfig> {
        self.effects.iter_mut().find(|e| e.name == name)
    }

    /// Copy of this config with every value pulled into its legal range.
    ///
    /// The configuration provider is expected to clamp already; this is a last resort.
    pub fn sanitized(&self) -> Self {
        let min = RenderSettings::MIN_SIZE;
        let max = RenderSettings::MAX_SIZE;
        let mut config = self.clone();
        config.render.width = self.render.width.clamp(min.width, max.width);
        config.render.height = self.render.height.clamp(min.height, max.height);
        config.render.letterbox_color = self.render.letterbox_color.clamped();
        config.ui.scale = if self.ui.scale.is_finite() {
            self.ui.scale.clamp(UiSettings::MIN_SCALE, UiSettings::MAX_SCALE)
        } else {
            1.0
        };
        for effect in &mut config.effects {
            effect.params = effect.params.sanitized();
        }
        config
    }

    /// Effects in execution order: ascending priority, ties keep list order
    pub fn ordered_effects(&self) -> Vec<&EffectConfig> {
        let mut ordered: Vec<&EffectConfig> = self.effects.iter().collect();
        ordered.sort_by_key(|e| e.priority);
        ordered
    }

    /// Check structural constraints the pipeline relies on.
    ///
    /// Names must be unique, and an enabled standalone bloom may not run after an
    /// enabled dither since it would re-blend against the scene and drop the quantization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for effect in &self.effects {
            if !seen.insert(effect.name.as_str()) {
                return Err(ConfigError::DuplicateEffect(effect.name.clone()));
            }
        }

        check_effect_order(self.ordered_effects().into_iter().filter(|e| e.enabled))
    }
}

/// Reject a standalone bloom that runs after a dither.
///
/// `enabled` yields the enabled effects in execution order.
pub fn check_effect_order<'a>(
    enabled: impl IntoIterator<Item = &'a EffectConfig>,
) -> Result<(), ConfigError> {
    let mut dither: Option<&str> = None;
    for effect in enabled {
        match &effect.params {
            EffectParams::Dither(_) => {
                dither.get_or_insert(effect.name.as_str());
            }
            EffectParams::Bloom(bloom) if bloom.combine == BloomCombine::Standalone => {
                if let Some(dither) = dither {
                    return Err(ConfigError::StandaloneBloomAfterDither {
                        bloom: effect.name.clone(),
                        dither: dither.to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Supplies resolved configuration snapshots to the renderer
pub trait ConfigSource {
    fn load(&self) -> Result<Config, ConfigError>;

    /// Human-readable origin, used in log messages
    fn describe(&self) -> String;
}

/// Reads a TOML file on every load; a missing file yields the defaults
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        Config::load(&self.path)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory config shared between the renderer and whoever edits it
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    inner: Arc<Mutex<Config>>,
}

impl StaticConfigSource {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(config)),
        }
    }

    /// Replace the backing config; picked up on the next reload
    pub fn set(&self, config: Config) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Edit the backing config in place
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn describe(&self) -> String {
        "in-memory config".to_string()
    }
}
