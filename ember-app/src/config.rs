//! Configuration for Ember
//!
//! Plain `key=value` lines, `#` starts a comment, unknown keys are ignored.
//! Lives at `<config dir>/ember/config.txt` unless a path is given.

use ember_render::{ColorOrder, Palette, PaletteError, FIRE_PALETTE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Invalid palette: {0}")]
    Palette(#[from] PaletteError),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// spidev node driving the LEDs, `None` renders to memory only
    pub led_device: Option<PathBuf>,
    pub matrix_width: usize,
    pub matrix_height: usize,
    pub color_order: ColorOrder,
    /// Hardware brightness cap applied by the LED sink
    pub max_brightness: f32,
    pub tick_interval_ms: u64,

    pub noise_dir: PathBuf,
    pub strip_count: usize,
    pub strip_length: usize,
    pub noise_octaves: u32,
    pub noise_seed: u64,
    pub prefetch_threshold: f32,

    pub palette: Vec<String>,
    pub mask_near: f32,
    pub mask_far: f32,
    pub gamma: f32,

    /// Audio file or directory of files
    pub audio_media: PathBuf,
    /// Device used when detection finds nothing
    pub audio_device: Option<String>,
    pub audio_detect: bool,
    /// Player program, `none` for silent runs
    pub audio_player: String,

    pub encoder_enabled: bool,
    pub encoder_clk_pin: u32,
    pub encoder_dt_pin: u32,
    pub debounce_ms: u64,
    pub volume_step: i32,

    pub default_volume: u8,
    pub default_duration_minutes: f64,
    pub default_fade_minutes: f64,
    pub max_duration_minutes: f64,

    pub http_bind: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let data = data_dir();
        Self {
            led_device: Some(PathBuf::from("/dev/spidev0.0")),
            matrix_width: 8,
            matrix_height: 8,
            color_order: ColorOrder::Grb,
            max_brightness: 0.5,
            // ~32 fps
            tick_interval_ms: 31,

            noise_dir: data.join("noise"),
            strip_count: 6,
            strip_length: 1800,
            noise_octaves: 4,
            noise_seed: 42,
            prefetch_threshold: 0.5,

            palette: FIRE_PALETTE
                .iter()
                .map(|c| format!("{:02x}{:02x}{:02x}", c.r, c.g, c.b))
                .collect(),
            mask_near: 0.2,
            mask_far: 1.2,
            gamma: ember_render::DEFAULT_GAMMA,

            audio_media: data.join("audio"),
            audio_device: Some("default".into()),
            audio_detect: true,
            audio_player: "mpg123".into(),

            encoder_enabled: true,
            encoder_clk_pin: 23,
            encoder_dt_pin: 8,
            debounce_ms: 2,
            volume_step: 2,

            default_volume: 80,
            default_duration_minutes: 30.0,
            default_fade_minutes: 10.0,
            max_duration_minutes: 480.0,

            http_bind: "0.0.0.0:8000".into(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly given path must exist. `ALSA_DEVICE` is applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::load_from(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ember")
            .join("config.txt")
    }

    /// Environment overrides, `lookup` maps a variable name to its value
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("ALSA_DEVICE").filter(|d| !d.trim().is_empty()) {
            tracing::info!("Using ALSA device from environment: {}", device);
            self.audio_device = Some(device.trim().to_string());
            self.audio_detect = false;
        }
    }

    /// Parse config from simple key=value format
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "led_device" => config.led_device = optional(value).map(PathBuf::from),
                "matrix_width" => config.matrix_width = number(key, value)?,
                "matrix_height" => config.matrix_height = number(key, value)?,
                "color_order" => {
                    config.color_order =
                        ColorOrder::parse(value).ok_or_else(|| invalid(key, value))?
                }
                "max_brightness" => config.max_brightness = number(key, value)?,
                "tick_interval_ms" => config.tick_interval_ms = number(key, value)?,
                "noise_dir" => config.noise_dir = PathBuf::from(value),
                "strip_count" => config.strip_count = number(key, value)?,
                "strip_length" => config.strip_length = number(key, value)?,
                "noise_octaves" => config.noise_octaves = number(key, value)?,
                "noise_seed" => config.noise_seed = number(key, value)?,
                "prefetch_threshold" => config.prefetch_threshold = number(key, value)?,
                "palette" => {
                    config.palette = value
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                }
                "mask_near" => config.mask_near = number(key, value)?,
                "mask_far" => config.mask_far = number(key, value)?,
                "gamma" => config.gamma = number(key, value)?,
                "audio_media" => config.audio_media = PathBuf::from(value),
                "audio_device" => config.audio_device = optional(value).map(String::from),
                "audio_detect" => config.audio_detect = boolean(key, value)?,
                "audio_player" => config.audio_player = value.to_string(),
                "encoder_enabled" => config.encoder_enabled = boolean(key, value)?,
                "encoder_clk_pin" => config.encoder_clk_pin = number(key, value)?,
                "encoder_dt_pin" => config.encoder_dt_pin = number(key, value)?,
                "debounce_ms" => config.debounce_ms = number(key, value)?,
                "volume_step" => config.volume_step = number(key, value)?,
                "default_volume" => config.default_volume = number(key, value)?,
                "default_duration_minutes" => config.default_duration_minutes = number(key, value)?,
                "default_fade_minutes" => config.default_fade_minutes = number(key, value)?,
                "max_duration_minutes" => config.max_duration_minutes = number(key, value)?,
                "http_bind" => config.http_bind = value.to_string(),
                "log_level" => config.log_level = value.to_string(),
                _ => {} // Ignore unknown keys
            }
        }

        Ok(config)
    }

    /// Serialize config to simple key=value format
    pub fn serialize(&self) -> String {
        let path_or_none = |p: &Option<PathBuf>| match p {
            Some(p) => p.display().to_string(),
            None => "none".to_string(),
        };
        let order = match self.color_order {
            ColorOrder::Rgb => "rgb",
            ColorOrder::Grb => "grb",
        };

        let lines = [
            "# Ember Configuration".to_string(),
            format!("led_device={}", path_or_none(&self.led_device)),
            format!("matrix_width={}", self.matrix_width),
            format!("matrix_height={}", self.matrix_height),
            format!("color_order={}", order),
            format!("max_brightness={}", self.max_brightness),
            format!("tick_interval_ms={}", self.tick_interval_ms),
            format!("noise_dir={}", self.noise_dir.display()),
            format!("strip_count={}", self.strip_count),
            format!("strip_length={}", self.strip_length),
            format!("noise_octaves={}", self.noise_octaves),
            format!("noise_seed={}", self.noise_seed),
            format!("prefetch_threshold={}", self.prefetch_threshold),
            format!("palette={}", self.palette.join(",")),
            format!("mask_near={}", self.mask_near),
            format!("mask_far={}", self.mask_far),
            format!("gamma={}", self.gamma),
            format!("audio_media={}", self.audio_media.display()),
            format!("audio_device={}", self.audio_device.as_deref().unwrap_or("none")),
            format!("audio_detect={}", self.audio_detect),
            format!("audio_player={}", self.audio_player),
            format!("encoder_enabled={}", self.encoder_enabled),
            format!("encoder_clk_pin={}", self.encoder_clk_pin),
            format!("encoder_dt_pin={}", self.encoder_dt_pin),
            format!("debounce_ms={}", self.debounce_ms),
            format!("volume_step={}", self.volume_step),
            format!("default_volume={}", self.default_volume),
            format!("default_duration_minutes={}", self.default_duration_minutes),
            format!("default_fade_minutes={}", self.default_fade_minutes),
            format!("max_duration_minutes={}", self.max_duration_minutes),
            format!("http_bind={}", self.http_bind),
            format!("log_level={}", self.log_level),
        ];
        lines.join("\n")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.matrix_width == 0 || self.matrix_height == 0 {
            return fail("matrix_width and matrix_height must be positive");
        }
        if !(0.0..=1.0).contains(&self.max_brightness) {
            return fail("max_brightness must be within [0, 1]");
        }
        if self.tick_interval_ms == 0 {
            return fail("tick_interval_ms must be positive");
        }
        if self.strip_count == 0 {
            return fail("strip_count must be positive");
        }
        if self.strip_length < self.matrix_height {
            return fail("strip_length must be at least matrix_height");
        }
        if self.noise_octaves == 0 {
            return fail("noise_octaves must be positive");
        }
        if !(0.0..=1.0).contains(&self.prefetch_threshold) {
            return fail("prefetch_threshold must be within [0, 1]");
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return fail("gamma must be positive");
        }
        if self.default_volume > 100 {
            return fail("default_volume must be within [0, 100]");
        }
        if self.volume_step <= 0 {
            return fail("volume_step must be positive");
        }
        if !(self.max_duration_minutes > 0.0) {
            return fail("max_duration_minutes must be positive");
        }
        if !(self.default_duration_minutes > 0.0
            && self.default_duration_minutes <= self.max_duration_minutes)
        {
            return fail("default_duration_minutes must be within (0, max_duration_minutes]");
        }
        if !(self.default_fade_minutes >= 0.0) {
            return fail("default_fade_minutes must not be negative");
        }
        self.build_palette()?;
        Ok(())
    }

    pub fn build_palette(&self) -> Result<Palette, ConfigError> {
        Ok(Palette::from_hex(&self.palette)?.with_gamma(self.gamma))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Silent mode, no player process
    pub fn audio_disabled(&self) -> bool {
        self.audio_player.eq_ignore_ascii_case("none")
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ember")
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn boolean(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Empty or `none` means unset
fn optional(value: &str) -> Option<&str> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value)
    }
}
