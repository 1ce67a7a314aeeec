//! Fire color palette
//!
//! Maps a scalar "temperature" in [0, 1] to a color by linear interpolation
//! between evenly spaced anchor colors, then applies a gamma lookup so the
//! LEDs' linear PWM response looks perceptually even.

use crate::frame::Rgb;
use thiserror::Error;

/// Default LED gamma
pub const DEFAULT_GAMMA: f32 = 2.8;

/// Ember-to-flame anchors, coolest first
pub const FIRE_PALETTE: [Rgb; 8] = [
    Rgb::new(0x1f, 0x09, 0x00),
    Rgb::new(0x54, 0x37, 0x0b),
    Rgb::new(0x75, 0x4b, 0x03),
    Rgb::new(0x8e, 0x53, 0x18),
    Rgb::new(0xad, 0x5c, 0x00),
    Rgb::new(0xd9, 0x7b, 0x09),
    Rgb::new(0xfa, 0x9a, 0x2c),
    Rgb::new(0xfc, 0xb3, 0x08),
];

/// Errors building a palette
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaletteError {
    #[error("Palette needs at least one color")]
    Empty,
    #[error("Invalid hex color {0:?}")]
    InvalidHex(String),
}

/// Ordered anchor colors with gamma correction
#[derive(Debug, Clone)]
pub struct Palette {
    anchors: Vec<Rgb>,
    gamma: f32,
    gamma_table: [u8; 256],
}

impl Palette {
    /// Palette without gamma correction
    pub fn new(anchors: Vec<Rgb>) -> Result<Self, PaletteError> {
        if anchors.is_empty() {
            return Err(PaletteError::Empty);
        }
        Ok(Self {
            anchors,
            gamma: 1.0,
            gamma_table: gamma_table(1.0),
        })
    }

    /// Parse anchors from `rrggbb` strings
    pub fn from_hex<I, S>(colors: I) -> Result<Self, PaletteError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let anchors = colors
            .into_iter()
            .map(|c| {
                let c = c.as_ref();
                Rgb::from_hex(c).ok_or_else(|| PaletteError::InvalidHex(c.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(anchors)
    }

    /// The built-in fire palette with default gamma
    pub fn fire() -> Self {
        Self {
            anchors: FIRE_PALETTE.to_vec(),
            gamma: DEFAULT_GAMMA,
            gamma_table: gamma_table(DEFAULT_GAMMA),
        }
    }

    /// Replace the gamma curve (1.0 disables correction)
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        if gamma.is_finite() && gamma > 0.0 {
            self.gamma = gamma;
            self.gamma_table = gamma_table(gamma);
        }
        self
    }

    pub fn anchors(&self) -> &[Rgb] {
        &self.anchors
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    /// Color for a temperature, clamped into [0, 1]
    pub fn map(&self, temperature: f32) -> Rgb {
        let color = self.interpolate(temperature);
        Rgb::new(
            self.gamma_table[color.r as usize],
            self.gamma_table[color.g as usize],
            self.gamma_table[color.b as usize],
        )
    }

    /// Linear interpolation between adjacent anchors, before gamma
    fn interpolate(&self, temperature: f32) -> Rgb {
        let n = self.anchors.len();
        if n == 1 {
            return self.anchors[0];
        }

        // clamp passes NaN through
        let t = if temperature.is_nan() {
            0.0
        } else {
            temperature.clamp(0.0, 1.0)
        };

        let scaled = t * (n - 1) as f32;
        let index = (scaled.floor() as usize).min(n - 2);
        let frac = scaled - index as f32;

        let a = self.anchors[index];
        let b = self.anchors[index + 1];
        let channel = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * frac).round() as u8;

        Rgb::new(channel(a.r, b.r), channel(a.g, b.g), channel(a.b, b.b))
    }
}

fn gamma_table(gamma: f32) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (value, out) in table.iter_mut().enumerate() {
        let normalized = value as f64 / 255.0;
        *out = (255.0 * normalized.powf(gamma as f64)).round() as u8;
    }
    table
}
