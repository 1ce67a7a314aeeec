//! ALSA output device selection
//!
//! The speaker is usually an I2S DAC next to the board's HDMI outputs, so
//! detection picks the first card in `aplay -l` that is not HDMI.

use crate::player::AudioError;
use std::process::Command;
use tracing::{debug, info, warn};

/// Finds an output device at playback start
pub trait DeviceDetector: Send {
    fn detect(&self) -> Option<String>;
}

/// Runs `aplay -l` and parses its card listing
#[derive(Debug, Clone)]
pub struct AplayDetector {
    program: String,
}

impl Default for AplayDetector {
    fn default() -> Self {
        Self {
            program: "aplay".into(),
        }
    }
}

impl AplayDetector {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DeviceDetector for AplayDetector {
    fn detect(&self) -> Option<String> {
        let output = match Command::new(&self.program).arg("-l").output() {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run {} -l: {}", self.program, e);
                return None;
            }
        };
        if !output.status.success() {
            debug!("{} -l exited with {}", self.program, output.status);
            return None;
        }
        let device = parse_aplay_listing(&String::from_utf8_lossy(&output.stdout));
        if let Some(device) = &device {
            info!("Auto-detected audio device: {}", device);
        }
        device
    }
}

/// Detection disabled, always defers to the configured device
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDetection;

impl DeviceDetector for NoDetection {
    fn detect(&self) -> Option<String> {
        None
    }
}

/// First non-HDMI card as `plughw:CARD=<name>,DEV=0`
///
/// Card lines look like `card 1: sndrpihifiberry [snd_rpi_hifiberry_dac], device 0: ...`.
pub fn parse_aplay_listing(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.starts_with("card "))
        .filter(|line| {
            let lower = line.to_lowercase();
            !lower.contains("hdmi") && !lower.contains("vc4")
        })
        .find_map(|line| {
            let name = line.split(':').nth(1)?.split('[').next()?.trim();
            (!name.is_empty()).then(|| format!("plughw:CARD={},DEV=0", name))
        })
}

/// Detector first, then the configured device
pub struct DevicePolicy {
    detector: Box<dyn DeviceDetector>,
    fallback: Option<String>,
}

impl DevicePolicy {
    pub fn new(detector: Box<dyn DeviceDetector>, fallback: Option<String>) -> Self {
        Self { detector, fallback }
    }

    /// Always use `device`, no detection
    pub fn fixed(device: impl Into<String>) -> Self {
        Self::new(Box::new(NoDetection), Some(device.into()))
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn resolve(&self) -> Result<String, AudioError> {
        if let Some(device) = self.detector.detect() {
            return Ok(device);
        }
        match &self.fallback {
            Some(device) => {
                debug!("Using configured audio device {}", device);
                Ok(device.clone())
            }
            None => Err(AudioError::NoDevice),
        }
    }
}
