//! Process wiring
//!
//! Builds the control surface, the audio thread and the encoder listener
//! from a `Config`, choosing real hardware or headless stand-ins.

use crate::config::{Config, ConfigError};
use crate::control::{ControlSurface, RenderSettings, SessionDefaults, SinkFactory};
use crate::session::SharedSession;
use ember_audio::{
    AplayDetector, AudioController, AudioError, AudioService, AudioSink, DeviceDetector,
    DevicePolicy, MockAudioSink, Mpg123Sink, NoDetection,
};
use ember_input::{InputListener, RotaryDecoder, SysfsEncoder};
use ember_render::{ComposeError, FrameCompositor, GradientMask, LedSink, MemorySink, SpidevSink};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invalid render setup: {0}")]
    Compose(#[from] ComposeError),
    #[error("Audio service failed: {0}")]
    Audio(#[from] AudioError),
}

/// Everything that lives for the whole process
pub struct Runtime {
    control: Arc<ControlSurface>,
    audio: Option<AudioService>,
    encoder: Option<InputListener>,
}

impl Runtime {
    pub fn build(config: &Config) -> Result<Self, RuntimeError> {
        let session = SharedSession::new(config.default_volume);

        let audio = AudioService::spawn(AudioController::new(
            audio_sink(config),
            device_policy(config),
            &config.audio_media,
        ))?;

        let compositor = FrameCompositor::new(
            config.matrix_width,
            config.matrix_height,
            GradientMask::quadratic(config.matrix_height, config.mask_near, config.mask_far),
            config.build_palette()?,
        )?;
        let settings = RenderSettings {
            noise_dir: config.noise_dir.clone(),
            prefetch_threshold: config.prefetch_threshold,
            tick_interval: config.tick_interval(),
            compositor,
        };
        let defaults = SessionDefaults {
            duration_minutes: config.default_duration_minutes,
            fade_out_minutes: config.default_fade_minutes,
            max_duration_minutes: config.max_duration_minutes,
        };

        let control = Arc::new(ControlSurface::new(
            session.clone(),
            audio.handle(),
            settings,
            defaults,
            sink_factory(config),
        ));

        let encoder = if config.encoder_enabled {
            spawn_encoder(config, session)
        } else {
            debug!("Rotary encoder disabled");
            None
        };

        Ok(Self {
            control,
            audio: Some(audio),
            encoder,
        })
    }

    pub fn control(&self) -> Arc<ControlSurface> {
        Arc::clone(&self.control)
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    /// Stop the session, then the encoder and the audio thread
    pub fn shutdown(mut self) {
        self.stop_all();
    }

    fn stop_all(&mut self) {
        self.control.stop();
        if let Some(encoder) = self.encoder.take() {
            encoder.shutdown();
        }
        if let Some(audio) = self.audio.take() {
            audio.shutdown();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn audio_sink(config: &Config) -> Box<dyn AudioSink> {
    if config.audio_disabled() {
        info!("Audio disabled, playback is simulated");
        Box::new(MockAudioSink::new())
    } else {
        Box::new(Mpg123Sink::new(config.audio_player.clone()))
    }
}

fn device_policy(config: &Config) -> DevicePolicy {
    let detector: Box<dyn DeviceDetector> = if config.audio_detect {
        Box::new(AplayDetector::default())
    } else {
        Box::new(NoDetection)
    };
    DevicePolicy::new(detector, config.audio_device.clone())
}

fn sink_factory(config: &Config) -> SinkFactory {
    let (width, height) = (config.matrix_width, config.matrix_height);
    match config.led_device.clone() {
        Some(path) => {
            let order = config.color_order;
            let cap = config.max_brightness;
            Box::new(move || {
                let sink = SpidevSink::open(&path, width, height, order, cap)?;
                Ok(Box::new(sink) as Box<dyn LedSink>)
            })
        }
        None => {
            info!("No LED device configured, frames are discarded");
            let sink = MemorySink::new();
            Box::new(move || Ok(Box::new(sink.clone()) as Box<dyn LedSink>))
        }
    }
}

/// A missing encoder is not fatal, the API still controls the volume
fn spawn_encoder(config: &Config, session: SharedSession) -> Option<InputListener> {
    let source = match SysfsEncoder::open(config.encoder_clk_pin, config.encoder_dt_pin) {
        Ok(source) => source,
        Err(e) => {
            warn!("Rotary encoder unavailable: {}", e);
            return None;
        }
    };
    let decoder = RotaryDecoder::new(config.debounce());
    let spawned = InputListener::spawn(source, decoder, config.volume_step, move |delta| {
        let volume = session.adjust_volume(delta);
        debug!(volume, "Volume from encoder");
    });
    match spawned {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!("Failed to start encoder listener: {}", e);
            None
        }
    }
}
