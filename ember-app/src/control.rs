//! Control surface
//!
//! The operations every front end (HTTP, CLI, encoder) drives: start or
//! update a session, stop it, set the volume and report status. Start and
//! stop are serialised by the runtime lock so there is never more than one
//! render loop.

use crate::render_loop::{RenderLoopHandle, RenderParts};
use crate::session::{SharedSession, Status};
use crossbeam_channel::Receiver;
use ember_audio::{AudioError, AudioHandle};
use ember_noise::{NoiseFileStore, StoreError, StripStreamer};
use ember_render::{FrameCompositor, LedSink, SinkError};
use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// Control errors
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Noise assets unavailable: {0}")]
    Assets(#[from] StoreError),
    #[error("Audio failed to start: {0}")]
    Audio(#[from] AudioError),
    #[error("LED output unavailable: {0}")]
    Sink(#[from] SinkError),
    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[source] io::Error),
}

impl ControlError {
    /// HTTP status for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ControlError::InvalidRequest(_) => 400,
            _ => 500,
        }
    }
}

/// What a successful start did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    Updated,
}

impl StartOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOutcome::Started => "started",
            StartOutcome::Updated => "updated",
        }
    }
}

/// Opens the LED output for a new session
pub type SinkFactory = Box<dyn Fn() -> Result<Box<dyn LedSink>, SinkError> + Send + Sync>;

/// Per-session rendering setup
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub noise_dir: PathBuf,
    pub prefetch_threshold: f32,
    pub tick_interval: Duration,
    pub compositor: FrameCompositor,
}

/// Session lengths used when a request leaves them out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionDefaults {
    pub duration_minutes: f64,
    pub fade_out_minutes: f64,
    pub max_duration_minutes: f64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            duration_minutes: 30.0,
            fade_out_minutes: 10.0,
            max_duration_minutes: 480.0,
        }
    }
}

pub struct ControlSurface {
    session: SharedSession,
    audio: AudioHandle,
    settings: RenderSettings,
    defaults: SessionDefaults,
    open_sink: SinkFactory,
    runtime: Mutex<Option<RenderLoopHandle>>,
}

impl ControlSurface {
    pub fn new(
        session: SharedSession,
        audio: AudioHandle,
        settings: RenderSettings,
        defaults: SessionDefaults,
        open_sink: SinkFactory,
    ) -> Self {
        Self {
            session,
            audio,
            settings,
            defaults,
            open_sink,
            runtime: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn defaults(&self) -> SessionDefaults {
        self.defaults
    }

    /// Start a session, or update the timer of the running one
    ///
    /// Lengths are in minutes. On error nothing changes.
    pub fn start(
        &self,
        duration_minutes: f64,
        fade_out_minutes: f64,
    ) -> Result<StartOutcome, ControlError> {
        let (duration, fade_out) = self.validate(duration_minutes, fade_out_minutes)?;
        let mut runtime = self.runtime.lock();

        {
            let mut session = self.session.lock();
            if session.is_active() {
                session.update_timer(Instant::now(), duration, fade_out);
                info!(duration_minutes, fade_out_minutes, "Session timer updated");
                return Ok(StartOutcome::Updated);
            }
        }

        // A loop that expired on its own may still be blanking the LEDs
        if let Some(previous) = runtime.take() {
            previous.stop();
        }

        let parts = self.open_parts()?;
        let generation = self
            .session
            .lock()
            .begin(Instant::now(), duration, fade_out);

        match RenderLoopHandle::spawn(
            parts,
            self.session.clone(),
            generation,
            self.settings.tick_interval,
        ) {
            Ok(handle) => {
                *runtime = Some(handle);
                info!(duration_minutes, fade_out_minutes, "Session started");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                error!("Failed to spawn render loop: {}", e);
                self.session.lock().finish(generation);
                self.audio.stop();
                Err(ControlError::Spawn(e))
            }
        }
    }

    /// Stop the running session; returns whether one was running
    pub fn stop(&self) -> bool {
        let mut runtime = self.runtime.lock();
        let was_running = self.session.lock().is_running();
        if let Some(handle) = runtime.take() {
            handle.stop();
        }
        if was_running {
            info!("Session stopped");
        }
        was_running
    }

    /// Set the volume, clamped to [0, 100]
    pub fn set_volume(&self, level: i64) -> u8 {
        let volume = self.session.set_volume(level);
        info!(volume, "Volume set");
        volume
    }

    pub fn status(&self) -> Status {
        self.session.status()
    }

    /// Disconnects once the current render loop has ended
    pub fn completion(&self) -> Option<Receiver<()>> {
        self.runtime.lock().as_ref().map(|h| h.completion())
    }

    fn validate(
        &self,
        duration_minutes: f64,
        fade_out_minutes: f64,
    ) -> Result<(Duration, Duration), ControlError> {
        let max = self.defaults.max_duration_minutes;
        if !(duration_minutes.is_finite() && duration_minutes > 0.0 && duration_minutes <= max) {
            return Err(ControlError::InvalidRequest(format!(
                "duration_minutes must be greater than 0 and at most {}",
                max
            )));
        }
        if !(fade_out_minutes.is_finite() && fade_out_minutes >= 0.0) {
            return Err(ControlError::InvalidRequest(
                "fade_out_minutes must not be negative".to_string(),
            ));
        }
        let fade_out_minutes = fade_out_minutes.min(duration_minutes);
        Ok((
            Duration::from_secs_f64(duration_minutes * 60.0),
            Duration::from_secs_f64(fade_out_minutes * 60.0),
        ))
    }

    /// Noise stream, LED sink and audio, in that order
    fn open_parts(&self) -> Result<RenderParts, ControlError> {
        let compositor = self.settings.compositor.clone();
        let store =
            NoiseFileStore::open(&self.settings.noise_dir)?.with_width(compositor.width());
        let streamer =
            StripStreamer::new(store, compositor.height(), self.settings.prefetch_threshold)?;
        let sink = (self.open_sink)()?;

        let volume = self.session.lock().volume();
        self.audio.start(volume)?;

        Ok(RenderParts {
            streamer,
            compositor,
            sink,
            audio: self.audio.clone(),
        })
    }
}

impl Drop for ControlSurface {
    fn drop(&mut self) {
        if let Some(handle) = self.runtime.get_mut().take() {
            handle.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crossbeam_channel::RecvTimeoutError;
    use ember_audio::{AudioController, AudioService, DevicePolicy, MockAudioSink};
    use ember_noise::GenerateConfig;
    use ember_render::{GradientMask, MemorySink, Palette};
    use std::fs;
    use tempfile::TempDir;

    pub(crate) struct Rig {
        pub control: ControlSurface,
        pub sink: MemorySink,
        pub audio: MockAudioSink,
        _service: AudioService,
        _noise: TempDir,
        _media: TempDir,
    }

    fn generate_noise() -> TempDir {
        let noise = tempfile::tempdir().unwrap();
        let config = GenerateConfig {
            strip_count: 1,
            strip_length: 64,
            width: 8,
            octaves: 2,
            max_threads: 1,
            ..Default::default()
        };
        NoiseFileStore::generate(noise.path(), &config).unwrap();
        noise
    }

    pub(crate) fn rig() -> Rig {
        rig_with_noise(generate_noise())
    }

    fn rig_with_noise(noise: TempDir) -> Rig {
        let media = tempfile::tempdir().unwrap();
        fs::write(media.path().join("crackle.mp3"), b"x").unwrap();

        let audio = MockAudioSink::new();
        let controller = AudioController::new(
            Box::new(audio.clone()),
            DevicePolicy::fixed("default"),
            media.path(),
        );
        let service = AudioService::spawn(controller).unwrap();

        let sink = MemorySink::new();
        let factory_sink = sink.clone();
        let settings = RenderSettings {
            noise_dir: noise.path().to_path_buf(),
            prefetch_threshold: 0.5,
            tick_interval: Duration::from_millis(5),
            compositor: FrameCompositor::new(
                8,
                8,
                GradientMask::quadratic(8, 0.2, 1.2),
                Palette::fire(),
            )
            .unwrap(),
        };
        let control = ControlSurface::new(
            SharedSession::new(80),
            service.handle(),
            settings,
            SessionDefaults::default(),
            Box::new(move || Ok(Box::new(factory_sink.clone()) as Box<dyn LedSink>)),
        );

        Rig {
            control,
            sink,
            audio,
            _service: service,
            _noise: noise,
            _media: media,
        }
    }

    #[test]
    fn test_start_reports_remaining() {
        let rig = rig();
        assert_eq!(rig.control.start(30.0, 10.0).unwrap(), StartOutcome::Started);

        let status = rig.control.status();
        assert!(status.running);
        assert!((1799..=1800).contains(&status.remaining_seconds));
        assert_eq!(status.volume, 80);
        assert_eq!(rig.audio.launches(), 1);
        assert!(rig.control.stop());
    }

    #[test]
    fn test_start_while_running_updates_timer() {
        let rig = rig();
        rig.control.start(30.0, 10.0).unwrap();
        rig.control.set_volume(55);

        assert_eq!(rig.control.start(60.0, 10.0).unwrap(), StartOutcome::Updated);
        let status = rig.control.status();
        assert!((3599..=3600).contains(&status.remaining_seconds));
        assert_eq!(status.volume, 55);
        assert_eq!(rig.audio.launches(), 1);
        rig.control.stop();
    }

    #[test]
    fn test_session_ends_on_its_own() {
        let rig = rig();
        // 180 ms session, the last 60 ms fading
        rig.control.start(0.003, 0.001).unwrap();
        let done = rig.control.completion().unwrap();
        assert_eq!(
            done.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        );

        let status = rig.control.status();
        assert!(!status.running);
        assert_eq!(status.remaining_seconds, 0);
        assert!(rig.sink.last_frame().unwrap().is_black());
        assert!(!rig.audio.is_active());
    }

    #[test]
    fn test_start_after_expiry_is_fresh() {
        let rig = rig();
        rig.control.start(0.001, 0.0).unwrap();
        let done = rig.control.completion().unwrap();
        let _ = done.recv_timeout(Duration::from_secs(5));

        assert_eq!(rig.control.start(30.0, 0.0).unwrap(), StartOutcome::Started);
        assert_eq!(rig.audio.launches(), 2);
        rig.control.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let rig = rig();
        assert!(!rig.control.stop());

        rig.control.start(30.0, 10.0).unwrap();
        assert!(rig.control.stop());
        assert!(!rig.control.stop());

        assert!(!rig.control.status().running);
        assert!(rig.sink.last_frame().unwrap().is_black());
        assert!(!rig.audio.is_active());
    }

    #[test]
    fn test_invalid_requests_change_nothing() {
        let rig = rig();
        let requests = [
            (0.0, 1.0),
            (-3.0, 1.0),
            (481.0, 1.0),
            (30.0, -1.0),
            (f64::NAN, 0.0),
        ];
        for (duration, fade) in requests {
            let err = rig.control.start(duration, fade).unwrap_err();
            assert!(matches!(err, ControlError::InvalidRequest(_)));
            assert_eq!(err.status_code(), 400);
        }
        assert!(!rig.control.status().running);
        assert_eq!(rig.audio.launches(), 0);
        assert_eq!(rig.sink.push_count(), 0);
    }

    #[test]
    fn test_missing_assets_fail_start() {
        let rig = rig_with_noise(tempfile::tempdir().unwrap());
        let err = rig.control.start(30.0, 10.0).unwrap_err();
        assert!(matches!(err, ControlError::Assets(StoreError::Empty(_))));
        assert_eq!(err.status_code(), 500);
        assert!(!rig.control.status().running);
        assert_eq!(rig.audio.launches(), 0);
    }

    #[test]
    fn test_audio_failure_fails_start() {
        let rig = rig();
        rig.audio.set_fail_launch(true);
        let err = rig.control.start(30.0, 10.0).unwrap_err();
        assert!(matches!(err, ControlError::Audio(_)));
        assert!(!rig.control.status().running);
        assert!(rig.control.completion().is_none());
    }

    #[test]
    fn test_volume_clamped_while_idle() {
        let rig = rig();
        assert_eq!(rig.control.set_volume(150), 100);
        assert_eq!(rig.control.set_volume(-5), 0);
        assert_eq!(rig.control.status().volume, 0);
    }

    #[test]
    fn test_fade_clamped_to_duration() {
        let rig = rig();
        rig.control.start(5.0, 20.0).unwrap();
        assert_eq!(
            rig.control.session().lock().fade_out(),
            Duration::from_secs(300)
        );
        rig.control.stop();
    }

    #[test]
    fn test_concurrent_start_and_stop() {
        let rig = rig();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let control = &rig.control;
                scope.spawn(move || {
                    for round in 0..10 {
                        if (worker + round) % 2 == 0 {
                            control.start(1.0, 0.5).unwrap();
                        } else {
                            control.stop();
                        }
                    }
                });
            }
        });

        rig.control.stop();
        assert!(!rig.control.status().running);
        assert!(rig.control.completion().is_none());
        assert!(!rig.audio.is_active());
        assert!(rig.sink.last_frame().unwrap().is_black());

        assert_eq!(rig.control.start(1.0, 0.0).unwrap(), StartOutcome::Started);
        assert!(rig.control.status().running);
        assert!(rig.control.stop());
    }
}
