//! Playback lifecycle

use crate::device::DevicePolicy;
use crate::player::{AudioError, AudioSink, Playback};
use crate::playlist::Playlist;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Owns at most one running player
pub struct AudioController {
    sink: Box<dyn AudioSink>,
    policy: DevicePolicy,
    media: PathBuf,
    playback: Option<Box<dyn Playback>>,
    volume: u8,
}

impl AudioController {
    pub fn new(sink: Box<dyn AudioSink>, policy: DevicePolicy, media: impl Into<PathBuf>) -> Self {
        Self {
            sink,
            policy,
            media: media.into(),
            playback: None,
            volume: 50,
        }
    }

    pub fn media(&self) -> &Path {
        &self.media
    }

    /// Last volume requested, 0-100
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Start looping playback, no-op if already playing
    ///
    /// The device is resolved on every start so a DAC plugged in after boot
    /// is picked up.
    pub fn start(&mut self, volume: u8) -> Result<(), AudioError> {
        if self.is_playing() {
            debug!("Audio already playing, start ignored");
            return Ok(());
        }
        // A player that died on its own is replaced
        self.stop();

        let device = self.policy.resolve()?;
        let playlist = Playlist::from_path(&self.media)?;
        self.volume = volume.min(100);
        let playback = self.sink.launch(&device, playlist, self.volume)?;
        self.playback = Some(playback);
        info!("Audio started on {}", device);
        Ok(())
    }

    /// Change the gain, applied immediately when playing
    pub fn set_volume(&mut self, volume: u8) {
        self.volume = volume.min(100);
        if let Some(playback) = self.playback.as_mut() {
            if let Err(e) = playback.set_volume(self.volume) {
                warn!("Failed to set audio volume: {}", e);
            }
        }
    }

    /// Stop playback, idempotent
    pub fn stop(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.stop() {
                warn!("Error stopping audio: {}", e);
            }
        }
    }

    pub fn is_playing(&mut self) -> bool {
        self.playback.as_mut().is_some_and(|p| p.is_active())
    }
}

impl Drop for AudioController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NoDetection;
    use crate::player::MockAudioSink;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn controller(device: Option<&str>) -> (TempDir, MockAudioSink, AudioController) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fire.mp3"), b"x").unwrap();
        let mock = MockAudioSink::new();
        let policy = DevicePolicy::new(Box::new(NoDetection), device.map(String::from));
        let controller = AudioController::new(Box::new(mock.clone()), policy, dir.path());
        (dir, mock, controller)
    }

    #[test]
    fn test_start_launches_once() {
        let (_dir, mock, mut audio) = controller(Some("default"));
        audio.start(60).unwrap();
        audio.start(80).unwrap();

        assert!(audio.is_playing());
        assert_eq!(mock.launches(), 1);
        assert_eq!(mock.volumes(), vec![60]);
        assert_eq!(mock.device().as_deref(), Some("default"));
    }

    #[test]
    fn test_no_device_is_start_error() {
        let (_dir, mock, mut audio) = controller(None);
        assert!(matches!(audio.start(50), Err(AudioError::NoDevice)));
        assert!(!audio.is_playing());
        assert_eq!(mock.launches(), 0);
    }

    #[test]
    fn test_missing_media() {
        let mock = MockAudioSink::new();
        let mut audio = AudioController::new(
            Box::new(mock),
            DevicePolicy::fixed("default"),
            "/nonexistent/ember-media",
        );
        assert!(matches!(audio.start(50), Err(AudioError::NoMedia(_))));
    }

    #[test]
    fn test_stop_idempotent() {
        let (_dir, mock, mut audio) = controller(Some("default"));
        audio.stop();
        audio.start(50).unwrap();
        audio.stop();
        audio.stop();

        assert!(!audio.is_playing());
        assert!(!mock.is_active());
        assert_eq!(mock.stops(), 1);
    }

    #[test]
    fn test_set_volume_clamps_and_forwards() {
        let (_dir, mock, mut audio) = controller(Some("default"));
        audio.set_volume(30);
        assert_eq!(audio.volume(), 30);
        assert!(mock.volumes().is_empty());

        audio.start(30).unwrap();
        audio.set_volume(200);
        assert_eq!(audio.volume(), 100);
        assert_eq!(mock.volume(), Some(100));
    }

    #[test]
    fn test_dead_player_restarted() {
        let (_dir, mock, mut audio) = controller(Some("default"));
        audio.start(50).unwrap();
        mock.kill_player();
        assert!(!audio.is_playing());

        audio.start(50).unwrap();
        assert_eq!(mock.launches(), 2);
        assert!(audio.is_playing());
    }
}
