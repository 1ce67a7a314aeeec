//! Audio playback for Ember
//!
//! - Playlist: media files cycled forever
//! - Device: ALSA device detection with a configured fallback
//! - Player: the playback capability (mpg123 in remote mode, or a mock)
//! - Controller: start/stop/volume lifecycle over a player
//! - Service: controller on its own thread behind a command channel

mod controller;
mod device;
mod player;
mod playlist;
mod service;

pub use controller::AudioController;
pub use device::{parse_aplay_listing, AplayDetector, DeviceDetector, DevicePolicy, NoDetection};
pub use player::{AudioError, AudioSink, MockAudioSink, Mpg123Sink, Playback};
pub use playlist::{is_audio_file, Playlist, AUDIO_EXTENSIONS};
pub use service::{AudioCommand, AudioHandle, AudioService};
