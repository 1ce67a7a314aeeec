//! Player processes
//!
//! `Mpg123Sink` runs `mpg123 -R` (remote control mode): commands go in on
//! stdin one per line, status lines come back on stdout. A monitor thread
//! watches for `@P 0` (track finished) and loads the next playlist file.

use crate::playlist::Playlist;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Time allowed between QUIT and kill
const QUIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Errors that can occur in audio playback
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio output device detected and none configured")]
    NoDevice,
    #[error("No audio files found at {0}")]
    NoMedia(PathBuf),
    #[error("Failed to read media directory {path}: {source}")]
    Media {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Audio player {0:?} not found")]
    PlayerNotFound(String),
    #[error("Failed to launch audio player: {0}")]
    Launch(#[source] io::Error),
    #[error("Audio player control failed: {0}")]
    Control(#[from] io::Error),
    #[error("Audio player unavailable: {0}")]
    Unavailable(String),
    #[error("Audio service is not running")]
    ServiceGone,
}

/// A running player
pub trait Playback: Send {
    /// Set the output gain, 0-100
    fn set_volume(&mut self, volume: u8) -> Result<(), AudioError>;
    /// Player is alive and has not been stopped
    fn is_active(&mut self) -> bool;
    /// Terminate the player, idempotent
    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Something that can start a player on a device
pub trait AudioSink: Send {
    fn launch(
        &mut self,
        device: &str,
        playlist: Playlist,
        volume: u8,
    ) -> Result<Box<dyn Playback>, AudioError>;
}

/// Launches mpg123 in remote control mode
#[derive(Debug, Clone)]
pub struct Mpg123Sink {
    program: String,
    extra_args: Vec<String>,
    quit_timeout: Duration,
}

impl Default for Mpg123Sink {
    fn default() -> Self {
        Self::new("mpg123")
    }
}

impl Mpg123Sink {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            quit_timeout: QUIT_TIMEOUT,
        }
    }

    /// Arguments passed before the remote-mode flags
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl AudioSink for Mpg123Sink {
    fn launch(
        &mut self,
        device: &str,
        mut playlist: Playlist,
        volume: u8,
    ) -> Result<Box<dyn Playback>, AudioError> {
        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .args(["-R", "-o", "alsa", "-a", device])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    AudioError::PlayerNotFound(self.program.clone())
                } else {
                    AudioError::Launch(e)
                }
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AudioError::Unavailable("player pipes not captured".into()));
        };

        let mut playback = Mpg123Playback {
            child,
            control: Arc::new(Mutex::new(stdin)),
            stopping: Arc::new(AtomicBool::new(false)),
            monitor: None,
            quit_timeout: self.quit_timeout,
            exited: false,
        };

        let volume = volume.min(100);
        playback.send(&format!("VOLUME {}", volume))?;
        let first = playlist.next_file().to_path_buf();
        playback.send(&format!("LOAD {}", first.display()))?;
        info!("Playing {} on {} at volume {}%", first.display(), device, volume);

        let control = Arc::clone(&playback.control);
        let stopping = Arc::clone(&playback.stopping);
        let monitor = thread::Builder::new()
            .name("audio-monitor".into())
            .spawn(move || monitor_player(stdout, playlist, control, stopping))
            .map_err(AudioError::Launch)?;
        playback.monitor = Some(monitor);

        Ok(Box::new(playback))
    }
}

struct Mpg123Playback {
    child: Child,
    control: Arc<Mutex<ChildStdin>>,
    stopping: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
    quit_timeout: Duration,
    exited: bool,
}

impl Mpg123Playback {
    fn send(&self, command: &str) -> Result<(), AudioError> {
        write_command(&self.control, command)?;
        debug!("Sent player command: {}", command);
        Ok(())
    }
}

impl Playback for Mpg123Playback {
    fn set_volume(&mut self, volume: u8) -> Result<(), AudioError> {
        self.send(&format!("VOLUME {}", volume.min(100)))
    }

    fn is_active(&mut self) -> bool {
        if self.exited || self.stopping.load(Ordering::Relaxed) {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if self.exited {
            return Ok(());
        }
        self.stopping.store(true, Ordering::Relaxed);
        // Broken pipe here just means the player is already gone
        let _ = self.send("QUIT");

        let deadline = Instant::now() + self.quit_timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Player exited with {}", status);
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) | Err(_) => {
                    warn!("Player did not quit within {:?}, killing it", self.quit_timeout);
                    let _ = self.child.kill();
                    self.child.wait()?;
                    break;
                }
            }
        }
        self.exited = true;

        // stdout closes with the process, which ends the monitor
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        info!("Audio stopped");
        Ok(())
    }
}

impl Drop for Mpg123Playback {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop audio player: {}", e);
        }
    }
}

fn write_command(control: &Mutex<ChildStdin>, command: &str) -> io::Result<()> {
    let mut stdin = control.lock();
    writeln!(stdin, "{}", command)?;
    stdin.flush()
}

fn monitor_player(
    stdout: ChildStdout,
    mut playlist: Playlist,
    control: Arc<Mutex<ChildStdin>>,
    stopping: Arc<AtomicBool>,
) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                if !stopping.load(Ordering::Relaxed) {
                    warn!("Player monitor read failed: {}", e);
                }
                break;
            }
        };
        let line = line.trim();

        if line == "@P 0" && !stopping.load(Ordering::Relaxed) {
            let next = playlist.next_file();
            info!("Track finished, loading {}", next.display());
            if let Err(e) = write_command(&control, &format!("LOAD {}", next.display())) {
                warn!("Failed to queue next track: {}", e);
                break;
            }
        } else if line.starts_with("@E") {
            error!("Player error: {}", line);
        }
    }
    debug!("Player monitor exiting");
}

#[derive(Debug, Default)]
struct MockState {
    launches: usize,
    stops: usize,
    device: Option<String>,
    volumes: Vec<u8>,
    active: bool,
    fail_launch: bool,
}

/// Records what a player would have done, for tests and silent runs
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockAudioSink {
    state: Arc<Mutex<MockState>>,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next launches fail
    pub fn set_fail_launch(&self, fail: bool) {
        self.state.lock().fail_launch = fail;
    }

    /// Simulate the player process dying on its own
    pub fn kill_player(&self) {
        self.state.lock().active = false;
    }

    pub fn launches(&self) -> usize {
        self.state.lock().launches
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn device(&self) -> Option<String> {
        self.state.lock().device.clone()
    }

    /// Most recent volume sent to the player
    pub fn volume(&self) -> Option<u8> {
        self.state.lock().volumes.last().copied()
    }

    pub fn volumes(&self) -> Vec<u8> {
        self.state.lock().volumes.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }
}

impl AudioSink for MockAudioSink {
    fn launch(
        &mut self,
        device: &str,
        _playlist: Playlist,
        volume: u8,
    ) -> Result<Box<dyn Playback>, AudioError> {
        let mut state = self.state.lock();
        if state.fail_launch {
            return Err(AudioError::Unavailable("mock player set to fail".into()));
        }
        state.launches += 1;
        state.device = Some(device.to_string());
        state.volumes.push(volume.min(100));
        state.active = true;
        Ok(Box::new(MockPlayback {
            state: Arc::clone(&self.state),
            stopped: false,
        }))
    }
}

struct MockPlayback {
    state: Arc<Mutex<MockState>>,
    stopped: bool,
}

impl Playback for MockPlayback {
    fn set_volume(&mut self, volume: u8) -> Result<(), AudioError> {
        self.state.lock().volumes.push(volume.min(100));
        Ok(())
    }

    fn is_active(&mut self) -> bool {
        !self.stopped && self.state.lock().active
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if !self.stopped {
            self.stopped = true;
            let mut state = self.state.lock();
            state.active = false;
            state.stops += 1;
        }
        Ok(())
    }
}

impl Drop for MockPlayback {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
