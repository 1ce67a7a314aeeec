//! Render loop
//!
//! One thread per session. Every tick it reads the session, advances the
//! fade, pulls the next noise window, composites a frame and pushes it to
//! the LED sink. When the session runs out (or a stop is requested) it
//! blanks the LEDs, stops the audio and marks the session finished.

use crate::session::{Phase, SharedSession};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use ember_audio::AudioHandle;
use ember_noise::StripStreamer;
use ember_render::{FrameCompositor, LedSink};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a render loop owns for one session
pub struct RenderParts {
    pub streamer: StripStreamer,
    pub compositor: FrameCompositor,
    pub sink: Box<dyn LedSink>,
    pub audio: AudioHandle,
}

/// Why a loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Expired,
    Requested,
    Superseded,
}

struct RenderLoop {
    parts: RenderParts,
    session: SharedSession,
    generation: u64,
    phase: Phase,
    last_tick: Instant,
    last_volume: Option<u8>,
}

impl RenderLoop {
    fn run(mut self, interval: Duration, stop_rx: Receiver<()>) {
        let ticker = tick(interval);
        let reason = loop {
            select! {
                recv(stop_rx) -> _ => break StopReason::Requested,
                recv(ticker) -> at => {
                    let now = at.unwrap_or_else(|_| Instant::now());
                    if let Some(reason) = self.tick(now) {
                        break reason;
                    }
                }
            }
        };
        self.finish(reason);
    }

    fn tick(&mut self, now: Instant) -> Option<StopReason> {
        let dt = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        let (phase, brightness, volume) = {
            let mut session = self.session.lock();
            if session.generation() != self.generation || !session.is_running() {
                return Some(StopReason::Superseded);
            }
            let remaining = session.remaining(now);
            if remaining.is_zero() {
                session.wind_down(self.generation);
                return Some(StopReason::Expired);
            }
            let phase = session.phase(now);
            if phase == Phase::FadingOut {
                session.fade_step(remaining, dt);
            }
            (phase, session.brightness(), session.volume())
        };

        if phase != self.phase {
            info!(from = ?self.phase, to = ?phase, "Render phase changed");
            self.phase = phase;
        }

        // A dropped change is sent again on the next tick
        if self.last_volume != Some(volume) && self.parts.audio.set_volume(volume) {
            self.last_volume = Some(volume);
        }

        let window = self.parts.streamer.next_window();
        match self.parts.compositor.compose(window, brightness) {
            Ok(frame) => {
                if let Err(e) = self.parts.sink.push(&frame) {
                    warn!("LED push failed, frame skipped: {}", e);
                }
            }
            Err(e) => warn!("Compositing failed, frame skipped: {}", e),
        }
        None
    }

    fn finish(mut self, reason: StopReason) {
        info!(?reason, "Render loop stopping");
        if reason != StopReason::Superseded {
            self.session.lock().wind_down(self.generation);
        }

        let black = self.parts.compositor.black();
        if let Err(e) = self.parts.sink.push(&black) {
            warn!("Failed to blank LEDs: {}", e);
        }
        self.parts.audio.stop();

        if self.session.lock().finish(self.generation) {
            info!("Session finished");
        }
        debug!(
            swaps = self.parts.streamer.swaps(),
            wraps = self.parts.streamer.wraps(),
            "Noise streaming stats"
        );
    }
}

/// Owner's side of a running render loop
pub struct RenderLoopHandle {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl RenderLoopHandle {
    /// Start the loop for session `generation`
    pub fn spawn(
        parts: RenderParts,
        session: SharedSession,
        generation: u64,
        interval: Duration,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        // Never sent on; dropping the sender marks the loop done
        let (done_tx, done_rx) = bounded::<()>(0);

        let render = RenderLoop {
            parts,
            session,
            generation,
            phase: Phase::Idle,
            last_tick: Instant::now(),
            last_volume: None,
        };

        let thread = thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                let _done = done_tx;
                render.run(interval, stop_rx);
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            done_rx,
            thread: Some(thread),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Disconnects when the loop has ended
    pub fn completion(&self) -> Receiver<()> {
        self.done_rx.clone()
    }

    /// Ask the loop to stop and wait for it to blank the LEDs
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for RenderLoopHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
