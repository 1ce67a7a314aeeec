//! Shared control state
//!
//! One `Session` per process. The render loop, the encoder listener and the
//! control surface all hold a `SharedSession` and touch it only under its
//! lock, for short reads and writes.

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the render loop should be doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    FadingOut,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub running: bool,
    pub remaining_seconds: u64,
    pub volume: u8,
}

#[derive(Debug, Clone)]
pub struct Session {
    running: bool,
    /// The render loop has decided to stop and is blanking the LEDs
    winding_down: bool,
    start_time: Option<Instant>,
    duration: Duration,
    fade_out: Duration,
    /// Volume as a continuous level in [0, 100] so the fade ramp never stalls
    level: f32,
    /// Level when the current fade began, restored once the session ends
    fade_anchor: Option<f32>,
    generation: u64,
}

impl Session {
    pub fn new(volume: u8) -> Self {
        Self {
            running: false,
            winding_down: false,
            start_time: None,
            duration: Duration::ZERO,
            fade_out: Duration::ZERO,
            level: volume.min(100) as f32,
            fade_anchor: None,
            generation: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Running and still accepting timer updates
    pub fn is_active(&self) -> bool {
        self.running && !self.winding_down
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn fade_out(&self) -> Duration {
        self.fade_out
    }

    /// `max(0, duration - elapsed)`, zero when not running
    pub fn remaining(&self, now: Instant) -> Duration {
        match (self.running, self.start_time) {
            (true, Some(start)) => self
                .duration
                .saturating_sub(now.saturating_duration_since(start)),
            _ => Duration::ZERO,
        }
    }

    pub fn phase(&self, now: Instant) -> Phase {
        if !self.running {
            return Phase::Idle;
        }
        let remaining = self.remaining(now);
        if !self.fade_out.is_zero() && remaining <= self.fade_out {
            Phase::FadingOut
        } else {
            Phase::Running
        }
    }

    pub fn volume(&self) -> u8 {
        self.level.round().clamp(0.0, 100.0) as u8
    }

    /// LED brightness in [0, 1], tied to the volume
    pub fn brightness(&self) -> f32 {
        (self.level / 100.0).clamp(0.0, 1.0)
    }

    /// Clamp into [0, 100] and apply
    pub fn set_volume(&mut self, level: i64) -> u8 {
        self.level = level.clamp(0, 100) as f32;
        self.volume()
    }

    /// Apply an encoder step
    pub fn adjust_volume(&mut self, delta: i32) -> u8 {
        self.set_volume(self.volume() as i64 + delta as i64)
    }

    pub fn status(&self, now: Instant) -> Status {
        let remaining = self.remaining(now);
        Status {
            running: self.running,
            remaining_seconds: remaining.as_secs_f64().round() as u64,
            volume: self.volume(),
        }
    }

    /// Start a new session, returns its generation
    pub(crate) fn begin(&mut self, now: Instant, duration: Duration, fade_out: Duration) -> u64 {
        self.generation += 1;
        self.running = true;
        self.winding_down = false;
        self.start_time = Some(now);
        self.duration = duration;
        self.fade_out = fade_out.min(duration);
        self.fade_anchor = None;
        self.generation
    }

    /// Restart the timer of a running session with new lengths
    ///
    /// The current level is kept, so a mid-fade update continues from the
    /// partly faded level. The pre-fade anchor is kept too, finishing still
    /// restores the level from before the first fade.
    pub(crate) fn update_timer(&mut self, now: Instant, duration: Duration, fade_out: Duration) {
        self.start_time = Some(now);
        self.duration = duration;
        self.fade_out = fade_out.min(duration);
    }

    /// One tick of the linear fade towards zero at the end of the session
    ///
    /// `remaining` is measured now, `dt` is the time since the previous tick.
    pub(crate) fn fade_step(&mut self, remaining: Duration, dt: Duration) {
        if self.fade_anchor.is_none() {
            self.fade_anchor = Some(self.level);
        }
        let before = remaining + dt;
        if before.is_zero() {
            self.level = 0.0;
            return;
        }
        let keep = remaining.as_secs_f64() / before.as_secs_f64();
        self.level = (self.level as f64 * keep) as f32;
    }

    pub(crate) fn wind_down(&mut self, generation: u64) {
        if generation == self.generation {
            self.winding_down = true;
        }
    }

    /// End the session if it is still `generation`
    pub(crate) fn finish(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.running {
            return false;
        }
        self.running = false;
        self.winding_down = false;
        self.start_time = None;
        if let Some(anchor) = self.fade_anchor.take() {
            self.level = anchor;
        }
        true
    }
}

/// Cloneable handle to the process-wide session
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<Session>>,
}

impl SharedSession {
    pub fn new(volume: u8) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Session::new(volume))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock()
    }

    pub fn status(&self) -> Status {
        self.lock().status(Instant::now())
    }

    pub fn set_volume(&self, level: i64) -> u8 {
        self.lock().set_volume(level)
    }

    pub fn adjust_volume(&self, delta: i32) -> u8 {
        self.lock().adjust_volume(delta)
    }
}
