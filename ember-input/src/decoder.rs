//! Debounce and direction decoding

use std::time::{Duration, Instant};

/// Transitions closer together than this are contact bounce
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2);

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Rotation direction of one detent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// +1 for clockwise, -1 otherwise
    pub fn sign(self) -> i32 {
        match self {
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        }
    }
}

/// A transition on the CLK pin with both levels sampled right after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub at: Instant,
    pub clk: Level,
    pub dt: Level,
}

impl EdgeEvent {
    pub fn new(at: Instant, clk: Level, dt: Level) -> Self {
        Self { at, clk, dt }
    }

    pub fn now(clk: Level, dt: Level) -> Self {
        Self::new(Instant::now(), clk, dt)
    }
}

/// Quadrature decoder for a mechanical rotary encoder
///
/// CLK differing from DT after a CLK edge means the shaft turned clockwise.
/// Otherwise a change of DT since the last accepted edge means
/// counter-clockwise. Edges within the debounce interval of the last
/// accepted one are dropped without touching the decoder state.
#[derive(Debug, Clone)]
pub struct RotaryDecoder {
    debounce: Duration,
    last_accepted: Option<Instant>,
    last_dt: Level,
}

impl Default for RotaryDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl RotaryDecoder {
    /// Pins idle high (pull-ups)
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_accepted: None,
            last_dt: Level::High,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn decode(&mut self, event: &EdgeEvent) -> Option<Direction> {
        if let Some(last) = self.last_accepted {
            if event.at.saturating_duration_since(last) < self.debounce {
                return None;
            }
        }
        self.last_accepted = Some(event.at);

        let direction = if event.clk != event.dt {
            Some(Direction::Clockwise)
        } else if event.dt != self.last_dt {
            Some(Direction::CounterClockwise)
        } else {
            None
        };

        self.last_dt = event.dt;
        direction
    }
}
