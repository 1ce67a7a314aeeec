//! Frame compositing for Ember
//!
//! Turns a window of noise into a colored LED frame and hands it to a sink:
//! - Mask: per-row cooling gradient, dim at the flame tip
//! - Palette: piecewise-linear color map with gamma correction
//! - Compositor: mask, palette and brightness in one pass
//! - Sink: LED output (WS2812 over SPI, or in-memory for tests and headless runs)

mod compositor;
mod frame;
mod mask;
mod palette;
mod sink;

pub use compositor::{ComposeError, FrameCompositor};
pub use frame::{Frame, Rgb};
pub use mask::GradientMask;
pub use palette::{Palette, PaletteError, DEFAULT_GAMMA, FIRE_PALETTE};
pub use sink::{ColorOrder, LedSink, MemorySink, SinkError, SpidevSink};
