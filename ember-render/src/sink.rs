//! LED output
//!
//! `SpidevSink` drives a WS2812 chain from an SPI MOSI line. Each data bit
//! becomes three SPI bits (`1` -> `110`, `0` -> `100`), so the bus must be
//! clocked at three times the WS2812 bit rate (2.4 MHz for 800 kHz parts).
//! The chain starts at the bottom-left pixel and runs row by row upwards.

use crate::frame::{Frame, Rgb};
use parking_lot::Mutex;
use spidev::{SpiModeFlags, Spidev, SpidevOptions};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Bus clock for 800 kHz WS2812 parts with 3-bit expansion
pub const SPI_SPEED_HZ: u32 = 2_400_000;

/// Zero bytes after a frame, holds the line low long enough to latch (>50 us)
const LATCH_BYTES: usize = 48;

/// Errors from an LED sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open LED device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to configure SPI on {path}: {source}")]
    Configure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("LED write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame is {found_width}x{found_height}, sink expects {width}x{height}")]
    FrameSize {
        width: usize,
        height: usize,
        found_width: usize,
        found_height: usize,
    },
    #[error("LED sink unavailable: {0}")]
    Unavailable(String),
}

/// Anything that can display a frame
pub trait LedSink: Send {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError>;
}

impl<S: LedSink + ?Sized> LedSink for Box<S> {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError> {
        (**self).push(frame)
    }
}

/// Byte order expected by the LED chips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorOrder {
    Rgb,
    #[default]
    Grb,
}

impl ColorOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rgb" => Some(ColorOrder::Rgb),
            "grb" => Some(ColorOrder::Grb),
            _ => None,
        }
    }

    fn bytes(self, color: Rgb) -> [u8; 3] {
        match self {
            ColorOrder::Rgb => [color.r, color.g, color.b],
            ColorOrder::Grb => [color.g, color.r, color.b],
        }
    }
}

/// WS2812 chain behind a spidev node
pub struct SpidevSink {
    writer: Box<dyn Write + Send>,
    width: usize,
    height: usize,
    order: ColorOrder,
    max_brightness: f32,
    buffer: Vec<u8>,
}

impl SpidevSink {
    /// Open a spidev device such as `/dev/spidev0.0`
    ///
    /// The bus is set to mode 0, 8-bit words and `SPI_SPEED_HZ`; a node
    /// that refuses that configuration is an error.
    pub fn open(
        path: &Path,
        width: usize,
        height: usize,
        order: ColorOrder,
        max_brightness: f32,
    ) -> Result<Self, SinkError> {
        let mut device = Spidev::open(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_SPEED_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device
            .configure(&options)
            .map_err(|source| SinkError::Configure {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(
            "LED sink on {} ({}x{}, {:?}, cap {:.2})",
            path.display(),
            width,
            height,
            order,
            max_brightness
        );
        Ok(Self::with_writer(
            Box::new(device),
            width,
            height,
            order,
            max_brightness,
        ))
    }

    /// Sink writing the encoded stream to any writer
    pub fn with_writer(
        writer: Box<dyn Write + Send>,
        width: usize,
        height: usize,
        order: ColorOrder,
        max_brightness: f32,
    ) -> Self {
        let max_brightness = if max_brightness.is_nan() {
            0.0
        } else {
            max_brightness.clamp(0.0, 1.0)
        };
        Self {
            writer,
            width,
            height,
            order,
            max_brightness,
            buffer: Vec::with_capacity(width * height * 9 + LATCH_BYTES),
        }
    }

    pub fn max_brightness(&self) -> f32 {
        self.max_brightness
    }

    /// Encode a frame into the SPI bit stream, latch bytes included
    fn encode(&mut self, frame: &Frame) {
        self.buffer.clear();
        let cap = self.max_brightness;
        for row in (0..frame.height()).rev() {
            for &pixel in frame.row(row) {
                for byte in self.order.bytes(pixel) {
                    let scaled = (byte as f32 * cap).round() as u8;
                    self.buffer.extend_from_slice(&expand_byte(scaled));
                }
            }
        }
        self.buffer.resize(self.buffer.len() + LATCH_BYTES, 0);
    }
}

impl LedSink for SpidevSink {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SinkError::FrameSize {
                width: self.width,
                height: self.height,
                found_width: frame.width(),
                found_height: frame.height(),
            });
        }
        self.encode(frame);
        self.writer.write_all(&self.buffer)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// One color byte as 24 SPI bits, most significant first
fn expand_byte(byte: u8) -> [u8; 3] {
    let mut bits: u32 = 0;
    for i in (0..8).rev() {
        let pattern = if byte & (1 << i) != 0 { 0b110 } else { 0b100 };
        bits = (bits << 3) | pattern;
    }
    [(bits >> 16) as u8, (bits >> 8) as u8, bits as u8]
}

#[derive(Debug, Default)]
struct MemoryState {
    frames: VecDeque<Frame>,
    history: usize,
    pushes: usize,
    failing: bool,
}

/// In-memory sink for tests and headless runs
///
/// Clones share the same frame history.
#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    /// Keeps only the most recent frame
    pub fn new() -> Self {
        Self::with_history(1)
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                history: history.max(1),
                ..MemoryState::default()
            })),
        }
    }

    /// Make subsequent pushes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.state.lock().frames.back().cloned()
    }

    /// Retained frames, oldest first
    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().frames.iter().cloned().collect()
    }

    /// Successful pushes since creation
    pub fn push_count(&self) -> usize {
        self.state.lock().pushes
    }
}

impl LedSink for MemorySink {
    fn push(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(SinkError::Unavailable("memory sink set to fail".into()));
        }
        if state.frames.len() == state.history {
            state.frames.pop_front();
        }
        state.frames.push_back(frame.clone());
        state.pushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame_with(width: usize, height: usize, at: (usize, usize), color: Rgb) -> Frame {
        let mut pixels = vec![Rgb::BLACK; width * height];
        pixels[at.0 * width + at.1] = color;
        Frame::from_pixels(width, height, pixels)
    }

    #[test]
    fn test_expand_byte() {
        assert_eq!(expand_byte(0x00), [0b1001_0010, 0b0100_1001, 0b0010_0100]);
        assert_eq!(expand_byte(0xff), [0b1101_1011, 0b0110_1101, 0b1011_0110]);
        // 0x80: first bit high, rest low
        assert_eq!(expand_byte(0x80), [0b1101_0010, 0b0100_1001, 0b0010_0100]);
    }

    #[test]
    fn test_color_order_parse() {
        assert_eq!(ColorOrder::parse("GRB"), Some(ColorOrder::Grb));
        assert_eq!(ColorOrder::parse(" rgb "), Some(ColorOrder::Rgb));
        assert_eq!(ColorOrder::parse("bgr"), None);
        assert_eq!(ColorOrder::Grb.bytes(Rgb::new(1, 2, 3)), [2, 1, 3]);
    }

    #[test]
    fn test_spidev_stream_bottom_row_first() {
        let buf = SharedBuf::default();
        let mut sink = SpidevSink::with_writer(Box::new(buf.clone()), 2, 2, ColorOrder::Rgb, 1.0);

        // Bottom-left pixel is the first LED in the chain
        let frame = frame_with(2, 2, (1, 0), Rgb::new(0xff, 0, 0));
        sink.push(&frame).unwrap();

        let out = buf.0.lock().clone();
        assert_eq!(out.len(), 4 * 9 + LATCH_BYTES);
        assert_eq!(&out[0..3], &expand_byte(0xff));
        assert_eq!(&out[3..6], &expand_byte(0));
        assert!(out[36..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_spidev_brightness_cap() {
        let buf = SharedBuf::default();
        let mut sink = SpidevSink::with_writer(Box::new(buf.clone()), 1, 1, ColorOrder::Grb, 0.5);
        sink.push(&frame_with(1, 1, (0, 0), Rgb::new(200, 100, 0))).unwrap();

        let out = buf.0.lock().clone();
        assert_eq!(&out[0..3], &expand_byte(50));
        assert_eq!(&out[3..6], &expand_byte(100));
        assert_eq!(&out[6..9], &expand_byte(0));
    }

    #[test]
    fn test_spidev_rejects_wrong_size() {
        let mut sink =
            SpidevSink::with_writer(Box::new(SharedBuf::default()), 8, 8, ColorOrder::Grb, 0.5);
        let err = sink.push(&Frame::black(4, 4)).unwrap_err();
        assert!(matches!(err, SinkError::FrameSize { found_width: 4, .. }));
    }

    #[test]
    fn test_spidev_open_missing_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("spidev0.0");
        let err = SpidevSink::open(&path, 8, 8, ColorOrder::Grb, 0.5).err().unwrap();
        assert!(matches!(err, SinkError::Open { .. }));
    }

    #[test]
    fn test_spidev_open_rejects_non_spi_node() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = SpidevSink::open(file.path(), 8, 8, ColorOrder::Grb, 0.5).err().unwrap();
        assert!(matches!(err, SinkError::Configure { .. }));
    }

    #[test]
    fn test_memory_sink_history() {
        let sink = MemorySink::with_history(2);
        let mut writer = sink.clone();
        for value in 1..=3u8 {
            writer.push(&frame_with(1, 1, (0, 0), Rgb::new(value, 0, 0))).unwrap();
        }
        assert_eq!(sink.push_count(), 3);
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].get(0, 0), Some(Rgb::new(2, 0, 0)));
        assert_eq!(sink.last_frame().and_then(|f| f.get(0, 0)), Some(Rgb::new(3, 0, 0)));
    }

    #[test]
    fn test_memory_sink_failure() {
        let mut sink = MemorySink::new();
        sink.set_failing(true);
        assert!(sink.push(&Frame::black(1, 1)).is_err());
        assert_eq!(sink.push_count(), 0);
        sink.set_failing(false);
        sink.push(&Frame::black(1, 1)).unwrap();
        assert_eq!(sink.push_count(), 1);
    }
}
