//! Edge sources

use crate::decoder::{EdgeEvent, Level};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from an encoder source
#[derive(Error, Debug)]
pub enum InputError {
    #[error("GPIO {pin} ({path}): {source}")]
    Gpio {
        pin: u32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("GPIO {pin} returned unexpected value {value:?}")]
    BadValue { pin: u32, value: String },
    #[error("Encoder source disconnected")]
    Disconnected,
    #[error("Encoder source failed: {0}")]
    Source(String),
}

/// Delivers CLK edges
pub trait EncoderSource: Send {
    /// Wait up to `timeout` for the next edge, `Ok(None)` on timeout
    fn next_event(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, InputError>;
}

/// Channel-fed source for tests and simulations
pub struct ChannelEncoder {
    rx: Receiver<Result<EdgeEvent, InputError>>,
}

/// Sending half of a `ChannelEncoder`
#[derive(Clone)]
pub struct EncoderFeed {
    tx: Sender<Result<EdgeEvent, InputError>>,
}

impl ChannelEncoder {
    pub fn pair() -> (EncoderFeed, ChannelEncoder) {
        let (tx, rx) = unbounded();
        (EncoderFeed { tx }, ChannelEncoder { rx })
    }
}

impl EncoderFeed {
    pub fn edge(&self, event: EdgeEvent) {
        let _ = self.tx.send(Ok(event));
    }

    /// One clockwise detent
    pub fn turn_clockwise(&self) {
        self.edge(EdgeEvent::now(Level::Low, Level::High));
    }

    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(Err(InputError::Source(message.into())));
    }
}

impl EncoderSource for ChannelEncoder {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, InputError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(InputError::Disconnected),
        }
    }
}

/// Encoder on Linux sysfs GPIO, sampled by polling
///
/// Pull-ups cannot be set through sysfs; the board (or a device-tree
/// overlay) has to provide them.
pub struct SysfsEncoder {
    root: PathBuf,
    clk_pin: u32,
    dt_pin: u32,
    clk: File,
    dt: File,
    last_clk: Level,
    poll_interval: Duration,
}

impl SysfsEncoder {
    pub fn open(clk_pin: u32, dt_pin: u32) -> Result<Self, InputError> {
        Self::open_at(Path::new("/sys/class/gpio"), clk_pin, dt_pin)
    }

    /// Open below a custom sysfs root
    pub fn open_at(root: &Path, clk_pin: u32, dt_pin: u32) -> Result<Self, InputError> {
        let clk = open_input(root, clk_pin)?;
        let dt = open_input(root, dt_pin)?;
        let last_clk = read_level(&clk, clk_pin, root)?;
        tracing::info!("Rotary encoder on GPIO {} (CLK) / {} (DT)", clk_pin, dt_pin);
        Ok(Self {
            root: root.to_path_buf(),
            clk_pin,
            dt_pin,
            clk,
            dt,
            last_clk,
            poll_interval: Duration::from_millis(1),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl EncoderSource for SysfsEncoder {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<EdgeEvent>, InputError> {
        let deadline = Instant::now() + timeout;
        loop {
            let clk = read_level(&self.clk, self.clk_pin, &self.root)?;
            if clk != self.last_clk {
                self.last_clk = clk;
                let dt = read_level(&self.dt, self.dt_pin, &self.root)?;
                return Ok(Some(EdgeEvent::now(clk, dt)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Export the pin if needed, configure it as input and open its value file
fn open_input(root: &Path, pin: u32) -> Result<File, InputError> {
    let gpio_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| InputError::Gpio { pin, path, source }
    };

    let pin_dir = root.join(format!("gpio{}", pin));
    if !pin_dir.exists() {
        let export = root.join("export");
        let mut file = OpenOptions::new()
            .write(true)
            .open(&export)
            .map_err(gpio_err(&export))?;
        file.write_all(pin.to_string().as_bytes())
            .map_err(gpio_err(&export))?;
    }

    let direction = pin_dir.join("direction");
    fs::write(&direction, "in").map_err(gpio_err(&direction))?;

    let value = pin_dir.join("value");
    File::open(&value).map_err(gpio_err(&value))
}

fn read_level(file: &File, pin: u32, root: &Path) -> Result<Level, InputError> {
    let mut buf = [0u8; 4];
    let n = file.read_at(&mut buf, 0).map_err(|source| InputError::Gpio {
        pin,
        path: root.join(format!("gpio{}/value", pin)),
        source,
    })?;
    match buf[..n].first() {
        Some(b'0') => Ok(Level::Low),
        Some(b'1') => Ok(Level::High),
        _ => Err(InputError::BadValue {
            pin,
            value: String::from_utf8_lossy(&buf[..n]).trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn fake_sysfs(clk: &str, dt: &str) -> TempDir {
        let root = tempdir().unwrap();
        fs::write(root.path().join("export"), "").unwrap();
        for (pin, value) in [(23, clk), (8, dt)] {
            let dir = root.path().join(format!("gpio{}", pin));
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("direction"), "out").unwrap();
            fs::write(dir.join("value"), value).unwrap();
        }
        root
    }

    #[test]
    fn test_channel_encoder() {
        let (feed, mut source) = ChannelEncoder::pair();
        assert!(source.next_event(Duration::from_millis(1)).unwrap().is_none());

        feed.turn_clockwise();
        let event = source.next_event(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!((event.clk, event.dt), (Level::Low, Level::High));

        feed.fail("glitch");
        assert!(matches!(
            source.next_event(Duration::from_millis(100)),
            Err(InputError::Source(_))
        ));

        drop(feed);
        assert!(matches!(
            source.next_event(Duration::from_millis(1)),
            Err(InputError::Disconnected)
        ));
    }

    #[test]
    fn test_sysfs_configures_inputs() {
        let root = fake_sysfs("1\n", "1\n");
        SysfsEncoder::open_at(root.path(), 23, 8).unwrap();
        let direction = fs::read_to_string(root.path().join("gpio23/direction")).unwrap();
        assert_eq!(direction, "in");
    }

    #[test]
    fn test_sysfs_reports_clk_edges() {
        let root = fake_sysfs("1\n", "1\n");
        let mut encoder = SysfsEncoder::open_at(root.path(), 23, 8).unwrap();

        assert!(encoder.next_event(Duration::from_millis(5)).unwrap().is_none());

        fs::write(root.path().join("gpio8/value"), "1\n").unwrap();
        fs::write(root.path().join("gpio23/value"), "0\n").unwrap();
        let event = encoder.next_event(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!((event.clk, event.dt), (Level::Low, Level::High));

        // Level unchanged, no new edge
        assert!(encoder.next_event(Duration::from_millis(5)).unwrap().is_none());
    }

    #[test]
    fn test_sysfs_missing_pin() {
        let root = tempdir().unwrap();
        let err = SysfsEncoder::open_at(root.path(), 23, 8).err().unwrap();
        assert!(matches!(err, InputError::Gpio { pin: 23, .. }));
    }

    #[test]
    fn test_sysfs_bad_value() {
        let root = fake_sysfs("x\n", "1\n");
        let err = SysfsEncoder::open_at(root.path(), 23, 8).err().unwrap();
        assert!(matches!(err, InputError::BadValue { pin: 23, .. }));
    }
}
