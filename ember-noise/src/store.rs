//! Precomputed noise strip assets
//!
//! Rendering fractal noise at animation rate is too slow for the target
//! hardware, so long strips are generated once and streamed at runtime.
//!
//! Layout: a directory of `noise_NNNN.strip` files, each holding
//! - 8-byte magic `EMBRNOIZ`
//! - rows and cols as little-endian `u32`
//! - `rows * cols` little-endian `f32` values in [0, 1], row-major

use crate::field::{NoiseField, NoiseStrip};
use crate::perlin::{Offset, PerlinNoise, Shape};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;
use tracing::{debug, info};

/// Magic bytes at the start of every strip file
pub const STRIP_MAGIC: &[u8; 8] = b"EMBRNOIZ";

const STRIP_EXTENSION: &str = "strip";
const HEADER_LEN: usize = 16;

/// Errors that can occur reading or writing noise assets
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Noise directory {0} does not exist")]
    MissingDir(PathBuf),
    #[error("No noise strips found in {0}")]
    Empty(PathBuf),
    #[error("Corrupt noise strip {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("Noise strip {index} has {rows} rows, fewer than the {window}-row window")]
    StripTooShort {
        index: usize,
        rows: usize,
        window: usize,
    },
    #[error("Invalid generation config: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> StoreError {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Parameters for offline strip generation
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Number of strip files to write
    pub strip_count: usize,
    /// Rows per strip (scroll axis)
    pub strip_length: usize,
    /// Columns per strip, the LED matrix width
    pub width: usize,
    /// Fractal octaves
    pub octaves: u32,
    /// Scroll-axis period, defaults to the strip length so each strip loops
    pub period: Option<usize>,
    /// Base seed, strip `i` uses `seed + i`
    pub seed: u64,
    /// Cross-axis cell size relative to the scroll axis
    pub aspect: f64,
    /// Maximum number of generator threads
    pub max_threads: usize,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            strip_count: 6,
            // About a minute of animation per strip at 32 fps
            strip_length: 1800,
            width: 8,
            octaves: 4,
            period: None,
            seed: 42,
            aspect: 0.5,
            max_threads: 4,
        }
    }
}

impl GenerateConfig {
    fn validate(&self) -> Result<(), StoreError> {
        if self.strip_count == 0 {
            return Err(StoreError::InvalidConfig("strip_count must be > 0".into()));
        }
        if self.strip_length == 0 || self.width == 0 {
            return Err(StoreError::InvalidConfig(
                "strip_length and width must be > 0".into(),
            ));
        }
        if self.strip_length > u32::MAX as usize || self.width > u32::MAX as usize {
            return Err(StoreError::InvalidConfig("strip dimensions too large".into()));
        }
        if let Some(period) = self.period {
            if period == 0 || period > u32::MAX as usize {
                return Err(StoreError::InvalidConfig("period out of range".into()));
            }
        }
        Ok(())
    }

    fn generator(&self, index: usize) -> PerlinNoise {
        let period = self.period.unwrap_or(self.strip_length) as u32;
        PerlinNoise::new(self.seed.wrapping_add(index as u64))
            .with_aspect(self.aspect)
            .with_repetition_period(period)
    }
}

/// Directory of numbered noise strips, read in order with wrap-around
#[derive(Debug)]
pub struct NoiseFileStore {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    expected_width: Option<usize>,
}

impl NoiseFileStore {
    /// Generate `strip_count` strips into `dir`, replacing existing ones
    ///
    /// Strips are rendered in parallel; each is written to a temporary file
    /// and renamed into place so a concurrent reader never sees half a strip.
    pub fn generate(dir: &Path, config: &GenerateConfig) -> Result<Vec<PathBuf>, StoreError> {
        config.validate()?;
        fs::create_dir_all(dir).map_err(StoreError::io(dir))?;

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        for index in 0..config.strip_count {
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        let thread_count = config.max_threads.min(config.strip_count).max(1);
        info!(
            dir = %dir.display(),
            strips = config.strip_count,
            length = config.strip_length,
            width = config.width,
            threads = thread_count,
            "Generating noise strips"
        );

        let results: Vec<Result<PathBuf, StoreError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..thread_count)
                .map(|_| {
                    let job_rx = job_rx.clone();
                    scope.spawn(move || {
                        job_rx
                            .iter()
                            .map(|index| generate_one(dir, config, index))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        });

        let mut paths = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        paths.sort();
        remove_stale_strips(dir, &paths)?;
        info!(count = paths.len(), "Noise generation complete");
        Ok(paths)
    }

    /// Open an asset directory, failing if it holds no strips
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::MissingDir(dir.to_path_buf()));
        }
        let files = list_strips(dir)?;
        if files.is_empty() {
            return Err(StoreError::Empty(dir.to_path_buf()));
        }
        debug!(dir = %dir.display(), strips = files.len(), "Opened noise store");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            cursor: 0,
            expected_width: None,
        })
    }

    /// Reject strips whose width differs from the LED matrix
    pub fn with_width(mut self, width: usize) -> Self {
        self.expected_width = Some(width);
        self
    }

    /// Path of strip `index` inside `dir`
    pub fn strip_path(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("noise_{index:04}.{STRIP_EXTENSION}"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load strip `index` (position in sorted order)
    pub fn load(&self, index: usize) -> Result<NoiseStrip, StoreError> {
        let path = self
            .files
            .get(index)
            .ok_or_else(|| StoreError::Empty(self.dir.clone()))?;
        let field = read_strip(path)?;

        if let Some(width) = self.expected_width {
            if field.cols() != width {
                return Err(StoreError::corrupt(
                    path,
                    format!("width {} does not match matrix width {width}", field.cols()),
                ));
            }
        }

        Ok(NoiseStrip::new(index, field))
    }

    /// Load the next strip in order, wrapping after the last one
    pub fn load_next(&mut self) -> Result<NoiseStrip, StoreError> {
        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.files.len();
        let strip = self.load(index)?;
        debug!(index, rows = strip.len(), "Loaded noise strip");
        Ok(strip)
    }
}

fn generate_one(dir: &Path, config: &GenerateConfig, index: usize) -> Result<PathBuf, StoreError> {
    let generator = config.generator(index);
    let field = generator.render(
        Shape::new(config.strip_length, config.width),
        config.octaves,
        Offset::default(),
    );
    let path = NoiseFileStore::strip_path(dir, index);
    write_strip(&path, &field)?;
    debug!(index, seed = generator.seed(), path = %path.display(), "Wrote noise strip");
    Ok(path)
}

fn list_strips(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = fs::read_dir(dir).map_err(StoreError::io(dir))?;

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == STRIP_EXTENSION)
        })
        .collect();

    // Zero-padded names sort numerically
    files.sort();
    Ok(files)
}

/// Delete strips left over from an earlier, larger or differently shaped run
fn remove_stale_strips(dir: &Path, keep: &[PathBuf]) -> Result<(), StoreError> {
    for path in list_strips(dir)? {
        if keep.contains(&path) {
            continue;
        }
        fs::remove_file(&path).map_err(StoreError::io(&path))?;
        debug!(path = %path.display(), "Removed stale noise strip");
    }
    Ok(())
}

/// Write a field atomically (temporary file + rename)
pub(crate) fn write_strip(path: &Path, field: &NoiseField) -> Result<(), StoreError> {
    let tmp = path.with_extension("strip.tmp");
    {
        let file = File::create(&tmp).map_err(StoreError::io(&tmp))?;
        let mut out = BufWriter::new(file);
        let write = |out: &mut BufWriter<File>| -> io::Result<()> {
            out.write_all(STRIP_MAGIC)?;
            out.write_all(&(field.rows() as u32).to_le_bytes())?;
            out.write_all(&(field.cols() as u32).to_le_bytes())?;
            for value in field.as_slice() {
                out.write_all(&value.to_le_bytes())?;
            }
            out.flush()
        };
        write(&mut out).map_err(StoreError::io(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(StoreError::io(path))
}

/// Read and validate one strip file
pub(crate) fn read_strip(path: &Path) -> Result<NoiseField, StoreError> {
    let bytes = fs::read(path).map_err(StoreError::io(path))?;

    if bytes.len() < HEADER_LEN {
        return Err(StoreError::corrupt(path, "file shorter than header"));
    }
    if &bytes[..8] != STRIP_MAGIC {
        return Err(StoreError::corrupt(path, "bad magic"));
    }

    let rows = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let cols = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .and_then(|n| n.checked_add(HEADER_LEN))
        .ok_or_else(|| StoreError::corrupt(path, "dimensions overflow"))?;

    if bytes.len() != expected {
        return Err(StoreError::corrupt(
            path,
            format!(
                "expected {expected} bytes for {rows}x{cols}, found {}",
                bytes.len()
            ),
        ));
    }

    let mut data = Vec::with_capacity(rows * cols);
    for (i, chunk) in bytes[HEADER_LEN..].chunks_exact(4).enumerate() {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !(0.0..=1.0).contains(&value) {
            return Err(StoreError::corrupt(
                path,
                format!("value {value} at index {i} outside [0, 1]"),
            ));
        }
        data.push(value);
    }

    Ok(NoiseField::from_parts(rows, cols, data))
}
