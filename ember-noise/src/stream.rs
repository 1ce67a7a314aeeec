//! Double-buffered strip streaming
//!
//! The consumer slides a fixed-height window one row per frame over the
//! rows of the current strip followed by the rows of its successor, so
//! consecutive windows always differ by exactly one row. Once the window
//! passes the prefetch threshold a background thread loads the next strip.
//! The successor is chosen when the first window reaches past the end of
//! the current strip: the prefetched strip if it has arrived, otherwise the
//! current strip again. Strips are periodic along the scroll axis, so the
//! current strip followed by itself is seamless. File I/O never happens on
//! the caller's thread after construction.

use crate::field::NoiseStrip;
use crate::store::{NoiseFileStore, StoreError};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// What follows the current strip once the window runs past its end
enum Successor {
    /// The current strip again
    Wrap,
    Next(NoiseStrip),
}

/// Sliding window over a sequence of noise strips
pub struct StripStreamer {
    current: NoiseStrip,
    /// Chosen when the window first straddles the end of `current`
    successor: Option<Successor>,
    /// First row of the next window
    position: usize,
    window_rows: usize,
    prefetch_threshold: f32,
    /// Row at which the next strip is requested
    prefetch_at: usize,
    /// A request is outstanding or a loaded strip is waiting in the channel
    pending: bool,
    request_tx: Option<Sender<()>>,
    strip_rx: Receiver<Result<NoiseStrip, StoreError>>,
    loader: Option<JoinHandle<()>>,
    /// Windows that straddle two strips are assembled here
    scratch: Vec<f32>,
    swaps: u64,
    wraps: u64,
}

impl StripStreamer {
    /// Load the first strip synchronously and start the prefetch thread
    ///
    /// Fails if the first strip cannot be read or is shorter than the window.
    pub fn new(
        mut store: NoiseFileStore,
        window_rows: usize,
        prefetch_threshold: f32,
    ) -> Result<Self, StoreError> {
        let current = store.load_next()?;
        if current.len() < window_rows {
            return Err(StoreError::StripTooShort {
                index: current.index(),
                rows: current.len(),
                window: window_rows,
            });
        }

        let dir = store.dir().to_path_buf();
        let (request_tx, request_rx) = bounded::<()>(1);
        let (strip_tx, strip_rx) = bounded(1);

        let loader = thread::Builder::new()
            .name("noise-prefetch".into())
            .spawn(move || {
                for () in request_rx.iter() {
                    let result = store.load_next();
                    if strip_tx.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|source| StoreError::Io { path: dir, source })?;

        let prefetch_threshold = if prefetch_threshold.is_finite() {
            prefetch_threshold.clamp(0.0, 1.0)
        } else {
            0.5
        };

        let scratch = Vec::with_capacity(window_rows * current.width());
        let mut streamer = Self {
            current,
            successor: None,
            position: 0,
            window_rows,
            prefetch_threshold,
            prefetch_at: 0,
            pending: false,
            request_tx: Some(request_tx),
            strip_rx,
            loader: Some(loader),
            scratch,
            swaps: 0,
            wraps: 0,
        };
        streamer.prefetch_at = streamer.compute_prefetch_at();
        Ok(streamer)
    }

    /// Return the next window (`window_rows * width` values) and advance one row
    pub fn next_window(&mut self) -> &[f32] {
        if self.position >= self.current.len() {
            self.rollover();
        }
        if !self.pending && self.successor.is_none() && self.position >= self.prefetch_at {
            self.request_next();
        }

        let start = self.position;
        self.position += 1;

        let width = self.current.width();
        let len = self.current.len();
        if start + self.window_rows <= len {
            let values = self.current.field().as_slice();
            return &values[start * width..(start + self.window_rows) * width];
        }

        if self.successor.is_none() {
            self.successor = Some(self.choose_successor());
        }
        let values = self.current.field().as_slice();
        let head = match &self.successor {
            Some(Successor::Next(strip)) => strip.field().as_slice(),
            _ => values,
        };
        let spill = start + self.window_rows - len;
        self.scratch.clear();
        self.scratch.extend_from_slice(&values[start * width..]);
        self.scratch.extend_from_slice(&head[..spill * width]);
        &self.scratch
    }

    pub fn window_rows(&self) -> usize {
        self.window_rows
    }

    pub fn width(&self) -> usize {
        self.current.width()
    }

    /// Asset index of the strip currently being consumed
    pub fn current_index(&self) -> usize {
        self.current.index()
    }

    /// First row of the next window within the current strip
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_prefetch_pending(&self) -> bool {
        self.pending
    }

    /// Number of times a prefetched strip replaced the current one
    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    /// Number of times the current strip was wrapped for lack of a successor
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    fn compute_prefetch_at(&self) -> usize {
        let last_start = self.current.len() - self.window_rows;
        (last_start as f32 * self.prefetch_threshold) as usize
    }

    fn request_next(&mut self) {
        let Some(tx) = &self.request_tx else {
            return;
        };
        match tx.try_send(()) {
            Ok(()) => {
                self.pending = true;
                debug!(position = self.position, "Requested next noise strip");
            }
            Err(e) => warn!(error = %e, "Could not request next noise strip"),
        }
    }

    /// Take the prefetched strip if it is usable, otherwise wrap
    fn choose_successor(&mut self) -> Successor {
        match self.strip_rx.try_recv() {
            Ok(Ok(strip))
                if strip.len() >= self.window_rows && strip.width() == self.current.width() =>
            {
                self.pending = false;
                Successor::Next(strip)
            }
            Ok(Ok(strip)) => {
                warn!(
                    index = strip.index(),
                    rows = strip.len(),
                    width = strip.width(),
                    window = self.window_rows,
                    "Prefetched strip does not fit the window, reusing current strip"
                );
                self.pending = false;
                Successor::Wrap
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Noise prefetch failed, reusing current strip");
                self.pending = false;
                Successor::Wrap
            }
            Err(TryRecvError::Empty) => {
                if self.pending {
                    warn!(
                        index = self.current.index(),
                        "Next noise strip not ready, wrapping current strip"
                    );
                }
                Successor::Wrap
            }
            Err(TryRecvError::Disconnected) => {
                warn!("Noise prefetch thread gone, wrapping current strip");
                self.request_tx = None;
                self.pending = true;
                Successor::Wrap
            }
        }
    }

    /// Continue from row 0 of the successor
    fn rollover(&mut self) {
        let successor = match self.successor.take() {
            Some(successor) => successor,
            None => self.choose_successor(),
        };
        match successor {
            Successor::Next(strip) => {
                debug!(from = self.current.index(), to = strip.index(), "Swapping noise strips");
                self.current = strip;
                self.swaps += 1;
            }
            Successor::Wrap => self.wraps += 1,
        }

        self.position = 0;
        self.prefetch_at = self.compute_prefetch_at();
    }
}

impl Drop for StripStreamer {
    fn drop(&mut self) {
        // Closing the request channel ends the loader loop
        self.request_tx = None;
        if let Some(loader) = self.loader.take() {
            let _ = loader.join();
        }
    }
}
