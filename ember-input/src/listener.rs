//! Background encoder listener

use crate::decoder::RotaryDecoder;
use crate::source::{EncoderSource, InputError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on how long shutdown waits for the poll loop
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Pause after a source error before polling again
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Runs an encoder source on its own thread
///
/// Every accepted detent calls `on_step` with `+step` (clockwise) or
/// `-step`. Source errors are logged and the poll retried.
pub struct InputListener {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputListener {
    pub fn spawn<S, F>(
        mut source: S,
        mut decoder: RotaryDecoder,
        step: i32,
        mut on_step: F,
    ) -> Result<Self, InputError>
    where
        S: EncoderSource + 'static,
        F: FnMut(i32) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("encoder".into())
            .spawn(move || {
                let mut failing = false;
                while !stop.load(Ordering::Relaxed) {
                    match source.next_event(POLL_TIMEOUT) {
                        Ok(Some(event)) => {
                            failing = false;
                            if let Some(direction) = decoder.decode(&event) {
                                debug!(?direction, "Encoder step");
                                on_step(direction.sign() * step);
                            }
                        }
                        Ok(None) => failing = false,
                        Err(e) => {
                            // Only the first of a run of identical failures is worth a warning
                            if failing {
                                debug!("Encoder source still failing: {}", e);
                            } else {
                                warn!("Encoder source error: {}", e);
                                failing = true;
                            }
                            thread::sleep(RETRY_DELAY);
                        }
                    }
                }
                debug!("Encoder listener exiting");
            })
            .map_err(|e| InputError::Source(format!("failed to spawn listener: {}", e)))?;

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for InputListener {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
