//! Audio thread
//!
//! The controller lives on its own thread; callers talk to it through an
//! `AudioHandle`. Starting waits for the outcome, volume changes are
//! fire-and-forget, stopping waits for an acknowledgement with a timeout.

use crate::controller::AudioController;
use crate::player::AudioError;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest wait for the audio thread to confirm a stop
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Commands sent to the audio thread
#[derive(Debug)]
pub enum AudioCommand {
    Start {
        volume: u8,
        reply: Sender<Result<(), AudioError>>,
    },
    SetVolume(u8),
    Stop {
        ack: Sender<()>,
    },
    IsPlaying {
        reply: Sender<bool>,
    },
    Shutdown,
}

/// Cloneable handle to the audio thread
#[derive(Debug, Clone)]
pub struct AudioHandle {
    command_tx: Sender<AudioCommand>,
}

impl AudioHandle {
    /// Handle over an existing command queue
    pub fn new(command_tx: Sender<AudioCommand>) -> Self {
        Self { command_tx }
    }

    pub fn start(&self, volume: u8) -> Result<(), AudioError> {
        let (reply, reply_rx) = bounded(1);
        self.command_tx
            .send(AudioCommand::Start { volume, reply })
            .map_err(|_| AudioError::ServiceGone)?;
        reply_rx.recv().map_err(|_| AudioError::ServiceGone)?
    }

    /// Queue a volume change without blocking
    ///
    /// Returns false when the queue is full or the thread is gone; the
    /// change was dropped and the caller should send it again later.
    pub fn set_volume(&self, volume: u8) -> bool {
        match self.command_tx.try_send(AudioCommand::SetVolume(volume)) {
            Ok(()) => true,
            Err(e) => {
                debug!(volume, error = %e, "Volume change not queued");
                false
            }
        }
    }

    /// Stop playback and wait (bounded) for the player to go away
    pub fn stop(&self) {
        let (ack, ack_rx) = bounded(1);
        if self.command_tx.send(AudioCommand::Stop { ack }).is_err() {
            return;
        }
        if ack_rx.recv_timeout(STOP_TIMEOUT).is_err() {
            warn!("Audio stop not confirmed within {:?}", STOP_TIMEOUT);
        }
    }

    pub fn is_playing(&self) -> bool {
        let (reply, reply_rx) = bounded(1);
        if self.command_tx.send(AudioCommand::IsPlaying { reply }).is_err() {
            return false;
        }
        reply_rx.recv().unwrap_or(false)
    }
}

/// Owns the audio thread, shuts it down on drop
pub struct AudioService {
    handle: AudioHandle,
    thread: Option<JoinHandle<()>>,
}

impl AudioService {
    pub fn spawn(controller: AudioController) -> Result<Self, AudioError> {
        // Volume bursts from the encoder can queue up
        let (command_tx, command_rx) = bounded(64);
        let thread = thread::Builder::new()
            .name("audio".into())
            .spawn(move || run_audio_thread(controller, command_rx))
            .map_err(AudioError::Launch)?;
        Ok(Self {
            handle: AudioHandle::new(command_tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> AudioHandle {
        self.handle.clone()
    }

    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.command_tx.send(AudioCommand::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for AudioService {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn run_audio_thread(mut controller: AudioController, command_rx: Receiver<AudioCommand>) {
    for command in command_rx.iter() {
        match command {
            AudioCommand::Start { volume, reply } => {
                let _ = reply.send(controller.start(volume));
            }
            AudioCommand::SetVolume(volume) => controller.set_volume(volume),
            AudioCommand::Stop { ack } => {
                controller.stop();
                let _ = ack.send(());
            }
            AudioCommand::IsPlaying { reply } => {
                let _ = reply.send(controller.is_playing());
            }
            AudioCommand::Shutdown => break,
        }
    }
    controller.stop();
    debug!("Audio thread exiting");
}
