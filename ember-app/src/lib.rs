//! Ember runtime
//!
//! Ties the noise stream, the frame compositor, audio playback and the
//! rotary encoder together under one shared session, and exposes it over a
//! small HTTP API.

pub mod config;
pub mod control;
pub mod http;
pub mod render_loop;
pub mod runtime;
pub mod session;

pub use config::{Config, ConfigError};
pub use control::{
    ControlError, ControlSurface, RenderSettings, SessionDefaults, SinkFactory, StartOutcome,
};
pub use http::{route, ApiServer};
pub use render_loop::{RenderLoopHandle, RenderParts};
pub use runtime::{Runtime, RuntimeError};
pub use session::{Phase, Session, SharedSession, Status};
