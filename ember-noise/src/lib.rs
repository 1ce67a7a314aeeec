//! Noise engine for Ember
//!
//! Everything the flame animation needs from procedural noise:
//! - Perlin: deterministic, tileable fractal gradient noise
//! - Store: precomputed noise strips persisted as numbered asset files
//! - Stream: double-buffered sliding window over the strip assets

mod field;
mod perlin;
mod store;
mod stream;

pub use field::{NoiseField, NoiseStrip};
pub use perlin::{quintic, Offset, PerlinNoise, Shape};
pub use store::{GenerateConfig, NoiseFileStore, StoreError, STRIP_MAGIC};
pub use stream::StripStreamer;
