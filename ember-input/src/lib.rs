//! Rotary encoder input for Ember
//!
//! Edge events from an `EncoderSource` are debounced and decoded into
//! clockwise / counter-clockwise steps by `RotaryDecoder`; `InputListener`
//! runs that loop on a background thread and reports each step.

mod decoder;
mod listener;
mod source;

pub use decoder::{Direction, EdgeEvent, Level, RotaryDecoder, DEFAULT_DEBOUNCE};
pub use listener::InputListener;
pub use source::{ChannelEncoder, EncoderFeed, EncoderSource, InputError, SysfsEncoder};
