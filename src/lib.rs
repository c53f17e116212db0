//! loopbox: a quantum-locked live looping engine.
//!
//! Records short passages from a hardware input and plays them back in
//! rhythmic synchrony with previously recorded material, even when the
//! performer's start/stop gestures land off the beat. See `audio` for the
//! node tree and transport, `commands` for the control surface a view layer
//! invokes, and `value` for the dynamic value type both speak.

pub mod audio;
pub mod commands;
pub mod value;

pub use audio::{Node, NodeKind, ProcessContext, TransportEngine};
pub use value::Value;
