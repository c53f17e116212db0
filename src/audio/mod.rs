//! Quantum-locked looping core.
//!
//! A tree of clip and container nodes processed from a realtime block
//! callback: the first committed recording in a container establishes the
//! quantum, and every later take is anticipated, snapped or rotated so it
//! loops in phase with it. Everything the audio thread reads or writes is
//! lock-free; commands and metadata polls run on the control thread.

pub mod box_node;
pub mod buffer;
pub mod clip;
pub mod device;
pub mod engine;
pub mod node;

pub use box_node::BoxNode;
pub use clip::ClipNode;
pub use engine::TransportEngine;
pub use node::{Node, NodeCore, NodeKind, ProcessContext};
