//! Node tree core: the processing context, the shared per-node state, and the
//! `Node` variant that ties clips and containers together.
//!
//! Every transport-visible field is an atomic so the control thread can poll
//! metadata while the audio thread is mid-block. Floating-point fields cross
//! threads as bit patterns (`f32`/`f64` in `AtomicU32`/`AtomicU64`). Children
//! are published as immutable snapshots through `arc-swap`; parent links are
//! weak cells so quantum lookup walks the tree without locking.

use arc_swap::ArcSwapAny;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::box_node::BoxNode;
use super::buffer::u32_to_f32;
use super::clip::ClipNode;
use crate::value::Value;

/// Per-block transport snapshot handed down the tree.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    pub sample_rate: f64,
    pub num_samples: usize,
    pub is_playing: bool,
    pub is_recording: bool,
    /// Global transport position in samples.
    pub master_pos: i64,
    /// Latency compensation, in samples.
    pub input_latency: i64,
    pub output_latency: i64,
    /// Non-empty while a solo target is active.
    pub solo_uuid: Option<&'a str>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(sample_rate: f64, num_samples: usize) -> Self {
        Self {
            sample_rate,
            num_samples,
            is_playing: false,
            is_recording: false,
            master_pos: 0,
            input_latency: 0,
            output_latency: 0,
            solo_uuid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Clip,
    Box,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Clip => "clip",
            NodeKind::Box => "box",
        }
    }
}

type ParentCell = ArcSwapAny<Weak<Node>>;

/// Identity, geometry and transport state shared by every node.
pub struct NodeCore {
    uuid: String,
    name: RwLock<String>,
    parent: ParentCell,

    // Spatial arrangement in the parent plane (f64 bit patterns).
    x_pos: AtomicU64,
    y_pos: AtomicU64,
    width: AtomicU64,
    height: AtomicU64,

    // Transport state.
    playhead_pos: AtomicU64,
    pub(crate) duration_samples: AtomicI64,
    pub(crate) live_duration_samples: AtomicI64,
    pub(crate) loop_start_samples: AtomicI64,
    pub(crate) loop_end_samples: AtomicI64,
    pub(crate) is_node_recording: AtomicBool,
    pub(crate) is_muted: AtomicBool,
    pub(crate) last_block_peak: AtomicU32,

    // Phase-aligned recording state.
    pub(crate) anchor_phase_samples: AtomicI64,
    pub(crate) launch_point_samples: AtomicI64,
}

impl NodeCore {
    pub fn new(name: &str) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: RwLock::new(name.to_string()),
            parent: ParentCell::new(Weak::new()),
            x_pos: AtomicU64::new(0f64.to_bits()),
            y_pos: AtomicU64::new(0f64.to_bits()),
            width: AtomicU64::new(200f64.to_bits()),
            height: AtomicU64::new(100f64.to_bits()),
            playhead_pos: AtomicU64::new(0f64.to_bits()),
            duration_samples: AtomicI64::new(0),
            live_duration_samples: AtomicI64::new(0),
            loop_start_samples: AtomicI64::new(0),
            loop_end_samples: AtomicI64::new(0),
            is_node_recording: AtomicBool::new(false),
            is_muted: AtomicBool::new(false),
            last_block_peak: AtomicU32::new(0f32.to_bits()),
            anchor_phase_samples: AtomicI64::new(0),
            launch_point_samples: AtomicI64::new(0),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn parent_node(&self) -> Option<Arc<Node>> {
        self.parent.load().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<Node>) {
        self.parent.store(parent);
    }

    pub fn x(&self) -> f64 {
        f64::from_bits(self.x_pos.load(Ordering::Relaxed))
    }

    pub fn set_x(&self, x: f64) {
        self.x_pos.store(x.to_bits(), Ordering::Relaxed);
    }

    pub fn y(&self) -> f64 {
        f64::from_bits(self.y_pos.load(Ordering::Relaxed))
    }

    pub fn set_y(&self, y: f64) {
        self.y_pos.store(y.to_bits(), Ordering::Relaxed);
    }

    pub fn width(&self) -> f64 {
        f64::from_bits(self.width.load(Ordering::Relaxed))
    }

    pub fn height(&self) -> f64 {
        f64::from_bits(self.height.load(Ordering::Relaxed))
    }

    pub fn playhead(&self) -> f64 {
        f64::from_bits(self.playhead_pos.load(Ordering::Relaxed))
    }

    pub(crate) fn set_playhead(&self, pos: f64) {
        self.playhead_pos.store(pos.to_bits(), Ordering::Relaxed);
    }

    pub fn duration(&self) -> i64 {
        self.duration_samples.load(Ordering::Relaxed)
    }

    pub fn live_duration(&self) -> i64 {
        self.live_duration_samples.load(Ordering::Relaxed)
    }

    pub fn loop_start(&self) -> i64 {
        self.loop_start_samples.load(Ordering::Relaxed)
    }

    pub fn loop_end(&self) -> i64 {
        self.loop_end_samples.load(Ordering::Relaxed)
    }

    pub fn set_loop_points(&self, start: i64, end: i64) {
        self.loop_start_samples.store(start, Ordering::Relaxed);
        self.loop_end_samples.store(end, Ordering::Relaxed);
    }

    /// True from a start request through commit.
    pub fn is_recording(&self) -> bool {
        self.is_node_recording.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.is_muted.store(muted, Ordering::Relaxed);
    }

    pub fn current_peak(&self) -> f32 {
        u32_to_f32(self.last_block_peak.load(Ordering::Relaxed))
    }

    pub fn anchor_phase(&self) -> i64 {
        self.anchor_phase_samples.load(Ordering::Relaxed)
    }

    pub fn launch_point(&self) -> i64 {
        self.launch_point_samples.load(Ordering::Relaxed)
    }

    /// The standard metadata fields every node reports.
    fn base_metadata(&self) -> Value {
        let mut m = Value::map();
        m.set("id", self.uuid.as_str());
        m.set("name", self.name());
        m.set("x", self.x());
        m.set("y", self.y());
        m.set("w", self.width());
        m.set("h", self.height());
        m.set("currentPeak", self.current_peak() as f64);
        if self.is_recording() {
            m.set("duration", self.live_duration());
        } else {
            m.set("duration", self.duration());
        }
        m.set("loopStart", self.loop_start());
        m.set("loopEnd", self.loop_end());
        m.set("playhead", self.playhead());
        m.set("isRecording", self.is_recording());
        m.set("isMuted", self.is_muted());
        m.set("anchorPhase", self.anchor_phase());
        m.set("launchPoint", self.launch_point());
        m
    }
}

/// A node in the looping tree: either a recorded clip or a container that
/// sums its children. The variant replaces dynamic dispatch — `process`,
/// `waveform`, `metadata` and the quantum walk are the only polymorphic
/// entry points.
pub enum Node {
    Clip(ClipNode),
    Box(BoxNode),
}

impl Node {
    pub fn new_clip(name: &str, sample_rate: f64) -> Arc<Node> {
        Arc::new(Node::Clip(ClipNode::new(name, sample_rate)))
    }

    pub fn new_box(name: &str) -> Arc<Node> {
        Arc::new(Node::Box(BoxNode::new(name)))
    }

    pub fn core(&self) -> &NodeCore {
        match self {
            Node::Clip(clip) => clip.core(),
            Node::Box(container) => container.core(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Clip(_) => NodeKind::Clip,
            Node::Box(_) => NodeKind::Box,
        }
    }

    pub fn as_clip(&self) -> Option<&ClipNode> {
        match self {
            Node::Clip(clip) => Some(clip),
            _ => None,
        }
    }

    pub fn as_box(&self) -> Option<&BoxNode> {
        match self {
            Node::Box(container) => Some(container),
            _ => None,
        }
    }

    /// Mix or capture one block. `outputs` is channel-major
    /// (`num_channels * ctx.num_samples` contiguous samples); nodes
    /// accumulate into it, the caller clears it.
    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [f32],
        num_channels: usize,
        ctx: &ProcessContext,
    ) {
        match self {
            Node::Clip(clip) => clip.process(inputs, outputs, num_channels, ctx),
            Node::Box(container) => container.process(inputs, outputs, num_channels, ctx),
        }
    }

    /// Downsample the committed (or in-flight) content into `num_peaks`
    /// absolute-value peak bins.
    pub fn waveform(&self, num_peaks: usize) -> Vec<f32> {
        match self {
            Node::Clip(clip) => clip.waveform(num_peaks),
            Node::Box(container) => container.waveform(num_peaks),
        }
    }

    /// The grid unit governing this node: the nearest resolution found
    /// walking upward, where a container resolves from its first child with a
    /// non-zero intrinsic duration.
    pub fn effective_quantum(&self) -> i64 {
        match self {
            Node::Clip(clip) => clip.effective_quantum(),
            Node::Box(container) => {
                let own = container.derived_quantum();
                if own > 0 {
                    return own;
                }
                self.core()
                    .parent_node()
                    .map(|parent| parent.effective_quantum())
                    .unwrap_or(0)
            }
        }
    }

    pub fn intrinsic_duration(&self) -> i64 {
        match self {
            Node::Clip(_) => self.core().duration(),
            Node::Box(_) => 0,
        }
    }

    pub fn metadata(&self) -> Value {
        let quantum = self.effective_quantum();
        let mut m = self.core().base_metadata();
        m.set("type", self.kind().as_str());
        m.set("effectiveQuantum", quantum);
        match self {
            Node::Clip(clip) => clip.metadata_extras(&mut m, quantum),
            Node::Box(container) => container.metadata_extras(&mut m),
        }
        m
    }

    /// Recursive lookup by UUID, including `self`.
    pub fn find(self: &Arc<Node>, uuid: &str) -> Option<Arc<Node>> {
        if self.core().uuid() == uuid {
            return Some(self.clone());
        }
        if let Node::Box(container) = &**self {
            for child in container.children().iter() {
                if let Some(found) = child.find(uuid) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Append `child` to a container. Control thread only.
    pub fn add_child(parent: &Arc<Node>, child: Arc<Node>) -> bool {
        let Node::Box(container) = &**parent else {
            return false;
        };
        child.core().set_parent(Arc::downgrade(parent));
        container.insert(child);
        true
    }

    /// Detach the child with `uuid`, returning it so the caller can apply the
    /// reclamation grace period. Control thread only.
    pub fn remove_child(parent: &Arc<Node>, uuid: &str) -> Option<Arc<Node>> {
        let container = parent.as_box()?;
        let removed = container.extract(uuid)?;
        removed.core().set_parent(Weak::new());
        Some(removed)
    }

    /// Detach all children, returning them for deferred release. Control
    /// thread only.
    pub fn clear_children(parent: &Arc<Node>) -> Vec<Arc<Node>> {
        let Some(container) = parent.as_box() else {
            return Vec::new();
        };
        let removed = container.take_all();
        for child in &removed {
            child.core().set_parent(Weak::new());
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_child_sets_parent_link() {
        let root = Node::new_box("Root");
        let clip = Node::new_clip("Clip", 44100.0);
        assert!(Node::add_child(&root, clip.clone()));
        let parent = clip.core().parent_node().expect("parent set");
        assert_eq!(parent.core().uuid(), root.core().uuid());
    }

    #[test]
    fn add_child_rejects_clip_parent() {
        let clip = Node::new_clip("Clip", 44100.0);
        let other = Node::new_clip("Other", 44100.0);
        assert!(!Node::add_child(&clip, other));
    }

    #[test]
    fn remove_child_clears_parent_link() {
        let root = Node::new_box("Root");
        let clip = Node::new_clip("Clip", 44100.0);
        Node::add_child(&root, clip.clone());
        let uuid = clip.core().uuid().to_string();
        let removed = Node::remove_child(&root, &uuid).expect("removed");
        assert_eq!(removed.core().uuid(), uuid);
        assert!(removed.core().parent_node().is_none());
        assert!(root.find(&uuid).is_none());
    }

    #[test]
    fn find_walks_nested_boxes() {
        let root = Node::new_box("Root");
        let inner = Node::new_box("Inner");
        let clip = Node::new_clip("Clip", 44100.0);
        let uuid = clip.core().uuid().to_string();
        Node::add_child(&inner, clip);
        Node::add_child(&root, inner);
        assert!(root.find(&uuid).is_some());
        assert!(root.find("missing").is_none());
    }

    #[test]
    fn metadata_carries_standard_fields() {
        let clip = Node::new_clip("Take 1", 48000.0);
        let m = clip.metadata();
        assert_eq!(m.get("name").and_then(Value::as_str), Some("Take 1"));
        assert_eq!(m.get("type").and_then(Value::as_str), Some("clip"));
        assert_eq!(m.get("duration").and_then(Value::as_i64), Some(0));
        assert_eq!(m.get("effectiveQuantum").and_then(Value::as_i64), Some(0));
        assert_eq!(m.get("isRecording").and_then(Value::as_bool), Some(false));
    }
}
