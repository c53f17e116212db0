//! Transport engine: owns the root container, the master position, the
//! navigation focus and the solo target, and drives the tree from the block
//! callback.
//!
//! The engine is shared between the control thread (commands, metadata polls)
//! and the audio thread (`on_block`). Everything the audio thread touches is
//! an atomic or an `arc-swap` snapshot; control-side bookkeeping (focus
//! stack, removal graveyard, input names) sits behind `parking_lot` locks the
//! audio thread never takes.

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use super::node::{Node, NodeKind, ProcessContext};
use crate::value::Value;

pub struct TransportEngine {
    sample_rate: f64,
    root: Arc<Node>,

    master_pos: AtomicI64,
    is_playing_global: AtomicBool,
    input_latency: AtomicI64,
    output_latency: AtomicI64,

    solo_uuid: ArcSwapOption<String>,

    /// Stack of focused box UUIDs; empty means the root is focused.
    focus: Mutex<Vec<String>>,

    /// Removed nodes retained until the audio thread can no longer hold an
    /// in-flight reference: (block count at removal, node).
    graveyard: Mutex<Vec<(u64, Arc<Node>)>>,
    block_count: AtomicU64,

    input_names: Mutex<Vec<String>>,
}

impl TransportEngine {
    pub fn new(sample_rate: f64) -> Self {
        log::info!("TransportEngine: starting at {} Hz", sample_rate);
        Self {
            sample_rate,
            root: Node::new_box("Root"),
            master_pos: AtomicI64::new(0),
            is_playing_global: AtomicBool::new(false),
            input_latency: AtomicI64::new(0),
            output_latency: AtomicI64::new(0),
            solo_uuid: ArcSwapOption::from(None),
            focus: Mutex::new(Vec::new()),
            graveyard: Mutex::new(Vec::new()),
            block_count: AtomicU64::new(0),
            input_names: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn master_pos(&self) -> i64 {
        self.master_pos.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing_global.load(Ordering::Relaxed)
    }

    pub fn set_latency(&self, input: i64, output: i64) {
        self.input_latency.store(input, Ordering::Relaxed);
        self.output_latency.store(output, Ordering::Relaxed);
    }

    pub fn set_input_names(&self, names: Vec<String>) {
        *self.input_names.lock() = names;
    }

    pub fn find(&self, uuid: &str) -> Option<Arc<Node>> {
        self.root.find(uuid)
    }

    // ------------------------------------------------------------------
    // Transport commands
    // ------------------------------------------------------------------

    /// Flip the transport. Stopping rewinds the master position to zero.
    pub fn toggle_playback(&self) -> bool {
        let now_playing = !self.is_playing_global.load(Ordering::Relaxed);
        self.is_playing_global.store(now_playing, Ordering::Relaxed);
        if !now_playing {
            self.master_pos.store(0, Ordering::Relaxed);
        }
        log::info!(
            "TransportEngine: transport {}",
            if now_playing { "started" } else { "stopped" }
        );
        now_playing
    }

    /// Arm a clip for recording, starting the transport if it is stopped.
    pub fn start_recording_in_node(&self, uuid: &str) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        let Some(clip) = node.as_clip() else {
            return false;
        };
        clip.start_recording();
        if !self.is_playing_global.swap(true, Ordering::Relaxed) {
            log::info!("TransportEngine: transport auto-started for recording");
        }
        true
    }

    pub fn stop_recording_in_node(&self, uuid: &str) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        let Some(clip) = node.as_clip() else {
            return false;
        };
        clip.stop_recording(self.master_pos());
        true
    }

    /// Pause or resume a committed clip.
    pub fn toggle_play(&self, uuid: &str) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        let Some(clip) = node.as_clip() else {
            return false;
        };
        if clip.is_playing() {
            clip.stop_playback();
            true
        } else if node.core().duration() > 0 {
            clip.start_playback();
            true
        } else {
            false
        }
    }

    pub fn toggle_solo(&self, uuid: &str) -> bool {
        let current = self.solo_uuid.load();
        if current.as_ref().map(|s| s.as_str()) == Some(uuid) {
            self.solo_uuid.store(None);
            log::info!("TransportEngine: solo cleared");
            return true;
        }
        if self.find(uuid).is_none() {
            return false;
        }
        self.solo_uuid.store(Some(Arc::new(uuid.to_string())));
        log::info!("TransportEngine: soloed {}", uuid);
        true
    }

    pub fn solo_target(&self) -> Option<String> {
        self.solo_uuid.load_full().map(|s| (*s).clone())
    }

    // ------------------------------------------------------------------
    // Structure commands
    // ------------------------------------------------------------------

    /// Append a new node to the focused container. Returns the new UUID.
    pub fn create_node(&self, kind: NodeKind, x: Option<f64>, y: Option<f64>) -> Option<String> {
        let focused = self.focused_node();
        let container = focused.as_box()?;
        let position = container.child_count() + 1;
        let node = match kind {
            NodeKind::Clip => Node::new_clip(&format!("Clip {}", position), self.sample_rate),
            NodeKind::Box => Node::new_box(&format!("Box {}", position)),
        };
        if let Some(x) = x {
            node.core().set_x(x);
        }
        if let Some(y) = y {
            node.core().set_y(y);
        }
        let uuid = node.core().uuid().to_string();
        Node::add_child(&focused, node);
        log::info!(
            "TransportEngine: created {} {} in '{}'",
            kind.as_str(),
            uuid,
            focused.core().name()
        );
        Some(uuid)
    }

    pub fn rename_node(&self, uuid: &str, name: &str) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        node.core().set_name(name);
        true
    }

    pub fn set_node_input(&self, uuid: &str, channel: usize) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        let Some(clip) = node.as_clip() else {
            return false;
        };
        clip.set_input_channel(channel);
        true
    }

    /// Constrain a committed clip's playable region. Values are clamped into
    /// `[0, duration]`; an uncommitted clip has no region to constrain.
    pub fn set_loop_points(&self, uuid: &str, start: i64, end: i64) -> bool {
        let Some(node) = self.find(uuid) else {
            return false;
        };
        if node.as_clip().is_none() {
            return false;
        }
        let duration = node.core().duration();
        if duration <= 0 || start > end {
            return false;
        }
        let start = start.clamp(0, duration);
        let end = end.clamp(start, duration);
        node.core().set_loop_points(start, end);
        true
    }

    /// Detach a node from its parent. The node is retained for at least one
    /// further audio block before release so an in-flight `process` pointer
    /// stays valid.
    pub fn delete_node(&self, uuid: &str) -> bool {
        if uuid == self.root.core().uuid() {
            return false;
        }
        let Some(node) = self.find(uuid) else {
            return false;
        };
        let Some(parent) = node.core().parent_node() else {
            return false;
        };
        let Some(removed) = Node::remove_child(&parent, uuid) else {
            return false;
        };

        // Drop any focus into the removed subtree and a stale solo target.
        {
            let mut focus = self.focus.lock();
            if let Some(pos) = focus.iter().position(|entry| entry == uuid) {
                focus.truncate(pos);
            }
        }
        if self.solo_target().as_deref() == Some(uuid) {
            self.solo_uuid.store(None);
        }

        self.graveyard
            .lock()
            .push((self.block_count.load(Ordering::Relaxed), removed));
        log::info!("TransportEngine: deleted {}", uuid);
        true
    }

    /// Release graveyard entries once the audio thread has moved at least one
    /// block past their removal.
    pub fn collect_garbage(&self) {
        let current = self.block_count.load(Ordering::Relaxed);
        self.graveyard
            .lock()
            .retain(|(stamp, _)| current <= stamp + 1);
    }

    #[cfg(test)]
    fn graveyard_len(&self) -> usize {
        self.graveyard.lock().len()
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Focus a box that is a direct child of the current focus.
    pub fn enter_box(&self, uuid: &str) -> bool {
        let focused = self.focused_node();
        let Some(container) = focused.as_box() else {
            return false;
        };
        let is_child_box = container
            .children()
            .iter()
            .any(|child| child.core().uuid() == uuid && child.as_box().is_some());
        if !is_child_box {
            return false;
        }
        self.focus.lock().push(uuid.to_string());
        true
    }

    pub fn exit_box(&self) -> bool {
        self.focus.lock().pop().is_some()
    }

    /// Resolve the focus stack from the root, dropping entries that no
    /// longer exist.
    pub fn focused_node(&self) -> Arc<Node> {
        let mut focus = self.focus.lock();
        let mut current = self.root.clone();
        let mut depth = 0;
        for uuid in focus.iter() {
            match current.find(uuid) {
                Some(node) if node.as_box().is_some() => {
                    current = node;
                    depth += 1;
                }
                _ => break,
            }
        }
        focus.truncate(depth);
        current
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Snapshot of the focused container for the view: its metadata plus the
    /// transport flags and its children's metadata.
    pub fn graph_state(&self) -> Value {
        let focused = self.focused_node();
        let mut state = focused.metadata();
        state.set("isPlaying", self.is_playing());
        state.set("focusedId", focused.core().uuid());
        state.set("soloedId", self.solo_target().unwrap_or_default());
        if let Some(container) = focused.as_box() {
            let nodes: Vec<Value> = container
                .children()
                .iter()
                .map(|child| child.metadata())
                .collect();
            state.set("nodes", nodes);
        }
        state
    }

    pub fn waveform(&self, uuid: &str, num_peaks: usize) -> Vec<f32> {
        self.find(uuid)
            .map(|node| node.waveform(num_peaks))
            .unwrap_or_default()
    }

    pub fn input_list(&self) -> Value {
        let names = self.input_names.lock();
        let mut m = Value::map();
        m.set(
            "inputs",
            names
                .iter()
                .map(|name| Value::Str(name.clone()))
                .collect::<Vec<Value>>(),
        );
        m
    }

    // ------------------------------------------------------------------
    // Audio callback
    // ------------------------------------------------------------------

    /// Process one device block. `outputs` is channel-major
    /// (`num_channels * num_samples`); it is cleared here and the tree
    /// accumulates into it. Called from the audio thread only.
    pub fn on_block(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [f32],
        num_channels: usize,
        num_samples: usize,
    ) {
        let frames = if num_channels > 0 {
            num_samples.min(outputs.len() / num_channels)
        } else {
            num_samples
        };
        let needed = frames * num_channels;
        outputs[..needed].fill(0.0);

        let playing = self.is_playing_global.load(Ordering::Relaxed);
        let solo_guard = self.solo_uuid.load();
        let ctx = ProcessContext {
            sample_rate: self.sample_rate,
            num_samples: frames,
            is_playing: playing,
            is_recording: true,
            master_pos: self.master_pos.load(Ordering::Relaxed),
            input_latency: self.input_latency.load(Ordering::Relaxed),
            output_latency: self.output_latency.load(Ordering::Relaxed),
            solo_uuid: solo_guard.as_ref().map(|uuid| uuid.as_str()),
        };

        self.root.process(inputs, outputs, num_channels, &ctx);

        if playing {
            self.master_pos.fetch_add(frames as i64, Ordering::Relaxed);
        }
        self.block_count.fetch_add(1, Ordering::Relaxed);
    }
}

// ----------------------------------------------------------------------
// Global engine handle. The cpal streams that drive `on_block` are leaked to
// live for the process lifetime, so the handle is the one shared entry point
// for every thread.
// ----------------------------------------------------------------------

static ENGINE_HANDLE: once_cell::sync::OnceCell<RwLock<Option<Arc<TransportEngine>>>> =
    once_cell::sync::OnceCell::new();

/// Initialize the global engine, reusing an existing instance on repeat
/// calls.
pub fn init_engine(sample_rate: f64) -> Arc<TransportEngine> {
    let cell = ENGINE_HANDLE.get_or_init(|| RwLock::new(None));
    let mut slot = cell.write();
    if let Some(existing) = slot.as_ref() {
        log::debug!("TransportEngine: already initialized, reusing instance");
        return existing.clone();
    }
    let engine = Arc::new(TransportEngine::new(sample_rate));
    *slot = Some(engine.clone());
    engine
}

/// Get the global engine handle, if initialized.
pub fn get_engine_handle() -> Option<Arc<TransportEngine>> {
    ENGINE_HANDLE.get().and_then(|cell| cell.read().clone())
}

/// Drop the global handle. Leaked streams keep calling `on_block` on their
/// own clone until process exit.
pub fn shutdown_engine() {
    if let Some(cell) = ENGINE_HANDLE.get() {
        *cell.write() = None;
    }
}
