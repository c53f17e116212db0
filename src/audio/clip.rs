//! Leaf node holding one recorded loop.
//!
//! Four cooperating sub-machines run inside `process`: pending-start (waits
//! for or anticipates a quantum boundary), capture, awaiting-stop (defers the
//! commit to the next boundary), and playback. Control-thread entry points
//! (`start_recording`, `stop_recording`, `start_playback`, …) only flip
//! atomics or commit directly; the audio thread observes the flags at block
//! boundaries.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};

use super::buffer::{f32_to_u32, u32_to_f32, SampleBuffer};
use super::node::{NodeCore, ProcessContext};
use crate::value::Value;

/// One quantum of horizontal space in the layout grid.
const BASE_WIDTH: f64 = 200.0;

/// Snap window around a clean boundary, as a fraction of the quantum.
const HYSTERESIS_TOLERANCE: f64 = 0.15;

/// Fraction of the quantum before a boundary inside which a start request
/// waits for the boundary instead of starting jittery.
const ANTICIPATORY_START_WINDOW: f64 = 0.25;

/// Clip capacity in seconds. The buffer is sized once at creation and never
/// grows; capture that outruns it commits with whatever was taken.
const CAPACITY_SECONDS: f64 = 60.0;

pub struct ClipNode {
    core: NodeCore,
    sample_rate: f64,
    buffer: SampleBuffer,

    write_position: AtomicI64,

    is_pending_start: AtomicBool,
    awaiting_start_at: AtomicI64,
    is_recording: AtomicBool,
    is_awaiting_stop: AtomicBool,
    awaiting_stop_at: AtomicI64,
    is_playing: AtomicBool,

    /// Latency-compensated master position at which capture began.
    trigger_master_position: AtomicI64,
    /// Master position at which the take committed.
    commit_master_pos: AtomicI64,

    current_max_peak: AtomicU32,
    preferred_input_channel: AtomicUsize,
}

impl ClipNode {
    pub fn new(name: &str, sample_rate: f64) -> Self {
        let capacity = ((sample_rate * CAPACITY_SECONDS) as usize).max(1);
        Self {
            core: NodeCore::new(name),
            sample_rate,
            buffer: SampleBuffer::new(capacity),
            write_position: AtomicI64::new(0),
            is_pending_start: AtomicBool::new(false),
            awaiting_start_at: AtomicI64::new(0),
            is_recording: AtomicBool::new(false),
            is_awaiting_stop: AtomicBool::new(false),
            awaiting_stop_at: AtomicI64::new(0),
            is_playing: AtomicBool::new(false),
            trigger_master_position: AtomicI64::new(0),
            commit_master_pos: AtomicI64::new(0),
            current_max_peak: AtomicU32::new(0f32.to_bits()),
            preferred_input_channel: AtomicUsize::new(0),
        }
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn write_position(&self) -> i64 {
        self.write_position.load(Ordering::Relaxed)
    }

    /// True while samples are actually being captured.
    pub fn is_capturing(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    pub fn is_pending_start(&self) -> bool {
        self.is_pending_start.load(Ordering::Acquire)
    }

    pub fn is_awaiting_stop(&self) -> bool {
        self.is_awaiting_stop.load(Ordering::Acquire)
    }

    pub fn awaiting_start_at(&self) -> i64 {
        self.awaiting_start_at.load(Ordering::Relaxed)
    }

    pub fn awaiting_stop_at(&self) -> i64 {
        self.awaiting_stop_at.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    pub fn trigger_master_position(&self) -> i64 {
        self.trigger_master_position.load(Ordering::Relaxed)
    }

    pub fn commit_master_position(&self) -> i64 {
        self.commit_master_pos.load(Ordering::Relaxed)
    }

    pub fn input_channel(&self) -> usize {
        self.preferred_input_channel.load(Ordering::Relaxed)
    }

    pub fn set_input_channel(&self, channel: usize) {
        self.preferred_input_channel.store(channel, Ordering::Relaxed);
    }

    pub fn max_peak(&self) -> f32 {
        u32_to_f32(self.current_max_peak.load(Ordering::Relaxed))
    }

    /// Arm the clip: capture begins on the audio thread at the chosen
    /// boundary. Control thread only.
    pub fn start_recording(&self) {
        self.buffer.clear();
        self.write_position.store(0, Ordering::Relaxed);
        self.core.live_duration_samples.store(0, Ordering::Relaxed);
        self.current_max_peak.store(0f32.to_bits(), Ordering::Relaxed);
        self.core.last_block_peak.store(0f32.to_bits(), Ordering::Relaxed);
        self.awaiting_start_at.store(0, Ordering::Relaxed);
        self.awaiting_stop_at.store(0, Ordering::Relaxed);
        self.is_awaiting_stop.store(false, Ordering::Relaxed);
        self.is_recording.store(false, Ordering::Relaxed);
        self.core.duration_samples.store(0, Ordering::Relaxed);
        self.is_playing.store(false, Ordering::Relaxed);
        self.core.is_node_recording.store(true, Ordering::Release);
        self.is_pending_start.store(true, Ordering::Release);
        log::info!("clip '{}': recording requested", self.core.name());
    }

    /// Request a stop. With no quantum the take commits immediately; with a
    /// boundary close ahead the clip keeps capturing until the boundary;
    /// otherwise it commits now and the hysteresis snapping decides the final
    /// length. `master_pos` is the transport position at the request.
    /// Control thread only.
    pub fn stop_recording(&self, master_pos: i64) {
        if !self.core.is_node_recording.load(Ordering::Acquire) {
            return;
        }
        if self.is_pending_start.load(Ordering::Relaxed) && !self.is_recording.load(Ordering::Relaxed)
        {
            // Capture never began; cancel back to idle.
            self.is_pending_start.store(false, Ordering::Relaxed);
            self.awaiting_start_at.store(0, Ordering::Relaxed);
            self.core.is_node_recording.store(false, Ordering::Release);
            log::info!("clip '{}': recording request cancelled", self.core.name());
            return;
        }
        if self.is_awaiting_stop.load(Ordering::Acquire) {
            // Stop is already scheduled; a second request changes nothing.
            return;
        }

        let captured = self.write_position.load(Ordering::Relaxed);
        let quantum = self.effective_quantum();
        if quantum > 0 {
            let mut boundary = ((captured / quantum) + 1) * quantum;
            if captured < quantum / 2 {
                // Short take: the next clean point may be a subdivision.
                for divisor in [2i64, 4, 8] {
                    let sub = quantum / divisor;
                    if sub > captured && sub < boundary {
                        boundary = sub;
                    }
                }
            }
            if ((boundary - captured) as f64) < HYSTERESIS_TOLERANCE * quantum as f64 {
                self.awaiting_stop_at.store(boundary, Ordering::Relaxed);
                self.is_awaiting_stop.store(true, Ordering::Release);
                log::info!(
                    "clip '{}': holding for boundary at {} (captured {})",
                    self.core.name(),
                    boundary,
                    captured
                );
                return;
            }
        }

        self.commit(None, master_pos);
        log::info!(
            "clip '{}': committed, duration {} samples",
            self.core.name(),
            self.core.duration()
        );
    }

    /// Resume a committed loop. No-op until something has been recorded.
    pub fn start_playback(&self) {
        if self.core.duration() > 0 {
            self.is_playing.store(true, Ordering::Release);
        }
    }

    pub fn stop_playback(&self) {
        self.is_playing.store(false, Ordering::Release);
    }

    pub fn effective_quantum(&self) -> i64 {
        self.core
            .parent_node()
            .map(|parent| parent.effective_quantum())
            .unwrap_or(0)
    }

    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [f32],
        num_channels: usize,
        ctx: &ProcessContext,
    ) {
        let mut capture_from = 0usize;
        if self.is_pending_start.load(Ordering::Acquire) {
            capture_from = self.advance_pending_start(ctx);
        }

        if self.is_recording.load(Ordering::Acquire)
            && self.capture_block(inputs, capture_from, ctx)
        {
            return;
        }

        self.render_block(outputs, num_channels, ctx);
    }

    /// Drive the pending-start machine for one block. Returns the in-block
    /// offset at which capture starts when the boundary lands inside this
    /// block.
    fn advance_pending_start(&self, ctx: &ProcessContext) -> usize {
        let quantum = self.effective_quantum();
        if quantum <= 0 {
            // First clip: nothing to align against, start right away.
            let compensated = self.compensated_position(ctx);
            self.core.anchor_phase_samples.store(0, Ordering::Relaxed);
            self.begin_capture(compensated);
            return 0;
        }

        let armed = self.awaiting_start_at.load(Ordering::Relaxed);
        if armed > 0 {
            let block_end = ctx.master_pos + ctx.num_samples as i64;
            if ctx.master_pos >= armed {
                self.awaiting_start_at.store(0, Ordering::Relaxed);
                self.begin_capture(armed);
                return 0;
            }
            if block_end > armed {
                self.awaiting_start_at.store(0, Ordering::Relaxed);
                self.begin_capture(armed);
                return (armed - ctx.master_pos) as usize;
            }
            return 0;
        }

        let phase = ctx.master_pos.rem_euclid(quantum);
        let distance = quantum - phase;
        if phase != 0 && (distance as f64) < ANTICIPATORY_START_WINDOW * quantum as f64 {
            // Close enough to the next boundary that the gesture means "on
            // the downbeat": arm it instead of starting jittery.
            let target = ctx.master_pos + distance;
            self.awaiting_start_at.store(target, Ordering::Relaxed);
            self.preview_anchor(target, quantum);
            return 0;
        }

        let compensated = self.compensated_position(ctx);
        self.preview_anchor(compensated, quantum);
        self.begin_capture(compensated);
        0
    }

    fn compensated_position(&self, ctx: &ProcessContext) -> i64 {
        // The performer played against what they heard (delayed by the output
        // path); their signal arrived delayed by the input path.
        (ctx.master_pos - (ctx.input_latency + ctx.output_latency)).max(0)
    }

    /// Place the clip where the performer heard the take begin: the
    /// loop-relative playhead position of the longest committed sibling.
    fn preview_anchor(&self, start_pos: i64, quantum: i64) {
        let context_loop = self.context_loop(quantum);
        let context_launch = self.context_launch_point(context_loop);
        let playback_offset =
            (context_loop - context_launch.rem_euclid(context_loop)).rem_euclid(context_loop);
        let effective = (start_pos + playback_offset).rem_euclid(context_loop);
        self.core.anchor_phase_samples.store(effective, Ordering::Relaxed);
        let quantum_offset = (effective / quantum) as f64;
        self.core.set_x(self.core.x() + quantum_offset * BASE_WIDTH);
    }

    fn begin_capture(&self, trigger: i64) {
        self.is_pending_start.store(false, Ordering::Relaxed);
        self.write_position.store(0, Ordering::Relaxed);
        self.core.live_duration_samples.store(0, Ordering::Relaxed);
        self.trigger_master_position.store(trigger, Ordering::Relaxed);
        self.is_recording.store(true, Ordering::Release);
    }

    /// Capture one block. Returns true when a boundary crossing committed the
    /// take and the rest of the block should be skipped.
    fn capture_block(&self, inputs: &[&[f32]], capture_from: usize, ctx: &ProcessContext) -> bool {
        if !ctx.is_recording || inputs.is_empty() || capture_from >= ctx.num_samples {
            return false;
        }
        let channel = self
            .preferred_input_channel
            .load(Ordering::Relaxed)
            .min(inputs.len() - 1);
        let input = inputs[channel];
        let span_end = ctx.num_samples.min(input.len());
        if capture_from >= span_end {
            return false;
        }
        let src = &input[capture_from..span_end];

        let start_p = self.write_position.load(Ordering::Relaxed);
        let room = (self.buffer.capacity() as i64 - start_p).max(0) as usize;
        let written = src.len().min(room);

        if written > 0 {
            self.buffer.write_from(start_p as usize, &src[..written]);

            let block_peak = src[..written]
                .iter()
                .fold(0.0f32, |peak, s| peak.max(s.abs()));
            self.core
                .last_block_peak
                .store(f32_to_u32(block_peak), Ordering::Relaxed);
            if block_peak > u32_to_f32(self.current_max_peak.load(Ordering::Relaxed)) {
                self.current_max_peak
                    .store(f32_to_u32(block_peak), Ordering::Relaxed);
            }

            let end_p = start_p + written as i64;
            self.write_position.store(end_p, Ordering::Relaxed);
            self.core.live_duration_samples.store(end_p, Ordering::Relaxed);

            if self.is_awaiting_stop.load(Ordering::Relaxed) {
                let target = self.awaiting_stop_at.load(Ordering::Relaxed);
                if start_p < target && end_p >= target {
                    let crossed_at = ctx.master_pos + capture_from as i64 + (target - start_p);
                    self.commit(Some(target), crossed_at);
                    return true;
                }
            }
        }

        if written < src.len() {
            // Capacity exhausted: commit with what was taken.
            let master = ctx.master_pos + (capture_from + written) as i64;
            self.commit(None, master);
        }
        false
    }

    /// Freeze the take: snap the duration, reconcile the anchor by rotating
    /// the buffer, compute the launch point, and make the loop playable.
    /// `final_duration` is set on the anticipatory path where the boundary
    /// chose the length up front.
    pub(crate) fn commit(&self, final_duration: Option<i64>, master_pos: i64) {
        if !self.core.is_node_recording.load(Ordering::Acquire) {
            return;
        }
        self.is_recording.store(false, Ordering::Relaxed);
        self.is_pending_start.store(false, Ordering::Relaxed);
        self.is_awaiting_stop.store(false, Ordering::Relaxed);
        self.core.is_node_recording.store(false, Ordering::Relaxed);
        self.commit_master_pos.store(master_pos, Ordering::Relaxed);

        let captured = self.write_position.load(Ordering::Relaxed);
        let quantum = self.effective_quantum();
        let duration = match final_duration {
            Some(snapped) if snapped > 0 => {
                self.core.set_loop_points(0, snapped);
                snapped
            }
            _ if quantum > 0 => self.late_snap(captured, quantum),
            _ => {
                self.core.set_loop_points(0, captured);
                captured
            }
        };
        self.core.duration_samples.store(duration, Ordering::Relaxed);

        // Anchor reconciliation: where in the sibling grid the capture began.
        let context_loop = self.context_loop(quantum);
        let trigger = self.trigger_master_position.load(Ordering::Relaxed);
        let ideal_anchor = if context_loop > 0 {
            trigger.rem_euclid(context_loop)
        } else {
            0
        };
        let audio_anchor = ideal_anchor;

        let mut final_anchor = audio_anchor;
        if audio_anchor > 0 && audio_anchor < duration {
            // Physically move the captured start to the grid-aligned index so
            // a playhead at the anchor hears the start of the take.
            self.buffer
                .rotate_right(duration as usize, audio_anchor as usize);
            final_anchor = 0;
        }

        if quantum > 0 {
            self.core.set_x(((ideal_anchor / quantum) as f64) * BASE_WIDTH);
        } else {
            self.core.set_x(0.0);
        }
        self.core.anchor_phase_samples.store(final_anchor, Ordering::Relaxed);

        // launch satisfies (master_pos + launch) % duration == 0: the
        // playhead sits at 0 exactly at commit time.
        let launch = if duration > 0 {
            (duration - master_pos.rem_euclid(duration)).rem_euclid(duration)
        } else {
            0
        };
        self.core.launch_point_samples.store(launch, Ordering::Relaxed);

        self.is_playing.store(duration > 0, Ordering::Release);
    }

    /// Hysteresis snapping for a commit whose length was not chosen by a
    /// boundary: snap to the nearest clean multiple or subdivision within
    /// tolerance, else keep the raw length and snap only the loop region.
    fn late_snap(&self, captured: i64, quantum: i64) -> i64 {
        let floor_multiple = (captured / quantum) * quantum;
        let candidates = [
            floor_multiple,
            floor_multiple + quantum,
            quantum / 2,
            quantum / 4,
            quantum / 8,
        ];
        let mut best = -1i64;
        let mut best_diff = i64::MAX;
        for &candidate in &candidates {
            if candidate <= 0 {
                continue;
            }
            let diff = (captured - candidate).abs();
            if diff < best_diff {
                best_diff = diff;
                best = candidate;
            }
        }

        if best > 0 && (best_diff as f64) < HYSTERESIS_TOLERANCE * quantum as f64 {
            self.core.set_loop_points(0, best);
            best
        } else {
            let mut loop_end = (captured / quantum) * quantum;
            if loop_end == 0 {
                loop_end = quantum / 2;
            }
            self.core.set_loop_points(0, loop_end.min(captured));
            captured
        }
    }

    /// The longest committed sibling loop, the quantum if there is none, or 1
    /// with no quantum at all. Defines visual placement and the phase grid
    /// during capture.
    fn context_loop(&self, quantum: i64) -> i64 {
        let mut context = if quantum > 0 { quantum } else { 1 };
        if let Some(parent) = self.core.parent_node() {
            if let Some(container) = parent.as_box() {
                for sibling in container.children().iter() {
                    if sibling.core().uuid() != self.core.uuid() && !sibling.core().is_recording() {
                        context = context.max(sibling.intrinsic_duration());
                    }
                }
            }
        }
        context
    }

    /// Launch point of the sibling that defines the context loop, if any.
    fn context_launch_point(&self, context_loop: i64) -> i64 {
        if let Some(parent) = self.core.parent_node() {
            if let Some(container) = parent.as_box() {
                for sibling in container.children().iter() {
                    if sibling.core().uuid() != self.core.uuid()
                        && !sibling.core().is_recording()
                        && sibling.intrinsic_duration() == context_loop
                    {
                        return sibling.core().launch_point();
                    }
                }
            }
        }
        0
    }

    fn render_block(&self, outputs: &mut [f32], num_channels: usize, ctx: &ProcessContext) {
        if !(ctx.is_playing && self.is_playing.load(Ordering::Acquire)) {
            return;
        }
        let start = self.core.loop_start();
        let end = self.core.loop_end();
        let duration = end - start;
        if duration <= 0 {
            self.core.set_playhead(0.0);
            return;
        }

        let launch = self.core.launch_point();
        let capacity = self.buffer.capacity() as i64;
        let channels = if ctx.num_samples > 0 {
            num_channels.min(outputs.len() / ctx.num_samples)
        } else {
            0
        };

        if !self.is_silenced(ctx) && channels > 0 {
            for i in 0..ctx.num_samples {
                let effective = (ctx.master_pos + i as i64 + launch).rem_euclid(duration);
                let read_idx = (start + effective).rem_euclid(capacity) as usize;
                let sample = self.buffer.get(read_idx);
                for ch in 0..channels {
                    outputs[ch * ctx.num_samples + i] += sample;
                }
            }
        }

        if ctx.num_samples > 0 {
            let last = (ctx.master_pos + ctx.num_samples as i64 - 1 + launch).rem_euclid(duration);
            self.core.set_playhead(last as f64 / duration as f64);
        }
    }

    fn is_silenced(&self, ctx: &ProcessContext) -> bool {
        if self.core.is_muted() {
            return true;
        }
        let Some(solo) = ctx.solo_uuid else {
            return false;
        };
        if solo.is_empty() || self.core.uuid() == solo {
            return false;
        }
        let mut current = self.core.parent_node();
        while let Some(node) = current {
            if node.core().uuid() == solo {
                return false;
            }
            current = node.core().parent_node();
        }
        true
    }

    pub fn waveform(&self, num_peaks: usize) -> Vec<f32> {
        let committed = self.core.duration();
        let total = if committed > 0 {
            committed
        } else {
            self.write_position.load(Ordering::Relaxed)
        } as usize;
        if total == 0 || num_peaks == 0 {
            return Vec::new();
        }

        let window = (total / num_peaks).max(1);
        let mut peaks = Vec::with_capacity(num_peaks);
        for i in 0..num_peaks {
            let bin_start = i * window;
            let bin_end = (bin_start + window).min(total).max(bin_start + 1);
            let peak = if bin_start < total {
                self.buffer.peak(bin_start, bin_end)
            } else {
                0.0
            };
            peaks.push(peak);
        }
        peaks
    }

    pub(crate) fn metadata_extras(&self, m: &mut Value, quantum: i64) {
        m.set("sampleRate", self.sample_rate);
        m.set("inputChannel", self.input_channel());
        m.set("isPendingStart", self.is_pending_start());
        m.set("awaitingStartAt", self.awaiting_start_at());
        m.set("isAwaitingStop", self.is_awaiting_stop());
        m.set("awaitingStopAt", self.awaiting_stop_at());
        m.set("isPlaying", self.is_playing());
        m.set("triggerMasterPosition", self.trigger_master_position());
        m.set("commitMasterPos", self.commit_master_position());
        if quantum > 0 && self.core.is_recording() {
            m.set(
                "recordingStartPhase",
                self.trigger_master_position().rem_euclid(quantum),
            );
        }
    }
}
