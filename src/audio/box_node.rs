//! Container node: owns an ordered sequence of children and sums their
//! output.
//!
//! Structural changes happen only on the control thread and publish a fresh
//! immutable child list through `arc-swap`; the audio thread loads a snapshot
//! per block and never locks. The summing scratch is preallocated and only
//! ever taken by the audio thread, so its mutex is uncontended by
//! construction.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::node::{Node, NodeCore, ProcessContext};
use crate::value::Value;

/// Largest block the scratch accommodates; matches the engine's maximum
/// callback size.
pub(crate) const MAX_BLOCK_FRAMES: usize = 4096;
const SCRATCH_CHANNELS: usize = 8;

pub struct BoxNode {
    core: NodeCore,
    children: ArcSwap<Vec<Arc<Node>>>,
    scratch: Mutex<Vec<f32>>,
}

impl BoxNode {
    pub fn new(name: &str) -> Self {
        Self {
            core: NodeCore::new(name),
            children: ArcSwap::from_pointee(Vec::new()),
            scratch: Mutex::new(vec![0.0; MAX_BLOCK_FRAMES * SCRATCH_CHANNELS]),
        }
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    /// Current child snapshot. The guard keeps the list alive for the length
    /// of the borrow even if the control thread swaps it meanwhile.
    pub fn children(&self) -> arc_swap::Guard<Arc<Vec<Arc<Node>>>> {
        self.children.load()
    }

    pub fn child_count(&self) -> usize {
        self.children.load().len()
    }

    pub fn child_at(&self, index: usize) -> Option<Arc<Node>> {
        self.children.load().get(index).cloned()
    }

    pub(crate) fn insert(&self, child: Arc<Node>) {
        self.children.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(child.clone());
            next
        });
    }

    pub(crate) fn extract(&self, uuid: &str) -> Option<Arc<Node>> {
        let mut removed = None;
        self.children.rcu(|current| {
            let mut next = Vec::with_capacity(current.len());
            for child in current.iter() {
                if child.core().uuid() == uuid {
                    removed = Some(child.clone());
                } else {
                    next.push(child.clone());
                }
            }
            next
        });
        removed
    }

    pub(crate) fn take_all(&self) -> Vec<Arc<Node>> {
        let previous = self.children.swap(Arc::new(Vec::new()));
        previous.to_vec()
    }

    /// The quantum this container resolves on its own: the committed duration
    /// of its first child with a non-zero intrinsic duration.
    pub fn derived_quantum(&self) -> i64 {
        for child in self.children.load().iter() {
            let duration = child.intrinsic_duration();
            if duration > 0 {
                return duration;
            }
        }
        0
    }

    /// Sum the children in insertion order. Each child renders into a cleared
    /// scratch region which is then accumulated into `outputs`; summing is
    /// commutative but the order is fixed for determinism.
    pub fn process(
        &self,
        inputs: &[&[f32]],
        outputs: &mut [f32],
        num_channels: usize,
        ctx: &ProcessContext,
    ) {
        let children = self.children.load();
        if children.is_empty() {
            return;
        }

        let needed = ctx.num_samples * num_channels;
        let mut scratch = self.scratch.lock();
        if needed > 0 && needed <= scratch.len() && needed <= outputs.len() {
            for child in children.iter() {
                scratch[..needed].fill(0.0);
                child.process(inputs, &mut scratch[..needed], num_channels, ctx);
                for (out, s) in outputs[..needed].iter_mut().zip(scratch[..needed].iter()) {
                    *out += *s;
                }
            }
        } else {
            // No output to mix into (capture-only block) or a block larger
            // than the scratch: children accumulate straight into the
            // outputs, which sums to the same result.
            for child in children.iter() {
                child.process(inputs, outputs, num_channels, ctx);
            }
        }
    }

    /// Peak aggregate across children: a single child's waveform verbatim,
    /// otherwise the per-bin mean.
    pub fn waveform(&self, num_peaks: usize) -> Vec<f32> {
        let children = self.children.load();
        if children.is_empty() || num_peaks == 0 {
            return Vec::new();
        }
        if children.len() == 1 {
            return children[0].waveform(num_peaks);
        }

        let mut aggregate = vec![0.0f32; num_peaks];
        for child in children.iter() {
            let peaks = child.waveform(num_peaks);
            for (acc, peak) in aggregate.iter_mut().zip(peaks.iter()) {
                *acc += *peak;
            }
        }
        let count = children.len() as f32;
        for acc in aggregate.iter_mut() {
            *acc /= count;
        }
        aggregate
    }

    pub(crate) fn metadata_extras(&self, m: &mut Value) {
        m.set("childCount", self.child_count());
    }
}
