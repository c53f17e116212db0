//! Fixed-capacity mono sample storage shared between the audio and control
//! threads.
//!
//! Samples are stored as f32 bit patterns in `AtomicU32` cells so capture
//! (audio thread), waveform scans and rotation (either thread) need no lock
//! and no unsafe aliasing. Relaxed ordering is enough for the cells
//! themselves; the recording→committed transition that makes a buffer's
//! contents meaningful is published separately with release/acquire on the
//! clip flags.

use std::sync::atomic::{AtomicU32, Ordering};

/// Store f32 in AtomicU32
#[inline]
pub fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Load f32 from AtomicU32
#[inline]
pub fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// Preallocated mono sample slab. Never reallocated after construction.
pub struct SampleBuffer {
    cells: Box<[AtomicU32]>,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let cells: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            cells: cells.into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        u32_to_f32(self.cells[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, index: usize, value: f32) {
        self.cells[index].store(f32_to_u32(value), Ordering::Relaxed);
    }

    /// Copy `src` into the buffer starting at `offset`. The caller has
    /// already clamped `src` to the remaining capacity.
    pub fn write_from(&self, offset: usize, src: &[f32]) {
        for (i, &sample) in src.iter().enumerate() {
            self.cells[offset + i].store(f32_to_u32(sample), Ordering::Relaxed);
        }
    }

    pub fn clear(&self) {
        let zero = f32_to_u32(0.0);
        for cell in self.cells.iter() {
            cell.store(zero, Ordering::Relaxed);
        }
    }

    /// Absolute-value peak over `[start, end)`, clamped to capacity.
    pub fn peak(&self, start: usize, end: usize) -> f32 {
        let end = end.min(self.cells.len());
        let mut peak = 0.0f32;
        for i in start..end {
            peak = peak.max(self.get(i).abs());
        }
        peak
    }

    fn reverse(&self, mut from: usize, mut to: usize) {
        while from + 1 < to {
            to -= 1;
            let a = self.cells[from].load(Ordering::Relaxed);
            let b = self.cells[to].load(Ordering::Relaxed);
            self.cells[from].store(b, Ordering::Relaxed);
            self.cells[to].store(a, Ordering::Relaxed);
            from += 1;
        }
    }

    /// Right-rotate the first `len` samples by `by`: the sample at index `i`
    /// moves to `(i + by) % len`. Done in place with the three-reversal
    /// method, so commits can rotate on whichever thread they run on without
    /// allocating.
    pub fn rotate_right(&self, len: usize, by: usize) {
        if len <= 1 || len > self.cells.len() {
            return;
        }
        let by = by % len;
        if by == 0 {
            return;
        }
        self.reverse(0, len);
        self.reverse(0, by);
        self.reverse(by, len);
    }

    /// Snapshot a range into a plain vec. Control-thread helper for tests and
    /// waveform work; never called from the audio path.
    pub fn snapshot(&self, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(self.cells.len());
        (start..end).map(|i| self.get(i)).collect()
    }
}
