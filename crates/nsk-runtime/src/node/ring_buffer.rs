//! Per-node delay ring buffer
//!
//! Slot `s mod len` accumulates input arriving at absolute step `s`; the
//! node reads and clears it when it updates step `s`. With
//! `len = dmin + dmax`, every pending arrival lies in a window shorter than
//! `len`, so two different steps never share a slot.

use super::{PreciseSpike, StepInput};
use crate::time::Step;

/// Delay ring buffer of one node
#[derive(Debug, Clone, Default)]
pub struct RingBuffer {
    weights: Vec<f64>,
    counts: Vec<u32>,
    precise: Vec<Vec<PreciseSpike>>,
    secondary: Vec<f64>,
}

impl RingBuffer {
    /// Create a buffer with `len` slots
    pub fn new(len: usize) -> Self {
        Self {
            weights: vec![0.0; len],
            counts: vec![0; len],
            precise: vec![Vec::new(); len],
            secondary: vec![0.0; len],
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the buffer has no slots yet
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    fn slot(&self, step: Step) -> usize {
        (step % self.len() as Step) as usize
    }

    /// Add a grid-aligned spike arriving at `step`
    pub fn add_spike(&mut self, step: Step, weight: f64, multiplicity: u16) {
        let slot = self.slot(step);
        self.weights[slot] += weight;
        self.counts[slot] += multiplicity as u32;
    }

    /// Add an off-grid spike arriving at `step`
    pub fn add_precise(&mut self, step: Step, spike: PreciseSpike) {
        let slot = self.slot(step);
        self.weights[slot] += spike.weight;
        self.counts[slot] += spike.multiplicity as u32;
        self.precise[slot].push(spike);
    }

    /// Add a secondary value arriving at `step`
    pub fn add_secondary(&mut self, step: Step, value: f64) {
        let slot = self.slot(step);
        self.secondary[slot] += value;
    }

    /// Read and clear the input for `step`
    pub fn take(&mut self, step: Step) -> StepInput {
        if self.is_empty() {
            return StepInput::default();
        }
        let slot = self.slot(step);
        StepInput {
            spike_weight: std::mem::take(&mut self.weights[slot]),
            spike_count: std::mem::take(&mut self.counts[slot]),
            precise: std::mem::take(&mut self.precise[slot]),
            secondary: std::mem::take(&mut self.secondary[slot]),
        }
    }

    /// Change the slot count, keeping input pending for steps
    /// `now..now + old_len`. Every pending arrival must be earlier than
    /// `now + new_len`.
    pub fn resize(&mut self, new_len: usize, now: Step) {
        if new_len == self.len() {
            return;
        }
        let old_len = self.len() as Step;
        let pending: Vec<(Step, StepInput)> = (now..now + old_len)
            .map(|step| (step, self.take(step)))
            .filter(|(_, input)| !input.is_empty())
            .collect();

        *self = Self::new(new_len);
        for (step, input) in pending {
            debug_assert!(step < now + new_len as Step);
            let slot = self.slot(step);
            self.weights[slot] = input.spike_weight;
            self.counts[slot] = input.spike_count;
            self.precise[slot] = input.precise;
            self.secondary[slot] = input.secondary;
        }
    }
}
