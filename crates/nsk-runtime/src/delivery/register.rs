//! Thread-local spike register

use crate::time::Step;

/// A spike emitted by a local node during the current cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEntry {
    /// Local index of the emitting node
    pub lid: u32,
    /// Lag within the cycle
    pub lag: u16,
    /// Spikes emitted at once
    pub multiplicity: u16,
    /// Sub-step offset (ms)
    pub offset_ms: f64,
}

/// Spikes of one thread in emission order. Collocated once per cycle and
/// cleared after delivery; overflow rounds resend the collocated lists.
#[derive(Debug, Clone, Default)]
pub struct SpikeRegister {
    entries: Vec<SpikeEntry>,
}

impl SpikeRegister {
    /// Create an empty register
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spike
    pub fn push(&mut self, lid: u32, lag: Step, multiplicity: u16, offset_ms: f64) {
        debug_assert!(lag <= u16::MAX as Step);
        self.entries.push(SpikeEntry {
            lid,
            lag: lag as u16,
            multiplicity,
            offset_ms,
        });
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[SpikeEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total spikes, counting multiplicity
    pub fn spike_count(&self) -> u64 {
        self.entries.iter().map(|e| e.multiplicity as u64).sum()
    }

    /// Forget all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
