//! ID types shared between ranks

use core::fmt;
use serde::{Deserialize, Serialize};

/// Index of a registered synapse model. Identical on every rank because
/// models are registered by the same replicated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SynId(pub u16);

impl SynId {
    /// Create a new synapse model index
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw index
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Index usable for table lookups
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SynId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syn{}", self.0)
    }
}

/// Connectivity generation. Every collective operation that mutates the
/// network advances it by exactly one on every rank, so cached routing
/// tables can be validated by comparing fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Create a new fingerprint
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Fingerprint of an empty network
    pub const INITIAL: Self = Self(0);

    /// Get the next fingerprint
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint() {
        let fp = Fingerprint::new(41);
        assert_eq!(fp.next(), Fingerprint::new(42));
        assert_eq!(format!("{}", fp), "F41");
        assert_eq!(Fingerprint::default(), Fingerprint::INITIAL);
    }

    #[test]
    fn test_syn_id() {
        let syn = SynId::new(3);
        assert_eq!(syn.index(), 3);
        assert_eq!(format!("{}", syn), "syn3");
    }

    #[test]
    fn test_ordering() {
        assert!(Fingerprint::new(1) < Fingerprint::new(2));
        assert!(SynId::new(0) < SynId::new(1));
    }
}
