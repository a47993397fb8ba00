//! Identifiers and wire records for the nsk simulation kernel
//!
//! Everything that crosses a rank boundary lives here: the compact
//! [`SpikeData`] records exchanged every min-delay cycle, the
//! [`TargetData`] records exchanged while preparing routing tables, and the
//! framed, checksummed buffers that carry secondary (continuous-valued)
//! events.

#![deny(missing_docs)]
#![warn(clippy::all)]

use core::fmt;
use serde::{Deserialize, Serialize};

/// Global node identifier (neurons and devices). Valid ids start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create a new node ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Id 0 is never assigned
    pub const INVALID: Self = Self(0);

    /// Check if this is an assignable node ID
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Core modules
pub mod error;
pub mod ids;
pub mod schemas;
pub mod codec;

// Record formats
pub mod spike_data;
pub mod target_data;
pub mod secondary;

// Re-export essential types
pub use error::{WireError, Result};
pub use ids::{Fingerprint, SynId};
pub use spike_data::{read_chunk, write_chunk, ChunkFill, RecordLayout, SpikeData, SpikeMarker};
pub use target_data::{Target, TargetData, TargetKind};
pub use secondary::{decode_secondary, encode_secondary, SecondaryEvent};

/// Wire format version shared by all ranks of a run
pub const WIRE_VERSION: u16 = 1;

/// Magic numbers for framed buffers
pub mod magic {
    /// Secondary event buffer: "NSEC"
    pub const NSEC: [u8; 4] = [0x4E, 0x53, 0x45, 0x43];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_validity() {
        assert!(!NodeId::INVALID.is_valid());
        assert!(NodeId::new(1).is_valid());
        assert_eq!(NodeId::new(7).to_string(), "7");
        assert!(NodeId::new(3) < NodeId::new(4));
    }
}
