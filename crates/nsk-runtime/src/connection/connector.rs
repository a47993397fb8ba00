//! Stored synapse instances

use crate::time::Step;
use nsk_wire::NodeId;
use serde::{Deserialize, Serialize};

/// A synapse, addressed by (thread, synapse id, local connection index)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    /// Postsynaptic node
    pub target: NodeId,
    /// Local index of the target in its thread's node store
    pub target_lid: u32,
    /// Synaptic weight
    pub weight: f64,
    /// Delay in steps
    pub delay: Step,
    /// Logically removed, reclaimed by the next restructuring
    pub disabled: bool,
    /// The next connector in the table has the same source
    pub has_subsequent: bool,
    /// Spikes transmitted so far
    pub transmissions: u64,
}

impl Connector {
    /// Create an enabled connector
    pub fn new(target: NodeId, target_lid: u32, weight: f64, delay: Step) -> Self {
        Self {
            target,
            target_lid,
            weight,
            delay,
            disabled: false,
            has_subsequent: false,
            transmissions: 0,
        }
    }

    /// Transmit `multiplicity` spikes, returning the weight to deliver
    pub fn transmit(&mut self, multiplicity: u16) -> f64 {
        self.transmissions += multiplicity as u64;
        self.weight * multiplicity as f64
    }
}

/// Presynaptic side of a connector, kept parallel to the connector array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Presynaptic node
    pub node_id: NodeId,
    /// Mirrors the connector's disabled flag
    pub disabled: bool,
}

impl SourceEntry {
    /// Create an enabled entry
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            disabled: false,
        }
    }
}
