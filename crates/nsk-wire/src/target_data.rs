//! Routing-preparation records
//!
//! While preparing delivery, every rank tells the owner of each source which
//! (rank, thread, synapse, local index) addresses its connectors live at.

use crate::ids::SynId;
use crate::NodeId;
use core::fmt;
use serde::{Deserialize, Serialize};

/// How the owner of a source reaches a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// Spike connector block at `(tid, syn, lcid)`
    Spike,
    /// Entry `lcid` of the receiver's compressed table for `syn`
    Compressed,
    /// Receiver has secondary connectors for this source
    Secondary,
}

/// Address of a connector block on some rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Rank holding the connectors
    pub rank: u32,
    /// Thread holding the connectors
    pub tid: u16,
    /// Synapse model index
    pub syn_id: u16,
    /// First local connection index (or compressed index)
    pub lcid: u32,
    /// Addressing mode
    pub kind: TargetKind,
}

impl Target {
    /// Address of a plain spike connector block
    pub fn spike(rank: u32, tid: u16, syn: SynId, lcid: u32) -> Self {
        Self {
            rank,
            tid,
            syn_id: syn.raw(),
            lcid,
            kind: TargetKind::Spike,
        }
    }

    /// Address of a compressed table entry
    pub fn compressed(rank: u32, syn: SynId, index: u32) -> Self {
        Self {
            rank,
            tid: 0,
            syn_id: syn.raw(),
            lcid: index,
            kind: TargetKind::Compressed,
        }
    }

    /// Marker that `rank` wants this source's secondary values
    pub fn secondary(rank: u32, syn: SynId) -> Self {
        Self {
            rank,
            tid: 0,
            syn_id: syn.raw(),
            lcid: 0,
            kind: TargetKind::Secondary,
        }
    }

    /// Synapse model index
    pub fn syn(&self) -> SynId {
        SynId::new(self.syn_id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r{}/t{}/syn{}/{} ({:?})",
            self.rank, self.tid, self.syn_id, self.lcid, self.kind
        )
    }
}

/// One routing record: `source` has connectors at `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetData {
    /// Presynaptic node, owned by the receiving rank
    pub source: NodeId,
    /// Where its connectors live
    pub target: Target,
}

impl TargetData {
    /// Create a routing record
    pub fn new(source: NodeId, target: Target) -> Self {
        Self { source, target }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_targets_sort_by_rank_then_thread() {
        let mut targets = vec![
            Target::spike(1, 0, SynId::new(0), 4),
            Target::spike(0, 1, SynId::new(0), 0),
            Target::spike(0, 0, SynId::new(1), 2),
        ];
        targets.sort();
        assert_eq!(targets[0].rank, 0);
        assert_eq!(targets[0].tid, 0);
        assert_eq!(targets[1].tid, 1);
        assert_eq!(targets[2].rank, 1);
    }

    #[test]
    fn test_target_data_survives_codec() {
        let records = vec![
            TargetData::new(NodeId::new(3), Target::spike(1, 1, SynId::new(0), 17)),
            TargetData::new(NodeId::new(9), Target::compressed(0, SynId::new(2), 5)),
            TargetData::new(NodeId::new(9), Target::secondary(0, SynId::new(1))),
        ];
        let bytes = codec::encode(&records).unwrap();
        let back: Vec<TargetData> = codec::decode(&bytes).unwrap();
        assert_eq!(records, back);
        assert_eq!(back[1].target.syn(), SynId::new(2));
    }

    #[test]
    fn test_display() {
        let t = Target::spike(1, 0, SynId::new(2), 8);
        assert_eq!(t.to_string(), "r1/t0/syn2/8 (Spike)");
    }
}
