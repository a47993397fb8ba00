//! Delivery routing tables
//!
//! After restructuring, every rank walks its connector tables and tells the
//! owner of each source where the source's connector blocks live. The owner
//! keeps, per local source, the sorted list of [`Target`]s it addresses
//! spikes to. Tables are tagged with the connectivity fingerprint they were
//! built from.

use super::synapse::SynapseKind;
use super::tables::ThreadConnections;
use crate::error::{KernelError, Result};
use crate::node::NodeStore;
use crate::vp::VpIndex;
use nsk_wire::{Fingerprint, NodeId, SynId, Target, TargetData, TargetKind};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

/// Connector blocks of one source on one thread
pub type BlockList = SmallVec<[(SynId, u32); 2]>;

/// Routing state of one thread
#[derive(Debug, Clone, Default)]
pub struct ThreadRoutes {
    spike_targets: Vec<SmallVec<[Target; 4]>>,
    secondary_ranks: Vec<SmallVec<[u32; 2]>>,
    secondary_blocks: HashMap<NodeId, BlockList>,
}

impl ThreadRoutes {
    /// Where spikes of local node `lid` go
    pub fn spike_targets(&self, lid: u32) -> &[Target] {
        self.spike_targets.get(lid as usize).map_or(&[], |t| t.as_slice())
    }

    /// Ranks that need secondary values of local node `lid`
    pub fn secondary_ranks(&self, lid: u32) -> &[u32] {
        self.secondary_ranks.get(lid as usize).map_or(&[], |r| r.as_slice())
    }

    /// Secondary connector blocks fed by `source` on this thread
    pub fn secondary_blocks(&self, source: NodeId) -> &[(SynId, u32)] {
        self.secondary_blocks.get(&source).map_or(&[], |b| b.as_slice())
    }

    /// Whether this thread holds secondary connectors
    pub fn has_secondary_connectors(&self) -> bool {
        !self.secondary_blocks.is_empty()
    }

    /// Total number of outgoing spike targets
    pub fn num_spike_targets(&self) -> usize {
        self.spike_targets.iter().map(SmallVec::len).sum()
    }

    pub(crate) fn set_secondary_blocks(&mut self, blocks: HashMap<NodeId, BlockList>) {
        self.secondary_blocks = blocks;
    }

    /// Install received routing records for this thread's sources
    pub fn install(&mut self, records: &[TargetData], nodes: &NodeStore) -> Result<()> {
        self.spike_targets = vec![SmallVec::new(); nodes.len()];
        self.secondary_ranks = vec![SmallVec::new(); nodes.len()];

        for record in records {
            let lid = nodes.local_index(record.source).ok_or_else(|| {
                KernelError::protocol_violation(format!(
                    "routing record for node {} which this thread does not own",
                    record.source
                ))
            })? as usize;
            match record.target.kind {
                TargetKind::Secondary => self.secondary_ranks[lid].push(record.target.rank),
                TargetKind::Spike | TargetKind::Compressed => self.spike_targets[lid].push(record.target),
            }
        }

        for targets in &mut self.spike_targets {
            targets.sort_unstable();
            targets.dedup();
        }
        for ranks in &mut self.secondary_ranks {
            ranks.sort_unstable();
            ranks.dedup();
        }
        Ok(())
    }
}

/// Receiver-side index of compressed spikes: per synapse model, per entry,
/// the (thread, lcid) blocks a single record fans out to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompressedTable {
    entries: Vec<Vec<Vec<(u16, u32)>>>,
}

impl CompressedTable {
    /// Blocks of entry `index` of model `syn`
    pub fn lookup(&self, syn: u16, index: u32) -> &[(u16, u32)] {
        self.entries
            .get(syn as usize)
            .and_then(|e| e.get(index as usize))
            .map_or(&[], Vec::as_slice)
    }

    /// Number of entries over all models
    pub fn len(&self) -> usize {
        self.entries.iter().map(Vec::len).sum()
    }

    /// Whether no entry exists
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rank-level routing state
#[derive(Debug, Clone, Default)]
pub struct RoutingState {
    /// Fingerprint the tables were built from
    pub fingerprint: Option<Fingerprint>,
    /// Compressed spike index
    pub compressed: CompressedTable,
    /// Some rank holds secondary connectors
    pub has_secondary: bool,
}

impl RoutingState {
    /// Whether tables match the current connectivity
    pub fn is_current(&self, fingerprint: Fingerprint) -> bool {
        self.fingerprint == Some(fingerprint)
    }

    /// Drop the tables
    pub fn invalidate(&mut self) {
        self.fingerprint = None;
    }
}

/// Routing records produced by one thread, with the owner rank of each
/// source. Spiking models are skipped when `compressed` is set; they are
/// handled rank-wide by [`build_compressed`].
pub fn thread_target_data(
    tid: usize,
    connections: &ThreadConnections,
    kinds: &[SynapseKind],
    compressed: bool,
    vp: &VpIndex,
) -> (Vec<(usize, TargetData)>, HashMap<NodeId, BlockList>) {
    let rank = vp.rank() as u32;
    let mut records = Vec::new();
    let mut secondary_blocks: HashMap<NodeId, BlockList> = HashMap::new();

    for (syn, table) in connections.tables() {
        let kind = kinds.get(syn.index()).copied().unwrap_or(SynapseKind::Spiking);
        match kind {
            SynapseKind::Spiking if compressed => {}
            SynapseKind::Spiking => {
                for (source, lcid) in table.blocks() {
                    let target = Target::spike(rank, tid as u16, syn, lcid);
                    records.push((vp.node_id_to_rank(source), TargetData::new(source, target)));
                }
            }
            SynapseKind::Secondary => {
                for (source, lcid) in table.blocks() {
                    let blocks = secondary_blocks.entry(source).or_default();
                    if blocks.is_empty() {
                        let target = Target::secondary(rank, syn);
                        records.push((vp.node_id_to_rank(source), TargetData::new(source, target)));
                    }
                    blocks.push((syn, lcid));
                }
            }
        }
    }
    (records, secondary_blocks)
}

/// Build the compressed index over all threads of this rank. Each source
/// gets one record per spiking synapse model, however many threads hold its
/// targets.
pub fn build_compressed(
    threads: &[&ThreadConnections],
    kinds: &[SynapseKind],
    vp: &VpIndex,
) -> (CompressedTable, Vec<(usize, TargetData)>) {
    let rank = vp.rank() as u32;
    let num_syn = threads
        .iter()
        .map(|t| t.tables().count())
        .max()
        .unwrap_or(0);
    let mut table = CompressedTable {
        entries: vec![Vec::new(); num_syn],
    };
    let mut records = Vec::new();

    for (syn_index, entries) in table.entries.iter_mut().enumerate() {
        let syn = SynId::new(syn_index as u16);
        if kinds.get(syn_index) != Some(&SynapseKind::Spiking) {
            continue;
        }
        let mut by_source: BTreeMap<NodeId, Vec<(u16, u32)>> = BTreeMap::new();
        for (tid, connections) in threads.iter().enumerate() {
            if let Some(t) = connections.table(syn) {
                for (source, lcid) in t.blocks() {
                    by_source.entry(source).or_default().push((tid as u16, lcid));
                }
            }
        }
        for (source, blocks) in by_source {
            let index = entries.len() as u32;
            entries.push(blocks);
            records.push((
                vp.node_id_to_rank(source),
                TargetData::new(source, Target::compressed(rank, syn, index)),
            ));
        }
    }
    (table, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connector::Connector;
    use crate::node::models::InputProbe;
    use crate::node::NodeSlot;
    use crate::synaptic::{CalciumParams, CalciumTrace};

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn conns(pairs: &[(u64, u64)], syn: SynId) -> ThreadConnections {
        let mut c = ThreadConnections::new();
        for &(s, t) in pairs {
            c.add(syn, id(s), Connector::new(id(t), 0, 1.0, 1)).unwrap();
        }
        c.restructure().unwrap();
        c
    }

    #[test]
    fn test_one_record_per_block() {
        let vp = VpIndex::new(2, 2, 1);
        let c = conns(&[(4, 1), (4, 5), (7, 1)], SynId::new(0));
        let (records, secondary) = thread_target_data(1, &c, &[SynapseKind::Spiking], false, &vp);
        assert!(secondary.is_empty());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, 0);
        assert_eq!(records[0].1.target, Target::spike(1, 1, SynId::new(0), 0));
        assert_eq!(records[1].0, 1);
        assert_eq!(records[1].1.target.lcid, 2);
    }

    #[test]
    fn test_secondary_records_once_per_source() {
        let vp = VpIndex::new(1, 1, 0);
        let syn = SynId::new(1);
        let c = conns(&[(2, 3), (2, 4)], syn);
        let kinds = [SynapseKind::Spiking, SynapseKind::Secondary];
        let (records, secondary) = thread_target_data(0, &c, &kinds, false, &vp);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.target.kind, TargetKind::Secondary);
        assert_eq!(secondary[&id(2)].as_slice(), &[(syn, 0)]);
    }

    #[test]
    fn test_compressed_merges_threads() {
        let vp = VpIndex::new(2, 1, 0);
        let syn = SynId::new(0);
        let t0 = conns(&[(3, 2), (5, 2)], syn);
        let t1 = conns(&[(3, 1)], syn);
        let (table, records) = build_compressed(&[&t0, &t1], &[SynapseKind::Spiking], &vp);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].1.source, id(3));
        assert_eq!(table.lookup(0, 0), &[(0, 0), (1, 0)]);
        assert_eq!(table.lookup(0, 1), &[(0, 1)]);
        assert!(table.lookup(0, 9).is_empty());
    }

    #[test]
    fn test_install_sorts_targets() {
        let mut store = NodeStore::new();
        let calcium = CalciumTrace::new(&CalciumParams::default(), 0.1).unwrap();
        store.push(NodeSlot::new(id(2), Box::new(InputProbe::default()), Default::default(), calcium));

        let syn = SynId::new(0);
        let records = vec![
            TargetData::new(id(2), Target::spike(1, 0, syn, 4)),
            TargetData::new(id(2), Target::spike(0, 1, syn, 0)),
            TargetData::new(id(2), Target::secondary(1, SynId::new(1))),
        ];
        let mut routes = ThreadRoutes::default();
        routes.install(&records, &store).unwrap();
        assert_eq!(routes.spike_targets(0)[0].rank, 0);
        assert_eq!(routes.spike_targets(0).len(), 2);
        assert_eq!(routes.secondary_ranks(0), &[1]);

        let foreign = vec![TargetData::new(id(9), Target::spike(0, 0, syn, 0))];
        assert!(matches!(
            routes.install(&foreign, &store),
            Err(KernelError::ProtocolViolation { .. })
        ));
    }
}
