//! Per-thread connector tables with their parallel source tables

use super::connector::{Connector, SourceEntry};
use crate::error::{KernelError, Result};
use nsk_wire::{NodeId, SynId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Connectors of one synapse model on one thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTable {
    connectors: Vec<Connector>,
    sources: Vec<SourceEntry>,
}

impl ConnectorTable {
    /// Connectors in local-index order
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Source entries, empty once cleared
    pub fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }

    /// Number of connectors, including disabled ones
    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    /// Whether the table holds no connectors
    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Start of every source block, as (source, lcid). Requires a
    /// restructured table.
    pub fn blocks(&self) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.sources.iter().enumerate().filter_map(move |(i, entry)| {
            let starts_block = i == 0 || self.sources[i - 1].node_id != entry.node_id;
            starts_block.then_some((entry.node_id, i as u32))
        })
    }

    /// Visit the enabled connectors of the block starting at `lcid`
    pub fn for_each_in_block<F>(&mut self, lcid: u32, mut f: F) -> usize
    where
        F: FnMut(&mut Connector),
    {
        let mut visited = 0;
        let mut i = lcid as usize;
        while let Some(connector) = self.connectors.get_mut(i) {
            if !connector.disabled {
                f(connector);
                visited += 1;
            }
            if !connector.has_subsequent {
                break;
            }
            i += 1;
        }
        visited
    }

    fn restructure(&mut self) -> usize {
        let before = self.connectors.len();
        let mut rows: Vec<(SourceEntry, Connector)> = self
            .sources
            .drain(..)
            .zip(self.connectors.drain(..))
            .filter(|(_, c)| !c.disabled)
            .collect();
        rows.sort_by_key(|(source, _)| source.node_id);

        for (source, connector) in rows {
            self.sources.push(source);
            self.connectors.push(connector);
        }
        for i in 0..self.connectors.len() {
            self.connectors[i].has_subsequent = self
                .sources
                .get(i + 1)
                .map_or(false, |next| next.node_id == self.sources[i].node_id);
        }
        before - self.connectors.len()
    }
}

/// All connector tables of one thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadConnections {
    tables: Vec<ConnectorTable>,
    sources_cleared: bool,
    restructured: bool,
}

impl ThreadConnections {
    /// Create empty tables
    pub fn new() -> Self {
        Self {
            restructured: true,
            ..Default::default()
        }
    }

    /// Table of a synapse model, if any connector of it exists here
    pub fn table(&self, syn: SynId) -> Option<&ConnectorTable> {
        self.tables.get(syn.index())
    }

    /// Mutable table of a synapse model
    pub fn table_mut(&mut self, syn: SynId) -> Option<&mut ConnectorTable> {
        self.tables.get_mut(syn.index())
    }

    /// Tables in synapse id order
    pub fn tables(&self) -> impl Iterator<Item = (SynId, &ConnectorTable)> {
        self.tables
            .iter()
            .enumerate()
            .map(|(i, t)| (SynId::new(i as u16), t))
    }

    /// Whether the source table was released
    pub fn sources_cleared(&self) -> bool {
        self.sources_cleared
    }

    /// Whether tables are compacted, sorted and flagged
    pub fn is_restructured(&self) -> bool {
        self.restructured
    }

    fn require_sources(&self) -> Result<()> {
        if self.sources_cleared {
            return Err(KernelError::SourceTableCleared);
        }
        Ok(())
    }

    /// Append a connector
    pub fn add(&mut self, syn: SynId, source: NodeId, connector: Connector) -> Result<u32> {
        self.require_sources()?;
        if self.tables.len() <= syn.index() {
            self.tables.resize_with(syn.index() + 1, ConnectorTable::default);
        }
        let table = &mut self.tables[syn.index()];
        table.sources.push(SourceEntry::new(source));
        table.connectors.push(connector);
        self.restructured = false;
        Ok((table.len() - 1) as u32)
    }

    /// Find one enabled connector per (source, target) pair without
    /// changing anything. A pair listed twice claims two connectors.
    pub fn plan_disconnect(&self, syn: SynId, pairs: &[(NodeId, NodeId)]) -> Result<Vec<u32>> {
        self.require_sources()?;
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mut index: HashMap<(NodeId, NodeId), VecDeque<u32>> = HashMap::new();
        if let Some(table) = self.table(syn) {
            for (lcid, (source, connector)) in table.sources.iter().zip(&table.connectors).enumerate() {
                if !connector.disabled {
                    index
                        .entry((source.node_id, connector.target))
                        .or_default()
                        .push_back(lcid as u32);
                }
            }
        }

        pairs
            .iter()
            .map(|&(source, target)| {
                index
                    .get_mut(&(source, target))
                    .and_then(VecDeque::pop_front)
                    .ok_or_else(|| {
                        KernelError::illegal_connection(format!(
                            "no {} connection from {} to {}",
                            syn, source, target
                        ))
                    })
            })
            .collect()
    }

    /// Disable connectors by local index
    pub fn disable(&mut self, syn: SynId, lcids: &[u32]) {
        if let Some(table) = self.tables.get_mut(syn.index()) {
            for &lcid in lcids {
                if let Some(connector) = table.connectors.get_mut(lcid as usize) {
                    connector.disabled = true;
                }
                if let Some(source) = table.sources.get_mut(lcid as usize) {
                    source.disabled = true;
                }
            }
        }
        if !lcids.is_empty() {
            self.restructured = false;
        }
    }

    /// Remove disabled connectors, sort each table by source and recompute
    /// block flags. Returns the number of connectors removed.
    pub fn restructure(&mut self) -> Result<usize> {
        if self.restructured {
            return Ok(0);
        }
        self.require_sources()?;
        let removed = self.tables.iter_mut().map(ConnectorTable::restructure).sum();
        self.restructured = true;
        Ok(removed)
    }

    /// Release the source tables
    pub fn clear_sources(&mut self) {
        for table in &mut self.tables {
            table.sources = Vec::new();
        }
        self.sources_cleared = true;
    }

    /// Enabled connectors of a model
    pub fn num_connections(&self, syn: SynId) -> usize {
        self.table(syn)
            .map_or(0, |t| t.connectors.iter().filter(|c| !c.disabled).count())
    }

    /// Enabled connectors of all models
    pub fn total_connections(&self) -> usize {
        self.tables
            .iter()
            .map(|t| t.connectors.iter().filter(|c| !c.disabled).count())
            .sum()
    }

    /// Enabled (source, target) pairs of a model whose source is in `sources`
    pub fn pairs_from(&self, syn: SynId, sources: &HashSet<NodeId>) -> Result<Vec<(NodeId, NodeId)>> {
        self.pairs_where(syn, |source, _| sources.contains(&source))
    }

    /// Enabled (source, target) pairs of a model whose target is in `targets`
    pub fn pairs_to(&self, syn: SynId, targets: &HashSet<NodeId>) -> Result<Vec<(NodeId, NodeId)>> {
        self.pairs_where(syn, |_, target| targets.contains(&target))
    }

    fn pairs_where<F>(&self, syn: SynId, keep: F) -> Result<Vec<(NodeId, NodeId)>>
    where
        F: Fn(NodeId, NodeId) -> bool,
    {
        self.require_sources()?;
        Ok(self
            .table(syn)
            .map(|table| {
                table
                    .sources
                    .iter()
                    .zip(&table.connectors)
                    .filter(|(s, c)| !c.disabled && keep(s.node_id, c.target))
                    .map(|(s, c)| (s.node_id, c.target))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYN: SynId = SynId::new(0);

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn build(pairs: &[(u64, u64)]) -> ThreadConnections {
        let mut conns = ThreadConnections::new();
        for (i, &(s, t)) in pairs.iter().enumerate() {
            conns
                .add(SYN, id(s), Connector::new(id(t), i as u32, 1.0, 10))
                .unwrap();
        }
        conns
    }

    #[test]
    fn test_restructure_sorts_and_flags_blocks() {
        let mut conns = build(&[(5, 1), (2, 1), (5, 3), (2, 4), (9, 1)]);
        assert!(!conns.is_restructured());
        conns.restructure().unwrap();

        let table = conns.table(SYN).unwrap();
        let sources: Vec<u64> = table.sources().iter().map(|s| s.node_id.raw()).collect();
        assert_eq!(sources, vec![2, 2, 5, 5, 9]);
        let targets: Vec<u64> = table.connectors().iter().map(|c| c.target.raw()).collect();
        assert_eq!(targets, vec![1, 4, 1, 3, 1]);
        let flags: Vec<bool> = table.connectors().iter().map(|c| c.has_subsequent).collect();
        assert_eq!(flags, vec![true, false, true, false, false]);
        assert_eq!(
            table.blocks().collect::<Vec<_>>(),
            vec![(id(2), 0), (id(5), 2), (id(9), 4)]
        );
    }

    #[test]
    fn test_restructure_is_idempotent() {
        let mut conns = build(&[(3, 1), (1, 2), (3, 2)]);
        conns.restructure().unwrap();
        let first = bincode::serialize(&conns).unwrap();
        conns.restructure().unwrap();
        assert_eq!(bincode::serialize(&conns).unwrap(), first);
    }

    #[test]
    fn test_disconnect_and_compact() {
        let mut conns = build(&[(1, 2), (1, 3), (1, 2)]);
        let lcids = conns.plan_disconnect(SYN, &[(id(1), id(2))]).unwrap();
        assert_eq!(lcids, vec![0]);
        conns.disable(SYN, &lcids);
        assert_eq!(conns.num_connections(SYN), 2);

        assert_eq!(conns.restructure().unwrap(), 1);
        assert_eq!(conns.table(SYN).unwrap().len(), 2);
    }

    #[test]
    fn test_plan_disconnect_missing_pair_changes_nothing() {
        let conns = build(&[(1, 2)]);
        let before = conns.clone();
        let err = conns
            .plan_disconnect(SYN, &[(id(1), id(2)), (id(1), id(2))])
            .unwrap_err();
        assert!(err.is_illegal_connection());
        assert_eq!(conns, before);
    }

    #[test]
    fn test_block_walk_skips_disabled() {
        let mut conns = build(&[(1, 2), (1, 3), (1, 4)]);
        conns.restructure().unwrap();
        conns.disable(SYN, &[1]);
        let mut seen = Vec::new();
        let visited = conns
            .table_mut(SYN)
            .unwrap()
            .for_each_in_block(0, |c| seen.push(c.target.raw()));
        assert_eq!(visited, 2);
        assert_eq!(seen, vec![2, 4]);
    }

    #[test]
    fn test_cleared_sources() {
        let mut conns = build(&[(1, 2)]);
        conns.restructure().unwrap();
        conns.clear_sources();
        assert!(matches!(
            conns.add(SYN, id(1), Connector::new(id(3), 0, 1.0, 1)),
            Err(KernelError::SourceTableCleared)
        ));
        assert!(conns.pairs_from(SYN, &HashSet::from([id(1)])).is_err());
        assert_eq!(conns.num_connections(SYN), 1);
    }

    #[test]
    fn test_pair_queries() {
        let conns = build(&[(1, 2), (3, 2), (1, 4)]);
        let from = conns.pairs_from(SYN, &HashSet::from([id(1)])).unwrap();
        assert_eq!(from, vec![(id(1), id(2)), (id(1), id(4))]);
        let to = conns.pairs_to(SYN, &HashSet::from([id(2)])).unwrap();
        assert_eq!(to, vec![(id(1), id(2)), (id(3), id(2))]);
        assert!(conns.pairs_from(SynId::new(3), &HashSet::new()).unwrap().is_empty());
    }
}
