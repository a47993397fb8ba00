//! Per-thread node storage

use super::{Node, NodeOutput, RingBuffer, StepContext};
use crate::synaptic::{CalciumTrace, ElementCounts, SynapticElement};
use nsk_wire::NodeId;
use std::collections::BTreeMap;

/// A node together with the kernel state attached to it
#[derive(Debug)]
pub struct NodeSlot {
    /// Global id
    pub node_id: NodeId,
    /// Model instance
    pub node: Box<dyn Node>,
    /// Delayed input
    pub ring: RingBuffer,
    /// Synaptic elements by name
    pub elements: BTreeMap<String, SynapticElement>,
    /// Calcium trace
    pub calcium: CalciumTrace,
    /// Secondary values emitted during the current cycle, one per lag
    pub(crate) secondary_out: Option<Vec<f64>>,
}

impl NodeSlot {
    /// Wrap a freshly built node
    pub fn new(
        node_id: NodeId,
        node: Box<dyn Node>,
        elements: BTreeMap<String, SynapticElement>,
        calcium: CalciumTrace,
    ) -> Self {
        Self {
            node_id,
            node,
            ring: RingBuffer::default(),
            elements,
            calcium,
            secondary_out: None,
        }
    }

    /// Update the node for one step and fold its spikes into the calcium trace
    pub fn update(&mut self, ctx: &StepContext, cycle_len: usize) -> NodeOutput {
        let input = self.ring.take(ctx.step);
        let output = self.node.update(ctx, input);
        self.calcium
            .step(output.spike.map_or(0, |spike| spike.multiplicity));
        if let Some(value) = output.secondary {
            let values = self
                .secondary_out
                .get_or_insert_with(|| vec![0.0; cycle_len]);
            values[ctx.lag as usize] = value;
        }
        output
    }

    /// Take the secondary values collected this cycle
    pub(crate) fn take_secondary(&mut self) -> Option<Vec<f64>> {
        self.secondary_out.take()
    }

    /// Counts of a named element, if the node has it
    pub fn element_counts(&self, name: &str) -> Option<ElementCounts> {
        self.elements.get(name).map(SynapticElement::counts)
    }
}

/// Nodes owned by one thread, ordered by id
#[derive(Debug, Default)]
pub struct NodeStore {
    slots: Vec<NodeSlot>,
}

impl NodeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Ids are assigned in increasing order, so appending
    /// keeps the store sorted and existing local indices stable.
    pub fn push(&mut self, slot: NodeSlot) -> u32 {
        debug_assert!(self.slots.last().map_or(true, |last| last.node_id < slot.node_id));
        self.slots.push(slot);
        (self.slots.len() - 1) as u32
    }

    /// Local index of a node
    pub fn local_index(&self, id: NodeId) -> Option<u32> {
        self.slots
            .binary_search_by_key(&id, |slot| slot.node_id)
            .ok()
            .map(|i| i as u32)
    }

    /// Slot by local index
    pub fn get(&self, lid: u32) -> Option<&NodeSlot> {
        self.slots.get(lid as usize)
    }

    /// Mutable slot by local index
    pub fn get_mut(&mut self, lid: u32) -> Option<&mut NodeSlot> {
        self.slots.get_mut(lid as usize)
    }

    /// Slot by id
    pub fn find(&self, id: NodeId) -> Option<&NodeSlot> {
        self.local_index(id).and_then(|lid| self.get(lid))
    }

    /// Mutable slot by id
    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut NodeSlot> {
        self.local_index(id).and_then(move |lid| self.get_mut(lid))
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterate in id order
    pub fn iter(&self) -> impl Iterator<Item = &NodeSlot> {
        self.slots.iter()
    }

    /// Iterate mutably in id order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeSlot> {
        self.slots.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::models::{InputProbe, RateSource};
    use crate::synaptic::CalciumParams;

    fn slot(id: u64, node: Box<dyn Node>) -> NodeSlot {
        let calcium = CalciumTrace::new(&CalciumParams::default(), 0.1).unwrap();
        NodeSlot::new(NodeId::new(id), node, BTreeMap::new(), calcium)
    }

    #[test]
    fn test_lookup_by_id() {
        let mut store = NodeStore::new();
        for id in [2u64, 6, 10] {
            store.push(slot(id, Box::new(InputProbe::default())));
        }
        assert_eq!(store.local_index(NodeId::new(6)), Some(1));
        assert_eq!(store.local_index(NodeId::new(7)), None);
        assert_eq!(store.find(NodeId::new(10)).unwrap().node.model(), "input_probe");
    }

    #[test]
    fn test_secondary_values_collected_per_lag() {
        let mut s = slot(1, Box::new(RateSource::new(1.5)));
        for lag in 0..3 {
            let ctx = StepContext {
                step: 10 + lag,
                lag,
                resolution_ms: 0.1,
            };
            s.update(&ctx, 3);
        }
        assert_eq!(s.take_secondary(), Some(vec![1.5, 1.5, 1.5]));
        assert_eq!(s.take_secondary(), None);
    }
}
