//! Read-only views of connections

use nsk_wire::{NodeId, SynId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One connection as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Presynaptic node
    pub source: NodeId,
    /// Postsynaptic node
    pub target: NodeId,
    /// Synapse model name
    pub synapse_model: String,
    /// Synapse model id
    pub syn_id: SynId,
    /// Weight
    pub weight: f64,
    /// Delay (ms)
    pub delay_ms: f64,
    /// Thread holding the connector
    pub thread: usize,
    /// Local connection index
    pub lcid: u32,
}

/// Selects connections for [`crate::Kernel::get_connections`]. Empty
/// fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFilter {
    /// Only these sources
    pub sources: Option<HashSet<NodeId>>,
    /// Only these targets
    pub targets: Option<HashSet<NodeId>>,
    /// Only this synapse model
    pub synapse_model: Option<String>,
}

impl ConnectionFilter {
    /// Match everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict sources
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = NodeId>) -> Self {
        self.sources = Some(sources.into_iter().collect());
        self
    }

    /// Restrict targets
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = NodeId>) -> Self {
        self.targets = Some(targets.into_iter().collect());
        self
    }

    /// Restrict synapse model
    pub fn with_synapse_model(mut self, model: impl Into<String>) -> Self {
        self.synapse_model = Some(model.into());
        self
    }

    /// Whether a (source, target) pair passes the node filters
    pub fn matches(&self, source: NodeId, target: NodeId) -> bool {
        self.sources.as_ref().map_or(true, |s| s.contains(&source))
            && self.targets.as_ref().map_or(true, |t| t.contains(&target))
    }
}
