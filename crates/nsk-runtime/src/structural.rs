//! Structural plasticity
//!
//! Synaptic elements grow and shrink with each node's calcium trace. At
//! every update the kernel gathers element counts from all ranks, removes
//! connections where bound elements exceed the element count, and pairs
//! vacant pre- and postsynaptic elements into new connections. All ranks see
//! the same gathered lists and draw from the same seeded streams, so they
//! reach the same decisions without further communication.

use crate::connection::SynapseSpec;
use crate::rng::{stream_rng, DOMAIN_STRUCTURAL};
use crate::time::Step;
use nsk_wire::{NodeId, SynId};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stream phase of presynaptic deletions
pub const PHASE_DELETE_PRE: u64 = 0;
/// Stream phase of postsynaptic deletions
pub const PHASE_DELETE_POST: u64 = 1;
/// Stream phase of the presynaptic vacancy shuffle
pub const PHASE_VACANT_PRE: u64 = 2;
/// Stream phase of the postsynaptic vacancy shuffle
pub const PHASE_VACANT_POST: u64 = 3;

/// Which elements a plastic synapse model connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralPlasticityRule {
    /// Element name on the presynaptic node
    pub pre_element: String,
    /// Element name on the postsynaptic node
    pub post_element: String,
    /// Synapse model and parameters of created connections
    #[serde(default)]
    pub synapse: SynapseSpec,
    /// Allow a node to connect to itself
    #[serde(default)]
    pub allow_autapses: bool,
}

impl StructuralPlasticityRule {
    /// Rule pairing `pre_element` with `post_element` through static synapses
    pub fn new(pre_element: impl Into<String>, post_element: impl Into<String>) -> Self {
        Self {
            pre_element: pre_element.into(),
            post_element: post_element.into(),
            synapse: SynapseSpec::default(),
            allow_autapses: false,
        }
    }

    /// Set the synapse spec
    pub fn with_synapse(mut self, synapse: SynapseSpec) -> Self {
        self.synapse = synapse;
        self
    }

    /// Allow or forbid autapses
    pub fn with_autapses(mut self, allow: bool) -> Self {
        self.allow_autapses = allow;
        self
    }
}

/// A rule with its synapse parameters resolved
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedRule {
    pub rule: StructuralPlasticityRule,
    pub syn: SynId,
    pub weight: f64,
    pub delay: Step,
}

/// Controller state kept by the kernel
#[derive(Debug, Clone, Default)]
pub(crate) struct StructuralState {
    pub enabled: bool,
    pub rules: Vec<ResolvedRule>,
    pub steps_since_update: Step,
    pub updates: u64,
}

/// Outcome of one update, identical on every rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralUpdateReport {
    /// Connections removed
    pub deleted: u64,
    /// Connections created
    pub created: u64,
}

impl StructuralUpdateReport {
    /// Whether connectivity changed
    pub fn changed(&self) -> bool {
        self.deleted > 0 || self.created > 0
    }
}

/// Key of the stream used to shuffle on behalf of `node` (0 for
/// whole-list shuffles)
pub fn shuffle_rng(seed: u64, update: u64, rule: u64, phase: u64, node: u64) -> rand_chacha::ChaCha8Rng {
    stream_rng(seed, &[DOMAIN_STRUCTURAL, update, rule, phase, node])
}

/// Choose which connections to delete.
///
/// `deleting` maps each node to the number of its bound elements that must
/// go, `candidates` holds the global sorted (source, target) list and `key`
/// picks the endpoint the count belongs to. For every deleting node its
/// candidate pairs are shuffled with the node's own stream and the first `n`
/// are taken.
pub fn choose_deletions<K>(
    deleting: &BTreeMap<NodeId, u32>,
    candidates: &[(NodeId, NodeId)],
    key: K,
    mut rng_for: impl FnMut(NodeId) -> rand_chacha::ChaCha8Rng,
) -> Vec<(NodeId, NodeId)>
where
    K: Fn(&(NodeId, NodeId)) -> NodeId,
{
    let mut by_node: BTreeMap<NodeId, Vec<(NodeId, NodeId)>> = BTreeMap::new();
    for pair in candidates {
        if deleting.contains_key(&key(pair)) {
            by_node.entry(key(pair)).or_default().push(*pair);
        }
    }

    let mut chosen = Vec::new();
    for (node, &n) in deleting {
        let Some(pairs) = by_node.get_mut(node) else {
            continue;
        };
        let mut rng = rng_for(*node);
        pairs.shuffle(&mut rng);
        chosen.extend(pairs.iter().take(n as usize).copied());
    }
    chosen
}

/// Repeat each id by its count, in id order
pub fn expand_counts(counts: &BTreeMap<NodeId, u32>) -> Vec<NodeId> {
    counts
        .iter()
        .flat_map(|(id, n)| std::iter::repeat(*id).take(*n as usize))
        .collect()
}

/// Pair vacant elements index-wise after shuffling both sides.
/// `min(|pre|, |post|)` pairs are formed; autapses are dropped when not
/// allowed.
pub fn pair_vacancies(
    pre: &BTreeMap<NodeId, u32>,
    post: &BTreeMap<NodeId, u32>,
    allow_autapses: bool,
    pre_rng: &mut rand_chacha::ChaCha8Rng,
    post_rng: &mut rand_chacha::ChaCha8Rng,
) -> Vec<(NodeId, NodeId)> {
    let mut pre = expand_counts(pre);
    let mut post = expand_counts(post);
    pre.shuffle(pre_rng);
    post.shuffle(post_rng);
    pre.into_iter()
        .zip(post)
        .filter(|(s, t)| allow_autapses || s != t)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> NodeId {
        NodeId::new(n)
    }

    fn counts(entries: &[(u64, u32)]) -> BTreeMap<NodeId, u32> {
        entries.iter().map(|&(n, c)| (id(n), c)).collect()
    }

    #[test]
    fn test_shuffle_is_deterministic_permutation() {
        let mut a: Vec<u64> = (0..50).collect();
        let mut b = a.clone();
        a.shuffle(&mut shuffle_rng(7, 3, 0, PHASE_VACANT_PRE, 0));
        b.shuffle(&mut shuffle_rng(7, 3, 0, PHASE_VACANT_PRE, 0));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(a, sorted);
    }

    #[test]
    fn test_creates_min_of_both_sides() {
        let pre = counts(&[(1, 3), (2, 2)]);
        let post = counts(&[(5, 2), (6, 1)]);
        let pairs = pair_vacancies(
            &pre,
            &post,
            true,
            &mut shuffle_rng(1, 0, 0, PHASE_VACANT_PRE, 0),
            &mut shuffle_rng(1, 0, 0, PHASE_VACANT_POST, 0),
        );
        assert_eq!(pairs.len(), 3);
        let to_five = pairs.iter().filter(|(_, t)| *t == id(5)).count();
        assert_eq!(to_five, 2);
    }

    #[test]
    fn test_autapses_skipped() {
        let pre = counts(&[(4, 5)]);
        let post = counts(&[(4, 5)]);
        let pairs = pair_vacancies(
            &pre,
            &post,
            false,
            &mut shuffle_rng(1, 0, 0, PHASE_VACANT_PRE, 0),
            &mut shuffle_rng(1, 0, 0, PHASE_VACANT_POST, 0),
        );
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_deletions_take_n_per_node() {
        let deleting = counts(&[(1, 2), (3, 5)]);
        let candidates = vec![
            (id(1), id(7)),
            (id(1), id(8)),
            (id(1), id(9)),
            (id(2), id(7)),
            (id(3), id(8)),
        ];
        let chosen = choose_deletions(&deleting, &candidates, |p| p.0, |node| {
            shuffle_rng(9, 0, 0, PHASE_DELETE_PRE, node.raw())
        });
        assert_eq!(chosen.iter().filter(|p| p.0 == id(1)).count(), 2);
        assert_eq!(chosen.iter().filter(|p| p.0 == id(3)).count(), 1);
        assert!(chosen.iter().all(|p| p.0 != id(2)));

        let again = choose_deletions(&deleting, &candidates, |p| p.0, |node| {
            shuffle_rng(9, 0, 0, PHASE_DELETE_PRE, node.raw())
        });
        assert_eq!(chosen, again);
    }

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: StructuralPlasticityRule =
            serde_json::from_str(r#"{"pre_element": "axon", "post_element": "dendrite"}"#).unwrap();
        assert_eq!(rule, StructuralPlasticityRule::new("axon", "dendrite"));
    }
}
