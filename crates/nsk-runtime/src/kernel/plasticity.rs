//! Structural plasticity: element bookkeeping and connectivity updates

use super::Kernel;
use crate::error::{KernelError, Result};
use crate::structural::{
    choose_deletions, pair_vacancies, shuffle_rng, ResolvedRule, StructuralPlasticityRule,
    StructuralUpdateReport, PHASE_DELETE_POST, PHASE_DELETE_PRE, PHASE_VACANT_POST,
    PHASE_VACANT_PRE,
};
use crate::synaptic::ElementCounts;
use nsk_wire::{codec, NodeId};
use std::collections::{BTreeMap, HashSet};

/// Which end of a connection an element sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Pre,
    Post,
}

impl Kernel {
    /// Turn structural plasticity on. Needs the source table and
    /// uncompressed spike routing.
    pub fn enable_structural_plasticity(&mut self) -> Result<()> {
        if !self.config.keep_source_table {
            return Err(KernelError::sp_conflict("keep_source_table is false"));
        }
        if self.config.use_compressed_spikes {
            return Err(KernelError::sp_conflict("use_compressed_spikes is true"));
        }
        if self.threads.iter().any(|t| t.connections.sources_cleared()) {
            return Err(KernelError::sp_conflict("source table was already released"));
        }
        self.structural.enabled = true;
        self.structural.steps_since_update = 0;
        log::info!(
            target: "nsk::structural",
            "structural plasticity enabled with {} rules, interval {} ms",
            self.structural.rules.len(),
            self.config.structural_plasticity.update_interval_ms
        );
        Ok(())
    }

    /// Turn structural plasticity off; rules stay registered
    pub fn disable_structural_plasticity(&mut self) {
        self.structural.enabled = false;
        log::info!(target: "nsk::structural", "structural plasticity disabled");
    }

    /// Whether structural plasticity runs during `run`
    pub fn structural_plasticity_enabled(&self) -> bool {
        self.structural.enabled
    }

    /// Registered rules, in update order
    pub fn structural_plasticity_rules(&self) -> Vec<StructuralPlasticityRule> {
        self.structural.rules.iter().map(|r| r.rule.clone()).collect()
    }

    /// Completed connectivity updates
    pub fn structural_plasticity_updates(&self) -> u64 {
        self.structural.updates
    }

    /// Register a rule. Its synapse delay counts towards the delay extrema
    /// like a connect call.
    pub fn add_structural_plasticity_rule(&mut self, rule: StructuralPlasticityRule) -> Result<()> {
        if rule.pre_element.is_empty() || rule.post_element.is_empty() {
            return Err(KernelError::invalid_parameter(
                "structural plasticity rule",
                format!("{:?} -> {:?}", rule.pre_element, rule.post_element),
                "non-empty element names",
            ));
        }
        let (syn, weight, delay) = self.resolve_synapse(&rule.synapse)?;
        self.extrema.observe(delay)?;
        log::debug!(
            target: "nsk::structural",
            "rule {} -> {} via {}",
            rule.pre_element,
            rule.post_element,
            rule.synapse.model
        );
        self.structural.rules.push(ResolvedRule {
            rule,
            syn,
            weight,
            delay,
        });
        Ok(())
    }

    /// Set the continuous count of a node's element. Call on every rank;
    /// ranks not owning the node ignore it.
    pub fn set_synaptic_element_z(&mut self, id: NodeId, name: &str, z: f64) -> Result<()> {
        self.check_node(id)?;
        if !(z >= 0.0 && z.is_finite()) {
            return Err(KernelError::invalid_parameter("z", z.to_string(), "finite and >= 0"));
        }
        if !self.vp.is_local_node(id) {
            return Ok(());
        }
        let thread = self.vp.node_id_to_thread(id);
        let element = self.threads[thread]
            .nodes
            .find_mut(id)
            .and_then(|slot| slot.elements.get_mut(name))
            .ok_or_else(|| {
                KernelError::invalid_parameter("synaptic element", name, format!("an element of node {}", id))
            })?;
        element.set_z(z);
        Ok(())
    }

    /// Run one connectivity update over all rules: delete connections of
    /// over-bound elements, then pair vacant elements. Collective; every rank
    /// returns the same report.
    pub fn update_structural_plasticity(&mut self) -> Result<StructuralUpdateReport> {
        if !self.structural.enabled {
            return Err(KernelError::invalid_state("structural plasticity is not enabled"));
        }
        if self.threads.iter().any(|t| t.connections.sources_cleared()) {
            return Err(KernelError::SourceTableCleared);
        }

        let update = self.structural.updates;
        let rules = self.structural.rules.clone();
        let mut report = StructuralUpdateReport::default();
        for (index, rule) in rules.iter().enumerate() {
            let index = index as u64;
            let deleted = self.delete_over_bound(update, index, rule, Side::Pre)?
                + self.delete_over_bound(update, index, rule, Side::Post)?;
            let created = self.create_from_vacancies(update, index, rule)?;
            if deleted + created > 0 {
                self.fingerprint = self.fingerprint.next();
            }
            report.deleted += deleted;
            report.created += created;
        }

        self.pool.for_each_thread(&mut self.threads, |_, state| {
            for slot in state.nodes.iter_mut() {
                for element in slot.elements.values_mut() {
                    element.decay_vacant();
                }
            }
            Ok(())
        })?;
        self.structural.updates += 1;

        log::info!(
            target: "nsk::structural",
            "update {}: {} connections deleted, {} created",
            update,
            report.deleted,
            report.created
        );
        Ok(report)
    }

    /// All ranks' nonzero `pick(counts)` of element `name`, keyed by node
    fn gather_counts<F>(&mut self, name: &str, pick: F) -> Result<BTreeMap<NodeId, u32>>
    where
        F: Fn(ElementCounts) -> u32,
    {
        let local: Vec<(NodeId, u32)> = self
            .threads
            .iter()
            .flat_map(|t| t.nodes.iter())
            .filter_map(|slot| {
                let n = pick(slot.element_counts(name)?);
                (n > 0).then_some((slot.node_id, n))
            })
            .collect();
        let parts = self.comm.all_gather(codec::encode(&local)?)?;
        let gathered: Vec<(NodeId, u32)> = codec::decode_concat(&parts)?;
        Ok(gathered.into_iter().collect())
    }

    /// All ranks' pairs, sorted
    fn gather_pairs(&mut self, local: Vec<(NodeId, NodeId)>) -> Result<Vec<(NodeId, NodeId)>> {
        let parts = self.comm.all_gather(codec::encode(&local)?)?;
        let mut pairs: Vec<(NodeId, NodeId)> = codec::decode_concat(&parts)?;
        pairs.sort_unstable();
        Ok(pairs)
    }

    fn delete_over_bound(
        &mut self,
        update: u64,
        index: u64,
        rule: &ResolvedRule,
        side: Side,
    ) -> Result<u64> {
        let (element, phase) = match side {
            Side::Pre => (&rule.rule.pre_element, PHASE_DELETE_PRE),
            Side::Post => (&rule.rule.post_element, PHASE_DELETE_POST),
        };
        let deleting = self.gather_counts(element, |c| c.deleted)?;
        if deleting.is_empty() {
            return Ok(0);
        }

        let nodes: HashSet<NodeId> = deleting.keys().copied().collect();
        let post_element = &rule.rule.post_element;
        let mut local = Vec::new();
        for state in &self.threads {
            let pairs = match side {
                Side::Pre => state.connections.pairs_from(rule.syn, &nodes)?,
                Side::Post => state.connections.pairs_to(rule.syn, &nodes)?,
            };
            local.extend(pairs.into_iter().filter(|(_, target)| {
                state
                    .nodes
                    .find(*target)
                    .map_or(false, |slot| slot.elements.contains_key(post_element))
            }));
        }
        let candidates = self.gather_pairs(local)?;

        let seed = self.config.rng_seed;
        let rng_for = |node: NodeId| shuffle_rng(seed, update, index, phase, node.raw());
        let chosen = match side {
            Side::Pre => choose_deletions(&deleting, &candidates, |p| p.0, rng_for),
            Side::Post => choose_deletions(&deleting, &candidates, |p| p.1, rng_for),
        };
        self.delete_pairs(rule, &chosen)?;
        Ok(chosen.len() as u64)
    }

    fn create_from_vacancies(&mut self, update: u64, index: u64, rule: &ResolvedRule) -> Result<u64> {
        let pre = self.gather_counts(&rule.rule.pre_element, |c| c.vacant)?;
        let post = self.gather_counts(&rule.rule.post_element, |c| c.vacant)?;
        if pre.is_empty() || post.is_empty() {
            return Ok(0);
        }

        let seed = self.config.rng_seed;
        let pairs = pair_vacancies(
            &pre,
            &post,
            rule.rule.allow_autapses,
            &mut shuffle_rng(seed, update, index, PHASE_VACANT_PRE, 0),
            &mut shuffle_rng(seed, update, index, PHASE_VACANT_POST, 0),
        );
        self.add_local_pairs(rule.syn, &pairs, rule.weight, rule.delay)?;
        self.adjust_bound(rule, &pairs, true)?;
        Ok(pairs.len() as u64)
    }

    /// Disable one connector per pair on the thread owning its target
    fn delete_pairs(&mut self, rule: &ResolvedRule, pairs: &[(NodeId, NodeId)]) -> Result<()> {
        let vp = self.vp;
        let syn = rule.syn;
        self.pool.for_each_thread(&mut self.threads, |tid, state| {
            let owned: Vec<(NodeId, NodeId)> = pairs
                .iter()
                .filter(|(_, target)| vp.is_local_node(*target) && vp.node_id_to_thread(*target) == tid)
                .copied()
                .collect();
            let lcids = state.connections.plan_disconnect(syn, &owned)?;
            state.connections.disable(syn, &lcids);
            Ok(())
        })?;
        self.adjust_bound(rule, pairs, false)
    }

    /// Bind or release the elements of local endpoints
    fn adjust_bound(&mut self, rule: &ResolvedRule, pairs: &[(NodeId, NodeId)], bind: bool) -> Result<()> {
        let vp = self.vp;
        let pre = rule.rule.pre_element.as_str();
        let post = rule.rule.post_element.as_str();
        self.pool.for_each_thread(&mut self.threads, |tid, state| {
            let ends = pairs.iter().flat_map(|&(s, t)| [(s, pre), (t, post)]);
            for (node, name) in ends {
                if !vp.is_local_node(node) || vp.node_id_to_thread(node) != tid {
                    continue;
                }
                if let Some(element) = state.nodes.find_mut(node).and_then(|slot| slot.elements.get_mut(name)) {
                    if bind {
                        element.connect(1);
                    } else {
                        element.disconnect(1);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::connection::{SynapseSpec, STATIC_SYNAPSE};
    use crate::node::models::PARROT_NEURON;
    use crate::node::NodeParams;
    use crate::synaptic::SynapticElementParams;

    fn with_element(name: &str, z: f64) -> NodeParams {
        NodeParams::default().with_element(name, SynapticElementParams::default().with_z(z).with_tau_vacant(0.0))
    }

    fn plastic_kernel(threads: usize) -> (Kernel, Vec<NodeId>, Vec<NodeId>) {
        let mut k = Kernel::new(KernelConfig::default().with_threads(threads)).unwrap();
        let pre = k.create(PARROT_NEURON, 2, &with_element("axon", 3.0)).unwrap();
        let post = k.create(PARROT_NEURON, 2, &with_element("dendrite", 2.0)).unwrap();
        k.add_structural_plasticity_rule(
            StructuralPlasticityRule::new("axon", "dendrite")
                .with_synapse(SynapseSpec::new(STATIC_SYNAPSE).with_weight(0.5).with_delay(1.0)),
        )
        .unwrap();
        k.enable_structural_plasticity().unwrap();
        (k, pre, post)
    }

    #[test]
    fn test_enable_conflicts() {
        let mut k = Kernel::new(KernelConfig::default().with_keep_source_table(false)).unwrap();
        assert!(matches!(
            k.enable_structural_plasticity(),
            Err(KernelError::StructuralPlasticityConflict { .. })
        ));
        let mut k = Kernel::new(KernelConfig::default().with_compressed_spikes(true)).unwrap();
        assert!(k.enable_structural_plasticity().is_err());
        assert!(!k.structural_plasticity_enabled());
    }

    #[test]
    fn test_update_requires_enabled() {
        let mut k = Kernel::new(KernelConfig::default()).unwrap();
        assert!(matches!(
            k.update_structural_plasticity(),
            Err(KernelError::InvalidState { .. })
        ));
        assert!(k
            .add_structural_plasticity_rule(StructuralPlasticityRule::new("", "dendrite"))
            .is_err());
    }

    #[test]
    fn test_vacancies_pair_into_connections() {
        let (mut k, pre, post) = plastic_kernel(2);
        let before = k.fingerprint();

        let report = k.update_structural_plasticity().unwrap();
        assert_eq!(report, StructuralUpdateReport { deleted: 0, created: 4 });
        assert_eq!(k.fingerprint(), before.next());
        assert_eq!(k.num_local_connections(), 4);

        let bound_post: u32 = post
            .iter()
            .map(|id| k.synaptic_elements(*id, "dendrite").unwrap().bound)
            .sum();
        let bound_pre: u32 = pre
            .iter()
            .map(|id| k.synaptic_elements(*id, "axon").unwrap().bound)
            .sum();
        assert_eq!((bound_pre, bound_post), (4, 4));

        let report = k.update_structural_plasticity().unwrap();
        assert!(!report.changed());
        assert_eq!(k.fingerprint(), before.next());
        assert_eq!(k.structural_plasticity_updates(), 2);
    }

    #[test]
    fn test_shrunk_elements_lose_connections() {
        let (mut k, _, post) = plastic_kernel(1);
        k.update_structural_plasticity().unwrap();
        let bound = k.synaptic_elements(post[0], "dendrite").unwrap().bound;
        assert_eq!(bound, 2);

        k.set_synaptic_element_z(post[0], "dendrite", 0.5).unwrap();
        assert_eq!(k.synaptic_elements(post[0], "dendrite").unwrap().deleted, 2);

        let report = k.update_structural_plasticity().unwrap();
        assert_eq!(report.deleted, 2);
        let counts = k.synaptic_elements(post[0], "dendrite").unwrap();
        assert_eq!((counts.bound, counts.deleted), (0, 0));
        assert!(k.get_sources(&[post[0]], STATIC_SYNAPSE).unwrap().is_empty());
        assert_eq!(k.get_sources(&[post[1]], STATIC_SYNAPSE).unwrap().len(), 2);
    }

    #[test]
    fn test_same_seed_same_network() {
        let build = |threads| {
            let (mut k, pre, _) = plastic_kernel(threads);
            k.update_structural_plasticity().unwrap();
            k.get_targets(&pre, STATIC_SYNAPSE).unwrap()
        };
        assert_eq!(build(1), build(3));
    }
}
