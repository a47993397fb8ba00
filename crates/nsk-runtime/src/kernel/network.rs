//! Connect, disconnect and connectivity queries

use super::Kernel;
use crate::connection::{
    select_pairs, ConnectionDescriptor, ConnectionFilter, ConnectionRule, Connector, RuleContext,
    SynapseSpec,
};
use crate::error::{KernelError, Result};
use crate::time::{ms_to_steps, steps_to_ms, Step};
use nsk_wire::{NodeId, SynId};
use std::collections::HashSet;

impl Kernel {
    fn check_nodes(&self, ids: &[NodeId], what: &str) -> Result<()> {
        if let Some(bad) = ids.iter().find(|id| self.check_node(**id).is_err()) {
            return Err(KernelError::illegal_connection(format!(
                "{} contain node {} which does not exist",
                what, bad
            )));
        }
        Ok(())
    }

    fn require_sources(&self) -> Result<()> {
        if self.threads.iter().any(|t| t.connections.sources_cleared()) {
            return Err(KernelError::SourceTableCleared);
        }
        Ok(())
    }

    /// Resolve model, weight and delay of a synapse spec and check the delay
    /// against the extrema
    pub(crate) fn resolve_synapse(&self, spec: &SynapseSpec) -> Result<(SynId, f64, Step)> {
        let syn = self.synapses.lookup(&spec.model)?;
        let model = self.synapses.model(syn);
        let weight = spec.weight.unwrap_or(model.default_weight);
        if !weight.is_finite() {
            return Err(KernelError::invalid_parameter("weight", weight.to_string(), "finite"));
        }
        let delay_ms = spec.delay_ms.unwrap_or(model.default_delay_ms);
        if !(delay_ms > 0.0 && delay_ms.is_finite()) {
            return Err(KernelError::invalid_parameter("delay", delay_ms.to_string(), "> 0 ms"));
        }
        let delay = ms_to_steps(delay_ms, self.config.resolution_ms);
        self.extrema.check(delay)?;
        Ok((syn, weight, delay))
    }

    /// Add connectors for pairs whose target this rank owns
    pub(crate) fn add_local_pairs(
        &mut self,
        syn: SynId,
        pairs: &[(NodeId, NodeId)],
        weight: f64,
        delay: Step,
    ) -> Result<usize> {
        let vp = self.vp;
        let added = self.pool.for_each_thread(&mut self.threads, |tid, state| {
            let mut added = 0;
            for &(source, target) in pairs {
                if !vp.is_local_node(target) || vp.node_id_to_thread(target) != tid {
                    continue;
                }
                let lid = state
                    .nodes
                    .local_index(target)
                    .ok_or(KernelError::UnknownNode { node_id: target })?;
                state
                    .connections
                    .add(syn, source, Connector::new(target, lid, weight, delay))?;
                added += 1;
            }
            Ok(added)
        })?;
        Ok(added.into_iter().sum())
    }

    /// Connect `sources` to `targets` following `rule`.
    ///
    /// The call is rejected as a whole, before anything changes, when a node
    /// is unknown, the rule's cardinality cannot be met, the synapse model is
    /// unknown or the delay lies outside frozen extrema.
    pub fn connect(
        &mut self,
        sources: &[NodeId],
        targets: &[NodeId],
        rule: &ConnectionRule,
        synapse: &SynapseSpec,
    ) -> Result<()> {
        self.check_nodes(sources, "sources")?;
        self.check_nodes(targets, "targets")?;
        let (syn, weight, delay) = self.resolve_synapse(synapse)?;
        self.require_sources()?;

        let ctx = RuleContext {
            seed: self.config.rng_seed,
            call_index: self.connect_calls,
            vp: self.vp,
        };
        let pairs = select_pairs(rule, sources, targets, &ctx)?;
        let added = self.add_local_pairs(syn, &pairs, weight, delay)?;

        self.extrema.observe(delay)?;
        self.connect_calls += 1;
        self.fingerprint = self.fingerprint.next();
        log::debug!(
            target: "nsk::kernel",
            "connect #{} {} via {}: {} local connections, delay {} steps",
            self.connect_calls,
            rule.name(),
            synapse.model,
            added,
            delay
        );
        Ok(())
    }

    /// Remove one connection of `synapse_model` per pair selected by a
    /// one-to-one or all-to-all rule. Fails without changes on any rank if a
    /// pair has no such connection.
    pub fn disconnect(
        &mut self,
        sources: &[NodeId],
        targets: &[NodeId],
        rule: &ConnectionRule,
        synapse_model: &str,
    ) -> Result<()> {
        if !rule.is_deterministic() {
            return Err(KernelError::illegal_connection(format!(
                "disconnect supports one_to_one and all_to_all, not {}",
                rule.name()
            )));
        }
        self.check_nodes(sources, "sources")?;
        self.check_nodes(targets, "targets")?;
        let syn = self.synapses.lookup(synapse_model)?;
        self.require_sources()?;

        let ctx = RuleContext {
            seed: self.config.rng_seed,
            call_index: self.connect_calls,
            vp: self.vp,
        };
        let pairs = select_pairs(rule, sources, targets, &ctx)?;
        let vp = self.vp;
        let planned = self.pool.for_each_thread(&mut self.threads, |tid, state| {
            let mine: Vec<(NodeId, NodeId)> = pairs
                .iter()
                .filter(|(_, t)| vp.node_id_to_thread(*t) == tid)
                .copied()
                .collect();
            state.connections.plan_disconnect(syn, &mine)
        });

        let failed_somewhere = self.comm.all_reduce_or(planned.is_err())?;
        let planned = planned?;
        if failed_somewhere {
            return Err(KernelError::illegal_connection(
                "a connection to remove does not exist on another rank",
            ));
        }

        let removed: usize = planned.iter().map(Vec::len).sum();
        self.pool.for_each_thread(&mut self.threads, |tid, state| {
            state.connections.disable(syn, &planned[tid]);
            Ok(())
        })?;
        self.fingerprint = self.fingerprint.next();
        log::debug!(
            target: "nsk::kernel",
            "disconnect {} via {}: {} local connections disabled",
            rule.name(),
            synapse_model,
            removed
        );
        Ok(())
    }

    /// Compact every table: drop disabled connectors, sort by source and
    /// recompute block flags. Returns the number of connectors removed.
    pub fn restructure_connection_tables(&mut self) -> Result<usize> {
        let removed = self
            .pool
            .for_each_thread(&mut self.threads, |_, state| state.connections.restructure())?;
        Ok(removed.into_iter().sum())
    }

    /// Local connections matching `filter`, in (thread, model, lcid) order
    pub fn get_connections(&self, filter: &ConnectionFilter) -> Result<Vec<ConnectionDescriptor>> {
        self.require_sources()?;
        let wanted = match &filter.synapse_model {
            Some(name) => Some(self.synapses.lookup(name)?),
            None => None,
        };

        let mut out = Vec::new();
        for (thread, state) in self.threads.iter().enumerate() {
            for (syn, table) in state.connections.tables() {
                if wanted.map_or(false, |w| w != syn) {
                    continue;
                }
                let model = &self.synapses.model(syn).name;
                for (lcid, (source, connector)) in table.sources().iter().zip(table.connectors()).enumerate() {
                    if connector.disabled || !filter.matches(source.node_id, connector.target) {
                        continue;
                    }
                    out.push(ConnectionDescriptor {
                        source: source.node_id,
                        target: connector.target,
                        synapse_model: model.clone(),
                        syn_id: syn,
                        weight: connector.weight,
                        delay_ms: steps_to_ms(connector.delay, self.config.resolution_ms),
                        thread,
                        lcid: lcid as u32,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Local (source, target) pairs of `synapse_model` leaving `sources`, sorted
    pub fn get_targets(&self, sources: &[NodeId], synapse_model: &str) -> Result<Vec<(NodeId, NodeId)>> {
        let syn = self.synapses.lookup(synapse_model)?;
        let set: HashSet<NodeId> = sources.iter().copied().collect();
        let mut pairs = Vec::new();
        for state in &self.threads {
            pairs.extend(state.connections.pairs_from(syn, &set)?);
        }
        pairs.sort_unstable();
        Ok(pairs)
    }

    /// Local (source, target) pairs of `synapse_model` entering `targets`, sorted
    pub fn get_sources(&self, targets: &[NodeId], synapse_model: &str) -> Result<Vec<(NodeId, NodeId)>> {
        let syn = self.synapses.lookup(synapse_model)?;
        let set: HashSet<NodeId> = targets.iter().copied().collect();
        let mut pairs = Vec::new();
        for state in &self.threads {
            pairs.extend(state.connections.pairs_to(syn, &set)?);
        }
        pairs.sort_unstable();
        Ok(pairs)
    }

    /// Enabled connections of `synapse_model` held by `thread`
    pub fn get_num_connections(&self, thread: usize, synapse_model: &str) -> Result<usize> {
        let syn = self.synapses.lookup(synapse_model)?;
        let state = self.threads.get(thread).ok_or_else(|| {
            KernelError::invalid_parameter(
                "thread",
                thread.to_string(),
                format!("< {}", self.threads.len()),
            )
        })?;
        Ok(state.connections.num_connections(syn))
    }

    /// Enabled connections held by this rank
    pub fn num_local_connections(&self) -> usize {
        self.threads.iter().map(|t| t.connections.total_connections()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::connection::{STATIC_SYNAPSE, SynapseDefaults};
    use crate::node::models::PARROT_NEURON;
    use crate::node::NodeParams;

    fn kernel(threads: usize, n: usize) -> (Kernel, Vec<NodeId>) {
        let mut k = Kernel::new(KernelConfig::default().with_threads(threads)).unwrap();
        let ids = k.create(PARROT_NEURON, n, &NodeParams::default()).unwrap();
        (k, ids)
    }

    #[test]
    fn test_connect_then_disconnect() {
        let (mut k, ids) = kernel(2, 4);
        let spec = SynapseSpec::default().with_weight(2.5).with_delay(1.5);
        k.connect(&ids[..1], &ids[1..2], &ConnectionRule::OneToOne, &spec).unwrap();

        let conns = k.get_connections(&ConnectionFilter::all()).unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].source, ids[0]);
        assert_eq!(conns[0].target, ids[1]);
        assert_eq!(conns[0].weight, 2.5);
        assert!((conns[0].delay_ms - 1.5).abs() < 1e-9);
        assert_eq!(k.fingerprint().raw(), 1);

        k.disconnect(&ids[..1], &ids[1..2], &ConnectionRule::OneToOne, STATIC_SYNAPSE)
            .unwrap();
        assert!(k.get_connections(&ConnectionFilter::all()).unwrap().is_empty());
        assert_eq!(k.restructure_connection_tables().unwrap(), 1);
        assert!(k.get_connections(&ConnectionFilter::all()).unwrap().is_empty());
        assert_eq!(k.fingerprint().raw(), 2);
    }

    #[test]
    fn test_failed_connect_changes_nothing() {
        let (mut k, ids) = kernel(2, 4);
        let err = k
            .connect(&ids[..2], &ids[..3], &ConnectionRule::OneToOne, &SynapseSpec::default())
            .unwrap_err();
        assert!(err.is_illegal_connection());
        let err = k
            .connect(&ids, &[NodeId::new(99)], &ConnectionRule::all_to_all(), &SynapseSpec::default())
            .unwrap_err();
        assert!(err.is_illegal_connection());
        assert!(matches!(
            k.connect(&ids, &ids, &ConnectionRule::all_to_all(), &SynapseSpec::new("stdp_synapse")),
            Err(KernelError::UnknownSynapseType { .. })
        ));
        assert_eq!(k.num_local_connections(), 0);
        assert_eq!(k.fingerprint().raw(), 0);
    }

    #[test]
    fn test_disconnect_missing_pair_is_rejected() {
        let (mut k, ids) = kernel(1, 3);
        k.connect(&ids[..1], &ids[1..2], &ConnectionRule::OneToOne, &SynapseSpec::default())
            .unwrap();
        let err = k
            .disconnect(&ids[..1], &ids[1..], &ConnectionRule::all_to_all(), STATIC_SYNAPSE)
            .unwrap_err();
        assert!(err.is_illegal_connection());
        assert_eq!(k.num_local_connections(), 1);

        let random = ConnectionRule::PairwiseBernoulli {
            p: 0.5,
            allow_autapses: true,
        };
        assert!(k.disconnect(&ids, &ids, &random, STATIC_SYNAPSE).is_err());
    }

    #[test]
    fn test_queries_and_copied_models() {
        let (mut k, ids) = kernel(2, 4);
        let heavy = k
            .copy_synapse_model(
                STATIC_SYNAPSE,
                "heavy",
                SynapseDefaults {
                    weight: Some(10.0),
                    delay_ms: None,
                },
            )
            .unwrap();
        k.connect(&ids[..2], &ids[2..], &ConnectionRule::all_to_all(), &SynapseSpec::new("heavy"))
            .unwrap();

        let targets = k.get_targets(&ids[..1], "heavy").unwrap();
        assert_eq!(targets, vec![(ids[0], ids[2]), (ids[0], ids[3])]);
        let sources = k.get_sources(&ids[3..], "heavy").unwrap();
        assert_eq!(sources, vec![(ids[0], ids[3]), (ids[1], ids[3])]);

        let per_thread: usize = (0..2).map(|t| k.get_num_connections(t, "heavy").unwrap()).sum();
        assert_eq!(per_thread, 4);
        assert!(k.get_num_connections(2, "heavy").is_err());

        let filtered = k
            .get_connections(&ConnectionFilter::all().with_synapse_model("heavy").with_sources([ids[1]]))
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|c| c.syn_id == heavy && c.weight == 10.0));
        assert!(k
            .get_connections(&ConnectionFilter::all().with_synapse_model(STATIC_SYNAPSE))
            .unwrap()
            .is_empty());
    }
}
