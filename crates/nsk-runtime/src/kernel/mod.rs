//! The per-rank simulation kernel
//!
//! A [`Kernel`] owns everything one rank knows: its nodes and connector
//! tables split into per-thread shards, the routing tables derived from
//! them, the delivery buffers and the structural plasticity controller. All
//! collective operations must be called in the same order on every rank.

mod network;
mod plasticity;
mod simulate;

use crate::comm::{CommStats, Communicator, LocalCommunicator};
use crate::config::KernelConfig;
use crate::connection::{RoutingState, SynapseDefaults, SynapseRegistry, ThreadConnections, ThreadRoutes};
use crate::delivery::{DeliveryStats, SpikeExchange, SpikeRegister};
use crate::error::{KernelError, Result};
use crate::node::{Node, NodeContext, NodeFactory, NodeModelRegistry, NodeParams, NodeSlot, NodeStore};
use crate::parallel::WorkerPool;
use crate::structural::StructuralState;
use crate::synaptic::{CalciumTrace, ElementCounts, GrowthCurveRegistry, SynapticElement};
use crate::synaptic::growth_curve::GrowthCurveFactory;
use crate::time::{steps_to_ms, DelayExtrema, Step};
use crate::vp::VpIndex;
use nsk_wire::{Fingerprint, NodeId, RecordLayout, SynId};
use std::collections::BTreeMap;
use std::fmt;

/// Everything one worker thread owns
#[derive(Debug, Default)]
struct ThreadState {
    nodes: NodeStore,
    connections: ThreadConnections,
    register: SpikeRegister,
    routes: ThreadRoutes,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            connections: ThreadConnections::new(),
            ..Default::default()
        }
    }
}

/// Position in simulated time: the first step of the current min-delay
/// cycle and how many of its steps are done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Clock {
    origin: Step,
    lag: Step,
}

/// Simulation kernel of one rank
pub struct Kernel {
    config: KernelConfig,
    comm: Box<dyn Communicator>,
    vp: VpIndex,
    pool: WorkerPool,
    threads: Vec<ThreadState>,
    node_models: NodeModelRegistry,
    growth_curves: GrowthCurveRegistry,
    synapses: SynapseRegistry,
    num_nodes: u64,
    extrema: DelayExtrema,
    fingerprint: Fingerprint,
    connect_calls: u64,
    routing: RoutingState,
    exchange: SpikeExchange,
    stats: DeliveryStats,
    structural: StructuralState,
    clock: Clock,
    prepared: bool,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("rank", &self.vp.rank())
            .field("num_ranks", &self.vp.num_ranks())
            .field("num_threads", &self.vp.num_threads())
            .field("num_nodes", &self.num_nodes)
            .field("fingerprint", &self.fingerprint)
            .field("extrema", &self.extrema)
            .field("prepared", &self.prepared)
            .finish()
    }
}

fn record_layout(config: &KernelConfig) -> RecordLayout {
    if config.off_grid_spiking {
        RecordLayout::OffGrid
    } else {
        RecordLayout::OnGrid
    }
}

fn build_slot(
    node_id: NodeId,
    factory: &NodeFactory,
    params: &NodeParams,
    curves: &GrowthCurveRegistry,
    seed: u64,
    resolution_ms: f64,
) -> Result<NodeSlot> {
    let ctx = NodeContext {
        node_id,
        seed,
        resolution_ms,
    };
    let node = factory(params, &ctx)?;
    let elements = params
        .synaptic_elements
        .iter()
        .map(|(name, p)| Ok((name.clone(), SynapticElement::new(p, curves)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let calcium = CalciumTrace::new(&params.calcium, resolution_ms)?;
    Ok(NodeSlot::new(node_id, node, elements, calcium))
}

impl Kernel {
    /// Single-rank kernel
    pub fn new(config: KernelConfig) -> Result<Self> {
        Self::with_communicator(config, Box::new(LocalCommunicator::new()))
    }

    /// Kernel for the rank `comm` belongs to
    pub fn with_communicator(config: KernelConfig, comm: Box<dyn Communicator>) -> Result<Self> {
        config.validate()?;
        let vp = VpIndex::new(config.num_threads, comm.num_ranks(), comm.rank());
        let pool = WorkerPool::new(config.num_threads)?;
        let exchange = SpikeExchange::new(config.spike_buffer.clone(), record_layout(&config));
        log::info!(
            target: "nsk::kernel",
            "rank {}/{} up with {} threads, resolution {} ms",
            vp.rank(),
            vp.num_ranks(),
            vp.num_threads(),
            config.resolution_ms
        );

        Ok(Self {
            threads: (0..config.num_threads).map(|_| ThreadState::new()).collect(),
            stats: DeliveryStats {
                chunk_size: exchange.chunk(),
                ..Default::default()
            },
            config,
            comm,
            vp,
            pool,
            node_models: NodeModelRegistry::with_builtins(),
            growth_curves: GrowthCurveRegistry::default(),
            synapses: SynapseRegistry::default(),
            num_nodes: 0,
            extrema: DelayExtrema::default(),
            fingerprint: Fingerprint::INITIAL,
            connect_calls: 0,
            routing: RoutingState::default(),
            exchange,
            structural: StructuralState::default(),
            clock: Clock::default(),
            prepared: false,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// VP layout of this rank
    pub fn vp(&self) -> VpIndex {
        self.vp
    }

    /// This rank
    pub fn rank(&self) -> usize {
        self.vp.rank()
    }

    /// Number of ranks
    pub fn num_ranks(&self) -> usize {
        self.vp.num_ranks()
    }

    /// Worker threads of this rank
    pub fn num_threads(&self) -> usize {
        self.vp.num_threads()
    }

    /// Nodes created so far, on all ranks
    pub fn num_nodes(&self) -> u64 {
        self.num_nodes
    }

    /// Current connectivity generation
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Delivery counters
    pub fn delivery_stats(&self) -> DeliveryStats {
        self.stats
    }

    /// Traffic counters of the communicator
    pub fn comm_stats(&self) -> CommStats {
        self.comm.stats()
    }

    /// Delay extrema in steps
    pub fn delay_extrema(&self) -> DelayExtrema {
        self.extrema
    }

    /// Next step to be updated
    pub fn current_step(&self) -> Step {
        self.clock.origin + self.clock.lag
    }

    /// Simulated time (ms)
    pub fn time_ms(&self) -> f64 {
        steps_to_ms(self.current_step(), self.config.resolution_ms)
    }

    /// Whether `prepare` has run without a matching `cleanup`
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Register a node model
    pub fn register_node_model(&mut self, name: impl Into<String>, factory: NodeFactory) {
        self.node_models.register(name, factory);
    }

    /// Registered node models
    pub fn node_models(&self) -> &NodeModelRegistry {
        &self.node_models
    }

    /// Register a growth curve
    pub fn register_growth_curve(&mut self, name: impl Into<String>, factory: GrowthCurveFactory) {
        self.growth_curves.register(name, factory);
    }

    /// Register `new_name` as a variant of an existing synapse model
    pub fn copy_synapse_model(&mut self, existing: &str, new_name: &str, defaults: SynapseDefaults) -> Result<SynId> {
        let syn = self.synapses.copy_model(existing, new_name, defaults)?;
        log::debug!(target: "nsk::kernel", "synapse model {} copied from {} as {}", new_name, existing, syn);
        Ok(syn)
    }

    /// Registered synapse models
    pub fn synapse_models(&self) -> &SynapseRegistry {
        &self.synapses
    }

    /// Create `n` nodes of `model`. Ids are assigned consecutively on every
    /// rank; each rank instantiates only the nodes it owns.
    pub fn create(&mut self, model: &str, n: usize, params: &NodeParams) -> Result<Vec<NodeId>> {
        if self.prepared {
            return Err(KernelError::invalid_state(
                "nodes cannot be created while prepared; call cleanup first",
            ));
        }
        let factory = self.node_models.factory(model)?.clone();
        let first = self.num_nodes + 1;
        let ids: Vec<NodeId> = (first..first + n as u64).map(NodeId::new).collect();

        let seed = self.config.rng_seed;
        let resolution_ms = self.config.resolution_ms;
        let curves = &self.growth_curves;

        // Ranks owning none of the nodes must reject bad parameters too.
        if let Some(&probe) = ids.first() {
            build_slot(probe, &factory, params, curves, seed, resolution_ms)?;
        }

        let mut per_thread: Vec<Vec<NodeId>> = vec![Vec::new(); self.vp.num_threads()];
        for &id in ids.iter().filter(|id| self.vp.is_local_node(**id)) {
            per_thread[self.vp.node_id_to_thread(id)].push(id);
        }
        let built = self.pool.for_each_thread(&mut per_thread, |_, ids| {
            ids.iter()
                .map(|&id| build_slot(id, &factory, params, curves, seed, resolution_ms))
                .collect::<Result<Vec<_>>>()
        })?;

        for (state, slots) in self.threads.iter_mut().zip(built) {
            for slot in slots {
                state.nodes.push(slot);
            }
        }
        self.num_nodes += n as u64;
        log::debug!(
            target: "nsk::kernel",
            "created {} x {} (ids {}..={})",
            n,
            model,
            first,
            self.num_nodes
        );
        Ok(ids)
    }

    fn check_node(&self, id: NodeId) -> Result<()> {
        if id.is_valid() && id.raw() <= self.num_nodes {
            Ok(())
        } else {
            Err(KernelError::UnknownNode { node_id: id })
        }
    }

    fn local_slot(&self, id: NodeId) -> Result<&NodeSlot> {
        self.check_node(id)?;
        if !self.vp.is_local_node(id) {
            return Err(KernelError::UnknownNode { node_id: id });
        }
        self.threads[self.vp.node_id_to_thread(id)]
            .nodes
            .find(id)
            .ok_or(KernelError::UnknownNode { node_id: id })
    }

    /// Whether this rank owns `id`
    pub fn is_local_node(&self, id: NodeId) -> bool {
        self.check_node(id).is_ok() && self.vp.is_local_node(id)
    }

    /// Ids of the nodes this rank owns, ascending
    pub fn local_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .threads
            .iter()
            .flat_map(|t| t.nodes.iter().map(|slot| slot.node_id))
            .collect();
        ids.sort_unstable();
        ids
    }

    /// A local node as its concrete model type
    pub fn node<T: Node + 'static>(&self, id: NodeId) -> Option<&T> {
        self.local_slot(id)
            .ok()
            .and_then(|slot| slot.node.as_any().downcast_ref::<T>())
    }

    /// Element counts of a local node
    pub fn synaptic_elements(&self, id: NodeId, name: &str) -> Result<ElementCounts> {
        self.local_slot(id)?.element_counts(name).ok_or_else(|| {
            KernelError::invalid_parameter(
                "synaptic element",
                name,
                format!("an element of node {}", id),
            )
        })
    }

    /// Calcium level of a local node
    pub fn calcium(&self, id: NodeId) -> Result<f64> {
        Ok(self.local_slot(id)?.calcium.level())
    }

    /// Change the thread count. Only allowed while no node exists, since
    /// the VP decomposition changes with it.
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        if self.num_nodes > 0 {
            return Err(KernelError::invalid_state(
                "thread count can only change before nodes exist; call reset first",
            ));
        }
        let config = self.config.clone().with_threads(num_threads);
        config.validate()?;
        self.pool = WorkerPool::new(num_threads)?;
        self.vp = VpIndex::new(num_threads, self.vp.num_ranks(), self.vp.rank());
        self.threads = (0..num_threads).map(|_| ThreadState::new()).collect();
        self.routing = RoutingState::default();
        self.config = config;
        log::info!(target: "nsk::kernel", "rank {} now uses {} threads", self.vp.rank(), num_threads);
        Ok(())
    }

    /// Drop all nodes, connections and simulation state. Registered models
    /// and the configuration stay.
    pub fn reset(&mut self) {
        self.threads = (0..self.vp.num_threads()).map(|_| ThreadState::new()).collect();
        self.num_nodes = 0;
        self.extrema = DelayExtrema::default();
        self.fingerprint = Fingerprint::INITIAL;
        self.connect_calls = 0;
        self.routing = RoutingState::default();
        self.exchange = SpikeExchange::new(self.config.spike_buffer.clone(), record_layout(&self.config));
        self.stats = DeliveryStats {
            chunk_size: self.exchange.chunk(),
            ..Default::default()
        };
        self.structural = StructuralState::default();
        self.clock = Clock::default();
        self.prepared = false;
        log::info!(target: "nsk::kernel", "rank {} reset", self.vp.rank());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::models::{InputProbe, INPUT_PROBE, PARROT_NEURON, SPIKE_GENERATOR};
    use crate::synaptic::SynapticElementParams;

    fn kernel(threads: usize) -> Kernel {
        Kernel::new(KernelConfig::default().with_threads(threads)).unwrap()
    }

    #[test]
    fn test_create_assigns_consecutive_ids() {
        let mut k = kernel(2);
        let a = k.create(PARROT_NEURON, 3, &NodeParams::default()).unwrap();
        let b = k.create(INPUT_PROBE, 2, &NodeParams::default()).unwrap();
        assert_eq!(a, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
        assert_eq!(b, vec![NodeId::new(4), NodeId::new(5)]);
        assert_eq!(k.num_nodes(), 5);
        assert_eq!(k.local_nodes().len(), 5);
        assert!(k.node::<InputProbe>(NodeId::new(4)).is_some());
        assert!(k.node::<InputProbe>(NodeId::new(1)).is_none());
    }

    #[test]
    fn test_create_rejects_unknown_model_and_bad_params() {
        let mut k = kernel(1);
        assert!(matches!(
            k.create("iaf_psc_alpha", 1, &NodeParams::default()),
            Err(KernelError::UnknownNodeModel { .. })
        ));
        let bad = NodeParams::default().with_spike_times(vec![-1.0]);
        assert!(k.create(SPIKE_GENERATOR, 2, &bad).is_err());
        assert_eq!(k.num_nodes(), 0);
    }

    #[test]
    fn test_synaptic_elements_report_counts() {
        let mut k = kernel(1);
        let params = NodeParams::default().with_element("axon", SynapticElementParams::default().with_z(2.7));
        let ids = k.create(PARROT_NEURON, 1, &params).unwrap();
        let counts = k.synaptic_elements(ids[0], "axon").unwrap();
        assert_eq!(counts.vacant, 2);
        assert_eq!(counts.bound, 0);
        assert!(k.synaptic_elements(ids[0], "dendrite").is_err());
        assert!(matches!(
            k.synaptic_elements(NodeId::new(9), "axon"),
            Err(KernelError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_thread_count_fixed_once_nodes_exist() {
        let mut k = kernel(1);
        k.set_num_threads(3).unwrap();
        assert_eq!(k.num_threads(), 3);
        k.create(PARROT_NEURON, 1, &NodeParams::default()).unwrap();
        assert!(matches!(k.set_num_threads(2), Err(KernelError::InvalidState { .. })));
        k.reset();
        assert_eq!(k.num_nodes(), 0);
        k.set_num_threads(2).unwrap();
        assert_eq!(k.vp().num_vps(), 2);
    }
}
