//! Preparation, the min-delay cycle loop and routing table maintenance

use super::Kernel;
use crate::connection::routing::{build_compressed, thread_target_data};
use crate::connection::{CompressedTable, SynapseKind, ThreadConnections};
use crate::delivery::{
    collect_secondary, collocate_thread, deliver_secondary, deliver_thread, merge_thread_lists,
    DeliveryContext,
};
use crate::error::{KernelError, Result};
use crate::node::StepContext;
use crate::time::{ms_to_steps, Step};
use nsk_wire::{codec, decode_secondary, encode_secondary, SecondaryEvent, TargetData};

impl Kernel {
    /// Freeze delay extrema, size ring buffers and build routing tables.
    /// Collective.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Err(KernelError::invalid_state("already prepared; call cleanup first"));
        }

        if !self.extrema.is_frozen() {
            let (min, max) = if self.extrema.is_observed() {
                (self.extrema.min(), self.extrema.max())
            } else {
                (u64::MAX, 0)
            };
            let global_min = self.comm.all_reduce_min(min)?;
            let global_max = self.comm.all_reduce_max(max)?;
            let (global_min, global_max) = if global_min == u64::MAX {
                (1, 1)
            } else {
                (global_min, global_max)
            };
            self.extrema.freeze(global_min, global_max);
            log::info!(
                target: "nsk::kernel",
                "delay extrema frozen at [{}, {}] steps",
                global_min,
                global_max
            );
        }

        self.resize_ring_buffers()?;
        if !self.routing.is_current(self.fingerprint) {
            self.rebuild_routing()?;
        }

        if !self.config.keep_source_table && !self.structural.enabled {
            for state in &mut self.threads {
                state.connections.clear_sources();
            }
            log::debug!(target: "nsk::routing", "source tables released");
        }

        self.prepared = true;
        Ok(())
    }

    /// Advance the simulation by `duration_ms`. Collective.
    ///
    /// A duration that ends inside a min-delay cycle leaves that cycle's
    /// spikes registered; they are exchanged when a later `run` completes it.
    pub fn run(&mut self, duration_ms: f64) -> Result<()> {
        if !self.prepared {
            return Err(KernelError::invalid_state("run requires prepare"));
        }
        if !(duration_ms >= 0.0 && duration_ms.is_finite()) {
            return Err(KernelError::invalid_parameter(
                "duration",
                duration_ms.to_string(),
                "finite and >= 0 ms",
            ));
        }
        self.check_extrema_agree()?;

        let mut remaining = ms_to_steps(duration_ms, self.config.resolution_ms);
        log::info!(
            target: "nsk::kernel",
            "rank {}: running {} steps from step {}",
            self.vp.rank(),
            remaining,
            self.current_step()
        );
        while remaining > 0 {
            let dmin = self.extrema.min();
            let to_lag = dmin.min(self.clock.lag + remaining);
            self.update_nodes(self.clock.lag, to_lag)?;
            remaining -= to_lag - self.clock.lag;
            self.clock.lag = to_lag;
            if self.clock.lag == dmin {
                self.complete_cycle()?;
            }
        }
        log::info!(
            target: "nsk::kernel",
            "rank {}: reached step {} after {} cycles",
            self.vp.rank(),
            self.current_step(),
            self.stats.cycles
        );
        Ok(())
    }

    /// End a prepare/run sequence
    pub fn cleanup(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(KernelError::invalid_state("cleanup without prepare"));
        }
        self.prepared = false;
        Ok(())
    }

    /// `prepare`, `run` and `cleanup` in one call
    pub fn simulate(&mut self, duration_ms: f64) -> Result<()> {
        self.prepare()?;
        self.run(duration_ms)?;
        self.cleanup()
    }

    /// Set delay extrema (ms) before the first preparation
    pub fn set_delay_extrema(&mut self, min_ms: f64, max_ms: f64) -> Result<()> {
        let (min, max) = self.extrema_steps(min_ms, max_ms)?;
        self.extrema.set(min, max)
    }

    /// Widen frozen delay extrema (ms). Only allowed between cycles, and the
    /// new range must contain the old one. Every rank must make the same
    /// call; the next `run` fails with a protocol violation otherwise.
    pub fn widen_delay_extrema(&mut self, min_ms: f64, max_ms: f64) -> Result<()> {
        let (min, max) = self.extrema_steps(min_ms, max_ms)?;
        if !self.extrema.is_frozen() {
            return self.extrema.set(min, max);
        }
        if self.clock.lag != 0 {
            return Err(KernelError::invalid_state(
                "delay extrema can only widen at a min-delay cycle boundary",
            ));
        }
        self.extrema.widen(min, max)?;
        if self.prepared {
            self.resize_ring_buffers()?;
        }
        log::info!(target: "nsk::kernel", "delay extrema widened to [{}, {}] steps", min, max);
        Ok(())
    }

    /// Fail unless every rank runs with the same delay extrema
    fn check_extrema_agree(&mut self) -> Result<()> {
        let local = (self.extrema.min(), self.extrema.max());
        let mins = self.comm.all_gather_u64(local.0)?;
        let maxs = self.comm.all_gather_u64(local.1)?;
        if let Some((rank, other)) = mins
            .into_iter()
            .zip(maxs)
            .enumerate()
            .find(|(_, extrema)| *extrema != local)
        {
            return Err(KernelError::protocol_violation(format!(
                "rank {} runs with delay extrema {:?} steps, this rank with {:?}",
                rank, other, local
            )));
        }
        Ok(())
    }

    fn extrema_steps(&self, min_ms: f64, max_ms: f64) -> Result<(Step, Step)> {
        for (name, value) in [("min_delay", min_ms), ("max_delay", max_ms)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(KernelError::invalid_parameter(name, value.to_string(), "> 0 ms"));
            }
        }
        let h = self.config.resolution_ms;
        Ok((ms_to_steps(min_ms, h), ms_to_steps(max_ms, h)))
    }

    fn resize_ring_buffers(&mut self) -> Result<()> {
        let ring_len = self.extrema.ring_len() as usize;
        let now = self.clock.origin;
        self.pool.for_each_thread(&mut self.threads, |_, state| {
            for slot in state.nodes.iter_mut() {
                slot.ring.resize(ring_len, now);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn update_nodes(&mut self, from_lag: Step, to_lag: Step) -> Result<()> {
        let origin = self.clock.origin;
        let cycle_len = self.extrema.min() as usize;
        let resolution_ms = self.config.resolution_ms;
        self.pool.for_each_thread(&mut self.threads, |_, state| {
            for lag in from_lag..to_lag {
                let ctx = StepContext {
                    step: origin + lag,
                    lag,
                    resolution_ms,
                };
                for (lid, slot) in state.nodes.iter_mut().enumerate() {
                    let output = slot.update(&ctx, cycle_len);
                    if let Some(spike) = output.spike.filter(|s| s.multiplicity > 0) {
                        state
                            .register
                            .push(lid as u32, lag, spike.multiplicity, spike.offset_ms);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn complete_cycle(&mut self) -> Result<()> {
        if !self.routing.is_current(self.fingerprint) {
            self.rebuild_routing()?;
        }

        let num_ranks = self.vp.num_ranks();
        let off_grid = self.config.off_grid_spiking;
        let per_thread = self.pool.for_each_thread(&mut self.threads, |_, state| {
            Ok(collocate_thread(&state.register, &state.routes, num_ranks, off_grid))
        })?;
        let per_rank = merge_thread_lists(per_thread, num_ranks);
        let received = self
            .exchange
            .exchange(self.comm.as_mut(), &per_rank, &mut self.stats)?;

        let ctx = DeliveryContext {
            origin: self.clock.origin,
            compressed: &self.routing.compressed,
            off_grid,
        };
        let delivered = self.pool.for_each_thread(&mut self.threads, |tid, state| {
            let n = deliver_thread(tid, &received, &ctx, &mut state.connections, &mut state.nodes)?;
            state.register.clear();
            Ok(n)
        })?;
        self.stats.deliveries += delivered.into_iter().sum::<u64>();

        self.exchange_secondary()?;

        let dmin = self.extrema.min();
        if self.structural.enabled {
            let dt_ms = dmin as f64 * self.config.resolution_ms;
            self.pool.for_each_thread(&mut self.threads, |_, state| {
                for slot in state.nodes.iter_mut() {
                    let calcium = slot.calcium.level();
                    for element in slot.elements.values_mut() {
                        element.grow(calcium, dt_ms);
                    }
                }
                Ok(())
            })?;
        }

        self.clock.origin += dmin;
        self.clock.lag = 0;
        self.stats.cycles += 1;
        log::trace!(
            target: "nsk::delivery",
            "cycle {} done: {} records received, chunk {}",
            self.stats.cycles,
            received.len(),
            self.exchange.chunk()
        );

        if self.structural.enabled {
            self.structural.steps_since_update += dmin;
            let interval = ms_to_steps(
                self.config.structural_plasticity.update_interval_ms,
                self.config.resolution_ms,
            )
            .max(1);
            if self.structural.steps_since_update >= interval {
                self.structural.steps_since_update = 0;
                self.update_structural_plasticity()?;
            }
        }
        Ok(())
    }

    fn exchange_secondary(&mut self) -> Result<()> {
        let num_ranks = self.vp.num_ranks();
        let per_thread = self.pool.for_each_thread(&mut self.threads, |_, state| {
            Ok(collect_secondary(&mut state.nodes, &state.routes, num_ranks))
        })?;
        if !self.routing.has_secondary {
            return Ok(());
        }

        let mut per_rank: Vec<Vec<SecondaryEvent>> = vec![Vec::new(); num_ranks];
        for lists in per_thread {
            for (rank, mut events) in lists.into_iter().enumerate() {
                per_rank[rank].append(&mut events);
            }
        }
        let send = per_rank.iter().map(|events| encode_secondary(events)).collect();
        let received = self.comm.all_to_all_v(send)?;
        let mut events = Vec::new();
        for part in &received {
            events.extend(decode_secondary(part)?);
        }
        self.stats.secondary_events += events.len() as u64;

        let origin = self.clock.origin;
        self.pool.for_each_thread(&mut self.threads, |_, state| {
            Ok(deliver_secondary(
                &events,
                origin,
                &state.routes,
                &mut state.connections,
                &mut state.nodes,
            ))
        })?;
        Ok(())
    }

    /// Restructure the tables and rebuild sender-side routing from them.
    /// Collective.
    pub(crate) fn rebuild_routing(&mut self) -> Result<()> {
        let fingerprints = self.comm.all_gather_u64(self.fingerprint.raw())?;
        if let Some((rank, other)) = fingerprints
            .iter()
            .enumerate()
            .find(|(_, f)| **f != self.fingerprint.raw())
        {
            return Err(KernelError::protocol_violation(format!(
                "rank {} is at connectivity generation {}, this rank at {}",
                rank, other, self.fingerprint
            )));
        }

        let kinds: Vec<SynapseKind> = self.synapses.iter().map(|(_, model)| model.kind).collect();
        let compressed = self.config.use_compressed_spikes;
        let vp = self.vp;
        let per_thread = self.pool.for_each_thread(&mut self.threads, |tid, state| {
            state.connections.restructure()?;
            let (records, blocks) = thread_target_data(tid, &state.connections, &kinds, compressed, &vp);
            state.routes.set_secondary_blocks(blocks);
            Ok(records)
        })?;

        let mut outgoing: Vec<Vec<TargetData>> = vec![Vec::new(); vp.num_ranks()];
        for (rank, record) in per_thread.into_iter().flatten() {
            outgoing[rank].push(record);
        }
        self.routing.compressed = if compressed {
            let tables: Vec<&ThreadConnections> = self.threads.iter().map(|t| &t.connections).collect();
            let (table, records) = build_compressed(&tables, &kinds, &vp);
            for (rank, record) in records {
                outgoing[rank].push(record);
            }
            table
        } else {
            CompressedTable::default()
        };

        let send = outgoing
            .iter()
            .map(|records| codec::encode(records))
            .collect::<nsk_wire::Result<Vec<_>>>()?;
        let received = self.comm.all_to_all_v(send)?;
        let records: Vec<TargetData> = codec::decode_concat(&received)?;

        let mut per_thread_records: Vec<Vec<TargetData>> = vec![Vec::new(); vp.num_threads()];
        for record in records {
            if !vp.is_local_node(record.source) {
                return Err(KernelError::protocol_violation(format!(
                    "routing record for node {} sent to rank {}, which does not own it",
                    record.source,
                    vp.rank()
                )));
            }
            per_thread_records[vp.node_id_to_thread(record.source)].push(record);
        }
        self.pool.for_each_thread(&mut self.threads, |tid, state| {
            state.routes.install(&per_thread_records[tid], &state.nodes)
        })?;

        let local_secondary = self.threads.iter().any(|t| t.routes.has_secondary_connectors());
        self.routing.has_secondary = self.comm.all_reduce_or(local_secondary)?;
        self.routing.fingerprint = Some(self.fingerprint);

        let targets: usize = self.threads.iter().map(|t| t.routes.num_spike_targets()).sum();
        log::debug!(
            target: "nsk::routing",
            "routing rebuilt at {}: {} spike targets, {} compressed entries, secondary {}",
            self.fingerprint,
            targets,
            self.routing.compressed.len(),
            self.routing.has_secondary
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::connection::{ConnectionRule, SynapseSpec};
    use crate::node::models::{InputProbe, INPUT_PROBE, SPIKE_GENERATOR};
    use crate::node::NodeParams;
    use nsk_wire::NodeId;

    fn network(config: KernelConfig, delay_ms: f64) -> (Kernel, NodeId, NodeId) {
        let mut k = Kernel::new(config).unwrap();
        let generator = k
            .create(SPIKE_GENERATOR, 1, &NodeParams::default().with_spike_times(vec![1.0, 2.5]))
            .unwrap()[0];
        let probe = k.create(INPUT_PROBE, 1, &NodeParams::default()).unwrap()[0];
        k.connect(
            &[generator],
            &[probe],
            &ConnectionRule::OneToOne,
            &SynapseSpec::default().with_weight(3.0).with_delay(delay_ms),
        )
        .unwrap();
        (k, generator, probe)
    }

    #[test]
    fn test_spikes_arrive_after_delay() {
        let (mut k, _, probe) = network(KernelConfig::default().with_threads(2), 1.5);
        k.simulate(10.0).unwrap();
        let probe = k.node::<InputProbe>(probe).unwrap();
        assert_eq!(probe.spike_steps(), vec![10 + 15, 25 + 15]);
        assert_eq!(probe.total_weight(), 6.0);
        assert_eq!(k.delivery_stats().deliveries, 2);
        assert_eq!(k.delay_extrema().min(), 15);
    }

    #[test]
    fn test_run_requires_prepare() {
        let (mut k, _, _) = network(KernelConfig::default(), 1.0);
        assert!(matches!(k.run(1.0), Err(KernelError::InvalidState { .. })));
        k.prepare().unwrap();
        assert!(k.prepare().is_err());
        assert!(k.create(INPUT_PROBE, 1, &NodeParams::default()).is_err());
        k.cleanup().unwrap();
    }

    #[test]
    fn test_split_runs_match_one_run() {
        let (mut whole, _, probe_a) = network(KernelConfig::default(), 2.0);
        whole.simulate(8.0).unwrap();

        let (mut split, _, probe_b) = network(KernelConfig::default(), 2.0);
        split.prepare().unwrap();
        for _ in 0..16 {
            split.run(0.5).unwrap();
        }
        split.cleanup().unwrap();

        assert_eq!(split.current_step(), whole.current_step());
        assert_eq!(
            split.node::<InputProbe>(probe_b).unwrap().records(),
            whole.node::<InputProbe>(probe_a).unwrap().records()
        );
    }

    #[test]
    fn test_frozen_extrema_reject_and_widen() {
        let (mut k, generator, probe) = network(KernelConfig::default(), 1.0);
        k.simulate(2.0).unwrap();
        let err = k
            .connect(
                &[generator],
                &[probe],
                &ConnectionRule::OneToOne,
                &SynapseSpec::default().with_delay(3.0),
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::InconsistentDelayExtrema { delay: 30, .. }));

        k.widen_delay_extrema(1.0, 3.0).unwrap();
        k.connect(
            &[generator],
            &[probe],
            &ConnectionRule::OneToOne,
            &SynapseSpec::default().with_delay(3.0),
        )
        .unwrap();
        assert_eq!(k.delay_extrema().ring_len(), 40);
        assert!(k.widen_delay_extrema(2.0, 3.0).is_err());
        k.simulate(5.0).unwrap();
        let probe = k.node::<InputProbe>(probe).unwrap();
        assert_eq!(probe.spike_steps(), vec![20, 35, 55]);
    }
}
