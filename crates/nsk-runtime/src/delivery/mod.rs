//! Event delivery pipeline
//!
//! Each completed min-delay cycle runs COLLOCATE, COMMUNICATE and DELIVER:
//! threads expand their spike registers into per-rank [`SpikeData`] lists,
//! the lists travel in fixed-size chunks (see [`buffer`]), and each thread
//! dispatches the received records that address its connector blocks into
//! target ring buffers. Secondary values travel separately in framed buffers.

pub mod buffer;
pub mod register;

pub use buffer::SpikeExchange;
pub use register::{SpikeEntry, SpikeRegister};

use crate::connection::{CompressedTable, ThreadConnections, ThreadRoutes};
use crate::error::{KernelError, Result};
use crate::node::{NodeStore, PreciseSpike};
use crate::time::Step;
use nsk_wire::{SecondaryEvent, SpikeData, SynId, TargetKind};
use serde::{Deserialize, Serialize};

/// Delivery counters of one rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Completed min-delay cycles
    pub cycles: u64,
    /// Spike exchange rounds, including overflow retries
    pub rounds: u64,
    /// Rounds repeated because a chunk overflowed
    pub overflow_rounds: u64,
    /// Spike records sent
    pub records_sent: u64,
    /// Spike records received
    pub records_received: u64,
    /// Connector transmissions
    pub deliveries: u64,
    /// Secondary events received
    pub secondary_events: u64,
    /// Current chunk size in records
    pub chunk_size: usize,
}

/// Expand one thread's register into per-rank record lists
pub fn collocate_thread(
    register: &SpikeRegister,
    routes: &ThreadRoutes,
    num_ranks: usize,
    off_grid: bool,
) -> Vec<Vec<SpikeData>> {
    let mut per_rank = vec![Vec::new(); num_ranks];
    for entry in register.entries() {
        for target in routes.spike_targets(entry.lid) {
            let record = match target.kind {
                TargetKind::Compressed => SpikeData::compressed(target.syn_id, target.lcid, entry.lag),
                _ => SpikeData::new(target.tid, target.syn_id, target.lcid, entry.lag),
            }
            .with_multiplicity(entry.multiplicity);
            let record = if off_grid {
                record.with_offset(entry.offset_ms)
            } else {
                record
            };
            per_rank[target.rank as usize].push(record);
        }
    }
    per_rank
}

/// Concatenate per-thread lists rank by rank, in thread order
pub fn merge_thread_lists(per_thread: Vec<Vec<Vec<SpikeData>>>, num_ranks: usize) -> Vec<Vec<SpikeData>> {
    let mut merged = vec![Vec::new(); num_ranks];
    for lists in per_thread {
        for (rank, mut records) in lists.into_iter().enumerate() {
            merged[rank].append(&mut records);
        }
    }
    merged
}

/// Shared inputs of one thread's delivery pass
#[derive(Debug, Clone, Copy)]
pub struct DeliveryContext<'a> {
    /// First step of the cycle the spikes were emitted in
    pub origin: Step,
    /// Compressed index of this rank
    pub compressed: &'a CompressedTable,
    /// Pass offsets into precise input
    pub off_grid: bool,
}

/// Deliver the received records addressed to thread `tid`. Returns the
/// number of connector transmissions.
pub fn deliver_thread(
    tid: usize,
    records: &[SpikeData],
    ctx: &DeliveryContext<'_>,
    connections: &mut ThreadConnections,
    nodes: &mut NodeStore,
) -> Result<u64> {
    let mut deliveries = 0u64;
    let mut missing_target = None;

    for record in records {
        let plain = [(tid as u16, record.lcid)];
        let blocks: &[(u16, u32)] = if record.compressed {
            ctx.compressed.lookup(record.syn_id, record.lcid)
        } else if record.tid as usize == tid {
            &plain
        } else {
            continue;
        };

        let syn = SynId::new(record.syn_id);
        for &(_, lcid) in blocks.iter().filter(|(t, _)| *t as usize == tid) {
            let table = connections.table_mut(syn).ok_or_else(|| {
                KernelError::protocol_violation(format!(
                    "spike record for {} but thread {} holds no such connectors",
                    syn, tid
                ))
            })?;
            let arrival_base = ctx.origin + record.lag as Step;
            deliveries += table.for_each_in_block(lcid, |connector| {
                let weight = connector.transmit(record.multiplicity);
                let arrival = arrival_base + connector.delay;
                match nodes.get_mut(connector.target_lid) {
                    Some(slot) if ctx.off_grid => slot.ring.add_precise(
                        arrival,
                        PreciseSpike {
                            offset_ms: record.offset,
                            weight,
                            multiplicity: record.multiplicity,
                        },
                    ),
                    Some(slot) => slot.ring.add_spike(arrival, weight, record.multiplicity),
                    None => missing_target = Some(connector.target),
                }
            }) as u64;
        }
    }

    if let Some(target) = missing_target {
        return Err(KernelError::UnknownNode { node_id: target });
    }
    Ok(deliveries)
}

/// Take this cycle's secondary output of every local node and address it to
/// the ranks that asked for it
pub fn collect_secondary(nodes: &mut NodeStore, routes: &ThreadRoutes, num_ranks: usize) -> Vec<Vec<SecondaryEvent>> {
    let mut per_rank = vec![Vec::new(); num_ranks];
    for (lid, slot) in nodes.iter_mut().enumerate() {
        let Some(values) = slot.take_secondary() else {
            continue;
        };
        for &rank in routes.secondary_ranks(lid as u32) {
            per_rank[rank as usize].push(SecondaryEvent::new(slot.node_id, values.clone()));
        }
    }
    per_rank
}

/// Dispatch received secondary events into this thread's targets. Value `j`
/// of an event arrives at `origin + j + delay`.
pub fn deliver_secondary(
    events: &[SecondaryEvent],
    origin: Step,
    routes: &ThreadRoutes,
    connections: &mut ThreadConnections,
    nodes: &mut NodeStore,
) -> u64 {
    let mut delivered = 0u64;
    for event in events {
        for &(syn, lcid) in routes.secondary_blocks(event.source) {
            let Some(table) = connections.table_mut(syn) else {
                continue;
            };
            delivered += table.for_each_in_block(lcid, |connector| {
                if let Some(slot) = nodes.get_mut(connector.target_lid) {
                    for (lag, value) in event.values.iter().enumerate() {
                        slot.ring
                            .add_secondary(origin + lag as Step + connector.delay, connector.weight * value);
                    }
                }
            }) as u64;
        }
    }
    delivered
}
