//! Run several ranks in one process
//!
//! Each rank gets its own OS thread, [`Kernel`] and channel endpoint. A rank
//! that fails drops its endpoint, so peers blocked in a collective see
//! [`CommError::Disconnected`] instead of hanging.

use crate::comm::{ChannelCommunicator, CommError};
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use std::thread;

/// Run `f` on `num_ranks` kernels in parallel and collect the results in
/// rank order.
///
/// If ranks fail, the error of the lowest rank that failed for a reason
/// other than a peer disconnecting is returned.
pub fn run_cluster<T, F>(num_ranks: usize, config: &KernelConfig, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&mut Kernel) -> Result<T> + Sync,
{
    if num_ranks == 0 {
        return Err(KernelError::invalid_config("a cluster needs at least one rank"));
    }
    config.validate()?;
    let endpoints = ChannelCommunicator::mesh(num_ranks, config.comm_timeout_ms);
    log::info!(target: "nsk::comm", "starting {} ranks", num_ranks);

    let results: Vec<Result<T>> = thread::scope(|scope| {
        let handles: Vec<_> = endpoints
            .into_iter()
            .enumerate()
            .map(|(rank, comm)| {
                let f = &f;
                let spawned = thread::Builder::new()
                    .name(format!("nsk-rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let mut kernel = Kernel::with_communicator(config.clone(), Box::new(comm))?;
                        f(&mut kernel)
                    });
                (rank, spawned)
            })
            .collect();

        handles
            .into_iter()
            .map(|(rank, spawned)| match spawned {
                Ok(handle) => handle
                    .join()
                    .unwrap_or(Err(KernelError::from(CommError::Panicked { rank }))),
                Err(err) => Err(KernelError::invalid_state(format!(
                    "could not spawn rank {}: {}",
                    rank, err
                ))),
            })
            .collect()
    });

    let mut values = Vec::with_capacity(num_ranks);
    let mut first_error: Option<KernelError> = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                log::warn!(target: "nsk::comm", "rank {} failed: {}", rank, err);
                let secondary = matches!(
                    err,
                    KernelError::Communication {
                        source: CommError::Disconnected { .. }
                    }
                );
                let replace = match &first_error {
                    None => true,
                    Some(KernelError::Communication {
                        source: CommError::Disconnected { .. },
                    }) => !secondary,
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(err);
                }
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_in_rank_order() {
        let ranks = run_cluster(3, &KernelConfig::default(), |k| Ok(k.rank())).unwrap();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_rank_reported_over_disconnects() {
        let err = run_cluster(2, &KernelConfig::default().with_comm_timeout(2_000), |k| {
            if k.rank() == 1 {
                return Err(KernelError::invalid_state("rank 1 gives up"));
            }
            k.prepare()?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, KernelError::InvalidState { .. }));
    }

    #[test]
    fn test_zero_ranks_rejected() {
        assert!(run_cluster(0, &KernelConfig::default(), |_| Ok(())).is_err());
    }
}
