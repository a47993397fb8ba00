//! Fork-join regions over per-thread shards
//!
//! A region hands worker `t` exclusive access to shard `t`. Errors are
//! collected per thread and, once every worker has finished, the first one in
//! thread order is returned. The end of a region is the barrier.

use crate::error::{KernelError, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Worker pool of one rank
pub struct WorkerPool {
    pool: ThreadPool,
    num_threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool with `num_threads` workers
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("nsk-worker-{}", i))
            .build()
            .map_err(|e| KernelError::invalid_config(format!("cannot start worker pool: {}", e)))?;
        Ok(Self { pool, num_threads })
    }

    /// Number of workers
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `f(thread, shard)` for every shard in parallel
    pub fn for_each_thread<S, R, F>(&self, shards: &mut [S], f: F) -> Result<Vec<R>>
    where
        S: Send,
        R: Send,
        F: Fn(usize, &mut S) -> Result<R> + Sync + Send,
    {
        debug_assert_eq!(shards.len(), self.num_threads);
        let results: Vec<Result<R>> = self.pool.install(|| {
            shards
                .par_iter_mut()
                .enumerate()
                .map(|(tid, shard)| f(tid, shard))
                .collect()
        });
        collect_in_thread_order(results)
    }
}

fn collect_in_thread_order<R>(results: Vec<Result<R>>) -> Result<Vec<R>> {
    let mut values = Vec::with_capacity(results.len());
    let mut first_error = None;
    for (tid, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => values.push(value),
            Err(err) => {
                log::debug!(target: "nsk::kernel", "thread {} failed: {}", tid, err);
                if first_error.is_none() {
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
    fn test_each_shard_visited_once() {
        let pool = WorkerPool::new(4).unwrap();
        let mut shards = vec![0usize; 4];
        let out = pool
            .for_each_thread(&mut shards, |tid, shard| {
                *shard += tid + 1;
                Ok(tid * 10)
            })
            .unwrap();
        assert_eq!(shards, vec![1, 2, 3, 4]);
        assert_eq!(out, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_first_error_in_thread_order() {
        let pool = WorkerPool::new(3).unwrap();
        let mut shards = vec![(); 3];
        let err = pool
            .for_each_thread(&mut shards, |tid, _| {
                if tid >= 1 {
                    Err(KernelError::invalid_state(format!("thread {}", tid)))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(format!("{}", err).contains("thread 1"));
    }
}
