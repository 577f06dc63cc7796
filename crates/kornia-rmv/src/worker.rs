//! Fixed-size worker pool running abortable functions.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use thiserror::Error;

/// Errors that can occur when creating a [`Worker`].
#[derive(Error, Debug, PartialEq)]
pub enum WorkerError {
    /// The thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    BuildError(String),

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),
}

/// A pool of threads executing abortable functions.
///
/// Every function receives the shared abort flag. As soon as one invocation reports success the flag
/// is raised so that the remaining invocations can stop early; stopping is cooperative.
pub struct Worker {
    pool: rayon::ThreadPool,
}

impl Worker {
    /// Create a worker with `threads` threads.
    pub fn new(threads: usize) -> Result<Self, WorkerError> {
        if threads == 0 {
            return Err(WorkerError::InvalidThreadCount(threads));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("kornia-rmv-{index}"))
            .build()
            .map_err(|e| WorkerError::BuildError(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Create a worker with one thread per available core.
    pub fn with_available_parallelism() -> Result<Self, WorkerError> {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(threads)
    }

    /// Number of threads of the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `function` once per thread with the thread index and the abort flag.
    ///
    /// Returns `true` if at least one invocation returned `true`.
    pub fn execute_abortable<F>(&self, function: F, abort: &AtomicBool) -> bool
    where
        F: Fn(usize, &AtomicBool) -> bool + Sync,
    {
        let threads = self.threads();
        self.pool.install(|| {
            (0..threads)
                .into_par_iter()
                .map(|index| run_abortable(|| function(index, abort), abort))
                .reduce(|| false, |a, b| a || b)
        })
    }

    /// Splits `[first, first + size)` into contiguous partitions of at least `minimal_per_thread`
    /// elements and runs `function(partition_first, partition_size, abort)` for each of them.
    ///
    /// Returns `true` if at least one partition returned `true`, `false` for an empty range.
    pub fn execute_separable_and_abortable<F>(
        &self,
        function: F,
        abort: &AtomicBool,
        first: usize,
        size: usize,
        minimal_per_thread: usize,
    ) -> bool
    where
        F: Fn(usize, usize, &AtomicBool) -> bool + Sync,
    {
        let partitions = partitions(first, size, self.threads(), minimal_per_thread);
        if partitions.len() == 1 {
            let (start, count) = partitions[0];
            return run_abortable(|| function(start, count, abort), abort);
        }

        self.pool.install(|| {
            partitions
                .into_par_iter()
                .map(|(start, count)| run_abortable(|| function(start, count, abort), abort))
                .reduce(|| false, |a, b| a || b)
        })
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("threads", &self.threads())
            .finish()
    }
}

fn run_abortable(function: impl FnOnce() -> bool, abort: &AtomicBool) -> bool {
    if abort.load(Ordering::Acquire) {
        return false;
    }
    let succeeded = function();
    if succeeded {
        abort.store(true, Ordering::Release);
    }
    succeeded
}

/// Even partitioning of a range; the first `size % count` partitions hold one more element.
fn partitions(
    first: usize,
    size: usize,
    threads: usize,
    minimal_per_thread: usize,
) -> Vec<(usize, usize)> {
    if size == 0 {
        return Vec::new();
    }
    let count = (size / minimal_per_thread.max(1)).clamp(1, threads.max(1));
    let base = size / count;
    let remainder = size % count;

    let mut start = first;
    (0..count)
        .map(|index| {
            let length = base + usize::from(index < remainder);
            let partition = (start, length);
            start += length;
            partition
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_worker_invalid_threads() {
        assert!(matches!(
            Worker::new(0),
            Err(WorkerError::InvalidThreadCount(0))
        ));
    }

    #[test]
    fn test_partitions_cover_range() {
        let parts = partitions(10, 23, 4, 1);
        assert_eq!(parts, vec![(10, 6), (16, 6), (22, 6), (28, 5)]);

        assert_eq!(partitions(0, 5, 8, 10), vec![(0, 5)]);
        assert_eq!(partitions(0, 20, 8, 10), vec![(0, 10), (10, 10)]);
        assert!(partitions(3, 0, 4, 1).is_empty());
    }

    #[test]
    fn test_separable_visits_every_element() -> Result<(), WorkerError> {
        let worker = Worker::new(3)?;
        let abort = AtomicBool::new(false);
        let visited = AtomicUsize::new(0);
        let sum = AtomicUsize::new(0);

        let succeeded = worker.execute_separable_and_abortable(
            |start, count, _abort| {
                visited.fetch_add(count, Ordering::Relaxed);
                sum.fetch_add((start..start + count).sum::<usize>(), Ordering::Relaxed);
                false
            },
            &abort,
            5,
            100,
            1,
        );

        assert!(!succeeded);
        assert!(!abort.load(Ordering::Acquire));
        assert_eq!(visited.load(Ordering::Relaxed), 100);
        assert_eq!(sum.load(Ordering::Relaxed), (5..105).sum::<usize>());
        Ok(())
    }

    #[test]
    fn test_abortable_success_raises_flag() -> Result<(), WorkerError> {
        let worker = Worker::new(4)?;
        assert_eq!(worker.threads(), 4);
        let abort = AtomicBool::new(false);

        let succeeded = worker.execute_abortable(
            |index, abort| {
                if index == 2 {
                    return true;
                }
                // spin until a sibling succeeded
                while !abort.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                false
            },
            &abort,
        );

        assert!(succeeded);
        assert!(abort.load(Ordering::Acquire));
        Ok(())
    }

    #[test]
    fn test_aborted_before_start() -> Result<(), WorkerError> {
        let worker = Worker::new(2)?;
        let abort = AtomicBool::new(true);
        let calls = AtomicUsize::new(0);
        let succeeded = worker.execute_abortable(
            |_, _| {
                calls.fetch_add(1, Ordering::Relaxed);
                true
            },
            &abort,
        );
        assert!(!succeeded);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        Ok(())
    }
}
