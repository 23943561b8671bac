//! Bounded tile worker pool and the per-level completion barrier.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::error;

use crate::{IngestionError, Result};

/// Fixed-size pool of tile workers.
///
/// Tasks are fire-and-forget; callers track completion with a
/// [`LevelBarrier`].
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("tile-worker-{}", i))
            .panic_handler(|_| error!("Tile worker panicked outside task guard"))
            .build()
            .map_err(|e| IngestionError::WorkerPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a task. Never blocks.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(task);
    }
}

/// Countdown latch released once every task of a level has finished.
#[derive(Clone)]
pub struct LevelBarrier {
    state: Arc<(Mutex<usize>, Condvar)>,
}

impl LevelBarrier {
    pub fn new(count: usize) -> Self {
        Self {
            state: Arc::new((Mutex::new(count), Condvar::new())),
        }
    }

    fn remaining_guard(&self) -> MutexGuard<'_, usize> {
        self.state.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn count_down(&self) {
        let mut remaining = self.remaining_guard();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.state.1.notify_all();
        }
    }

    pub fn remaining(&self) -> usize {
        *self.remaining_guard()
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut remaining = self.remaining_guard();
        while *remaining > 0 {
            remaining = self
                .state
                .1
                .wait(remaining)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Block until the count reaches zero or `timeout` passes.
    /// Returns `true` when the barrier released.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining_guard();
        while *remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            remaining = self
                .state
                .1
                .wait_timeout(remaining, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    /// Guard that counts down when dropped, including during unwinding.
    pub fn guard(&self) -> BarrierGuard {
        BarrierGuard {
            barrier: self.clone(),
        }
    }
}

pub struct BarrierGuard {
    barrier: LevelBarrier,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.barrier.count_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_barrier_releases_after_all_tasks() {
        let pool = WorkerPool::new(3).unwrap();
        let barrier = LevelBarrier::new(20);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let guard = barrier.guard();
            let done = Arc::clone(&done);
            pool.submit(move || {
                let _guard = guard;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        barrier.wait();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn test_guard_counts_down_on_panic() {
        let pool = WorkerPool::new(1).unwrap();
        let barrier = LevelBarrier::new(2);
        for i in 0..2 {
            let guard = barrier.guard();
            pool.submit(move || {
                let _guard = guard;
                let _ = std::panic::catch_unwind(|| {
                    if i == 0 {
                        panic!("tile task failed");
                    }
                });
            });
        }
        assert!(barrier.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let barrier = LevelBarrier::new(1);
        assert!(!barrier.wait_timeout(Duration::from_millis(20)));
        assert_eq!(barrier.remaining(), 1);
    }

    #[test]
    fn test_empty_barrier_does_not_block() {
        LevelBarrier::new(0).wait();
    }
}
