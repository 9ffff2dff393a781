//! Bounded worker pool with join-all semantics
//!
//! A [`TaskGroup`] owns a rayon pool. [`TaskGroup::run`] opens a scope, runs
//! the root task inside it and returns once every task spawned (transitively)
//! through a [`TaskScope`] has finished. The first error wins; tasks that
//! start after a failure skip their body.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{PartitionError, Result};

#[derive(Default)]
struct GroupState {
    outstanding: AtomicUsize,
    spawned: AtomicUsize,
    failed: AtomicBool,
    failure: Mutex<Option<PartitionError>>,
}

impl GroupState {
    fn record(&self, err: PartitionError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Releases one outstanding slot when the task body ends, panics included.
struct Outstanding<'s>(&'s GroupState);

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        self.0.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct TaskGroup {
    pool: rayon::ThreadPool,
    state: GroupState,
}

impl TaskGroup {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("cells-worker-{}", i))
            .build()
            .map_err(|e| PartitionError::WorkerPool(e.to_string()))?;
        Ok(Self {
            pool,
            state: GroupState::default(),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Tasks currently spawned and not yet finished
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::Acquire)
    }

    /// Tasks handed to the pool over the group's lifetime
    pub fn spawned(&self) -> usize {
        self.state.spawned.load(Ordering::Acquire)
    }

    /// Run `root` on the pool and wait for all descendants.
    pub fn run<'env, F>(&'env self, root: F) -> Result<()>
    where
        F: for<'b> FnOnce(&TaskScope<'b, 'env>) -> Result<()> + Send + 'env,
    {
        let state = &self.state;
        state.failed.store(false, Ordering::Release);
        self.pool.scope(|scope: &rayon::Scope<'env>| {
            TaskScope { scope, state }.spawn(root);
        });

        let remaining = self.outstanding();
        if remaining != 0 {
            return Err(PartitionError::WorkerPool(format!(
                "{} tasks still outstanding after join",
                remaining
            )));
        }

        match self.state.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Handle passed to every task for spawning further work.
pub struct TaskScope<'a, 'scope> {
    scope: &'a rayon::Scope<'scope>,
    state: &'scope GroupState,
}

impl<'a, 'scope> TaskScope<'a, 'scope> {
    pub fn spawn<F>(&self, task: F)
    where
        F: for<'b> FnOnce(&TaskScope<'b, 'scope>) -> Result<()> + Send + 'scope,
    {
        let state = self.state;
        state.outstanding.fetch_add(1, Ordering::AcqRel);
        state.spawned.fetch_add(1, Ordering::Relaxed);

        self.scope.spawn(move |scope| {
            let _slot = Outstanding(state);
            if state.has_failed() {
                return;
            }
            let child = TaskScope { scope, state };
            if let Err(err) = task(&child) {
                state.record(err);
            }
        });
    }

    /// True once any task in the group has failed
    pub fn is_failed(&self) -> bool {
        self.state.has_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fan_out<'s>(scope: &TaskScope<'_, 's>, depth: u32, counter: &'s AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        if depth == 0 {
            return Ok(());
        }
        for _ in 0..2 {
            scope.spawn(move |s| fan_out(s, depth - 1, counter));
        }
        Ok(())
    }

    #[test]
    fn test_join_waits_for_all_descendants() {
        let group = TaskGroup::new(4).unwrap();
        let counter = AtomicUsize::new(0);

        group.run(|scope| fan_out(scope, 6, &counter)).unwrap();

        // 2^7 - 1 nodes in a complete binary tree of depth 6
        assert_eq!(counter.load(Ordering::Relaxed), 127);
        assert_eq!(group.outstanding(), 0);
        assert_eq!(group.spawned(), 127);
    }

    #[test]
    fn test_first_error_is_returned() {
        let group = TaskGroup::new(2).unwrap();

        let result = group.run(|scope| {
            scope.spawn(|_| Err(PartitionError::UnknownCell(42)));
            Ok(())
        });

        assert!(matches!(result, Err(PartitionError::UnknownCell(42))));
        assert_eq!(group.outstanding(), 0);
    }

    #[test]
    fn test_running_task_sees_failure() {
        let group = TaskGroup::new(2).unwrap();
        let seen = AtomicBool::new(false);

        let result = group.run(|scope| {
            scope.spawn(|_| Err(PartitionError::UnknownCell(7)));
            let started = std::time::Instant::now();
            while started.elapsed() < std::time::Duration::from_secs(5) {
                if scope.is_failed() {
                    seen.store(true, Ordering::Relaxed);
                    break;
                }
                std::thread::yield_now();
            }
            Ok(())
        });

        assert!(matches!(result, Err(PartitionError::UnknownCell(7))));
        assert!(seen.load(Ordering::Relaxed));
    }

    #[test]
    fn test_single_thread_pool() {
        let group = TaskGroup::new(1).unwrap();
        assert_eq!(group.threads(), 1);
        let counter = AtomicUsize::new(0);
        group.run(|scope| fan_out(scope, 3, &counter)).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 15);
    }
}
