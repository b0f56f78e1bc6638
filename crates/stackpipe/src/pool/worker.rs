//! Bounded asynchronous worker pool.
//!
//! This module defines the [`WorkerPool`] struct, the leaf resource of a
//! [`PoolStack`](super::PoolStack). A pool of capacity `K` runs at most `K`
//! submitted tasks at once; further submissions wait for a free slot instead
//! of being dropped. Each slot is a permit of a [`Semaphore`], and every task
//! spawned by the pool is tracked by a [`TaskTracker`] so that [`release`]
//! can drain in-flight work before returning.
//!
//! [`release`]: WorkerPool::release

use super::PoolOptions;
use crate::{Error, Result};
use core::future::Future;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::{
    runtime::Handle,
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
};
use tokio_util::task::TaskTracker;

/// A pool running up to `capacity` tasks concurrently on a tokio runtime.
#[derive(Debug)]
pub struct WorkerPool {
    depth: usize,
    capacity: usize,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    runtime: Handle,
    nonblocking: bool,
    max_blocking_tasks: Option<usize>,
    blocked: AtomicUsize,
    released: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool for the given stack depth.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolAllocation`] if the capacity is zero or exceeds
    /// [`Semaphore::MAX_PERMITS`], or if no runtime is available to spawn
    /// onto.
    pub fn new(depth: usize, capacity: usize, options: &PoolOptions) -> Result<Self> {
        let alloc_err = |reason: &str| Error::PoolAllocation {
            depth,
            capacity,
            reason: reason.to_string(),
        };

        if capacity == 0 {
            return Err(alloc_err("capacity must be greater than 0"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(alloc_err("capacity exceeds the semaphore permit limit"));
        }

        let runtime = match &options.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| alloc_err(&e.to_string()))?,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Pool at depth {depth} created with {capacity} slots");

        Ok(Self {
            depth,
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            runtime,
            nonblocking: options.nonblocking,
            max_blocking_tasks: options.max_blocking_tasks,
            blocked: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        })
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tasks currently spawned by this pool.
    pub fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Spawns `task` once a slot is free.
    ///
    /// Waits while the pool is saturated, unless the pool is nonblocking. The
    /// slot is held until `task` completes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`] if:
    /// - The pool was released.
    /// - The pool is nonblocking and saturated.
    /// - Too many submitters are already waiting for a slot.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self.acquire().await?;

        self.tracker.spawn_on(
            async move {
                task.await;
                drop(permit);
            },
            &self.runtime,
        );
        Ok(())
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.released.load(Ordering::Acquire) {
            return Err(self.refused("pool released"));
        }

        if self.nonblocking {
            return match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(TryAcquireError::NoPermits) => Err(self.refused("pool saturated")),
                Err(TryAcquireError::Closed) => Err(self.refused("pool released")),
            };
        }

        let _waiting = match self.max_blocking_tasks {
            Some(max) => Some(BlockedGuard::enter(&self.blocked, max).ok_or_else(|| {
                self.refused(&format!("more than {max} submitters waiting for a slot"))
            })?),
            None => None,
        };

        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| self.refused("pool released"))
    }

    fn refused(&self, reason: &str) -> Error {
        Error::Submission {
            depth: self.depth,
            reason: reason.to_string(),
        }
    }

    /// Stops accepting tasks without waiting for in-flight ones.
    ///
    /// Returns `false` if the pool had already been released.
    pub(crate) fn close(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.slots.close();
        self.tracker.close();

        #[cfg(test)]
        CLOSED_ON_THREAD.with(|closed| closed.set(closed.get() + 1));
        true
    }

    /// Returns `true` once the pool stopped accepting tasks.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stops accepting tasks, then waits for every spawned task to finish.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyReleased`] if the pool was already released.
    pub async fn release(&self) -> Result<()> {
        if !self.close() {
            return Err(Error::AlreadyReleased { depth: self.depth });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Draining pool at depth {} ({} tasks in flight)",
            self.depth,
            self.tracker.len()
        );

        self.tracker.wait().await;

        #[cfg(feature = "tracing")]
        tracing::debug!("Pool at depth {} released", self.depth);
        Ok(())
    }
}

#[cfg(test)]
thread_local! {
    /// Pools closed by the current thread.
    pub(crate) static CLOSED_ON_THREAD: core::cell::Cell<usize> =
        const { core::cell::Cell::new(0) };
}

/// Counts a submitter waiting for a slot for as long as it is alive.
struct BlockedGuard<'a>(&'a AtomicUsize);

impl<'a> BlockedGuard<'a> {
    fn enter(counter: &'a AtomicUsize, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(counter))
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn zero_capacity_is_not_a_pool() {
        let err = WorkerPool::new(2, 0, &PoolOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::PoolAllocation {
                depth: 2,
                capacity: 0,
                ..
            }
        ));
    }

    #[test]
    fn requires_a_runtime() {
        let err = WorkerPool::new(0, 1, &PoolOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PoolAllocation { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_holds_a_slot_until_done() {
        let pool = WorkerPool::new(0, 2, &PoolOptions::default()).unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = rx.await;
        })
        .await
        .unwrap();
        assert_eq!(pool.available(), 1);

        tx.send(()).unwrap();
        pool.release().await.unwrap();
        assert_eq!(pool.running(), 0);
        assert!(pool.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nonblocking_rejects_when_saturated() {
        let options = PoolOptions::new().nonblocking(true);
        let pool = WorkerPool::new(3, 1, &options).unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = rx.await;
        })
        .await
        .unwrap();

        let err = pool.submit(async {}).await.unwrap_err();
        assert!(matches!(err, Error::Submission { depth: 3, .. }));
        assert!(err.is_fatal());

        tx.send(()).unwrap();
        pool.release().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn blocked_submitters_are_capped() {
        let options = PoolOptions::new().max_blocking_tasks(1);
        let pool = Arc::new(WorkerPool::new(0, 1, &options).unwrap());
        let (tx, rx) = oneshot::channel::<()>();

        pool.submit(async move {
            let _ = rx.await;
        })
        .await
        .unwrap();

        // First waiter parks on the saturated pool.
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        while pool.blocked.load(Ordering::Acquire) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Second waiter exceeds the cap.
        let err = pool.submit(async {}).await.unwrap_err();
        assert!(matches!(err, Error::Submission { .. }));

        tx.send(()).unwrap();
        waiter.await.unwrap().unwrap();
        pool.release().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_after_release_is_refused() {
        let pool = WorkerPool::new(1, 4, &PoolOptions::default()).unwrap();
        pool.release().await.unwrap();

        let err = pool.submit(async {}).await.unwrap_err();
        assert_eq!(
            err,
            Error::Submission {
                depth: 1,
                reason: "pool released".into()
            }
        );
        assert_eq!(
            pool.release().await.unwrap_err(),
            Error::AlreadyReleased { depth: 1 }
        );
    }
}
