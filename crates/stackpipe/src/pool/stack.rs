//! Stack of per-depth pools.
//!
//! A [`PoolStack`] is an immutable, shared sequence of levels plus an offset.
//! Level `0` is the shallowest depth. Each level is either a real
//! [`WorkerPool`] or a pass-through marker (capacity `0`), in which case tasks
//! submitted at that depth run inline on the submitting task.
//!
//! Tasks never see the level they were submitted to: they receive the *tail*
//! of the stack, so a task that fans out again submits its children one depth
//! deeper. Producing a tail only bumps the offset of a new view; the original
//! stack is never mutated.

use super::{PoolOptions, WorkerPool};
use crate::Result;
use core::future::Future;
use std::sync::Arc;

/// One depth of a [`PoolStack`]. `None` is a pass-through marker.
type Level = Option<Arc<WorkerPool>>;

/// Ordered stack of worker pools, one per branching depth.
#[derive(Clone, Debug, Default)]
pub struct PoolStack {
    levels: Arc<[Level]>,
    offset: usize,
}

impl PoolStack {
    /// Builds one pool per capacity, with `0` standing for a pass-through
    /// depth.
    ///
    /// An empty capacity list gives an empty stack: every task then runs
    /// inline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolAllocation`](crate::Error::PoolAllocation) if a
    /// pool cannot be created. Pools created before the failing one are
    /// released before returning.
    pub fn new(capacities: &[usize], options: PoolOptions) -> Result<Self> {
        let mut levels: Vec<Level> = Vec::with_capacity(capacities.len());

        for (depth, &capacity) in capacities.iter().enumerate() {
            if capacity == 0 {
                levels.push(None);
                continue;
            }

            match WorkerPool::new(depth, capacity, &options) {
                Ok(pool) => levels.push(Some(Arc::new(pool))),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Pool stack construction failed: {e}");

                    // Nothing has been submitted yet, so closing is enough.
                    for pool in levels.iter().flatten() {
                        pool.close();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            levels: levels.into(),
            offset: 0,
        })
    }

    /// Builds a stack with default [`PoolOptions`].
    ///
    /// # Errors
    ///
    /// See [`PoolStack::new`].
    pub fn from_capacities(capacities: &[usize]) -> Result<Self> {
        Self::new(capacities, PoolOptions::default())
    }

    /// Returns a stack with no levels.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Absolute depth of the head level within the original stack.
    pub const fn depth(&self) -> usize {
        self.offset
    }

    /// Number of levels remaining from the head down.
    pub fn len(&self) -> usize {
        self.levels.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacities of the remaining levels, `0` for pass-through depths.
    pub fn capacities(&self) -> Vec<usize> {
        self.remaining()
            .iter()
            .map(|level| level.as_ref().map_or(0, |pool| pool.capacity()))
            .collect()
    }

    /// Pool at the head of the stack, `None` if the head is pass-through or
    /// the stack is empty.
    pub fn head(&self) -> Option<&WorkerPool> {
        self.remaining().first().and_then(|level| level.as_deref())
    }

    /// The stack without its head. The tail of an empty stack is empty.
    #[must_use]
    pub fn tail(&self) -> Self {
        Self {
            levels: Arc::clone(&self.levels),
            offset: (self.offset + 1).min(self.levels.len()),
        }
    }

    /// Returns `true` if tasks submitted at the head run one at a time, in
    /// submission order.
    pub fn is_serial(&self) -> bool {
        self.head().is_none_or(|pool| pool.capacity() == 1)
    }

    fn remaining(&self) -> &[Level] {
        self.levels.get(self.offset..).unwrap_or_default()
    }

    /// Submits `task` at the head of the stack, handing it the tail.
    ///
    /// - Empty stack: `task` runs inline with the empty stack.
    /// - Pass-through head: `task` runs inline with the tail.
    /// - Real head: `task` is spawned on the head pool; this returns once the
    ///   pool has accepted it, waiting while the pool is saturated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Submission`](crate::Error::Submission) if the head pool
    /// refuses the task.
    pub async fn submit<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(PoolStack) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(head) = self.remaining().first() else {
            task(self.clone()).await;
            return Ok(());
        };

        match head {
            None => {
                task(self.tail()).await;
                Ok(())
            }
            Some(pool) => pool.submit(task(self.tail())).await,
        }
    }

    /// Releases every real pool from the head down, skipping pass-through
    /// depths.
    ///
    /// Each pool is released independently: a failure on one level does not
    /// prevent releasing the others. Must not be called while work at any of
    /// these depths is still in flight.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, after every pool was visited.
    pub async fn release(&self) -> Result<()> {
        let mut first_err = None;

        for pool in self.remaining().iter().flatten() {
            if let Err(e) = pool.release().await {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to release pool at depth {}: {e}", pool.depth());

                first_err.get_or_insert(e);
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}
