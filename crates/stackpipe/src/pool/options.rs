use tokio::runtime::Handle;

/// Options applied to every real pool of a [`PoolStack`](super::PoolStack).
///
/// The defaults give a blocking pool with no limit on waiting submitters,
/// spawning onto the runtime that builds the stack.
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Reject a submission instead of waiting when every slot is busy.
    pub nonblocking: bool,
    /// Maximum number of submitters allowed to wait for a slot at once.
    /// `None` means unbounded. Ignored when `nonblocking` is set.
    pub max_blocking_tasks: Option<usize>,
    /// Runtime the pool spawns onto. Defaults to the current runtime.
    pub runtime: Option<Handle>,
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn nonblocking(mut self, nonblocking: bool) -> Self {
        self.nonblocking = nonblocking;
        self
    }

    #[must_use]
    pub fn max_blocking_tasks(mut self, max: usize) -> Self {
        self.max_blocking_tasks = Some(max);
        self
    }

    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}
