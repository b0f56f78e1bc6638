//! Processes and their composition.
//!
//! A [`Process`] is a plain synchronous `T -> T` function that knows nothing
//! about pools. A [`PoolProcess`] receives the [`PoolStack`] of its depth and
//! may fan out into deeper depths through [`wrap`]. Processes of one depth are
//! chained with [`link`]; [`lift`] and [`lift_blocking`] adapt a [`Process`]
//! so it can take part in a chain.
//!
//! ## Structure
//!
//! - [`dispatch`] - [`Dispatch`], the split/merge pair of one branch point.
//! - [`wrap`](mod@wrap) - fan-out/fan-in of a child process into a parent one.

pub mod dispatch;
pub mod wrap;

pub use dispatch::{Dispatch, DispatchBuilder, Merge, Split, merge_fn, split_fn};
pub use wrap::wrap;

use crate::{Error, PoolStack, Result};
use core::future::Future;
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;

/// Pool-unaware `T -> T` step.
pub type Process<T> = Arc<dyn Fn(T) -> T + Send + Sync>;

/// `T -> T` step running at one depth of a [`PoolStack`].
pub type PoolProcess<T> =
    Arc<dyn Fn(PoolStack, T) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Boxes a closure into a [`Process`].
pub fn process_fn<T, F>(f: F) -> Process<T>
where
    F: Fn(T) -> T + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Boxes an async closure into a [`PoolProcess`].
pub fn pool_fn<T, F, Fut>(f: F) -> PoolProcess<T>
where
    T: 'static,
    F: Fn(PoolStack, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Arc::new(move |stack: PoolStack, value: T| f(stack, value).boxed())
}

/// Adapts a pool-agnostic function into a [`PoolProcess`] that ignores the
/// stack and runs inline.
///
/// The function runs on the runtime worker thread driving the task. A
/// function that blocks holds that thread, so blocking steps run at most as
/// many at a time as the runtime has worker threads, whatever the capacity of
/// their pool. Use [`lift_blocking`] for those.
pub fn lift<T, F>(process: F) -> PoolProcess<T>
where
    T: Send + 'static,
    F: Fn(T) -> T + Send + Sync + 'static,
{
    let process = Arc::new(process);
    Arc::new(move |_: PoolStack, value: T| {
        let process = Arc::clone(&process);
        async move { Ok(process(value)) }.boxed()
    })
}

/// Like [`lift`], but runs the function on the runtime's blocking thread
/// pool, so a blocking step only holds a slot of its own pool.
///
/// A panic in the function is reported as
/// [`Error::TaskPanicked`](crate::Error::TaskPanicked).
pub fn lift_blocking<T, F>(process: F) -> PoolProcess<T>
where
    T: Send + 'static,
    F: Fn(T) -> T + Send + Sync + 'static,
{
    let process = Arc::new(process);
    Arc::new(move |_: PoolStack, value: T| {
        let process = Arc::clone(&process);
        async move {
            tokio::task::spawn_blocking(move || process(value))
                .await
                .map_err(Error::from)
        }
        .boxed()
    })
}

/// Applies [`lift`] to each process.
pub fn lift_all<T, I>(processes: I) -> Vec<PoolProcess<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Process<T>>,
{
    processes
        .into_iter()
        .map(|process| lift(move |value| process(value)))
        .collect()
}

/// Chains processes left to right into one.
///
/// Every stage receives the same stack and the previous stage's output, so
/// linking consumes no depth. The first error stops the chain.
pub fn link<T, I>(processes: I) -> PoolProcess<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = PoolProcess<T>>,
{
    let processes: Arc<[PoolProcess<T>]> = processes.into_iter().collect();

    Arc::new(move |stack: PoolStack, value: T| {
        let processes = Arc::clone(&processes);
        async move {
            let mut value = value;
            for process in processes.iter() {
                value = process(stack.clone(), value).await?;
            }
            Ok(value)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests;
