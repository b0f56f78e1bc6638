//! Entry points draining a top-level stream through a process.

use crate::{PoolProcess, PoolStack, Result, link, transform};
use tokio::sync::mpsc;

/// Runs `process` on every item of `input`, discarding the results.
///
/// Returns once `input` is exhausted and all work, at every depth, is done.
///
/// # Errors
///
/// Returns the first error raised by the pipeline. Structural errors (see
/// [`Error::is_fatal`](crate::Error::is_fatal)) abort the run: remaining
/// input is drained without being processed.
pub async fn run<T>(
    stack: &PoolStack,
    input: mpsc::Receiver<T>,
    process: PoolProcess<T>,
) -> Result<()>
where
    T: Send + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::debug!("Running pipeline over {} depth(s)", stack.len());

    let result = transform(stack, input, move |stack, value| process(stack, value))
        .finish()
        .await;

    #[cfg(feature = "tracing")]
    match &result {
        Ok(()) => tracing::debug!("Pipeline drained"),
        Err(e) => tracing::error!("Pipeline aborted: {e}"),
    }

    result
}

/// [`run`] over the [`link`] of `processes`.
///
/// # Errors
///
/// See [`run`].
pub async fn run_all<T, I>(
    stack: &PoolStack,
    input: mpsc::Receiver<T>,
    processes: I,
) -> Result<()>
where
    T: Send + 'static,
    I: IntoIterator<Item = PoolProcess<T>>,
{
    run(stack, input, link(processes)).await
}
