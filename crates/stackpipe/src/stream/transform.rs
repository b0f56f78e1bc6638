//! Concurrent stream-to-stream mapping over a [`PoolStack`].
//!
//! [`transform`] spawns a coordinator that reads its input to exhaustion and
//! submits one task per item at the head of the stack. Each task receives the
//! tail of the stack, so it may fan out again one depth deeper. The output
//! stream ends exactly once, after the input ended and every submitted task
//! completed.
//!
//! ## Ordering
//!
//! If the head of the stack is absent, pass-through or of capacity 1, items
//! are processed one at a time and results keep the input order. With a
//! capacity of 2 or more, results arrive in completion order and must be
//! treated as an unordered multiset.
//!
//! ## Failures
//!
//! The first task error (or panic, or submission failure) is recorded. From
//! then on the coordinator keeps draining its input without submitting, so no
//! producer upstream is left blocked, and the recorded error is returned by
//! [`Transform::finish`].

use crate::{Error, PoolStack, Result};
use core::{future::Future, panic::AssertUnwindSafe};
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::task::TaskTracker;

/// Output side of a [`transform`].
#[derive(Debug)]
pub struct Transform<T> {
    rx: mpsc::Receiver<T>,
    coordinator: Coordinator,
}

impl<T> Transform<T> {
    /// Receives the next result, or `None` once every task completed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Discards any remaining results and waits for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while processing the input.
    pub async fn finish(self) -> Result<()> {
        let Self {
            mut rx,
            coordinator,
        } = self;
        while rx.recv().await.is_some() {}
        coordinator.join().await
    }

    /// Collects every result, then waits for the coordinator.
    ///
    /// # Errors
    ///
    /// Returns the first error recorded while processing the input.
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut results = Vec::new();
        while let Some(value) = self.rx.recv().await {
            results.push(value);
        }
        self.finish().await?;
        Ok(results)
    }

    pub(crate) fn into_parts(self) -> (mpsc::Receiver<T>, Coordinator) {
        (self.rx, self.coordinator)
    }
}

/// Handle on the background task feeding a [`Transform`].
#[derive(Debug)]
pub(crate) struct Coordinator(JoinHandle<Result<()>>);

impl Coordinator {
    pub(crate) async fn join(self) -> Result<()> {
        self.0.await?
    }
}

/// First error recorded by the tasks of one transform.
#[derive(Clone, Default)]
struct Fault(Arc<Mutex<Option<Error>>>);

impl Fault {
    fn record(&self, err: Error) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            #[cfg(feature = "tracing")]
            tracing::error!("Aborting transform: {err}");

            *slot = Some(err);
        }
    }

    fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// Maps `input` to a new stream, applying `f` to each item in a task
/// submitted at the head of `stack`.
///
/// `f` receives the tail of the stack along with the item. Must be called
/// from within a tokio runtime.
pub fn transform<IN, OUT, F, Fut>(
    stack: &PoolStack,
    mut input: mpsc::Receiver<IN>,
    f: F,
) -> Transform<OUT>
where
    IN: Send + 'static,
    OUT: Send + 'static,
    F: Fn(PoolStack, IN) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OUT>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let stack = stack.clone();
    let f = Arc::new(f);

    let coordinator = tokio::spawn(async move {
        let fault = Fault::default();
        let outstanding = TaskTracker::new();

        while let Some(item) = input.recv().await {
            if fault.is_set() {
                continue;
            }

            let task = {
                let f = Arc::clone(&f);
                let tx = tx.clone();
                let fault = fault.clone();
                let token = outstanding.token();

                move |tail: PoolStack| async move {
                    let _token = token;
                    let result = AssertUnwindSafe(async move { f(tail, item).await })
                        .catch_unwind()
                        .await;

                    match result {
                        Ok(Ok(value)) => {
                            if tx.send(value).await.is_err() {
                                #[cfg(feature = "tracing")]
                                tracing::trace!("Transform output dropped by its consumer");
                            }
                        }
                        Ok(Err(e)) => fault.record(e),
                        Err(payload) => fault.record(Error::from_panic(payload.as_ref())),
                    }
                }
            };

            if let Err(e) = stack.submit(task).await {
                fault.record(e);
            }
        }

        // Output must stay open until every submitted task is done.
        outstanding.close();
        outstanding.wait().await;
        drop(tx);

        fault.take().map_or(Ok(()), Err)
    });

    Transform {
        rx,
        coordinator: Coordinator(coordinator),
    }
}
