use super::{Dispatch, PoolProcess};
use crate::{Children, Emitter, Error, PoolStack, transform};
use core::any::type_name;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Builds a parent-level process from a child-level process and a
/// [`Dispatch`].
///
/// For each parent, the returned process:
///
/// 1. Re-validates `dispatch`. A dispatch that is invalid here bypassed
///    [`Dispatch::new`] or [`DispatchBuilder::build`](super::DispatchBuilder::build)
///    and fails with [`Error::UnvalidatedDispatch`].
/// 2. Spawns the split on a clone of the parent, feeding a fresh child stream
///    that closes when the split returns.
/// 3. Runs `child` over that stream with [`transform`], on the stack it was
///    given, so children are pooled one depth below the parent and may fan
///    out further.
/// 4. Runs the merge on the calling task.
/// 5. Reads the result stream once more. A value there means the merge
///    returned without draining its children, reported as
///    [`Error::ProtocolViolation`] once the split is stopped and every child
///    task already submitted has finished.
/// 6. Surfaces any child or split failure, otherwise returns the merged
///    parent.
pub fn wrap<P, C>(child: PoolProcess<C>, dispatch: Dispatch<P, C>) -> PoolProcess<P>
where
    P: Clone + Send + 'static,
    C: Send + 'static,
{
    Arc::new(move |stack: PoolStack, parent: P| {
        let child = Arc::clone(&child);
        let dispatch = dispatch.clone();

        async move {
            let (split, merge) = match dispatch.parts() {
                Ok((split, merge)) => (Arc::clone(split), Arc::clone(merge)),
                Err(e) => {
                    let err = e.into_unvalidated();
                    #[cfg(feature = "tracing")]
                    tracing::error!("{err}");
                    return Err(err);
                }
            };

            let (tx, rx) = mpsc::channel(1);
            let splitter = tokio::spawn(split(parent.clone(), Emitter::new(tx)));

            let (results, coordinator) =
                transform(&stack, rx, move |stack, c| child(stack, c)).into_parts();
            let children = Children::new(results);
            let mut leftover = children.handle();

            let parent = merge(parent, children).await;

            if leftover.recv().await.is_some() {
                let err = Error::ProtocolViolation {
                    parent: type_name::<P>(),
                    child: type_name::<C>(),
                };
                #[cfg(feature = "tracing")]
                tracing::error!("{err}");

                // Stop the split and close the result stream so the remaining
                // children fail fast, then wait for them before reporting.
                splitter.abort();
                drop(leftover);
                let _ = splitter.await;
                let _ = coordinator.join().await;
                return Err(err);
            }

            coordinator.join().await?;
            splitter.await??;

            Ok(parent)
        }
        .boxed()
    })
}
