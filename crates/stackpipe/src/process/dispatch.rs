//! Split/merge pairs describing one branch point of a pipeline.
//!
//! A [`Dispatch`] turns one parent into many children ([`Split`]) and folds
//! the processed children back into the parent ([`Merge`]):
//!
//! ```text
//! parent -(split)-> [child, child, ...] -(process)-> -(merge)-> parent
//! ```
//!
//! Both halves must be present. This is checked when the dispatch is built
//! and checked again by [`wrap`](crate::wrap) before each use.

use crate::{Children, Emitter, Error, Result};
use core::{any::type_name, fmt, future::Future};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;

/// Emits the children of a parent, then returns. The emitter is closed on
/// return.
pub type Split<P, C> = Arc<dyn Fn(P, Emitter<C>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Folds every processed child into the parent and returns the updated
/// parent. Must read its [`Children`] to the end.
pub type Merge<P, C> = Arc<dyn Fn(P, Children<C>) -> BoxFuture<'static, P> + Send + Sync>;

/// Boxes an async closure into a [`Split`].
pub fn split_fn<P, C, F, Fut>(f: F) -> Split<P, C>
where
    P: 'static,
    C: 'static,
    F: Fn(P, Emitter<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |parent: P, emitter: Emitter<C>| f(parent, emitter).boxed())
}

/// Boxes an async closure into a [`Merge`].
pub fn merge_fn<P, C, F, Fut>(f: F) -> Merge<P, C>
where
    P: 'static,
    C: 'static,
    F: Fn(P, Children<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = P> + Send + 'static,
{
    Arc::new(move |parent: P, children: Children<C>| f(parent, children).boxed())
}

/// A validated ([`Split`], [`Merge`]) pair from `P` to `C`.
///
/// Stateless and cheap to clone: one dispatch serves any number of parents.
pub struct Dispatch<P, C> {
    split: Option<Split<P, C>>,
    merge: Option<Merge<P, C>>,
}

impl<P, C> Dispatch<P, C> {
    /// Creates a dispatch and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDispatch`] if either half is missing.
    pub fn new(split: Option<Split<P, C>>, merge: Option<Merge<P, C>>) -> Result<Self> {
        let dispatch = Self { split, merge };
        dispatch.validate()?;
        Ok(dispatch)
    }

    /// Starts a [`DispatchBuilder`].
    pub fn builder() -> DispatchBuilder<P, C> {
        DispatchBuilder::default()
    }

    /// Checks that both halves are present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDispatch`] naming the missing half.
    pub fn validate(&self) -> Result<()> {
        self.parts().map(|_| ())
    }

    pub(crate) fn parts(&self) -> Result<(&Split<P, C>, &Merge<P, C>)> {
        match (&self.split, &self.merge) {
            (Some(split), Some(merge)) => Ok((split, merge)),
            (split, merge) => Err(Error::InvalidDispatch {
                parent: type_name::<P>(),
                child: type_name::<C>(),
                missing: match (split.is_none(), merge.is_none()) {
                    (true, true) => "split and merge",
                    (true, false) => "split",
                    _ => "merge",
                },
            }),
        }
    }
}

impl<P, C> Clone for Dispatch<P, C> {
    fn clone(&self) -> Self {
        Self {
            split: self.split.clone(),
            merge: self.merge.clone(),
        }
    }
}

impl<P, C> Default for Dispatch<P, C> {
    /// An empty, invalid dispatch.
    fn default() -> Self {
        Self {
            split: None,
            merge: None,
        }
    }
}

impl<P, C> fmt::Debug for Dispatch<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("parent", &type_name::<P>())
            .field("child", &type_name::<C>())
            .field("split", &self.split.is_some())
            .field("merge", &self.merge.is_some())
            .finish()
    }
}

/// Builds a [`Dispatch`] from async closures.
///
/// ```ignore
/// let dispatch = Dispatch::<Job, SubJob>::builder()
///     .split(|job, children| async move {
///         for part in job.parts() {
///             children.emit(part).await?;
///         }
///         Ok(())
///     })
///     .merge(|job, children| async move { job.with(children.collect().await) })
///     .build()?;
/// ```
pub struct DispatchBuilder<P, C> {
    inner: Dispatch<P, C>,
}

impl<P, C> Default for DispatchBuilder<P, C> {
    fn default() -> Self {
        Self {
            inner: Dispatch::default(),
        }
    }
}

impl<P, C> DispatchBuilder<P, C>
where
    P: 'static,
    C: 'static,
{
    #[must_use]
    pub fn split<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(P, Emitter<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner.split = Some(split_fn(f));
        self
    }

    #[must_use]
    pub fn merge<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(P, Children<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = P> + Send + 'static,
    {
        self.inner.merge = Some(merge_fn(f));
        self
    }

    /// Validates and returns the dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDispatch`] if `split` or `merge` was never set.
    pub fn build(self) -> Result<Dispatch<P, C>> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}
