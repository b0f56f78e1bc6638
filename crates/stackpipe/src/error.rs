//! Error types for stacked pipelines.
//!
//! This module defines the central `Error` enum shared by every layer of the
//! crate. Errors fall in two families:
//!
//! - Configuration errors (`InvalidDispatch`, `PoolAllocation`) are returned
//!   before any work starts and can be handled like any other value.
//! - Structural errors (`UnvalidatedDispatch`, `Submission`,
//!   `ProtocolViolation`, `TaskPanicked`) surface while a pipeline is
//!   running. They leave the pipeline in an undefined state, so the run is
//!   aborted and the error is returned from [`run`](crate::run). See
//!   [`Error::is_fatal`].

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for pool stacks and pipelines.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A [`Dispatch`](crate::Dispatch) is missing its split or merge half.
    #[error("invalid dispatcher from {parent} to {child}: missing {missing}")]
    InvalidDispatch {
        parent: &'static str,
        child: &'static str,
        missing: &'static str,
    },

    /// A [`Dispatch`](crate::Dispatch) missing a half reached a running
    /// pipeline, bypassing its construction-time validation.
    #[error(
        "unvalidated dispatcher from {parent} to {child} used in a running pipeline: missing {missing}"
    )]
    UnvalidatedDispatch {
        parent: &'static str,
        child: &'static str,
        missing: &'static str,
    },

    /// A pool could not be created while building a [`PoolStack`](crate::PoolStack).
    #[error("failed to allocate pool at depth {depth} (capacity {capacity}): {reason}")]
    PoolAllocation {
        depth: usize,
        capacity: usize,
        reason: String,
    },

    /// A pool refused a task after the stack was successfully built.
    #[error("pool at depth {depth} refused a task: {reason}")]
    Submission { depth: usize, reason: String },

    /// A merge returned before draining every child produced by its split.
    ///
    /// The unread child keeps its producer blocked on a pool slot, so this is
    /// never treated as a recoverable condition.
    #[error("invalid dispatcher merge {child} into {parent}, leaked child task")]
    ProtocolViolation {
        parent: &'static str,
        child: &'static str,
    },

    /// A task (process, split or coordinator) panicked.
    #[error("task panicked: {reason}")]
    TaskPanicked { reason: String },

    /// The pool at this depth was already released.
    #[error("pool at depth {depth} already released")]
    AlreadyReleased { depth: usize },

    /// The consumer side of a stream went away.
    #[error("stream closed: {context}")]
    StreamClosed { context: String },
}

impl Error {
    /// Returns `true` for errors raised mid-pipeline that must terminate the
    /// running pipeline.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnvalidatedDispatch { .. }
                | Self::Submission { .. }
                | Self::ProtocolViolation { .. }
                | Self::TaskPanicked { .. }
        )
    }

    /// Reclassifies a configuration-time [`Error::InvalidDispatch`] detected
    /// at use.
    pub(crate) fn into_unvalidated(self) -> Self {
        match self {
            Self::InvalidDispatch {
                parent,
                child,
                missing,
            } => Self::UnvalidatedDispatch {
                parent,
                child,
                missing,
            },
            other => other,
        }
    }

    /// Builds a [`Error::TaskPanicked`] from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn core::any::Any + Send)) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "opaque panic payload".to_string()
        };
        Self::TaskPanicked { reason }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        match err.try_into_panic() {
            Ok(payload) => Self::from_panic(payload.as_ref()),
            Err(err) => Self::TaskPanicked {
                reason: err.to_string(),
            },
        }
    }
}
