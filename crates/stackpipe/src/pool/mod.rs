//! Per-depth worker pools.
//!
//! ## Structure
//!
//! - [`worker`] - bounded [`WorkerPool`] (one depth).
//! - [`stack`] - [`PoolStack`] and the recursive submission policy.
//! - [`options`] - [`PoolOptions`] shared by every pool of a stack.

pub mod options;
pub mod stack;
pub mod worker;

pub use options::PoolOptions;
pub use stack::PoolStack;
pub use worker::WorkerPool;
