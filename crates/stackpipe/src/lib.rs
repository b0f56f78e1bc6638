#![doc = include_str!("../README.md")]

mod driver;
mod error;
mod pool;
mod process;
mod stream;

pub use crate::driver::*;
pub use crate::error::*;
pub use crate::pool::*;
pub use crate::process::*;
pub use crate::stream::{Children, Emitter, Transform, from_iter, transform};
