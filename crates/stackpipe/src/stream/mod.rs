//! Streams flowing between pipeline stages.
//!
//! ## Structure
//!
//! - [`transform`] - concurrent mapping of one stream into another.
//! - [`endpoint`] - [`Emitter`] and [`Children`], the split/merge endpoints.

pub mod endpoint;
pub mod transform;

pub use endpoint::{Children, Emitter};
pub use transform::{Transform, transform};

use tokio::sync::mpsc;

/// Feeds the items of `items` into a new stream from a background task.
///
/// The stream ends after the last item. Must be called from within a tokio
/// runtime.
pub fn from_iter<I>(items: I) -> mpsc::Receiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let items = items.into_iter();

    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });

    rx
}
