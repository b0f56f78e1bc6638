//! Producer and consumer endpoints handed to split and merge functions.

use crate::{Error, Result};
use core::any::type_name;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Producer endpoint given to a split.
///
/// The stream closes when the emitter is dropped, which happens when the
/// split returns. It cannot be cloned, so nothing emitted after the split
/// returned can reach the merge.
#[derive(Debug)]
pub struct Emitter<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Emitter<T> {
    pub(crate) const fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx }
    }

    /// Sends a child downstream, waiting while the stream is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] if the consumer side is gone, which
    /// only happens once the enclosing pipeline is aborting.
    pub async fn emit(&self, item: T) -> Result<()> {
        self.tx.send(item).await.map_err(|_| Error::StreamClosed {
            context: format!("no consumer left for {}", type_name::<T>()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer endpoint given to a merge.
///
/// A merge must read it to the end (`recv` returning `None`); anything left
/// unread is reported as a protocol violation once the merge returns.
#[derive(Debug)]
pub struct Children<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Children<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Second handle on the same stream, kept by the caller of the merge.
    pub(crate) fn handle(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }

    /// Receives the next processed child, or `None` at end of stream.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Reads every remaining child.
    pub async fn collect(mut self) -> Vec<T> {
        let mut children = Vec::new();
        while let Some(child) = self.recv().await {
            children.push(child);
        }
        children
    }

    /// Reads and drops every remaining child, returning how many were read.
    pub async fn discard(mut self) -> usize {
        let mut count = 0;
        while self.recv().await.is_some() {
            count += 1;
        }
        count
    }
}
