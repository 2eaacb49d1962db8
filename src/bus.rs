//! # Lossy broadcast channel for classified runtime errors.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that carries
//! [`Report`]s from the transaction worker to whoever cares.
//!
//! - [`Bus::publish`] sends a report to all subscribers without blocking.
//! - [`Bus::subscribe`] creates a new receiver for consuming reports.
//!
//! The channel is lossy by design: with no subscriber attached, publishes
//! are dropped rather than stalling the worker. Operators who need lossless
//! capture must subscribe before [`Machines::run`](crate::Machines::run).

use std::time::SystemTime;

use tokio::sync::broadcast;

use crate::error::Error;

/// A classified runtime error, annotated for human consumption.
#[derive(Clone, Debug)]
pub struct Report {
    /// The underlying error.
    pub error: Error,
    /// Rendering of the error with friendly state/signal names applied.
    pub message: String,
    /// Wall-clock time the worker classified the error.
    pub at: SystemTime,
}

/// Broadcast channel for error reports.
#[derive(Clone)]
pub(crate) struct Bus {
    tx: broadcast::Sender<Report>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a report to all subscribers.
    ///
    /// Errors are ignored if there are no active subscribers.
    pub(crate) fn publish(&self, report: Report) {
        let _ = self.tx.send(report);
    }

    /// Subscribes to the bus and returns a new receiver.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Report> {
        self.tx.subscribe()
    }
}
