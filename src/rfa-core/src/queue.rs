// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Ownership-transfer queue pairs.
//!
//! Every producer -> consumer edge of the pipeline is a pair of bounded
//! FIFOs: a *forward* queue carrying filled buffers and a *return* queue
//! carrying empty buffers back for reuse. The return queue starts full, so
//! the number of buffers in circulation equals the edge capacity and a
//! buffer is always owned by exactly one party: a queue or the side that
//! dequeued it.

use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::error;

/// Build an edge with `slots` buffers, all initially parked in the return queue.
pub fn edge<T>(
    name: &'static str,
    slots: usize,
    mut alloc: impl FnMut() -> T,
) -> (EdgeProducer<T>, EdgeConsumer<T>) {
    let slots = slots.max(1);
    let (forward_tx, forward_rx) = channel::bounded(slots);
    let (return_tx, return_rx) = channel::bounded(slots);
    for _ in 0..slots {
        // Cannot fail: the queue was sized for exactly `slots` items.
        let _ = return_tx.try_send(alloc());
    }
    let producer = EdgeProducer {
        name,
        forward_tx,
        forward_rx: forward_rx.clone(),
        return_tx: return_tx.clone(),
        return_rx,
    };
    let consumer = EdgeConsumer {
        name,
        forward_rx,
        return_tx,
    };
    (producer, consumer)
}

/// Producing side of an edge.
pub struct EdgeProducer<T> {
    name: &'static str,
    forward_tx: Sender<T>,
    /// Held so the producer can flush undelivered work back to the pool.
    forward_rx: Receiver<T>,
    return_tx: Sender<T>,
    return_rx: Receiver<T>,
}

impl<T> Clone for EdgeProducer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            forward_tx: self.forward_tx.clone(),
            forward_rx: self.forward_rx.clone(),
            return_tx: self.return_tx.clone(),
            return_rx: self.return_rx.clone(),
        }
    }
}

impl<T> EdgeProducer<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take an empty buffer without waiting.
    pub fn try_take_free(&self) -> Option<T> {
        self.return_rx.try_recv().ok()
    }

    /// Take an empty buffer, waiting at most `timeout`.
    pub fn take_free(&self, timeout: Duration) -> Option<T> {
        recv_bounded(&self.return_rx, timeout)
    }

    /// Deliver a filled buffer.
    ///
    /// The forward queue always has room for a buffer taken from the return
    /// queue. If it does not, the buffer goes back to the pool and the
    /// violation is logged.
    pub fn submit(&self, item: T) -> bool {
        match self.forward_tx.try_send(item) {
            Ok(()) => true,
            Err(err) => {
                error!("{}: forward queue rejected a buffer ({})", self.name, err);
                self.recycle(err.into_inner());
                false
            }
        }
    }

    /// Put an unused buffer back into the pool without delivering it.
    pub fn recycle(&self, item: T) {
        if let Err(err) = self.return_tx.try_send(item) {
            error!("{}: return queue rejected a buffer ({})", self.name, err);
        }
    }

    /// Move every undelivered buffer from the forward queue back to the pool.
    /// Returns the number of buffers flushed.
    pub fn flush(&self) -> usize {
        let mut flushed = 0;
        while let Ok(item) = self.forward_rx.try_recv() {
            self.recycle(item);
            flushed += 1;
        }
        flushed
    }

    /// Buffers waiting in the forward queue.
    pub fn pending(&self) -> usize {
        self.forward_tx.len()
    }

    /// Buffers parked in the return queue.
    pub fn free(&self) -> usize {
        self.return_rx.len()
    }
}

/// Consuming side of an edge.
pub struct EdgeConsumer<T> {
    name: &'static str,
    forward_rx: Receiver<T>,
    return_tx: Sender<T>,
}

impl<T> Clone for EdgeConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            forward_rx: self.forward_rx.clone(),
            return_tx: self.return_tx.clone(),
        }
    }
}

impl<T> EdgeConsumer<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait at most `timeout` for the next filled buffer.
    pub fn recv(&self, timeout: Duration) -> Option<T> {
        recv_bounded(&self.forward_rx, timeout)
    }

    pub fn try_recv(&self) -> Option<T> {
        self.forward_rx.try_recv().ok()
    }

    /// Hand a consumed buffer back to the producer.
    pub fn give_back(&self, item: T) {
        if let Err(err) = self.return_tx.try_send(item) {
            error!("{}: return queue rejected a buffer ({})", self.name, err);
        }
    }

    pub fn pending(&self) -> usize {
        self.forward_rx.len()
    }
}

/// `recv_timeout` that also waits out `timeout` when the other side is gone,
/// so callers polling a stop flag never spin.
fn recv_bounded<T>(rx: &Receiver<T>, timeout: Duration) -> Option<T> {
    match rx.recv_timeout(timeout) {
        Ok(item) => Some(item),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                thread::sleep(timeout);
                None
            }
        },
    }
}
