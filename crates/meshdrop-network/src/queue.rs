//! Multi-producer, single-consumer queue between connection handlers and the consumer loop
//!
//! Handlers only push and the consumer only pops. Events are moved through the
//! channel, so ownership passes from handler to consumer with no shared state.

use crate::types::TransferEvent;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use thiserror::Error;

/// Every endpoint on the other side of the queue has been dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Event queue closed")]
pub struct QueueClosed;

/// Create a new unbounded event queue
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half, cloned into every connection handler
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<TransferEvent>,
}

impl EventSender {
    pub fn publish(&self, event: TransferEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|_| QueueClosed)
    }
}

/// Consumer half; deliberately not `Clone`
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<TransferEvent>,
}

impl EventReceiver {
    /// Pop the next event without blocking
    ///
    /// Returns `Ok(None)` when the queue is empty but producers remain, and
    /// `Err(QueueClosed)` once it is empty and every producer is gone.
    pub fn try_next(&self) -> Result<Option<TransferEvent>, QueueClosed> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueClosed),
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<TransferEvent>, QueueClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
