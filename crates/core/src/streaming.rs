//! Bounded channel between the line reader and event delivery
//!
//! `Backpressure` is a bounded `mpsc` channel: a full buffer parks the
//! reader, which stops draining the process pipe. `DropOldest` is a
//! `broadcast` ring with a single receiver: the newest items overwrite the
//! oldest and the receiver learns how many it lost.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

/// Behaviour of a full buffer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Producer waits for space. No event is ever lost.
    #[default]
    Backpressure,
    /// Oldest queued item is discarded to make room.
    DropOldest,
}

enum SenderKind<T> {
    Bounded(mpsc::Sender<T>),
    Ring(broadcast::Sender<T>),
}

enum ReceiverKind<T> {
    Bounded(mpsc::Receiver<T>),
    Ring(broadcast::Receiver<T>),
}

/// Producer half of an event buffer
pub struct EventSender<T> {
    inner: SenderKind<T>,
}

/// Consumer half of an event buffer
pub struct EventReceiver<T> {
    inner: ReceiverKind<T>,
    dropped: u64,
}

/// Create a buffer holding at least `capacity` items (minimum 1)
///
/// `DropOldest` rounds the capacity up to a power of two.
pub fn event_buffer<T: Clone>(
    capacity: usize,
    policy: OverflowPolicy,
) -> (EventSender<T>, EventReceiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = match policy {
        OverflowPolicy::Backpressure => {
            let (tx, rx) = mpsc::channel(capacity);
            (SenderKind::Bounded(tx), ReceiverKind::Bounded(rx))
        }
        OverflowPolicy::DropOldest => {
            let (tx, rx) = broadcast::channel(capacity);
            (SenderKind::Ring(tx), ReceiverKind::Ring(rx))
        }
    };
    (
        EventSender { inner: tx },
        EventReceiver {
            inner: rx,
            dropped: 0,
        },
    )
}

impl<T> EventSender<T> {
    /// Enqueue an item, applying the overflow policy when full
    ///
    /// Returns the item back if the receiver is gone.
    pub async fn send(&self, item: T) -> Result<(), T> {
        match &self.inner {
            SenderKind::Bounded(tx) => tx.send(item).await.map_err(|e| e.0),
            SenderKind::Ring(tx) => tx.send(item).map(|_| ()).map_err(|e| e.0),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        match self.inner {
            SenderKind::Bounded(_) => OverflowPolicy::Backpressure,
            SenderKind::Ring(_) => OverflowPolicy::DropOldest,
        }
    }

    /// Check if the receiver has been dropped
    #[inline]
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            SenderKind::Bounded(tx) => tx.is_closed(),
            SenderKind::Ring(tx) => tx.receiver_count() == 0,
        }
    }
}

impl<T: Clone> EventReceiver<T> {
    /// Next item in FIFO order, `None` once the sender is dropped and the
    /// buffer drained
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            ReceiverKind::Bounded(rx) => rx.recv().await,
            ReceiverKind::Ring(rx) => loop {
                match rx.recv().await {
                    Ok(item) => return Some(item),
                    Err(RecvError::Lagged(n)) => {
                        self.dropped += n;
                        tracing::warn!(
                            "Event buffer full, dropped {} oldest events ({} total)",
                            n,
                            self.dropped
                        );
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Items discarded under `DropOldest`
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
