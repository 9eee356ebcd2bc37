//! The queue between connection readers and the dispatcher.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use super::message::ChatMessage;

/// Why a message could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue stayed full for longer than the enqueue timeout.
    Saturated,
    /// The dispatcher has stopped accepting messages.
    Closed,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Saturated => f.write_str("broadcast queue saturated"),
            Self::Closed => f.write_str("broadcast queue closed"),
        }
    }
}

/// Create a bounded FIFO with the given capacity (at least 1).
pub fn broadcast_channel(
    capacity: usize,
    enqueue_timeout: Option<Duration>,
) -> (BroadcastSender, BroadcastReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BroadcastSender { tx, enqueue_timeout },
        BroadcastReceiver { rx },
    )
}

/// Producer side. Cloned into every connection reader.
#[derive(Clone)]
pub struct BroadcastSender {
    tx: mpsc::Sender<ChatMessage>,
    enqueue_timeout: Option<Duration>,
}

impl BroadcastSender {
    /// Queue a message, suspending while the queue is full.
    pub async fn enqueue(&self, message: ChatMessage) -> Result<(), EnqueueError> {
        match self.enqueue_timeout {
            None => self.tx.send(message).await.map_err(|_| EnqueueError::Closed),
            Some(limit) => match time::timeout(limit, self.tx.send(message)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(EnqueueError::Closed),
                Err(_elapsed) => Err(EnqueueError::Saturated),
            },
        }
    }
}

/// Consumer side, owned by the dispatcher.
pub struct BroadcastReceiver {
    rx: mpsc::Receiver<ChatMessage>,
}

impl BroadcastReceiver {
    /// Next message in FIFO order; `None` once closed and empty.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        self.rx.recv().await
    }

    /// Stop accepting new messages. Already-queued ones can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
