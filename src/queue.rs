use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::events::MessageEvent;

/// Create a bounded single-producer/single-consumer queue of messages.
///
/// `push` waits while the queue is full, so a slow worker throttles the
/// polling loop instead of losing messages.
pub fn dispatch_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

pub struct QueueSender {
    tx: mpsc::Sender<MessageEvent>,
}

pub struct QueueReceiver {
    rx: mpsc::Receiver<MessageEvent>,
}

impl QueueSender {
    /// Fails only if the worker has gone away.
    pub async fn push(&self, message: MessageEvent) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| anyhow!("message worker has stopped"))
    }

    /// Signal the worker to stop once the queued messages are drained.
    pub fn close(self) {
        drop(self.tx);
    }
}

impl QueueReceiver {
    /// Waits for the next message; `None` once the sender is closed and the
    /// queue is empty.
    pub async fn pop(&mut self) -> Option<MessageEvent> {
        self.rx.recv().await
    }
}
