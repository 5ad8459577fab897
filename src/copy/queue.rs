//! Bounded hand-off between the scanner and the copy workers.
//!
//! The scanner holds the only [`BatchSender`]; dropping it (or calling
//! [`BatchSender::close`]) closes the queue. Workers share clones of one
//! [`BatchReceiver`], so each batch is delivered to exactly one of them.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use super::batch::Batch;

/// Create a queue sized for `workers` consumers (capacity `2 × workers`).
pub fn batch_queue(workers: usize) -> (BatchSender, BatchReceiver) {
    let capacity = workers.max(1) * 2;
    let (tx, rx) = mpsc::channel(capacity);
    (
        BatchSender { tx },
        BatchReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Returned when every receiver is gone and the batch could not be queued.
#[derive(Debug)]
pub struct QueueClosed(pub Batch);

#[derive(Debug)]
pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
}

impl BatchSender {
    /// Queue a batch, waiting while the queue is full.
    pub async fn send(&self, batch: Batch) -> Result<(), QueueClosed> {
        self.tx.send(batch).await.map_err(|err| QueueClosed(err.0))
    }

    /// Free slots right now.
    #[cfg(test)]
    fn available(&self) -> usize {
        self.tx.capacity()
    }

    #[cfg(test)]
    fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Signal that no more batches will follow. Receivers drain what is
    /// already queued and then see the end of the queue.
    pub fn close(self) {
        drop(self);
    }
}

#[derive(Debug, Clone)]
pub struct BatchReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Batch>>>,
}

impl BatchReceiver {
    /// Next batch, or `None` once the queue is closed and empty.
    pub async fn recv(&self) -> Option<Batch> {
        self.rx.lock().await.recv().await
    }
}
