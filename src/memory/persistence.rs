//! Ordered write-behind queue between the engine and its storage backend
//!
//! The engine enqueues writes while it still holds its state lock, so the
//! queue order is the order in which the records changed. One writer task
//! drains the queue, which keeps a slow early write from landing after a
//! later snapshot or after the record was pruned.

use crate::storage::StorageBackend;
use crate::types::{MemoryId, MemoryRecord};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum WriteOp {
    Store(Box<MemoryRecord>),
    Remove(MemoryId),
    /// Acknowledged once every earlier operation has been applied
    Flush(oneshot::Sender<()>),
}

pub(crate) struct WriteBehind {
    storage: Arc<dyn StorageBackend>,
    // Started on first use so engines can be built outside a runtime
    queue: OnceLock<mpsc::UnboundedSender<WriteOp>>,
}

impl WriteBehind {
    pub(crate) fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            queue: OnceLock::new(),
        }
    }

    pub(crate) fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    fn send(&self, op: WriteOp) {
        let queue = self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(self.storage.clone(), rx));
            tx
        });
        if queue.send(op).is_err() {
            warn!("Storage writer has stopped; dropping write");
        }
    }

    pub(crate) fn store(&self, records: Vec<MemoryRecord>) {
        for record in records {
            self.send(WriteOp::Store(Box::new(record)));
        }
    }

    pub(crate) fn remove(&self, ids: Vec<MemoryId>) {
        for id in ids {
            self.send(WriteOp::Remove(id));
        }
    }

    /// Wait until everything queued so far has reached the backend
    pub(crate) async fn flush(&self) {
        if self.queue.get().is_none() {
            return;
        }
        let (done, applied) = oneshot::channel();
        self.send(WriteOp::Flush(done));
        if applied.await.is_err() {
            warn!("Storage writer stopped before flushing");
        }
    }
}

async fn run_writer(storage: Arc<dyn StorageBackend>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Store(record) => {
                if let Err(e) = storage.store(&record).await {
                    warn!("Failed to persist memory {}: {}", record.id, e);
                }
            }
            WriteOp::Remove(id) => {
                if let Err(e) = storage.remove(id).await {
                    warn!("Failed to remove pruned memory {} from storage: {}", id, e);
                }
            }
            WriteOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Storage writer stopped");
}
