//! Typed notifications emitted by the scheduler and the memory engine
//!
//! Observers subscribe to an [`EventBus`] and receive [`Notification`]
//! values over a `tokio::sync::broadcast` channel. Publishing never blocks
//! and never fails the publisher: with no subscribers the value is dropped.

use crate::scheduler::{TaskId, TaskType};
use crate::types::{ConnectionType, MemoryId, MemoryKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default broadcast capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Notification discriminant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A task run finished (successfully or not)
    TaskExecuted {
        task_id: TaskId,
        task_type: TaskType,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// Memory stored
    MemoryStored {
        memory_id: MemoryId,
        kind: MemoryKind,
        timestamp: DateTime<Utc>,
    },
    /// Episode transferred into semantic memory
    MemoryConsolidated {
        source_id: MemoryId,
        semantic_id: MemoryId,
        reinforced: bool,
        timestamp: DateTime<Utc>,
    },
    /// Memory removed by pruning
    MemoryPruned {
        memory_id: MemoryId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// New edge in the memory graph
    ConnectionCreated {
        source_id: MemoryId,
        target_id: MemoryId,
        connection_type: ConnectionType,
        weight: f64,
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Short stable name, used for logging
    pub fn name(&self) -> &'static str {
        match self {
            Notification::TaskExecuted { .. } => "task_executed",
            Notification::MemoryStored { .. } => "memory_stored",
            Notification::MemoryConsolidated { .. } => "memory_consolidated",
            Notification::MemoryPruned { .. } => "memory_pruned",
            Notification::ConnectionCreated { .. } => "connection_created",
        }
    }
}

/// Broadcast hub for notifications
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Notification>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Publish a notification; dropped silently when nobody listens
    pub fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("No notification subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
