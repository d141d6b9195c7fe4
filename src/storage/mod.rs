//! Storage layer for the Hippocampus memory engine
//!
//! The engine keeps its authoritative state in memory. A storage backend is an
//! optional collaborator that receives a copy of each stored or updated record
//! and can hand records back at start-up.

pub mod memory;
pub mod sqlite;

use crate::error::Result;
use crate::types::{MemoryId, MemoryKind, MemoryRecord};
use async_trait::async_trait;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

/// Storage backend trait defining the minimal persistence contract
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or replace a memory record
    async fn store(&self, record: &MemoryRecord) -> Result<()>;

    /// Return up to `limit` records matching `filter`, strongest first
    async fn query_all(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Forget a pruned record. Backends that keep history may ignore this.
    async fn remove(&self, _id: MemoryId) -> Result<()> {
        Ok(())
    }
}

/// Selection criteria for `query_all`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryFilter {
    pub kind: Option<MemoryKind>,
    pub min_strength: Option<f64>,
}

impl MemoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kind(kind: MemoryKind) -> Self {
        Self {
            kind: Some(kind),
            min_strength: None,
        }
    }

    pub fn matches(&self, record: &MemoryRecord) -> bool {
        self.kind.map_or(true, |k| record.kind == k)
            && self.min_strength.map_or(true, |s| record.strength >= s)
    }
}
