//! Map-backed storage, used when no database is configured and in tests

use super::{MemoryFilter, StorageBackend};
use crate::error::Result;
use crate::types::{MemoryId, MemoryRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: RwLock<HashMap<MemoryId, MemoryRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn get(&self, id: &MemoryId) -> Option<MemoryRecord> {
        self.records.read().await.get(id).cloned()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn store(&self, record: &MemoryRecord) -> Result<()> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn query_all(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>> {
        let records = self.records.read().await;
        let mut matches: Vec<MemoryRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn remove(&self, id: MemoryId) -> Result<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }
}
