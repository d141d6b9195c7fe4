//! SQLite storage backend
//!
//! Records are kept as JSON documents next to the columns `query_all`
//! filters on. Connections come from a deadpool-sqlite pool so concurrent
//! persistence calls from the engine do not serialise on one handle.

use super::{MemoryFilter, StorageBackend};
use crate::error::{HippocampusError, Result};
use crate::types::{MemoryId, MemoryRecord};
use async_trait::async_trait;
use chrono::Utc;
use deadpool_sqlite::{Config, Pool, Runtime};
use std::path::Path;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY NOT NULL,
    kind TEXT NOT NULL,
    strength REAL NOT NULL CHECK(strength BETWEEN 0.0 AND 1.0),
    record TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);
CREATE INDEX IF NOT EXISTS idx_memories_strength ON memories(strength);
"#;

/// SQLite storage backend with connection pooling
pub struct SqliteStorage {
    pool: Pool,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path` and ensure the schema exists
    ///
    /// # Example
    /// ```ignore
    /// let storage = SqliteStorage::open("hippocampus.db").await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!("Opening SQLite memory store at: {}", path_str);

        let pool = Config::new(path_str).create_pool(Runtime::Tokio1).map_err(|e| {
            HippocampusError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get().await.map_err(|e| {
            HippocampusError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(|conn| conn.execute_batch(SCHEMA))
            .await
            .map_err(|e| HippocampusError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("SQLite schema ready");
        Ok(())
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<usize> {
        let conn = self.pool.get().await.map_err(|e| {
            HippocampusError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        let count = conn
            .interact(|conn| -> Result<usize> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|e| HippocampusError::Database(format!("Pool interaction failed: {}", e)))??;

        Ok(count)
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn store(&self, record: &MemoryRecord) -> Result<()> {
        let id = record.id.to_string();
        let kind = record.kind.as_str().to_string();
        let strength = record.strength;
        let json = serde_json::to_string(record)?;
        let updated_at = Utc::now().to_rfc3339();

        let conn = self.pool.get().await.map_err(|e| {
            HippocampusError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| -> Result<()> {
            conn.execute(
                "INSERT OR REPLACE INTO memories (id, kind, strength, record, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, kind, strength, json, updated_at],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| HippocampusError::Database(format!("Pool interaction failed: {}", e)))??;

        debug!("Persisted memory {}", record.id);
        Ok(())
    }

    async fn query_all(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>> {
        let kind = filter.kind.map(|k| k.as_str().to_string());
        let min_strength = filter.min_strength.unwrap_or(0.0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let conn = self.pool.get().await.map_err(|e| {
            HippocampusError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        let rows = conn
            .interact(move |conn| -> Result<Vec<String>> {
                let mut stmt = conn.prepare(
                    "SELECT record FROM memories
                     WHERE (?1 IS NULL OR kind = ?1) AND strength >= ?2
                     ORDER BY strength DESC, id ASC
                     LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![kind, min_strength, limit], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(|e| HippocampusError::Database(format!("Pool interaction failed: {}", e)))??;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(HippocampusError::from))
            .collect()
    }

    async fn remove(&self, id: MemoryId) -> Result<()> {
        let id = id.to_string();

        let conn = self.pool.get().await.map_err(|e| {
            HippocampusError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| -> Result<()> {
            conn.execute("DELETE FROM memories WHERE id = ?1", rusqlite::params![id])?;
            Ok(())
        })
        .await
        .map_err(|e| HippocampusError::Database(format!("Pool interaction failed: {}", e)))??;

        Ok(())
    }
}
