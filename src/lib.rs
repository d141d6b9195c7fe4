//! Hippocampus - background maintenance runtime for a layered memory store
//!
//! Two in-process components:
//! - A bounded-concurrency, priority-ordered scheduler for recurring tasks
//!   with per-task timeouts, exponential backoff and execution history
//! - A memory engine (working, short-term, long-term, episodic, semantic and
//!   procedural memories) with decay, Hebbian reinforcement, pruning,
//!   consolidation and cluster detection
//!
//! The scheduler's built-in jobs call into the memory engine; the engine knows
//! nothing about the scheduler.
//!
//! # Architecture
//!
//! - **Types**: memory records, connections and their enums
//! - **Memory**: the engine and its maintenance passes
//! - **Scheduler**: tasks, jobs, the service registry and driver loops
//! - **Storage**: optional persistence (in-memory map, SQLite)
//! - **Events**: typed notifications over a broadcast channel
//!
//! # Example
//!
//! ```ignore
//! use hippocampus::{
//!     HippocampusConfig, MemoryEngine, MemoryKind, NewMemory, ServiceRegistry, TaskScheduler,
//!     TaskSpec, TaskType,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hippocampus::Result<()> {
//!     let config = HippocampusConfig::default();
//!     let engine = Arc::new(MemoryEngine::new(config.memory.clone()));
//!
//!     let id = engine
//!         .store(NewMemory::new(MemoryKind::Episodic, serde_json::json!("met alice at the cafe")))
//!         .await;
//!     engine.retrieve(id).await;
//!
//!     let scheduler = TaskScheduler::new(
//!         config.scheduler.clone(),
//!         ServiceRegistry::new().with_memory(engine.clone()),
//!     );
//!     scheduler
//!         .register_task(TaskSpec::from_config(TaskType::MemoryDecay, &config.jobs.decay))
//!         .await?;
//!     scheduler.tick().await.ok();
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod scheduler;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{HippocampusConfig, JobConfig, MemoryConfig, SchedulerConfig, StorageConfig};
pub use error::{HippocampusError, Result};
pub use events::{EventBus, Notification};
pub use memory::{MemoryEngine, MemoryStats};
pub use scheduler::{
    DriverHandle, ExecutionResult, JobError, JobReport, MaintenanceJob, SchedulerError,
    SchedulerStats, ServiceRegistry, Task, TaskId, TaskPriority, TaskScheduler, TaskSpec,
    TaskStatus, TaskType,
};
pub use storage::{InMemoryStorage, MemoryFilter, SqliteStorage, StorageBackend};
pub use types::{
    Connection, ConnectionType, Feedback, MemoryId, MemoryKind, MemoryPriority, MemoryRecord,
    NewMemory, SearchHit,
};
