//! Typed services available to task bodies
//!
//! The registry is handed to the scheduler at construction. Built-in task
//! types are bound to their job when registered, so a missing service shows
//! up as a failed run instead of a lookup at execution time.

use super::jobs::{MaintenanceJob, MemoryMaintenanceJob, MemoryPass};
use super::task::TaskType;
use crate::memory::MemoryEngine;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    memory: Option<Arc<MemoryEngine>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(mut self, engine: Arc<MemoryEngine>) -> Self {
        self.memory = Some(engine);
        self
    }

    pub fn memory(&self) -> Option<&Arc<MemoryEngine>> {
        self.memory.as_ref()
    }

    /// Job body for a built-in task type; `None` for custom types
    pub fn resolve(&self, task_type: &TaskType) -> Option<Arc<dyn MaintenanceJob>> {
        let pass = MemoryPass::for_task_type(task_type)?;
        Some(Arc::new(MemoryMaintenanceJob::new(pass, self.memory.clone())))
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("memory", &self.memory.is_some())
            .finish()
    }
}
