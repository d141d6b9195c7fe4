//! Task model: identity, kind, priority, status and the registration spec

use super::jobs::MaintenanceJob;
use crate::config::JobConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique task identifier, assigned at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task does
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    MemoryDecay,
    MemoryPruning,
    MemoryConsolidation,
    AdvancedConsolidation,
    ClusterAnalysis,
    /// Host-defined task; always registered with an explicit job body
    Custom(String),
}

impl TaskType {
    pub fn name(&self) -> &str {
        match self {
            TaskType::MemoryDecay => "memory_decay",
            TaskType::MemoryPruning => "memory_pruning",
            TaskType::MemoryConsolidation => "memory_consolidation",
            TaskType::AdvancedConsolidation => "advanced_consolidation",
            TaskType::ClusterAnalysis => "cluster_analysis",
            TaskType::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduling priority; `Critical` sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Normal,
    Low,
    Background,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Where a task is in its run cycle
///
/// `Completed` and `Failed` mean the task is re-armed for `next_due` and
/// carry the outcome of its last run; there is no separate transition back to
/// `Pending`, which only marks a task that has never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Removed while a run was in flight
    Cancelled,
}

/// Snapshot of a registered task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: TaskPriority,

    #[serde(with = "crate::config::serde_millis")]
    pub interval: Duration,

    #[serde(with = "crate::config::serde_millis")]
    pub max_execution_duration: Duration,

    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_due: DateTime<Utc>,
    pub execution_count: u64,
    pub failure_count: u32,

    /// Running mean over successful runs, in milliseconds
    pub average_execution_ms: f64,

    pub status: TaskStatus,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Everything needed to register a task
#[derive(Clone)]
pub struct TaskSpec {
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub interval: Duration,
    pub max_execution_duration: Duration,
    pub enabled: bool,
    /// First due time; `None` means due immediately
    pub next_due: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Explicit body; when absent the body is resolved from the service registry
    pub job: Option<Arc<dyn MaintenanceJob>>,
}

impl TaskSpec {
    pub fn new(task_type: TaskType, interval: Duration) -> Self {
        Self {
            task_type,
            priority: TaskPriority::Normal,
            interval,
            max_execution_duration: Duration::from_secs(30),
            enabled: true,
            next_due: None,
            metadata: serde_json::Map::new(),
            job: None,
        }
    }

    /// Spec for a built-in job from its configuration section
    pub fn from_config(task_type: TaskType, config: &JobConfig) -> Self {
        Self::new(task_type, config.interval)
            .with_priority(config.priority)
            .with_max_duration(config.max_duration)
            .with_enabled(config.enabled)
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_duration(mut self, max_execution_duration: Duration) -> Self {
        self.max_execution_duration = max_execution_duration;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_next_due(mut self, next_due: DateTime<Utc>) -> Self {
        self.next_due = Some(next_due);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_job(mut self, job: Arc<dyn MaintenanceJob>) -> Self {
        self.job = Some(job);
        self
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("interval", &self.interval)
            .field("max_execution_duration", &self.max_execution_duration)
            .field("enabled", &self.enabled)
            .field("next_due", &self.next_due)
            .field("job", &self.job.as_ref().map(|job| job.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![
            TaskPriority::Background,
            TaskPriority::Normal,
            TaskPriority::Critical,
            TaskPriority::Low,
            TaskPriority::High,
        ];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![
                TaskPriority::Critical,
                TaskPriority::High,
                TaskPriority::Normal,
                TaskPriority::Low,
                TaskPriority::Background,
            ]
        );
    }

    #[test]
    fn test_task_type_names() {
        assert_eq!(TaskType::MemoryDecay.name(), "memory_decay");
        assert_eq!(TaskType::Custom("backup".to_string()).to_string(), "backup");
    }

    #[test]
    fn test_task_type_serialization() {
        let json = serde_json::to_string(&TaskType::AdvancedConsolidation).unwrap();
        assert_eq!(json, "\"advanced_consolidation\"");

        let custom: TaskType = serde_json::from_str(r#"{"custom":"reindex"}"#).unwrap();
        assert_eq!(custom, TaskType::Custom("reindex".to_string()));
    }

    #[test]
    fn test_spec_from_config() {
        let config = JobConfig {
            enabled: false,
            priority: TaskPriority::Low,
            interval: Duration::from_secs(120),
            max_duration: Duration::from_secs(7),
        };
        let spec = TaskSpec::from_config(TaskType::MemoryPruning, &config);
        assert_eq!(spec.priority, TaskPriority::Low);
        assert_eq!(spec.interval, Duration::from_secs(120));
        assert_eq!(spec.max_execution_duration, Duration::from_secs(7));
        assert!(!spec.enabled);
        assert!(spec.job.is_none());
    }
}
