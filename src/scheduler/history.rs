//! Execution results and the bounded history they are kept in

use super::task::{TaskId, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Record of one finished task run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,

    /// Numeric metrics taken from the job report
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// FIFO of results, oldest evicted first once `limit` is exceeded
#[derive(Debug)]
pub(crate) struct ExecutionHistory {
    entries: VecDeque<ExecutionResult>,
    limit: usize,
}

impl ExecutionHistory {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub(crate) fn push(&mut self, result: ExecutionResult) {
        self.entries.push_back(result);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    /// Up to `limit` results, most recent first
    pub(crate) fn recent(&self, limit: usize) -> Vec<ExecutionResult> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
