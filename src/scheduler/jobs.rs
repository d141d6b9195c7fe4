// Maintenance Jobs
//
// A job is the body of a scheduled task. The built-in jobs each drive one
// memory engine maintenance pass and turn its report into a `JobReport`
// whose numbers end up as execution-result metrics.

use crate::memory::MemoryEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::task::TaskType;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job execution failed: {0}")]
    ExecutionError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Report generated after job execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Number of memories processed
    pub memories_processed: usize,

    /// Number of changes made
    pub changes_made: usize,

    /// Number of errors encountered
    pub errors: usize,

    /// Job specific numbers
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl JobReport {
    pub fn new(memories_processed: usize, changes_made: usize) -> Self {
        Self {
            memories_processed,
            changes_made,
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// All numbers in the report, counts included
    pub fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.clone();
        metrics.insert("memories_processed".to_string(), self.memories_processed as f64);
        metrics.insert("changes_made".to_string(), self.changes_made as f64);
        metrics.insert("errors".to_string(), self.errors as f64);
        metrics
    }
}

/// Body of a scheduled task
#[async_trait]
pub trait MaintenanceJob: Send + Sync {
    /// Job name (for logging and tracking)
    fn name(&self) -> &str;

    async fn run(&self) -> Result<JobReport, JobError>;
}

/// The memory engine pass a built-in job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPass {
    Decay,
    Pruning,
    Consolidation,
    AdvancedConsolidation,
    ClusterAnalysis,
}

impl MemoryPass {
    pub fn for_task_type(task_type: &TaskType) -> Option<Self> {
        match task_type {
            TaskType::MemoryDecay => Some(Self::Decay),
            TaskType::MemoryPruning => Some(Self::Pruning),
            TaskType::MemoryConsolidation => Some(Self::Consolidation),
            TaskType::AdvancedConsolidation => Some(Self::AdvancedConsolidation),
            TaskType::ClusterAnalysis => Some(Self::ClusterAnalysis),
            TaskType::Custom(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Decay => "memory_decay",
            Self::Pruning => "memory_pruning",
            Self::Consolidation => "memory_consolidation",
            Self::AdvancedConsolidation => "advanced_consolidation",
            Self::ClusterAnalysis => "cluster_analysis",
        }
    }
}

/// Built-in job bound to the memory engine resolved at registration
pub struct MemoryMaintenanceJob {
    pass: MemoryPass,
    engine: Option<Arc<MemoryEngine>>,
}

impl MemoryMaintenanceJob {
    pub fn new(pass: MemoryPass, engine: Option<Arc<MemoryEngine>>) -> Self {
        Self { pass, engine }
    }

    pub fn pass(&self) -> MemoryPass {
        self.pass
    }
}

#[async_trait]
impl MaintenanceJob for MemoryMaintenanceJob {
    fn name(&self) -> &str {
        self.pass.name()
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| JobError::ServiceUnavailable("memory engine".to_string()))?;

        let report = match self.pass {
            MemoryPass::Decay => {
                let total = engine.len().await;
                let decay = engine.apply_decay().await;
                JobReport::new(total, decay.records_decayed + decay.connections_decayed)
                    .with_metric("records_decayed", decay.records_decayed as f64)
                    .with_metric("connections_decayed", decay.connections_decayed as f64)
                    .with_metric("average_strength", decay.average_strength)
            }
            MemoryPass::Pruning => {
                let total = engine.len().await;
                let pruned = engine.perform_pruning().await;
                let records = pruned.records_pruned.len();
                JobReport::new(total, pruned.connections_pruned + records)
                    .with_metric("connections_pruned", pruned.connections_pruned as f64)
                    .with_metric("records_pruned", records as f64)
            }
            MemoryPass::Consolidation => match engine.perform_consolidation().await {
                Some(outcome) => JobReport::new(1, 1)
                    .with_metric("reinforced", if outcome.reinforced { 1.0 } else { 0.0 })
                    .with_metric("similarity", outcome.similarity)
                    .with_metric("semantic_strength", outcome.semantic_strength),
                None => JobReport::new(0, 0),
            },
            MemoryPass::AdvancedConsolidation => {
                let total = engine.len().await;
                let advanced = engine.advanced_consolidation().await;
                JobReport::new(total, advanced.changes())
                    .with_metric("promoted", advanced.consolidated.len() as f64)
                    .with_metric("new_connections", advanced.new_connections.len() as f64)
                    .with_metric("strengthened", advanced.strengthened.len() as f64)
                    .with_metric("weakened", advanced.weakened.len() as f64)
                    .with_metric("pruned_connections", advanced.pruned_connections.len() as f64)
                    .with_metric("pruned_records", advanced.pruned_records.len() as f64)
                    .with_metric("insights", advanced.insights.len() as f64)
            }
            MemoryPass::ClusterAnalysis => {
                let clusters = engine.identify_clusters().await;
                let clustered: usize = clusters.iter().map(|c| c.members.len()).sum();
                let largest = clusters.iter().map(|c| c.members.len()).max().unwrap_or(0);
                JobReport::new(clustered, 0)
                    .with_metric("clusters", clusters.len() as f64)
                    .with_metric("largest_cluster", largest as f64)
            }
        };

        tracing::debug!(
            "Job {} finished: {} processed, {} changes",
            self.name(),
            report.memories_processed,
            report.changes_made
        );
        Ok(report)
    }
}
