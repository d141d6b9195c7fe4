// Runtime Configuration
//
// Defines configuration for the task scheduler, the memory engine thresholds,
// the optional storage backend and the recurring maintenance jobs.
// Durations are written as milliseconds in TOML.

use crate::scheduler::{TaskPriority, TaskType};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HippocampusConfig {
    pub scheduler: SchedulerConfig,
    pub memory: MemoryConfig,
    pub storage: StorageConfig,
    pub jobs: JobsConfig,
}

/// Task scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on task bodies running at the same time
    pub max_concurrent_tasks: usize,

    /// Cadence of the tick driver
    #[serde(with = "serde_millis")]
    pub tick_interval: Duration,

    /// Applied to a task's max execution duration to get its hard timeout
    pub timeout_multiplier: f64,

    /// Largest multiple of the interval a failing task is pushed back by
    pub backoff_cap: u32,

    /// Execution results retained in history
    pub history_limit: usize,

    /// Most recent results considered by `stats()`
    pub stats_window: usize,

    /// Pause after a tick-loop defect before ticking again
    #[serde(with = "serde_millis")]
    pub error_cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            tick_interval: Duration::from_secs(1),
            timeout_multiplier: 1.5,
            backoff_cap: 8,
            history_limit: 1000,
            stats_window: 100,
            error_cooldown: Duration::from_secs(30),
        }
    }
}

/// Memory engine thresholds and rates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Default per-second decay rate for new records
    pub decay_rate: f64,

    /// Fraction of the remaining headroom gained on each retrieval
    pub hebbian_rate: f64,

    /// Strength change applied by explicit learning feedback
    pub feedback_rate: f64,

    /// Connections weaker than this are removed by pruning
    pub pruning_threshold: f64,

    /// Records weaker than this are removed by pruning
    pub record_strength_floor: f64,

    /// Idle time after which rarely used working memories are evicted
    #[serde(with = "serde_millis")]
    pub working_memory_ttl: Duration,

    /// Working memories with fewer accesses than this are eligible for eviction
    pub min_working_accesses: u64,

    /// Access count at which an episodic record is queued for consolidation
    pub consolidation_threshold: u64,

    /// Pattern similarity needed to reinforce an existing semantic record
    pub pattern_match_threshold: f64,

    /// Multiplier applied to strength when an episode becomes semantic
    pub transfer_degradation: f64,

    /// Strength added to a semantic record matched by a new episode
    pub semantic_reinforcement: f64,

    /// Search results below this similarity are dropped
    pub min_search_similarity: f64,

    /// Working memories older than this are considered for short-term
    #[serde(with = "serde_millis")]
    pub working_promotion_age: Duration,

    /// Strength a working memory needs to move to short-term
    pub working_promotion_strength: f64,

    /// Short-term memories older than this are considered for long-term
    #[serde(with = "serde_millis")]
    pub long_term_promotion_age: Duration,

    /// Strength a short-term memory needs to move to long-term
    pub long_term_promotion_strength: f64,

    /// Access count a short-term memory must exceed to move to long-term
    pub long_term_min_accesses: u64,

    /// Targets accessed more often than this get their inbound long-term edges boosted
    pub high_access_threshold: u64,

    /// Multiplier for boosted long-term edges
    pub long_term_boost: f64,

    /// Long-term edges weaker than this are dropped during optimisation
    pub connection_floor: f64,

    /// Window used when counting recent accesses for reweighting
    #[serde(with = "serde_millis")]
    pub reweight_window: Duration,

    /// Records accessed more than this within the window are "active"
    pub active_access_threshold: usize,

    /// Weight multiplier for edges of active records
    pub active_scale: f64,

    /// Weight multiplier for edges of records idle for the whole window
    pub idle_scale: f64,

    /// Content similarity that links a newly promoted long-term record to existing ones
    pub association_threshold: f64,

    /// Only edges heavier than this are followed when clustering
    pub cluster_edge_threshold: f64,

    /// Smallest component reported as a cluster
    pub min_cluster_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            decay_rate: 0.000_001,
            hebbian_rate: 0.1,
            feedback_rate: 0.1,
            pruning_threshold: 0.1,
            record_strength_floor: 0.01,
            working_memory_ttl: Duration::from_secs(300),
            min_working_accesses: 2,
            consolidation_threshold: 3,
            pattern_match_threshold: 0.8,
            transfer_degradation: 0.8,
            semantic_reinforcement: 0.1,
            min_search_similarity: 0.1,
            working_promotion_age: Duration::from_secs(30),
            working_promotion_strength: 0.3,
            long_term_promotion_age: Duration::from_secs(300),
            long_term_promotion_strength: 0.5,
            long_term_min_accesses: 3,
            high_access_threshold: 10,
            long_term_boost: 1.1,
            connection_floor: 0.2,
            reweight_window: Duration::from_secs(86_400),
            active_access_threshold: 5,
            active_scale: 1.05,
            idle_scale: 0.95,
            association_threshold: 0.5,
            cluster_edge_threshold: 0.7,
            min_cluster_size: 3,
        }
    }
}

/// Optional durable storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; in-memory only when absent
    pub path: Option<PathBuf>,

    /// Maximum records loaded back at start-up
    pub hydrate_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            hydrate_limit: 10_000,
        }
    }
}

/// Configuration for an individual recurring job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Enable/disable this specific job
    pub enabled: bool,

    /// Scheduling priority
    pub priority: TaskPriority,

    /// Interval between job runs
    #[serde(with = "serde_millis")]
    pub interval: Duration,

    /// Expected upper bound on one run (before the timeout multiplier)
    #[serde(with = "serde_millis")]
    pub max_duration: Duration,
}

/// The built-in maintenance jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub decay: JobConfig,
    pub pruning: JobConfig,
    pub consolidation: JobConfig,
    pub advanced_consolidation: JobConfig,
    pub cluster_analysis: JobConfig,
}

impl JobsConfig {
    /// Job configurations paired with the task type they drive
    pub fn entries(&self) -> [(TaskType, &JobConfig); 5] {
        [
            (TaskType::MemoryDecay, &self.decay),
            (TaskType::MemoryPruning, &self.pruning),
            (TaskType::MemoryConsolidation, &self.consolidation),
            (TaskType::AdvancedConsolidation, &self.advanced_consolidation),
            (TaskType::ClusterAnalysis, &self.cluster_analysis),
        ]
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            decay: JobConfig {
                enabled: true,
                priority: TaskPriority::Normal,
                interval: Duration::from_secs(60),
                max_duration: Duration::from_secs(10),
            },
            pruning: JobConfig {
                enabled: true,
                priority: TaskPriority::Low,
                interval: Duration::from_secs(300),
                max_duration: Duration::from_secs(10),
            },
            consolidation: JobConfig {
                enabled: true,
                priority: TaskPriority::Normal,
                interval: Duration::from_secs(10),
                max_duration: Duration::from_secs(5),
            },
            advanced_consolidation: JobConfig {
                enabled: true,
                priority: TaskPriority::Low,
                interval: Duration::from_secs(600),
                max_duration: Duration::from_secs(30),
            },
            cluster_analysis: JobConfig {
                enabled: true,
                priority: TaskPriority::Background,
                interval: Duration::from_secs(3600),
                max_duration: Duration::from_secs(30),
            },
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl HippocampusConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: HippocampusConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Default location: `<config dir>/hippocampus/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hippocampus")
            .join("config.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_scheduler()?;
        self.validate_memory()?;

        for (task_type, job) in self.jobs.entries() {
            Self::validate_job_config(task_type.name(), job)?;
        }

        Ok(())
    }

    fn validate_scheduler(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;

        if s.max_concurrent_tasks == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler: max_concurrent_tasks must be at least 1".to_string(),
            ));
        }

        if s.tick_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "scheduler: tick_interval must be positive".to_string(),
            ));
        }

        if !(s.timeout_multiplier > 1.0) {
            return Err(ConfigError::ValidationError(
                "scheduler: timeout_multiplier must be greater than 1".to_string(),
            ));
        }

        if s.backoff_cap == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler: backoff_cap must be at least 1".to_string(),
            ));
        }

        if s.history_limit == 0 || s.stats_window == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler: history_limit and stats_window must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        let m = &self.memory;

        if m.decay_rate < 0.0 || !m.decay_rate.is_finite() {
            return Err(ConfigError::ValidationError(
                "memory: decay_rate must be a non-negative number".to_string(),
            ));
        }

        let unit_fields = [
            ("hebbian_rate", m.hebbian_rate),
            ("feedback_rate", m.feedback_rate),
            ("pruning_threshold", m.pruning_threshold),
            ("record_strength_floor", m.record_strength_floor),
            ("pattern_match_threshold", m.pattern_match_threshold),
            ("transfer_degradation", m.transfer_degradation),
            ("semantic_reinforcement", m.semantic_reinforcement),
            ("min_search_similarity", m.min_search_similarity),
            ("working_promotion_strength", m.working_promotion_strength),
            ("long_term_promotion_strength", m.long_term_promotion_strength),
            ("connection_floor", m.connection_floor),
            ("association_threshold", m.association_threshold),
            ("cluster_edge_threshold", m.cluster_edge_threshold),
        ];

        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "memory: {} must be between 0 and 1",
                    name
                )));
            }
        }

        if m.long_term_boost < 1.0 || m.active_scale < 1.0 {
            return Err(ConfigError::ValidationError(
                "memory: long_term_boost and active_scale must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&m.idle_scale) {
            return Err(ConfigError::ValidationError(
                "memory: idle_scale must be between 0 and 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_job_config(name: &str, config: &JobConfig) -> Result<(), ConfigError> {
        if config.interval.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "{}: interval must be positive",
                name
            )));
        }

        if config.max_duration.is_zero() {
            return Err(ConfigError::ValidationError(format!(
                "{}: max_duration must be positive",
                name
            )));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render configuration as pretty TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
