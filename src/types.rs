//! Core data types for the Hippocampus memory engine
//!
//! This module defines memory records, their kinds, and the weighted typed
//! connections that form the sparse directed memory graph. Strengths and
//! weights are always kept inside `[0, 1]`; every setter in here clamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for memories
///
/// Wraps a UUID to provide type safety and prevent mixing memory IDs
/// with task IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a memory ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Memory layer a record currently lives in
///
/// Every kind has its own secondary index inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Active scratch content, evicted quickly unless reinforced
    Working,

    /// Working content that survived its first consolidation phase
    ShortTerm,

    /// Durable content promoted from short-term
    LongTerm,

    /// Experiences, candidates for semantic extraction
    Episodic,

    /// Facts and patterns distilled from episodes
    Semantic,

    /// Skills and procedures
    Procedural,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 6] = [
        MemoryKind::Working,
        MemoryKind::ShortTerm,
        MemoryKind::LongTerm,
        MemoryKind::Episodic,
        MemoryKind::Semantic,
        MemoryKind::Procedural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Working => "working",
            MemoryKind::ShortTerm => "short_term",
            MemoryKind::LongTerm => "long_term",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Procedural => "procedural",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown memory kind: {}", s))
    }
}

/// Retention priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Relationship types between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Co-occurrence or co-activation
    Associative,

    /// Episode to the semantic record distilled from it
    Semantic,

    /// A happened before B
    Temporal,

    /// A caused or enabled B
    Causal,

    /// A generalises B
    Hierarchical,
}

/// Directed, weighted edge to another memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// Target memory ID
    pub target: MemoryId,

    /// Type of relationship
    pub connection_type: ConnectionType,

    /// Connection weight (0.0 - 1.0)
    pub weight: f64,

    pub created_at: DateTime<Utc>,

    /// Last time the edge took part in a Hebbian update
    pub last_activated: DateTime<Utc>,

    pub activation_count: u64,
}

impl Connection {
    pub fn new(
        target: MemoryId,
        connection_type: ConnectionType,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            target,
            connection_type,
            weight: clamp_unit(weight),
            created_at: now,
            last_activated: now,
            activation_count: 0,
        }
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = clamp_unit(weight);
    }
}

/// Where a record is in its consolidation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    #[default]
    Encoded,
    /// Waiting in the consolidation queue
    Queued,
    /// Source episode whose pattern has been transferred
    Consolidated,
    /// Record created by semantic extraction
    Semantic,
    ShortTerm,
    LongTerm,
}

/// Free-form metadata carried by a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub source: Option<String>,

    /// Caller supplied importance (0.0 - 1.0)
    #[serde(default)]
    pub importance: f64,

    #[serde(default)]
    pub validated: bool,

    #[serde(default)]
    pub consolidation_phase: ConsolidationPhase,

    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A stored unit of experience or fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub content: serde_json::Value,

    /// Memory strength (0.0 - 1.0), governs survival and ranking
    pub strength: f64,

    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,

    /// Per-second exponential decay rate
    pub decay_rate: f64,

    /// Advances each time the record is promoted
    pub consolidation_level: f64,

    pub priority: MemoryPriority,

    #[serde(default)]
    pub connections: Vec<Connection>,

    #[serde(default)]
    pub metadata: MemoryMetadata,
}

impl MemoryRecord {
    pub fn set_strength(&mut self, strength: f64) {
        self.strength = clamp_unit(strength);
    }

    /// Seconds elapsed since the last access, never negative
    pub fn seconds_since_access(&self, now: DateTime<Utc>) -> f64 {
        let millis = now
            .signed_duration_since(self.last_accessed)
            .num_milliseconds()
            .max(0);
        millis as f64 / 1000.0
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    pub fn connection_mut(
        &mut self,
        target: MemoryId,
        connection_type: ConnectionType,
    ) -> Option<&mut Connection> {
        self.connections
            .iter_mut()
            .find(|c| c.target == target && c.connection_type == connection_type)
    }
}

/// Input to `MemoryEngine::store`: a record without identity or bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub kind: MemoryKind,
    pub content: serde_json::Value,
    pub strength: f64,

    /// Falls back to the engine default when absent
    pub decay_rate: Option<f64>,

    pub priority: MemoryPriority,
    pub metadata: MemoryMetadata,
}

impl NewMemory {
    pub fn new(kind: MemoryKind, content: serde_json::Value) -> Self {
        Self {
            kind,
            content,
            strength: 0.5,
            decay_rate: None,
            priority: MemoryPriority::Normal,
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = Some(decay_rate);
        self
    }

    pub fn with_priority(mut self, priority: MemoryPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = Some(source.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.metadata.importance = clamp_unit(importance);
        self
    }
}

/// Explicit learning signal for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Positive,
    Negative,
}

/// Search result with its ranking inputs
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub similarity: f64,

    /// `similarity * strength`, the ranking key
    pub score: f64,
}

/// Clamp into `[0, 1]`, mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
