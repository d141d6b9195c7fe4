//! Hierarchical memory engine
//!
//! Owns every memory record, the per-kind indices, the connection graph, the
//! access trackers and the consolidation queue. All state sits behind one
//! async `RwLock`: mutating operations and maintenance passes take the write
//! lock for their whole duration, so a pass never observes a record halfway
//! through another multi-step update. `search`, `peek` and `stats` take the
//! read lock only.
//!
//! Components:
//! - maintenance: decay, pruning and the Hebbian update applied on retrieval
//! - consolidation: episodic→semantic transfer and the four-phase pass
//! - clusters: strongly connected groups and the insights derived from them
//! - similarity: token-overlap similarity and pattern extraction
//! - access: sliding-window access history
//! - persistence: ordered write-behind queue to the storage backend

pub mod access;
pub mod clusters;
pub mod consolidation;
pub mod maintenance;
mod persistence;
pub mod similarity;

pub use access::AccessTracker;
pub use clusters::{Insight, MemoryCluster};
pub use consolidation::{
    AdvancedConsolidationReport, ConnectionChange, ConsolidationOutcome, KindTransition,
};
pub use maintenance::{DecayReport, PruneReport};

use crate::clock::{system_clock, SharedClock};
use crate::config::MemoryConfig;
use crate::error::Result;
use crate::events::{EventBus, Notification};
use crate::storage::{MemoryFilter, StorageBackend};
use crate::types::{
    clamp_unit, Connection, ConnectionType, ConsolidationPhase, Feedback, MemoryId, MemoryKind,
    MemoryRecord, NewMemory, SearchHit,
};
use persistence::WriteBehind;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Weight used by `connect_default`
pub const DEFAULT_CONNECTION_WEIGHT: f64 = 0.5;

/// Fraction of the requested weight added when an existing edge is reconnected
const RECONNECT_FACTOR: f64 = 0.1;

/// Everything the engine lock protects
#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub(crate) records: HashMap<MemoryId, MemoryRecord>,
    pub(crate) indices: HashMap<MemoryKind, HashSet<MemoryId>>,
    pub(crate) access: HashMap<MemoryId, AccessTracker>,
    pub(crate) consolidation_queue: VecDeque<MemoryId>,
}

impl MemoryState {
    pub(crate) fn insert(&mut self, record: MemoryRecord) {
        let id = record.id;
        self.indices.entry(record.kind).or_default().insert(id);
        self.access
            .entry(id)
            .or_insert_with(|| AccessTracker::new(record.last_accessed));
        if record.metadata.consolidation_phase == ConsolidationPhase::Queued
            && !self.consolidation_queue.contains(&id)
        {
            self.consolidation_queue.push_back(id);
        }
        self.records.insert(id, record);
    }

    /// Remove a record with its index entry, tracker, queue slot and inbound edges
    pub(crate) fn remove(&mut self, id: MemoryId) -> Option<MemoryRecord> {
        let record = self.records.remove(&id)?;
        if let Some(index) = self.indices.get_mut(&record.kind) {
            index.remove(&id);
        }
        self.access.remove(&id);
        self.consolidation_queue.retain(|queued| *queued != id);
        for other in self.records.values_mut() {
            other.connections.retain(|c| c.target != id);
        }
        Some(record)
    }

    /// Records holding an edge into `id`
    pub(crate) fn referrers(&self, id: MemoryId) -> Vec<MemoryId> {
        let mut ids: Vec<MemoryId> = self
            .records
            .values()
            .filter(|r| r.connections.iter().any(|c| c.target == id))
            .map(|r| r.id)
            .collect();
        ids.sort();
        ids
    }

    /// Move a record to another kind, keeping the indices in step
    pub(crate) fn reclassify(&mut self, id: MemoryId, kind: MemoryKind) -> Option<MemoryKind> {
        let record = self.records.get_mut(&id)?;
        let previous = record.kind;
        if previous == kind {
            return Some(previous);
        }
        record.kind = kind;
        if let Some(index) = self.indices.get_mut(&previous) {
            index.remove(&id);
        }
        self.indices.entry(kind).or_default().insert(id);
        Some(previous)
    }

    pub(crate) fn ids_of_kind(&self, kind: MemoryKind) -> Vec<MemoryId> {
        let mut ids: Vec<MemoryId> = self
            .indices
            .get(&kind)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

/// Aggregate engine statistics
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStats {
    pub total: usize,
    pub per_kind: BTreeMap<MemoryKind, usize>,
    pub queue_depth: usize,
    pub average_strength: f64,
    pub total_connections: usize,
}

/// The memory engine
pub struct MemoryEngine {
    config: MemoryConfig,
    state: RwLock<MemoryState>,
    writer: Option<WriteBehind>,
    events: EventBus,
    clock: SharedClock,
}

impl MemoryEngine {
    /// Create an in-memory engine with the system clock and a private event bus
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(MemoryState::default()),
            writer: None,
            events: EventBus::default(),
            clock: system_clock(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.writer = Some(WriteBehind::new(storage));
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn reweight_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.reweight_window)
            .unwrap_or_else(|_| chrono::Duration::days(1))
    }

    /// Store a new memory and return its id
    pub async fn store(&self, memory: NewMemory) -> MemoryId {
        let now = self.now();
        let record = MemoryRecord {
            id: MemoryId::new(),
            kind: memory.kind,
            content: memory.content,
            strength: clamp_unit(memory.strength),
            created_at: now,
            last_accessed: now,
            access_count: 1,
            decay_rate: memory
                .decay_rate
                .unwrap_or(self.config.decay_rate)
                .max(0.0),
            consolidation_level: 0.0,
            priority: memory.priority,
            connections: Vec::new(),
            metadata: memory.metadata,
        };
        let id = record.id;
        let kind = record.kind;

        {
            let mut state = self.state.write().await;
            state.insert(record.clone());
            self.persist(vec![record]);
        }
        debug!("Stored {} memory {}", kind, id);

        self.events.publish(Notification::MemoryStored {
            memory_id: id,
            kind,
            timestamp: now,
        });
        id
    }

    /// Retrieve a memory, counting the access and applying a Hebbian step
    pub async fn retrieve(&self, id: MemoryId) -> Option<MemoryRecord> {
        let now = self.now();
        let window = self.reweight_window();

        let record = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let record = state.records.get_mut(&id)?;
            record.last_accessed = now;
            record.access_count += 1;
            state
                .access
                .entry(id)
                .or_insert_with(|| AccessTracker::new(now))
                .record(now, window);

            maintenance::hebbian_update(state, id, self.config.hebbian_rate, now);
            self.maybe_enqueue(state, id);

            let record = state.records.get(&id).cloned()?;
            self.persist(vec![record.clone()]);
            record
        };

        Some(record)
    }

    fn maybe_enqueue(&self, state: &mut MemoryState, id: MemoryId) {
        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        if record.kind == MemoryKind::Episodic
            && record.access_count >= self.config.consolidation_threshold
            && record.metadata.consolidation_phase == ConsolidationPhase::Encoded
        {
            record.metadata.consolidation_phase = ConsolidationPhase::Queued;
            state.consolidation_queue.push_back(id);
            debug!(
                "Queued episodic memory {} for consolidation (accesses: {})",
                id, record.access_count
            );
        }
    }

    /// Read a record without counting an access
    pub async fn peek(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.state.read().await.records.get(&id).cloned()
    }

    /// Rank memories by `similarity × strength` against a free-text query
    pub async fn search(&self, query: &str, kind: Option<MemoryKind>, limit: usize) -> Vec<SearchHit> {
        let query_tokens = similarity::tokenize(query);
        let state = self.state.read().await;

        let candidates: Vec<&MemoryRecord> = match kind {
            Some(kind) => state
                .indices
                .get(&kind)
                .map(|ids| ids.iter().filter_map(|id| state.records.get(id)).collect())
                .unwrap_or_default(),
            None => state.records.values().collect(),
        };

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|record| {
                let content_tokens = similarity::tokenize(&similarity::content_text(&record.content));
                let sim = similarity::jaccard(&query_tokens, &content_tokens);
                if sim < self.config.min_search_similarity || sim == 0.0 {
                    return None;
                }
                Some(SearchHit {
                    similarity: sim,
                    score: sim * record.strength,
                    record: record.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record.created_at.cmp(&b.record.created_at))
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        hits.truncate(limit);
        hits
    }

    /// Connect `source` to `target`, strengthening the edge if it already exists
    ///
    /// Returns false for unknown ids and self loops.
    pub async fn connect(
        &self,
        source: MemoryId,
        target: MemoryId,
        connection_type: ConnectionType,
        weight: f64,
    ) -> bool {
        if source == target {
            return false;
        }
        let now = self.now();
        let weight = clamp_unit(weight);

        let created = {
            let mut state = self.state.write().await;
            if !state.records.contains_key(&target) {
                return false;
            }
            let Some(record) = state.records.get_mut(&source) else {
                return false;
            };

            let created = match record.connection_mut(target, connection_type) {
                Some(existing) => {
                    existing.set_weight(existing.weight + weight * RECONNECT_FACTOR);
                    existing.last_activated = now;
                    false
                }
                None => {
                    record
                        .connections
                        .push(Connection::new(target, connection_type, weight, now));
                    true
                }
            };
            let snapshot = record.clone();
            self.persist(vec![snapshot]);
            created
        };

        if created {
            self.events.publish(Notification::ConnectionCreated {
                source_id: source,
                target_id: target,
                connection_type,
                weight,
                timestamp: now,
            });
        }
        true
    }

    /// `connect` with the default weight
    pub async fn connect_default(
        &self,
        source: MemoryId,
        target: MemoryId,
        connection_type: ConnectionType,
    ) -> bool {
        self.connect(source, target, connection_type, DEFAULT_CONNECTION_WEIGHT)
            .await
    }

    /// Apply explicit learning feedback to a record's strength
    pub async fn apply_feedback(&self, id: MemoryId, feedback: Feedback) -> bool {
        let delta = match feedback {
            Feedback::Positive => self.config.feedback_rate,
            Feedback::Negative => -self.config.feedback_rate,
        };

        let strength = {
            let mut state = self.state.write().await;
            let Some(record) = state.records.get_mut(&id) else {
                return false;
            };
            record.set_strength(record.strength + delta);
            let snapshot = record.clone();
            self.persist(vec![snapshot]);
            record.strength
        };

        debug!("Applied {:?} feedback to {} (strength {:.3})", feedback, id, strength);
        true
    }

    /// Load records from the storage backend, skipping ids already present
    pub async fn hydrate(&self, limit: usize) -> Result<usize> {
        let Some(writer) = &self.writer else {
            return Ok(0);
        };
        let storage = writer.storage();

        let records = storage.query_all(&MemoryFilter::all(), limit).await?;
        let mut state = self.state.write().await;
        let mut loaded = 0;
        for mut record in records {
            if state.records.contains_key(&record.id) {
                continue;
            }
            record.set_strength(record.strength);
            for connection in &mut record.connections {
                connection.set_weight(connection.weight);
            }
            state.insert(record);
            loaded += 1;
        }

        info!("Hydrated {} memories from storage", loaded);
        Ok(loaded)
    }

    pub async fn stats(&self) -> MemoryStats {
        let state = self.state.read().await;
        let per_kind = MemoryKind::ALL
            .into_iter()
            .map(|kind| (kind, state.indices.get(&kind).map_or(0, HashSet::len)))
            .collect();
        let total = state.records.len();
        let average_strength = if total == 0 {
            0.0
        } else {
            state.records.values().map(|r| r.strength).sum::<f64>() / total as f64
        };

        MemoryStats {
            total,
            per_kind,
            queue_depth: state.consolidation_queue.len(),
            average_strength,
            total_connections: state.records.values().map(|r| r.connections.len()).sum(),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Wait until every change made so far has reached storage
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    /// Queue records for storage; call with the state lock held so the queue
    /// follows mutation order. Failures are logged per record.
    pub(crate) fn persist(&self, records: Vec<MemoryRecord>) {
        if let Some(writer) = &self.writer {
            writer.store(records);
        }
    }

    /// Queue removal of pruned records, under the same lock rule as `persist`
    pub(crate) fn forget(&self, ids: Vec<MemoryId>) {
        if let Some(writer) = &self.writer {
            writer.remove(ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn engine() -> MemoryEngine {
        MemoryEngine::new(MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_store_initialises_bookkeeping() {
        let engine = engine();
        let id = engine
            .store(NewMemory::new(MemoryKind::Working, json!("buy milk")).with_strength(1.4))
            .await;

        let record = engine.peek(id).await.unwrap();
        assert_eq!(record.access_count, 1);
        assert_eq!(record.strength, 1.0);
        assert_eq!(record.last_accessed, record.created_at);
        assert_eq!(engine.stats().await.per_kind[&MemoryKind::Working], 1);
    }

    #[tokio::test]
    async fn test_retrieve_unknown_is_none() {
        assert!(engine().retrieve(MemoryId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_round_trip() {
        let engine = engine();
        let content = json!({"fact": "water boils at 100C"});
        let id = engine
            .store(NewMemory::new(MemoryKind::Semantic, content.clone()))
            .await;

        let before = engine.peek(id).await.unwrap();
        let after = engine.retrieve(id).await.unwrap();
        assert_eq!(after.content, content);
        assert_eq!(after.access_count, before.access_count + 1);
        assert!(after.strength >= before.strength);
    }

    #[tokio::test]
    async fn test_hebbian_step_strengthens_record_and_neighbour() {
        let engine = engine();
        let a = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("a")).with_strength(0.5))
            .await;
        let b = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("b")).with_strength(0.5))
            .await;
        assert!(engine.connect(a, b, ConnectionType::Associative, 0.8).await);

        let a_after = engine.retrieve(a).await.unwrap();
        // 0.5 + 0.1 * (1 - 0.5)
        assert!((a_after.strength - 0.55).abs() < 1e-9);
        assert_eq!(a_after.connections[0].activation_count, 1);

        let b_after = engine.peek(b).await.unwrap();
        // 0.5 + 0.1 * 0.8 * (1 - 0.5)
        assert!((b_after.strength - 0.54).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_episodic_enqueued_once_at_threshold() {
        let engine = engine();
        let id = engine
            .store(NewMemory::new(MemoryKind::Episodic, json!("met alice")))
            .await;

        engine.retrieve(id).await;
        assert_eq!(engine.stats().await.queue_depth, 0);
        engine.retrieve(id).await; // access_count reaches 3
        assert_eq!(engine.stats().await.queue_depth, 1);
        engine.retrieve(id).await;
        assert_eq!(engine.stats().await.queue_depth, 1);
    }

    #[tokio::test]
    async fn test_connect_twice_strengthens_edge() {
        let engine = engine();
        let a = engine.store(NewMemory::new(MemoryKind::Working, json!("a"))).await;
        let b = engine.store(NewMemory::new(MemoryKind::Working, json!("b"))).await;

        assert!(engine.connect_default(a, b, ConnectionType::Associative).await);
        assert!(engine.connect_default(a, b, ConnectionType::Associative).await);

        let record = engine.peek(a).await.unwrap();
        assert_eq!(record.connections.len(), 1);
        assert!((record.connections[0].weight - 0.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_connect_distinct_types_are_separate_edges() {
        let engine = engine();
        let a = engine.store(NewMemory::new(MemoryKind::Working, json!("a"))).await;
        let b = engine.store(NewMemory::new(MemoryKind::Working, json!("b"))).await;

        engine.connect(a, b, ConnectionType::Associative, 0.5).await;
        engine.connect(a, b, ConnectionType::Causal, 0.5).await;
        assert_eq!(engine.peek(a).await.unwrap().connections.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_and_self() {
        let engine = engine();
        let a = engine.store(NewMemory::new(MemoryKind::Working, json!("a"))).await;
        assert!(!engine.connect(a, MemoryId::new(), ConnectionType::Temporal, 0.5).await);
        assert!(!engine.connect(MemoryId::new(), a, ConnectionType::Temporal, 0.5).await);
        assert!(!engine.connect(a, a, ConnectionType::Temporal, 0.5).await);
    }

    #[tokio::test]
    async fn test_connect_emits_notification_for_new_edge_only() {
        let engine = engine();
        let a = engine.store(NewMemory::new(MemoryKind::Working, json!("a"))).await;
        let b = engine.store(NewMemory::new(MemoryKind::Working, json!("b"))).await;
        let mut rx = engine.events().subscribe();

        engine.connect(a, b, ConnectionType::Associative, 0.5).await;
        engine.connect(a, b, ConnectionType::Associative, 0.5).await;

        assert!(matches!(
            rx.try_recv(),
            Ok(Notification::ConnectionCreated { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity_times_strength() {
        let engine = engine();
        let weak = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("rust borrow checker")).with_strength(0.2))
            .await;
        let strong = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("rust borrow checker")).with_strength(0.9))
            .await;
        engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("python gil")).with_strength(1.0))
            .await;

        let hits = engine.search("rust borrow checker", None, 10).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, strong);
        assert_eq!(hits[1].record.id, weak);
        assert_eq!(hits[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn test_search_kind_filter_and_limit() {
        let engine = engine();
        engine
            .store(NewMemory::new(MemoryKind::Episodic, json!("deploy failed")))
            .await;
        let semantic = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("deploy needs approval")))
            .await;

        let hits = engine.search("deploy", Some(MemoryKind::Semantic), 10).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, semantic);

        assert_eq!(engine.search("deploy", None, 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_search_is_pure() {
        let engine = engine();
        for i in 0..10 {
            engine
                .store(NewMemory::new(MemoryKind::Semantic, json!(format!("shared token {}", i % 3))))
                .await;
        }
        let first: Vec<MemoryId> = engine.search("shared token", None, 5).await.iter().map(|h| h.record.id).collect();
        let second: Vec<MemoryId> = engine.search("shared token", None, 5).await.iter().map(|h| h.record.id).collect();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_feedback_is_clamped() {
        let engine = engine();
        let id = engine
            .store(NewMemory::new(MemoryKind::Procedural, json!("tie shoes")).with_strength(0.95))
            .await;

        assert!(engine.apply_feedback(id, Feedback::Positive).await);
        assert_eq!(engine.peek(id).await.unwrap().strength, 1.0);

        assert!(engine.apply_feedback(id, Feedback::Negative).await);
        assert!((engine.peek(id).await.unwrap().strength - 0.9).abs() < 1e-9);

        assert!(!engine.apply_feedback(MemoryId::new(), Feedback::Positive).await);
    }

    #[tokio::test]
    async fn test_store_persists_and_hydrate_restores() {
        let storage = Arc::new(InMemoryStorage::new());
        let engine = MemoryEngine::new(MemoryConfig::default()).with_storage(storage.clone());
        let id = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("persist me")))
            .await;

        engine.flush().await;
        assert!(storage.get(&id).await.is_some());

        let restored = MemoryEngine::new(MemoryConfig::default()).with_storage(storage);
        assert_eq!(restored.hydrate(100).await.unwrap(), 1);
        assert_eq!(restored.peek(id).await.unwrap().content, json!("persist me"));
        assert_eq!(restored.hydrate(100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let clock = ManualClock::default();
        let engine = MemoryEngine::new(MemoryConfig::default()).with_clock(Arc::new(clock));
        let a = engine
            .store(NewMemory::new(MemoryKind::Episodic, json!("a")).with_strength(0.2))
            .await;
        let b = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("b")).with_strength(0.6))
            .await;
        engine.connect(a, b, ConnectionType::Semantic, 0.5).await;

        let stats = engine.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_kind[&MemoryKind::Episodic], 1);
        assert_eq!(stats.per_kind[&MemoryKind::LongTerm], 0);
        assert_eq!(stats.total_connections, 1);
        assert!((stats.average_strength - 0.4).abs() < 1e-9);
    }
}
