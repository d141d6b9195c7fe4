//! Memory engine scenarios exercised through the public API

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use hippocampus::types::ConsolidationPhase;
use hippocampus::{
    Clock, ConnectionType, InMemoryStorage, ManualClock, MemoryConfig, MemoryEngine,
    MemoryFilter, MemoryId, MemoryKind, MemoryRecord, NewMemory, SqliteStorage, StorageBackend,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn engine_at(clock: &ManualClock) -> MemoryEngine {
    MemoryEngine::new(MemoryConfig::default()).with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_repeated_episode_consolidates_into_one_semantic_record() {
    let engine = MemoryEngine::new(MemoryConfig::default());

    let mut episodes = Vec::new();
    for _ in 0..3 {
        let id = engine
            .store(
                NewMemory::new(MemoryKind::Episodic, json!("coffee with the platform team"))
                    .with_strength(0.9),
            )
            .await;
        // Stored counts as the first access; two more reach the threshold
        engine.retrieve(id).await;
        engine.retrieve(id).await;
        episodes.push(id);
    }
    assert_eq!(engine.stats().await.queue_depth, 3);

    let first = engine.perform_consolidation().await.unwrap();
    assert!(!first.reinforced);
    let second = engine.perform_consolidation().await.unwrap();
    let third = engine.perform_consolidation().await.unwrap();
    assert!(second.reinforced && third.reinforced);
    assert_eq!(second.semantic_id, first.semantic_id);
    assert_eq!(third.semantic_id, first.semantic_id);
    assert!(engine.perform_consolidation().await.is_none());

    let stats = engine.stats().await;
    assert_eq!(stats.per_kind[&MemoryKind::Semantic], 1);
    assert_eq!(stats.queue_depth, 0);

    let semantic = engine.peek(first.semantic_id).await.unwrap();
    assert!(semantic.strength <= 1.0);
    assert!(semantic.strength > first.semantic_strength);
    assert_eq!(semantic.metadata.source.as_deref(), Some("consolidation"));

    for id in episodes {
        let episode = engine.peek(id).await.unwrap();
        assert_eq!(
            episode.metadata.consolidation_phase,
            ConsolidationPhase::Consolidated
        );
        assert!(episode
            .connections
            .iter()
            .any(|c| c.target == first.semantic_id && c.connection_type == ConnectionType::Semantic));
    }
}

#[tokio::test]
async fn test_connecting_twice_strengthens_the_edge() {
    let engine = MemoryEngine::new(MemoryConfig::default());
    let a = engine
        .store(NewMemory::new(MemoryKind::LongTerm, json!("rust ownership")))
        .await;
    let b = engine
        .store(NewMemory::new(MemoryKind::LongTerm, json!("borrow checker")))
        .await;

    assert!(engine.connect(a, b, ConnectionType::Associative, 0.5).await);
    assert!(engine.connect(a, b, ConnectionType::Associative, 0.5).await);

    let record = engine.peek(a).await.unwrap();
    assert_eq!(record.connections.len(), 1);
    assert!((record.connections[0].weight - 0.55).abs() < 1e-9);

    // A different relationship type is a separate edge
    assert!(engine.connect(a, b, ConnectionType::Causal, 0.3).await);
    assert_eq!(engine.peek(a).await.unwrap().connections.len(), 2);
}

#[tokio::test]
async fn test_store_then_retrieve_round_trip() {
    let clock = ManualClock::new(Utc::now());
    let engine = engine_at(&clock);
    let content = json!({"text": "deploy window is friday", "channel": "ops"});

    let id = engine
        .store(
            NewMemory::new(MemoryKind::Procedural, content.clone())
                .with_strength(0.4)
                .with_tags(["ops", "deploys"]),
        )
        .await;

    clock.advance(ChronoDuration::seconds(5));
    let record = engine.retrieve(id).await.unwrap();
    assert_eq!(record.content, content);
    assert_eq!(record.kind, MemoryKind::Procedural);
    assert_eq!(record.access_count, 2);
    assert_eq!(record.last_accessed, clock.now());
    assert_eq!(record.metadata.tags, vec!["ops", "deploys"]);
    // Retrieval pulls strength toward 1
    assert!(record.strength > 0.4 && record.strength <= 1.0);
}

#[tokio::test]
async fn test_decay_never_increases_strength() {
    let clock = ManualClock::new(Utc::now());
    let engine = engine_at(&clock);
    let a = engine
        .store(
            NewMemory::new(MemoryKind::ShortTerm, json!("standup notes"))
                .with_strength(0.8)
                .with_decay_rate(0.0005),
        )
        .await;
    let b = engine
        .store(NewMemory::new(MemoryKind::ShortTerm, json!("retro notes")).with_strength(0.8))
        .await;
    engine.connect(a, b, ConnectionType::Temporal, 0.9).await;

    // No time has passed, nothing decays
    assert_eq!(engine.apply_decay().await.records_decayed, 0);

    let mut previous = engine.peek(a).await.unwrap();
    for _ in 0..4 {
        clock.advance(ChronoDuration::minutes(10));
        engine.apply_decay().await;

        let current = engine.peek(a).await.unwrap();
        assert!(current.strength < previous.strength);
        assert!(current.strength >= 0.0);
        assert!(current.connections[0].weight < previous.connections[0].weight);
        previous = current;
    }
}

#[tokio::test]
async fn test_search_respects_kind_and_ranks_by_score() {
    let engine = MemoryEngine::new(MemoryConfig::default());
    engine
        .store(
            NewMemory::new(MemoryKind::Semantic, json!("tokio runtime scheduling")).with_strength(0.3),
        )
        .await;
    let strong = engine
        .store(
            NewMemory::new(MemoryKind::Semantic, json!("tokio runtime internals")).with_strength(0.9),
        )
        .await;
    engine
        .store(
            NewMemory::new(MemoryKind::Episodic, json!("tokio runtime talk")).with_strength(1.0),
        )
        .await;
    engine
        .store(
            NewMemory::new(MemoryKind::Semantic, json!("sourdough starter")).with_strength(1.0),
        )
        .await;

    let hits = engine.search("tokio runtime", Some(MemoryKind::Semantic), 10).await;
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.record.kind == MemoryKind::Semantic));
    assert_eq!(hits[0].record.id, strong);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let all = engine.search("tokio runtime", None, 10).await;
    assert_eq!(all.len(), 3);

    let limited = engine.search("tokio runtime", None, 1).await;
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_sqlite_backed_engine_survives_restart() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(SqliteStorage::open(dir.path().join("memories.db")).await.unwrap());

    let engine = MemoryEngine::new(MemoryConfig::default()).with_storage(storage.clone());
    let a = engine
        .store(NewMemory::new(MemoryKind::LongTerm, json!("postgres vacuum tuning")))
        .await;
    let b = engine
        .store(NewMemory::new(MemoryKind::LongTerm, json!("autovacuum thresholds")))
        .await;

    engine.connect(a, b, ConnectionType::Hierarchical, 0.6).await;
    engine.flush().await;
    let records = storage.query_all(&MemoryFilter::all(), 10).await.unwrap();
    assert_eq!(records.len(), 2);
    drop(engine);

    let restarted = MemoryEngine::new(MemoryConfig::default()).with_storage(storage);
    assert_eq!(restarted.hydrate(100).await.unwrap(), 2);
    // Hydrating again skips records already loaded
    assert_eq!(restarted.hydrate(100).await.unwrap(), 0);

    let record = restarted.peek(a).await.unwrap();
    assert_eq!(record.content, json!("postgres vacuum tuning"));
    assert_eq!(record.connections[0].connection_type, ConnectionType::Hierarchical);
    assert_eq!(restarted.stats().await.per_kind[&MemoryKind::LongTerm], 2);
}

/// Stalls the first write of each record, so a later write could overtake it
/// if writes were not applied in order
#[derive(Default)]
struct SlowFirstWrite {
    inner: InMemoryStorage,
    seen: Mutex<HashSet<MemoryId>>,
}

#[async_trait]
impl StorageBackend for SlowFirstWrite {
    async fn store(&self, record: &MemoryRecord) -> hippocampus::Result<()> {
        let first = self.seen.lock().unwrap().insert(record.id);
        if first {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.store(record).await
    }

    async fn query_all(
        &self,
        filter: &MemoryFilter,
        limit: usize,
    ) -> hippocampus::Result<Vec<MemoryRecord>> {
        self.inner.query_all(filter, limit).await
    }

    async fn remove(&self, id: MemoryId) -> hippocampus::Result<()> {
        self.inner.remove(id).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_initial_write_does_not_clobber_later_accesses() {
    let storage = Arc::new(SlowFirstWrite::default());
    let engine = MemoryEngine::new(MemoryConfig::default()).with_storage(storage.clone());

    let id = engine
        .store(NewMemory::new(MemoryKind::LongTerm, json!("on-call rotation")))
        .await;
    engine.retrieve(id).await;
    engine.retrieve(id).await;
    engine.flush().await;

    let durable = storage.inner.get(&id).await.unwrap();
    assert_eq!(durable.access_count, 3);
    assert_eq!(durable, engine.peek(id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pruned_record_is_not_resurrected_by_a_slow_write() {
    let storage = Arc::new(SlowFirstWrite::default());
    let engine = MemoryEngine::new(MemoryConfig::default()).with_storage(storage.clone());

    let id = engine
        .store(NewMemory::new(MemoryKind::ShortTerm, json!("stale draft")).with_strength(0.001))
        .await;
    let report = engine.perform_pruning().await;
    assert_eq!(report.records_pruned.len(), 1);
    assert_eq!(report.records_pruned[0].0, id);
    engine.flush().await;

    assert!(storage.inner.get(&id).await.is_none());
    let restarted = MemoryEngine::new(MemoryConfig::default()).with_storage(storage);
    assert_eq!(restarted.hydrate(100).await.unwrap(), 0);
}
