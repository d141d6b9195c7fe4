// Decay, Pruning and Hebbian Reinforcement
//
// Decay weakens every record and its outgoing edges exponentially with the
// time since the record was last accessed. Pruning removes edges and records
// that have become too weak or idle to matter. Both passes hold the engine
// write lock for their whole duration.

use super::{MemoryEngine, MemoryState};
use crate::events::Notification;
use crate::types::{MemoryId, MemoryKind};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Outcome of one decay pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayReport {
    pub records_decayed: usize,
    pub connections_decayed: usize,
    /// Mean strength after the pass
    pub average_strength: f64,
}

/// Outcome of one pruning pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub connections_pruned: usize,
    pub records_pruned: Vec<(MemoryId, String)>,
}

/// Strengthen a freshly accessed record and, in proportion to edge weight,
/// the records it points at
pub(crate) fn hebbian_update(state: &mut MemoryState, id: MemoryId, rate: f64, now: DateTime<Utc>) {
    let neighbours: HashMap<MemoryId, f64> = {
        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        record.set_strength(record.strength + rate * (1.0 - record.strength));

        let mut neighbours = HashMap::new();
        for connection in &mut record.connections {
            connection.last_activated = now;
            connection.activation_count += 1;
            let weight = neighbours.entry(connection.target).or_insert(0.0_f64);
            *weight = weight.max(connection.weight);
        }
        neighbours
    };

    for (target, weight) in neighbours {
        if let Some(neighbour) = state.records.get_mut(&target) {
            neighbour.set_strength(neighbour.strength + rate * weight * (1.0 - neighbour.strength));
        }
    }
}

impl MemoryEngine {
    /// Multiply every strength and outgoing weight by `exp(-decay_rate × seconds idle)`
    pub async fn apply_decay(&self) -> DecayReport {
        let now = self.now();
        let mut report = DecayReport::default();

        let mut state = self.state.write().await;
        for record in state.records.values_mut() {
            let factor = (-record.decay_rate * record.seconds_since_access(now)).exp();
            if factor >= 1.0 {
                continue;
            }

            record.set_strength(record.strength * factor);
            for connection in &mut record.connections {
                connection.set_weight(connection.weight * factor);
                report.connections_decayed += 1;
            }
            report.records_decayed += 1;
        }

        let total = state.records.len();
        if total > 0 {
            report.average_strength =
                state.records.values().map(|r| r.strength).sum::<f64>() / total as f64;
        }
        drop(state);

        debug!(
            "Decay pass: {} records, {} connections (avg strength {:.3})",
            report.records_decayed, report.connections_decayed, report.average_strength
        );
        report
    }

    /// Remove weak edges, idle working memories and records below the strength floor
    pub async fn perform_pruning(&self) -> PruneReport {
        let now = self.now();
        let ttl = chrono::Duration::from_std(self.config.working_memory_ttl)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let mut report = PruneReport::default();

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let mut doomed: Vec<(MemoryId, String)> = state
                .records
                .values()
                .filter_map(|record| {
                    let idle = now.signed_duration_since(record.last_accessed);
                    if record.kind == MemoryKind::Working
                        && idle > ttl
                        && record.access_count < self.config.min_working_accesses
                    {
                        Some((record.id, "idle working memory".to_string()))
                    } else if record.strength < self.config.record_strength_floor {
                        Some((record.id, format!("strength {:.4} below floor", record.strength)))
                    } else {
                        None
                    }
                })
                .collect();
            doomed.sort();

            let mut changed: HashSet<MemoryId> = HashSet::new();
            for (id, reason) in &doomed {
                changed.extend(state.referrers(*id));
                if state.remove(*id).is_some() {
                    debug!("Pruned memory {} ({})", id, reason);
                }
            }

            for record in state.records.values_mut() {
                let before = record.connections.len();
                record
                    .connections
                    .retain(|c| c.weight >= self.config.pruning_threshold);
                let removed = before - record.connections.len();
                if removed > 0 {
                    report.connections_pruned += removed;
                    changed.insert(record.id);
                }
            }

            let touched: Vec<_> = changed
                .iter()
                .filter_map(|id| state.records.get(id).cloned())
                .collect();

            self.forget(doomed.iter().map(|(id, _)| *id).collect());
            self.persist(touched);
            report.records_pruned = doomed;
        }

        for (id, reason) in &report.records_pruned {
            self.events.publish(Notification::MemoryPruned {
                memory_id: *id,
                reason: reason.clone(),
                timestamp: now,
            });
        }

        info!(
            "Pruning pass: {} connections, {} memories removed",
            report.connections_pruned,
            report.records_pruned.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::config::MemoryConfig;
    use crate::memory::MemoryEngine;
    use crate::types::{ConnectionType, MemoryKind, NewMemory};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with_clock() -> (MemoryEngine, ManualClock) {
        let clock = ManualClock::default();
        let engine = MemoryEngine::new(MemoryConfig::default()).with_clock(Arc::new(clock.clone()));
        (engine, clock)
    }

    #[tokio::test]
    async fn test_decay_is_exponential_in_idle_time() {
        let (engine, clock) = engine_with_clock();
        let a = engine
            .store(
                NewMemory::new(MemoryKind::Semantic, json!("a"))
                    .with_strength(0.8)
                    .with_decay_rate(0.01),
            )
            .await;
        let b = engine.store(NewMemory::new(MemoryKind::Semantic, json!("b"))).await;
        engine.connect(a, b, ConnectionType::Associative, 0.6).await;

        clock.advance(Duration::seconds(10));
        let report = engine.apply_decay().await;
        assert_eq!(report.records_decayed, 2);

        let factor = (-0.01_f64 * 10.0).exp();
        let record = engine.peek(a).await.unwrap();
        assert!((record.strength - 0.8 * factor).abs() < 1e-9);
        assert!((record.connections[0].weight - 0.6 * factor).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_decay_without_elapsed_time_is_noop() {
        let (engine, _clock) = engine_with_clock();
        let id = engine
            .store(NewMemory::new(MemoryKind::Working, json!("x")).with_strength(0.7))
            .await;
        let report = engine.apply_decay().await;
        assert_eq!(report.records_decayed, 0);
        assert_eq!(engine.peek(id).await.unwrap().strength, 0.7);
    }

    #[tokio::test]
    async fn test_repeated_decay_never_increases_strength() {
        let (engine, clock) = engine_with_clock();
        let id = engine
            .store(
                NewMemory::new(MemoryKind::Episodic, json!("x"))
                    .with_strength(0.9)
                    .with_decay_rate(0.001),
            )
            .await;

        clock.advance(Duration::minutes(3));
        engine.apply_decay().await;
        let first = engine.peek(id).await.unwrap().strength;
        engine.apply_decay().await;
        let second = engine.peek(id).await.unwrap().strength;
        assert!(second <= first);
        assert!(first < 0.9);
    }

    #[tokio::test]
    async fn test_pruning_removes_weak_connections() {
        let (engine, _clock) = engine_with_clock();
        let a = engine.store(NewMemory::new(MemoryKind::Semantic, json!("a"))).await;
        let b = engine.store(NewMemory::new(MemoryKind::Semantic, json!("b"))).await;
        let c = engine.store(NewMemory::new(MemoryKind::Semantic, json!("c"))).await;
        engine.connect(a, b, ConnectionType::Associative, 0.05).await;
        engine.connect(a, c, ConnectionType::Associative, 0.5).await;

        let report = engine.perform_pruning().await;
        assert_eq!(report.connections_pruned, 1);
        let remaining = engine.peek(a).await.unwrap().connections;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target, c);
    }

    #[tokio::test]
    async fn test_pruning_evicts_idle_working_memory() {
        let (engine, clock) = engine_with_clock();
        let idle = engine.store(NewMemory::new(MemoryKind::Working, json!("idle"))).await;
        let used = engine.store(NewMemory::new(MemoryKind::Working, json!("used"))).await;
        let semantic = engine.store(NewMemory::new(MemoryKind::Semantic, json!("fact"))).await;
        engine.retrieve(used).await;
        engine.connect(semantic, idle, ConnectionType::Associative, 0.9).await;

        clock.advance(Duration::minutes(6));
        let report = engine.perform_pruning().await;

        assert_eq!(report.records_pruned.len(), 1);
        assert_eq!(report.records_pruned[0].0, idle);
        assert!(engine.peek(idle).await.is_none());
        assert!(engine.peek(used).await.is_some());
        // Edge into the evicted record is gone as well
        assert!(engine.peek(semantic).await.unwrap().connections.is_empty());
    }

    #[tokio::test]
    async fn test_pruning_keeps_recent_working_memory() {
        let (engine, clock) = engine_with_clock();
        let id = engine.store(NewMemory::new(MemoryKind::Working, json!("fresh"))).await;
        clock.advance(Duration::minutes(4));
        let report = engine.perform_pruning().await;
        assert!(report.records_pruned.is_empty());
        assert!(engine.peek(id).await.is_some());
    }

    #[tokio::test]
    async fn test_pruning_removes_records_below_floor() {
        let (engine, _clock) = engine_with_clock();
        let id = engine
            .store(NewMemory::new(MemoryKind::Semantic, json!("faint")).with_strength(0.001))
            .await;
        let report = engine.perform_pruning().await;
        assert_eq!(report.records_pruned.len(), 1);
        assert!(engine.peek(id).await.is_none());
    }
}
