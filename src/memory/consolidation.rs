// Memory Consolidation
//
// Two passes live here. `perform_consolidation` transfers one queued episode
// into semantic memory, reinforcing a matching semantic record when one
// exists. `advanced_consolidation` is the slower four-phase pass:
//
// 1. working records old and strong enough become short-term
// 2. short-term records old, strong and used enough become long-term
// 3. long-term edges into heavily used targets are boosted, weak ones dropped
// 4. every record's outgoing edges are rescaled by its recent access count
//
// Both hold the engine write lock for the whole pass.

use super::clusters::{find_clusters, Insight};
use super::{similarity, MemoryEngine, MemoryState};
use crate::events::Notification;
use crate::types::{
    clamp_unit, Connection, ConnectionType, ConsolidationPhase, MemoryId, MemoryKind,
    MemoryMetadata, MemoryRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Tag written to `metadata.source` of records created by consolidation
pub const CONSOLIDATION_SOURCE: &str = "consolidation";

/// Result of transferring one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    pub source_id: MemoryId,
    pub semantic_id: MemoryId,
    /// True when an existing semantic record absorbed the episode
    pub reinforced: bool,
    pub similarity: f64,
    pub semantic_strength: f64,
}

/// A record moved from one kind to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindTransition {
    pub id: MemoryId,
    pub from: MemoryKind,
    pub to: MemoryKind,
}

/// An edge created, rescaled or removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionChange {
    pub source: MemoryId,
    pub target: MemoryId,
    pub connection_type: ConnectionType,
    pub old_weight: f64,
    pub new_weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedConsolidationReport {
    pub consolidated: Vec<KindTransition>,
    pub new_connections: Vec<ConnectionChange>,
    pub strengthened: Vec<ConnectionChange>,
    pub weakened: Vec<ConnectionChange>,
    pub pruned_connections: Vec<ConnectionChange>,
    pub pruned_records: Vec<MemoryId>,
    pub insights: Vec<Insight>,
}

impl AdvancedConsolidationReport {
    /// Total number of changes made by the pass
    pub fn changes(&self) -> usize {
        self.consolidated.len()
            + self.new_connections.len()
            + self.strengthened.len()
            + self.weakened.len()
            + self.pruned_connections.len()
            + self.pruned_records.len()
    }
}

fn std_to_chrono(duration: std::time::Duration, fallback: chrono::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(fallback)
}

/// Scale every outgoing edge of `record`, collecting the edges that moved
fn scale_connections(record: &mut MemoryRecord, factor: f64) -> Vec<ConnectionChange> {
    let source = record.id;
    record
        .connections
        .iter_mut()
        .filter_map(|connection| {
            let old_weight = connection.weight;
            connection.set_weight(old_weight * factor);
            (connection.weight != old_weight).then(|| ConnectionChange {
                source,
                target: connection.target,
                connection_type: connection.connection_type,
                old_weight,
                new_weight: connection.weight,
            })
        })
        .collect()
}

impl MemoryEngine {
    /// Transfer the oldest queued episode into semantic memory
    ///
    /// Returns `None` when the queue is empty.
    pub async fn perform_consolidation(&self) -> Option<ConsolidationOutcome> {
        let now = self.now();

        let (outcome, created_semantic, linked) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            // Entries whose record has since been pruned are skipped
            let source = loop {
                let id = state.consolidation_queue.pop_front()?;
                match state.records.get(&id) {
                    Some(record) => break record.clone(),
                    None => debug!("Skipping consolidation of vanished memory {}", id),
                }
            };

            let pattern = similarity::extract_pattern(&source.content);
            let best_match = state
                .ids_of_kind(MemoryKind::Semantic)
                .into_iter()
                .filter(|id| *id != source.id)
                .filter_map(|id| {
                    let candidate = state.records.get(&id)?;
                    let sim = similarity::content_similarity(
                        &pattern,
                        &similarity::extract_pattern(&candidate.content),
                    );
                    (sim >= self.config.pattern_match_threshold).then_some((id, sim))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let (semantic_id, sim, reinforced, created_semantic) = match best_match {
                Some((id, sim)) => {
                    if let Some(semantic) = state.records.get_mut(&id) {
                        semantic.set_strength(semantic.strength + self.config.semantic_reinforcement);
                    }
                    (id, sim, true, None)
                }
                None => {
                    let semantic = MemoryRecord {
                        id: MemoryId::new(),
                        kind: MemoryKind::Semantic,
                        content: pattern,
                        strength: clamp_unit(source.strength * self.config.transfer_degradation),
                        created_at: now,
                        last_accessed: now,
                        access_count: 1,
                        decay_rate: source.decay_rate,
                        consolidation_level: source.consolidation_level + 1.0,
                        priority: source.priority,
                        connections: Vec::new(),
                        metadata: MemoryMetadata {
                            tags: source.metadata.tags.clone(),
                            source: Some(CONSOLIDATION_SOURCE.to_string()),
                            importance: source.metadata.importance,
                            validated: false,
                            consolidation_phase: ConsolidationPhase::Semantic,
                            extra: serde_json::Map::new(),
                        },
                    };
                    let id = semantic.id;
                    let kind = semantic.kind;
                    state.insert(semantic);
                    (id, 1.0, false, Some(kind))
                }
            };

            let link_weight = if reinforced {
                sim
            } else {
                self.config.transfer_degradation
            };
            let mut linked = None;
            if let Some(record) = state.records.get_mut(&source.id) {
                record.metadata.consolidation_phase = ConsolidationPhase::Consolidated;
                record.consolidation_level += 1.0;
                match record.connection_mut(semantic_id, ConnectionType::Semantic) {
                    Some(existing) => {
                        existing.set_weight(existing.weight.max(link_weight));
                        existing.last_activated = now;
                    }
                    None => {
                        let connection =
                            Connection::new(semantic_id, ConnectionType::Semantic, link_weight, now);
                        linked = Some(connection.weight);
                        record.connections.push(connection);
                    }
                }
            }

            let semantic_strength = state
                .records
                .get(&semantic_id)
                .map_or(0.0, |r| r.strength);
            let records: Vec<MemoryRecord> = [source.id, semantic_id]
                .iter()
                .filter_map(|id| state.records.get(id).cloned())
                .collect();
            self.persist(records);

            let outcome = ConsolidationOutcome {
                source_id: source.id,
                semantic_id,
                reinforced,
                similarity: sim,
                semantic_strength,
            };
            (outcome, created_semantic, linked)
        };

        if let Some(kind) = created_semantic {
            self.events.publish(Notification::MemoryStored {
                memory_id: outcome.semantic_id,
                kind,
                timestamp: now,
            });
        }
        if let Some(weight) = linked {
            self.events.publish(Notification::ConnectionCreated {
                source_id: outcome.source_id,
                target_id: outcome.semantic_id,
                connection_type: ConnectionType::Semantic,
                weight,
                timestamp: now,
            });
        }
        self.events.publish(Notification::MemoryConsolidated {
            source_id: outcome.source_id,
            semantic_id: outcome.semantic_id,
            reinforced: outcome.reinforced,
            timestamp: now,
        });

        info!(
            "Consolidated episode {} into semantic memory {} ({}, strength {:.3})",
            outcome.source_id,
            outcome.semantic_id,
            if outcome.reinforced { "reinforced" } else { "created" },
            outcome.semantic_strength
        );
        Some(outcome)
    }

    /// Run the four-phase consolidation pass and derive insights from clusters
    pub async fn advanced_consolidation(&self) -> AdvancedConsolidationReport {
        let now = self.now();
        let mut report = AdvancedConsolidationReport::default();

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let mut touched: BTreeSet<MemoryId> = BTreeSet::new();

            self.promote_working(state, now, &mut report, &mut touched);
            let promoted = self.promote_short_term(state, now, &mut report, &mut touched);
            self.associate_long_term(state, now, &promoted, &mut report, &mut touched);
            self.optimise_long_term(state, &mut report, &mut touched);
            self.reweight_connections(state, now, &mut report, &mut touched);

            report.insights = find_clusters(
                state,
                self.config.cluster_edge_threshold,
                self.config.min_cluster_size,
            )
            .iter()
            .map(Insight::from)
            .collect();

            let records = touched
                .iter()
                .filter_map(|id| state.records.get(id).cloned())
                .collect();
            self.forget(report.pruned_records.clone());
            self.persist(records);
        }

        for id in &report.pruned_records {
            self.events.publish(Notification::MemoryPruned {
                memory_id: *id,
                reason: "weak working memory".to_string(),
                timestamp: now,
            });
        }
        for change in &report.new_connections {
            self.events.publish(Notification::ConnectionCreated {
                source_id: change.source,
                target_id: change.target,
                connection_type: change.connection_type,
                weight: change.new_weight,
                timestamp: now,
            });
        }

        info!(
            "Advanced consolidation: {} promoted, {} new / {} strengthened / {} weakened / {} pruned connections, {} pruned memories, {} insights",
            report.consolidated.len(),
            report.new_connections.len(),
            report.strengthened.len(),
            report.weakened.len(),
            report.pruned_connections.len(),
            report.pruned_records.len(),
            report.insights.len()
        );
        report
    }

    fn promote_working(
        &self,
        state: &mut MemoryState,
        now: DateTime<Utc>,
        report: &mut AdvancedConsolidationReport,
        touched: &mut BTreeSet<MemoryId>,
    ) {
        let min_age = std_to_chrono(self.config.working_promotion_age, chrono::Duration::seconds(30));

        for id in state.ids_of_kind(MemoryKind::Working) {
            let Some((age, strength, access_count)) = state
                .records
                .get(&id)
                .map(|r| (r.age(now), r.strength, r.access_count))
            else {
                continue;
            };
            if age <= min_age {
                continue;
            }

            if strength > self.config.working_promotion_strength {
                if let Some(record) = state.records.get_mut(&id) {
                    record.metadata.consolidation_phase = ConsolidationPhase::ShortTerm;
                    record.consolidation_level += 1.0;
                }
                if let Some(from) = state.reclassify(id, MemoryKind::ShortTerm) {
                    report.consolidated.push(KindTransition {
                        id,
                        from,
                        to: MemoryKind::ShortTerm,
                    });
                    touched.insert(id);
                }
            } else if access_count < self.config.min_working_accesses {
                touched.extend(state.referrers(id));
                state.remove(id);
                touched.remove(&id);
                report.pruned_records.push(id);
                debug!("Dropped weak working memory {}", id);
            }
        }
    }

    fn promote_short_term(
        &self,
        state: &mut MemoryState,
        now: DateTime<Utc>,
        report: &mut AdvancedConsolidationReport,
        touched: &mut BTreeSet<MemoryId>,
    ) -> Vec<MemoryId> {
        let min_age =
            std_to_chrono(self.config.long_term_promotion_age, chrono::Duration::minutes(5));
        let mut promoted = Vec::new();

        for id in state.ids_of_kind(MemoryKind::ShortTerm) {
            let Some(record) = state.records.get_mut(&id) else {
                continue;
            };
            if record.age(now) <= min_age
                || record.strength <= self.config.long_term_promotion_strength
                || record.access_count <= self.config.long_term_min_accesses
            {
                continue;
            }

            record.metadata.consolidation_phase = ConsolidationPhase::LongTerm;
            record.consolidation_level += 1.0;
            if let Some(from) = state.reclassify(id, MemoryKind::LongTerm) {
                report.consolidated.push(KindTransition {
                    id,
                    from,
                    to: MemoryKind::LongTerm,
                });
                touched.insert(id);
                promoted.push(id);
            }
        }
        promoted
    }

    /// Link freshly promoted long-term records to similar long-term records
    fn associate_long_term(
        &self,
        state: &mut MemoryState,
        now: DateTime<Utc>,
        promoted: &[MemoryId],
        report: &mut AdvancedConsolidationReport,
        touched: &mut BTreeSet<MemoryId>,
    ) {
        let long_term = state.ids_of_kind(MemoryKind::LongTerm);

        for source in promoted {
            let Some(content) = state.records.get(source).map(|r| r.content.clone()) else {
                continue;
            };
            let matches: Vec<(MemoryId, f64)> = long_term
                .iter()
                .filter(|target| *target != source)
                .filter_map(|target| {
                    let other = state.records.get(target)?;
                    let sim = similarity::content_similarity(&content, &other.content);
                    (sim >= self.config.association_threshold).then_some((*target, sim))
                })
                .collect();

            let Some(record) = state.records.get_mut(source) else {
                continue;
            };
            for (target, sim) in matches {
                if record.connection_mut(target, ConnectionType::Associative).is_some() {
                    continue;
                }
                let connection = Connection::new(target, ConnectionType::Associative, sim, now);
                report.new_connections.push(ConnectionChange {
                    source: *source,
                    target,
                    connection_type: ConnectionType::Associative,
                    old_weight: 0.0,
                    new_weight: connection.weight,
                });
                record.connections.push(connection);
                touched.insert(*source);
            }
        }
    }

    fn optimise_long_term(
        &self,
        state: &mut MemoryState,
        report: &mut AdvancedConsolidationReport,
        touched: &mut BTreeSet<MemoryId>,
    ) {
        let access_counts: HashMap<MemoryId, u64> = state
            .records
            .values()
            .map(|r| (r.id, r.access_count))
            .collect();

        for id in state.ids_of_kind(MemoryKind::LongTerm) {
            let Some(record) = state.records.get_mut(&id) else {
                continue;
            };

            for connection in &mut record.connections {
                let hot = access_counts
                    .get(&connection.target)
                    .is_some_and(|count| *count > self.config.high_access_threshold);
                if !hot {
                    continue;
                }
                let old_weight = connection.weight;
                connection.set_weight(old_weight * self.config.long_term_boost);
                if connection.weight != old_weight {
                    report.strengthened.push(ConnectionChange {
                        source: id,
                        target: connection.target,
                        connection_type: connection.connection_type,
                        old_weight,
                        new_weight: connection.weight,
                    });
                    touched.insert(id);
                }
            }

            let floor = self.config.connection_floor;
            let before = record.connections.len();
            record.connections.retain(|connection| {
                if connection.weight >= floor {
                    return true;
                }
                report.pruned_connections.push(ConnectionChange {
                    source: id,
                    target: connection.target,
                    connection_type: connection.connection_type,
                    old_weight: connection.weight,
                    new_weight: 0.0,
                });
                false
            });
            if record.connections.len() != before {
                touched.insert(id);
            }
        }
    }

    fn reweight_connections(
        &self,
        state: &mut MemoryState,
        now: DateTime<Utc>,
        report: &mut AdvancedConsolidationReport,
        touched: &mut BTreeSet<MemoryId>,
    ) {
        let cutoff = now - self.reweight_window();

        let mut ids: Vec<MemoryId> = state.records.keys().copied().collect();
        ids.sort();

        for id in ids {
            let recent = match state.access.get_mut(&id) {
                Some(tracker) => {
                    tracker.trim(cutoff);
                    tracker.count_since(cutoff)
                }
                None => 0,
            };

            let Some(record) = state.records.get_mut(&id) else {
                continue;
            };
            if record.connections.is_empty() {
                continue;
            }

            if recent > self.config.active_access_threshold {
                let changes = scale_connections(record, self.config.active_scale);
                if !changes.is_empty() {
                    touched.insert(id);
                }
                report.strengthened.extend(changes);
            } else if recent == 0 {
                let changes = scale_connections(record, self.config.idle_scale);
                if !changes.is_empty() {
                    touched.insert(id);
                }
                report.weakened.extend(changes);
            }
        }
    }
}
