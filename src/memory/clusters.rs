// Cluster Detection
//
// Groups memories that are bound together by strong edges. A breadth-first
// walk starts from every unvisited record and follows only edges heavier than
// the cluster threshold, in either direction; components large enough become
// clusters, each tagged with its dominant theme.

use super::{MemoryEngine, MemoryState};
use crate::types::MemoryId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Strongly connected group of memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCluster {
    pub name: String,
    pub members: Vec<MemoryId>,
    pub average_strength: f64,
    /// Most frequent tag among the members
    pub theme: Option<String>,
}

/// Observation derived from a cluster during advanced consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub theme: Option<String>,
    pub members: Vec<MemoryId>,
    pub average_strength: f64,
    pub description: String,
}

impl From<&MemoryCluster> for Insight {
    fn from(cluster: &MemoryCluster) -> Self {
        let description = match &cluster.theme {
            Some(theme) => format!(
                "{} memories strongly connected around '{}' (avg strength {:.2})",
                cluster.members.len(),
                theme,
                cluster.average_strength
            ),
            None => format!(
                "{} untagged memories strongly connected (avg strength {:.2})",
                cluster.members.len(),
                cluster.average_strength
            ),
        };
        Self {
            theme: cluster.theme.clone(),
            members: cluster.members.clone(),
            average_strength: cluster.average_strength,
            description,
        }
    }
}

pub(crate) fn find_clusters(
    state: &MemoryState,
    edge_threshold: f64,
    min_size: usize,
) -> Vec<MemoryCluster> {
    // Strong edges bind both endpoints into the same component
    let mut adjacency: HashMap<MemoryId, Vec<MemoryId>> = HashMap::new();
    for record in state.records.values() {
        for connection in &record.connections {
            if connection.weight > edge_threshold && state.records.contains_key(&connection.target) {
                adjacency.entry(record.id).or_default().push(connection.target);
                adjacency.entry(connection.target).or_default().push(record.id);
            }
        }
    }

    // Fixed start order keeps the result stable for unchanged state
    let mut starts: Vec<&MemoryId> = state.records.keys().collect();
    starts.sort_by(|a, b| {
        let ra = &state.records[*a];
        let rb = &state.records[*b];
        ra.created_at.cmp(&rb.created_at).then_with(|| a.cmp(b))
    });

    let mut visited: HashSet<MemoryId> = HashSet::new();
    let mut clusters = Vec::new();

    for start in starts {
        if !visited.insert(*start) {
            continue;
        }

        let mut members = vec![*start];
        let mut queue = VecDeque::from([*start]);

        while let Some(id) = queue.pop_front() {
            let Some(neighbours) = adjacency.get(&id) else {
                continue;
            };
            for neighbour in neighbours {
                if visited.insert(*neighbour) {
                    members.push(*neighbour);
                    queue.push_back(*neighbour);
                }
            }
        }

        if members.len() < min_size {
            continue;
        }

        let average_strength = members
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(|r| r.strength)
            .sum::<f64>()
            / members.len() as f64;
        let theme = dominant_tag(state, &members);
        let name = match &theme {
            Some(theme) => format!("{}-{}", theme, clusters.len() + 1),
            None => format!("cluster-{}", clusters.len() + 1),
        };

        clusters.push(MemoryCluster {
            name,
            members,
            average_strength,
            theme,
        });
    }

    clusters
}

/// Most frequent tag; ties go to the alphabetically first
fn dominant_tag(state: &MemoryState, members: &[MemoryId]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in members.iter().filter_map(|id| state.records.get(id)) {
        for tag in &record.metadata.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (tag, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((tag, count));
        }
    }
    best.map(|(tag, _)| tag.to_string())
}

impl MemoryEngine {
    /// Connected groups (more than two members) linked by heavy edges
    pub async fn identify_clusters(&self) -> Vec<MemoryCluster> {
        let state = self.state.read().await;
        find_clusters(
            &state,
            self.config.cluster_edge_threshold,
            self.config.min_cluster_size,
        )
    }
}
