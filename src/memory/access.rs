//! Per-record access history used for recency-based reweighting

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Sliding window of access timestamps for one record
#[derive(Debug, Clone, Default)]
pub struct AccessTracker {
    hits: VecDeque<DateTime<Utc>>,
}

impl AccessTracker {
    pub fn new(first_access: DateTime<Utc>) -> Self {
        let mut hits = VecDeque::new();
        hits.push_back(first_access);
        Self { hits }
    }

    /// Record an access and forget anything older than `window`
    pub fn record(&mut self, at: DateTime<Utc>, window: Duration) {
        self.hits.push_back(at);
        self.trim(at - window);
    }

    /// Accesses at or after `cutoff`
    pub fn count_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.hits.iter().filter(|t| **t >= cutoff).count()
    }

    pub fn trim(&mut self, cutoff: DateTime<Utc>) {
        while self.hits.front().is_some_and(|t| *t < cutoff) {
            self.hits.pop_front();
        }
    }
}
