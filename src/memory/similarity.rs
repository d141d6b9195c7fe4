//! Token-overlap similarity and semantic pattern extraction
//!
//! Similarity is the Jaccard index over lowercase whitespace tokens of the
//! content's text form.

use serde_json::Value;
use std::collections::HashSet;

/// Object keys that describe when/where an episode happened rather than what
pub const CONTEXTUAL_KEYS: &[&str] = &[
    "timestamp",
    "sessionId",
    "session_id",
    "time",
    "date",
    "createdAt",
    "created_at",
    "context",
];

/// Text form of a content payload: strings as-is, everything else as JSON
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Jaccard similarity (intersection over union)
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    intersection as f64 / union as f64
}

/// Similarity of two content payloads in `[0, 1]`
pub fn content_similarity(a: &Value, b: &Value) -> f64 {
    jaccard(&tokenize(&content_text(a)), &tokenize(&content_text(b)))
}

/// Strip contextual keys from object content; other payloads pass through
pub fn extract_pattern(content: &Value) -> Value {
    match content {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !CONTEXTUAL_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
