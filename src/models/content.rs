use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic fingerprint of an incident.
///
/// `content_hash` is the lowercase hex SHA-256 of
/// `normalized_text|location_key|category`. Values are never mutated after
/// the hasher creates them; recomputing for the same record yields the same
/// hash and location key (only `first_seen_at` differs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    pub content_hash: String,
    pub normalized_text: String,
    pub location_key: String,
    pub category: String,
    pub first_seen_at: DateTime<Utc>,
}

impl ContentHash {
    /// Short prefix used in log lines
    pub fn short(&self) -> &str {
        let end = self.content_hash.len().min(12);
        &self.content_hash[..end]
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.content_hash)
    }
}
