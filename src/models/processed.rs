use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Processing stages, ordered by cost (Raw is cheapest, Enhanced most valuable)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingStage {
    Raw,
    RouteFiltered,
    Enhanced,
}

impl ProcessingStage {
    /// All stages, cheapest first
    pub fn all() -> impl Iterator<Item = ProcessingStage> {
        ProcessingStage::iter()
    }
}

/// Result of route matching, produced outside this crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteFilteredPayload {
    pub record: Value,
    #[serde(default)]
    pub matched_routes: Vec<String>,
}

/// Stage-tagged payload so stored bytes always carry a checkable schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    Raw(Value),
    RouteFiltered(RouteFilteredPayload),
    Enhanced(Value),
}

impl StagePayload {
    pub fn stage(&self) -> ProcessingStage {
        match self {
            StagePayload::Raw(_) => ProcessingStage::Raw,
            StagePayload::RouteFiltered(_) => ProcessingStage::RouteFiltered,
            StagePayload::Enhanced(_) => ProcessingStage::Enhanced,
        }
    }

    /// JSON body handed to API callers
    pub fn body(&self) -> Value {
        match self {
            StagePayload::Raw(v) | StagePayload::Enhanced(v) => v.clone(),
            StagePayload::RouteFiltered(p) => serde_json::to_value(p).unwrap_or(Value::Null),
        }
    }
}

/// One stage of one logical incident. Identity is `(content_hash, stage)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub content_hash: String,
    pub stage: ProcessingStage,
    pub original_payload: Value,
    pub processed_payload: StagePayload,
    pub last_seen_in_feed: DateTime<Utc>,
    pub cache_expires_at: DateTime<Utc>,
    pub serve_count: u64,
    #[serde(with = "duration_millis")]
    pub processing_duration: Duration,
}

impl ProcessedEntry {
    /// Create an entry expiring `ttl` from now. The stage follows the payload.
    pub fn new(
        content_hash: impl Into<String>,
        original_payload: Value,
        processed_payload: StagePayload,
        ttl: Duration,
        processing_duration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            content_hash: content_hash.into(),
            stage: processed_payload.stage(),
            original_payload,
            processed_payload,
            last_seen_in_feed: now,
            cache_expires_at: now + to_chrono(ttl),
            serve_count: 0,
            processing_duration,
        }
    }

    /// Whether the store-managed expiry clock has passed
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.cache_expires_at
    }

    /// Stage tag and payload variant agree
    pub fn is_consistent(&self) -> bool {
        self.stage == self.processed_payload.stage()
    }
}

/// Convert a std duration, saturating at a century
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Remaining time until `deadline`, zero if already passed
pub(crate) fn remaining_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
