use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::Result;
use crate::models::{FeedRecord, IncidentSource};

/// External enhancement collaborator.
///
/// Implementations may be slow or fail; callers bound every call with their
/// own timeout and never retry a failed item.
#[async_trait]
pub trait EnhancementProvider: Send + Sync + 'static {
    /// Provider name, used in logs
    fn name(&self) -> &str;

    /// Produce the enhanced payload for a record
    async fn enhance(&self, record: &FeedRecord) -> Result<Value>;
}

/// Provider that annotates the record without calling out anywhere
#[derive(Debug, Clone, Default)]
pub struct PassthroughProvider;

#[async_trait]
impl EnhancementProvider for PassthroughProvider {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn enhance(&self, record: &FeedRecord) -> Result<Value> {
        let fields = record.extract()?;
        Ok(json!({
            "summary": format!("{}: {}", fields.category, fields.description),
            "category": fields.category,
            "location": {
                "latitude": fields.latitude,
                "longitude": fields.longitude,
            },
            "original": record.to_payload(),
            "enhanced_by": self.name(),
            "enhanced_at": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedIncident;

    #[tokio::test]
    async fn test_passthrough_annotates_record() {
        let record: FeedRecord = FeedIncident::new("Lane closed", 39.5, -120.1, "Closure").into();
        let payload = PassthroughProvider.enhance(&record).await.unwrap();

        assert_eq!(payload["summary"], "closure: Lane closed");
        assert_eq!(payload["enhanced_by"], "passthrough");
        assert_eq!(payload["original"]["description"], "Lane closed");
    }

    #[tokio::test]
    async fn test_passthrough_rejects_unextractable_record() {
        let record = FeedRecord::from_json(json!({"foo": "bar"})).unwrap();
        assert!(PassthroughProvider.enhance(&record).await.is_err());
    }
}
