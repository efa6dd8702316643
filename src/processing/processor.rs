use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::enhancement::AsyncEnhancer;
use crate::error::{AppError, Result};
use crate::hashing::ContentHasher;
use crate::metrics::FEED_CORE_METRICS;
use crate::models::{ContentHash, FeedRecord, IncidentSource, ProcessedEntry, ProcessingStage, StagePayload};
use crate::state::ProcessedIncidentStore;
use crate::workers::{WorkHandler, WorkerPool};

const QUEUE_NAME: &str = "ingestion";

/// Configuration for batch ingestion
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProcessingConfig {
    /// Bounded queue capacity
    #[validate(range(min = 1))]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker count
    #[validate(range(min = 1))]
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long a worker waits for room in the enhancement queue (seconds)
    #[validate(range(min = 1))]
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,

    /// TTL of RAW entries (seconds)
    #[serde(default = "default_raw_ttl")]
    pub raw_ttl_secs: u64,
}

impl ProcessingConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn raw_ttl(&self) -> Duration {
        Duration::from_secs(self.raw_ttl_secs)
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            item_timeout_secs: default_item_timeout(),
            raw_ttl_secs: default_raw_ttl(),
        }
    }
}

fn default_queue_capacity() -> usize {
    5000
}

fn default_worker_count() -> usize {
    5
}

fn default_item_timeout() -> u64 {
    30
}

fn default_raw_ttl() -> u64 {
    86400 // 24 hours
}

/// Record accepted onto the ingestion queue
#[derive(Debug, Clone)]
pub struct QueuedIncident {
    pub record: FeedRecord,
    pub content_hash: ContentHash,
    pub queued_at: Instant,
}

/// Outcome of one `process_incident_batch` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub received: usize,
    pub queued: usize,
    /// Already enhanced; only their feed presence was refreshed
    pub skipped_enhanced: usize,
    /// Rejected by a full or closed queue
    pub dropped: usize,
    /// Could not be hashed
    pub failed: usize,
}

/// Cumulative processing statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub queued: u64,
    pub processed: u64,
    /// Hash failures plus worker failures (write error, hand-off error, timeout)
    pub failed: u64,
    pub dropped: u64,
    pub skipped_enhanced: u64,
    /// Running mean over processed items
    pub avg_processing_ms: f64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl ProcessingStats {
    fn record_processed(&mut self, elapsed: Duration) {
        self.processed += 1;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.avg_processing_ms += (sample - self.avg_processing_ms) / self.processed as f64;
    }
}

/// Turns feed batches into RAW entries and enhancement requests.
///
/// Ingestion never blocks the feed refresh: records that do not fit in the
/// queue are dropped and counted.
pub struct BatchProcessor {
    config: ProcessingConfig,
    store: Arc<ProcessedIncidentStore>,
    hasher: Arc<ContentHasher>,
    pool: WorkerPool<QueuedIncident>,
    worker: Arc<IngestionWorker>,
    stats: Arc<RwLock<ProcessingStats>>,
}

impl BatchProcessor {
    pub fn new(
        config: ProcessingConfig,
        store: Arc<ProcessedIncidentStore>,
        hasher: Arc<ContentHasher>,
        enhancer: Arc<AsyncEnhancer>,
    ) -> Self {
        let stats = Arc::new(RwLock::new(ProcessingStats::default()));
        let worker = Arc::new(IngestionWorker {
            config: config.clone(),
            store: Arc::clone(&store),
            enhancer,
            stats: Arc::clone(&stats),
        });

        Self {
            pool: WorkerPool::new(QUEUE_NAME, config.queue_capacity, config.worker_count),
            config,
            store,
            hasher,
            worker,
            stats,
        }
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Start the ingestion workers. Fails if already running.
    pub async fn start_background_processing(&self) -> Result<()> {
        self.pool.start(Arc::clone(&self.worker)).await?;
        info!(
            workers = self.config.worker_count,
            capacity = self.config.queue_capacity,
            "🚀 Batch processor started"
        );
        Ok(())
    }

    /// Close the queue and wait for workers to drain it. No-op when stopped.
    pub async fn stop(&self) -> Result<()> {
        self.pool.shutdown().await
    }

    /// Stop the workers at their next receive, discarding queued records.
    /// Returns how many were discarded.
    pub async fn cancel(&self) -> Result<usize> {
        self.pool.cancel().await
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Items waiting in the ingestion queue
    pub fn queue_len(&self) -> usize {
        self.pool.queue_len()
    }

    /// Hash and enqueue one feed batch.
    ///
    /// Per-record problems are counted, never returned: one bad record does
    /// not affect the rest of the batch.
    pub fn process_incident_batch(&self, records: Vec<FeedRecord>) -> BatchSummary {
        let seen_at = Utc::now();
        let mut summary = BatchSummary {
            received: records.len(),
            ..Default::default()
        };

        for record in records {
            let content_hash = match self.hasher.hash_incident(&record) {
                Ok(hash) => hash,
                Err(e) => {
                    summary.failed += 1;
                    FEED_CORE_METRICS
                        .records_ingested
                        .with_label_values(&["hash_failed"])
                        .inc();
                    warn!(error = %e, "Skipping record that could not be hashed");
                    continue;
                }
            };

            if self
                .store
                .contains_stage(&content_hash.content_hash, ProcessingStage::Enhanced)
            {
                if let Err(e) = self
                    .store
                    .mark_seen_in_current_feed(&content_hash.content_hash, seen_at)
                {
                    warn!(content_hash = %content_hash.short(), error = %e, "Failed to refresh feed presence");
                }
                summary.skipped_enhanced += 1;
                FEED_CORE_METRICS
                    .records_ingested
                    .with_label_values(&["skipped_enhanced"])
                    .inc();
                continue;
            }

            let short_hash = content_hash.short().to_string();
            let item = QueuedIncident {
                record,
                content_hash,
                queued_at: Instant::now(),
            };

            match self.pool.try_submit(item) {
                Ok(()) => {
                    summary.queued += 1;
                    FEED_CORE_METRICS
                        .records_ingested
                        .with_label_values(&["queued"])
                        .inc();
                }
                Err(e) => {
                    summary.dropped += 1;
                    FEED_CORE_METRICS
                        .records_ingested
                        .with_label_values(&["dropped"])
                        .inc();
                    warn!(content_hash = %short_hash, error = %e, "Dropped record under backpressure");
                }
            }
        }

        {
            let mut stats = self.stats.write();
            stats.queued += summary.queued as u64;
            stats.failed += summary.failed as u64;
            stats.dropped += summary.dropped as u64;
            stats.skipped_enhanced += summary.skipped_enhanced as u64;
            stats.last_batch_at = Some(seen_at);
        }

        info!(
            received = summary.received,
            queued = summary.queued,
            skipped_enhanced = summary.skipped_enhanced,
            dropped = summary.dropped,
            failed = summary.failed,
            queue_depth = self.pool.queue_len(),
            "Processed incident batch"
        );

        summary
    }

    pub fn get_processing_stats(&self) -> ProcessingStats {
        self.stats.read().clone()
    }
}

struct IngestionWorker {
    config: ProcessingConfig,
    store: Arc<ProcessedIncidentStore>,
    enhancer: Arc<AsyncEnhancer>,
    stats: Arc<RwLock<ProcessingStats>>,
}

impl IngestionWorker {
    async fn persist_and_hand_off(&self, item: &QueuedIncident) -> Result<()> {
        let payload = item.record.to_payload();
        let entry = ProcessedEntry::new(
            item.content_hash.content_hash.clone(),
            payload.clone(),
            StagePayload::Raw(payload),
            self.config.raw_ttl(),
            item.queued_at.elapsed(),
        );
        self.store.store_processed(&entry)?;
        self.enhancer
            .queue_for_enhancement_within(item.record.clone(), self.config.item_timeout())
            .await
    }
}

#[async_trait]
impl WorkHandler<QueuedIncident> for IngestionWorker {
    async fn handle(&self, worker_id: usize, item: QueuedIncident) {
        let start = Instant::now();
        match self.persist_and_hand_off(&item).await {
            Ok(()) => {
                self.stats.write().record_processed(start.elapsed());
                FEED_CORE_METRICS
                    .ingestion_results
                    .with_label_values(&["success"])
                    .inc();
                debug!(
                    worker_id,
                    content_hash = %item.content_hash.short(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Stored raw incident"
                );
            }
            Err(e) => {
                self.stats.write().failed += 1;
                let label = if matches!(e, AppError::Timeout(_)) {
                    "timeout"
                } else {
                    "failed"
                };
                FEED_CORE_METRICS
                    .ingestion_results
                    .with_label_values(&[label])
                    .inc();
                warn!(
                    worker_id,
                    content_hash = %item.content_hash.short(),
                    error = %e,
                    "Incident processing failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhancement::{EnhancementConfig, PassthroughProvider};
    use crate::hashing::HashingConfig;
    use crate::models::FeedIncident;
    use crate::state::{StoreConfig, TtlCache};
    use serde_json::json;

    struct Fixture {
        processor: BatchProcessor,
        enhancer: Arc<AsyncEnhancer>,
        store: Arc<ProcessedIncidentStore>,
    }

    fn fixture(config: ProcessingConfig) -> Fixture {
        let store = Arc::new(ProcessedIncidentStore::new(
            Arc::new(TtlCache::new("test")),
            StoreConfig::default(),
        ));
        let hasher = Arc::new(ContentHasher::new(HashingConfig::default()));
        let enhancer = Arc::new(AsyncEnhancer::new(
            EnhancementConfig::default(),
            Arc::clone(&store),
            Arc::clone(&hasher),
            Arc::new(PassthroughProvider),
        ));
        let processor = BatchProcessor::new(config, Arc::clone(&store), hasher, Arc::clone(&enhancer));
        Fixture {
            processor,
            enhancer,
            store,
        }
    }

    fn incident(description: &str) -> FeedRecord {
        FeedIncident::new(description, 39.3, -120.3, "closure").into()
    }

    #[test]
    fn test_stats_running_average() {
        let mut stats = ProcessingStats::default();
        stats.record_processed(Duration::from_millis(10));
        stats.record_processed(Duration::from_millis(30));
        assert_eq!(stats.processed, 2);
        assert!((stats.avg_processing_ms - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let f = fixture(ProcessingConfig::default());
        let bad = FeedRecord::from_json(json!({"category": "closure"})).unwrap();

        let summary = f
            .processor
            .process_incident_batch(vec![incident("Road closed"), bad, incident("Lane closed")]);

        assert_eq!(summary.received, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.queued, 2);
        assert_eq!(f.processor.get_processing_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_workers_store_raw_and_hand_off() {
        let f = fixture(ProcessingConfig::default());
        f.processor.start_background_processing().await.unwrap();

        f.processor
            .process_incident_batch(vec![incident("Road closed"), incident("Lane closed")]);
        f.processor.stop().await.unwrap();

        let stats = f.processor.get_processing_stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 0);
        assert!(stats.avg_processing_ms >= 0.0);

        let metrics = f.store.get_cache_metrics();
        assert_eq!(metrics.stage_counts[&ProcessingStage::Raw], 2);
        assert_eq!(f.enhancer.get_enhancement_status().await.queue_depth, 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let f = fixture(ProcessingConfig {
            queue_capacity: 2,
            ..Default::default()
        });

        let records = (0..5).map(|i| incident(&format!("Closure {}", i))).collect();
        let summary = f.processor.process_incident_batch(records);

        assert_eq!(summary.queued, 2);
        assert_eq!(summary.dropped, 3);
        assert_eq!(f.processor.queue_len(), 2);
        assert_eq!(f.processor.get_processing_stats().dropped, 3);
    }

    #[tokio::test]
    async fn test_enhanced_records_are_skipped_and_refreshed() {
        let f = fixture(ProcessingConfig::default());
        f.enhancer.queue_for_enhancement(incident("Road closed")).unwrap();
        f.enhancer.start_enhancement_workers().await.unwrap();
        f.enhancer.stop_enhancement_workers().await.unwrap();

        let summary = f.processor.process_incident_batch(vec![incident("Road closed.")]);
        assert_eq!(summary.skipped_enhanced, 1);
        assert_eq!(summary.queued, 0);
        assert_eq!(f.processor.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_double_start_and_idempotent_stop() {
        let f = fixture(ProcessingConfig::default());
        f.processor.start_background_processing().await.unwrap();
        assert!(matches!(
            f.processor.start_background_processing().await,
            Err(AppError::Lifecycle(_))
        ));

        f.processor.stop().await.unwrap();
        f.processor.stop().await.unwrap();
        assert!(!f.processor.is_running());
    }
}
