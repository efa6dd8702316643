use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::enhancement::latency::LatencyTracker;
use crate::enhancement::models::{EnhancedAlert, EnhancementConfig, EnhancementStatus};
use crate::enhancement::provider::EnhancementProvider;
use crate::error::{AppError, Result};
use crate::hashing::ContentHasher;
use crate::metrics::FEED_CORE_METRICS;
use crate::models::{FeedRecord, IncidentSource, ProcessedEntry, ProcessingStage, StagePayload};
use crate::state::ProcessedIncidentStore;
use crate::workers::{WorkHandler, WorkerPool};

const QUEUE_NAME: &str = "enhancement";

/// Record waiting for background enhancement
#[derive(Debug, Clone)]
pub struct EnhancementJob {
    pub record: FeedRecord,
    pub queued_at: Instant,
}

#[derive(Debug, Default)]
struct EnhancementCounters {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    enhanced: AtomicU64,
    failed: AtomicU64,
}

/// Serves enhanced alerts from the store and fills it in the background.
///
/// The fast path never waits on the provider: a miss returns the record's
/// own payload and queues the record for a worker.
pub struct AsyncEnhancer {
    config: EnhancementConfig,
    store: Arc<ProcessedIncidentStore>,
    hasher: Arc<ContentHasher>,
    pool: WorkerPool<EnhancementJob>,
    worker: Arc<EnhancementWorker>,
    latency: LatencyTracker,
    counters: Arc<EnhancementCounters>,
}

impl AsyncEnhancer {
    pub fn new(
        config: EnhancementConfig,
        store: Arc<ProcessedIncidentStore>,
        hasher: Arc<ContentHasher>,
        provider: Arc<dyn EnhancementProvider>,
    ) -> Self {
        let counters = Arc::new(EnhancementCounters::default());
        let worker = Arc::new(EnhancementWorker {
            config: config.clone(),
            store: Arc::clone(&store),
            hasher: Arc::clone(&hasher),
            provider,
            counters: Arc::clone(&counters),
        });

        Self {
            pool: WorkerPool::new(QUEUE_NAME, config.queue_capacity, config.worker_count),
            latency: LatencyTracker::new(config.latency_window),
            config,
            store,
            hasher,
            worker,
            counters,
        }
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    /// Latency-critical lookup.
    ///
    /// A hit returns the stored ENHANCED payload and counts a serve. A miss
    /// queues the record best-effort and returns its own payload right away.
    pub fn get_enhanced_alert(&self, record: &FeedRecord) -> Result<EnhancedAlert> {
        let start = Instant::now();
        let hash = self.hasher.hash_incident(record)?;
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let cached = match self
            .store
            .get_processed(&hash.content_hash, ProcessingStage::Enhanced)
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(content_hash = %hash.short(), error = %e, "Unreadable enhanced entry, treating as miss");
                None
            }
        };

        let alert = match cached {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                FEED_CORE_METRICS
                    .fast_path_lookups
                    .with_label_values(&["hit"])
                    .inc();

                EnhancedAlert {
                    payload: entry.processed_payload.body(),
                    from_cache: true,
                    content_hash: hash.content_hash,
                }
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                FEED_CORE_METRICS
                    .fast_path_lookups
                    .with_label_values(&["miss"])
                    .inc();

                if let Err(e) = self.queue_for_enhancement(record.clone()) {
                    warn!(
                        content_hash = %hash.short(),
                        error = %e,
                        "Could not queue record for enhancement"
                    );
                }

                EnhancedAlert {
                    payload: record.to_payload(),
                    from_cache: false,
                    content_hash: hash.content_hash,
                }
            }
        };

        let elapsed = start.elapsed();
        self.latency.record(elapsed);
        FEED_CORE_METRICS
            .fast_path_duration
            .observe(elapsed.as_secs_f64());

        Ok(alert)
    }

    /// Non-blocking enqueue. Fails with `QueueFull` when the queue is saturated.
    pub fn queue_for_enhancement(&self, record: FeedRecord) -> Result<()> {
        self.pool.try_submit(EnhancementJob {
            record,
            queued_at: Instant::now(),
        })
    }

    /// Enqueue, waiting up to `timeout` for room. Used by background
    /// ingestion, never by the fast path.
    pub async fn queue_for_enhancement_within(&self, record: FeedRecord, timeout: Duration) -> Result<()> {
        let job = EnhancementJob {
            record,
            queued_at: Instant::now(),
        };
        self.pool.submit_timeout(job, timeout).await
    }

    /// Snapshot of queue, worker and latency state. Never waits on workers,
    /// including while a shutdown drains the queue.
    pub async fn get_enhancement_status(&self) -> EnhancementStatus {
        let requests = self.counters.requests.load(Ordering::Relaxed);
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let p95 = self.latency.p95_ms();

        EnhancementStatus {
            queue_depth: self.pool.queue_len(),
            queue_capacity: self.pool.capacity(),
            workers_running: self.pool.is_running(),
            cache_hit_rate: if requests == 0 {
                0.0
            } else {
                hits as f64 / requests as f64
            },
            p95_response_time_ms: p95,
            healthy: p95 < self.config.latency_target_ms as f64,
            requests_total: requests,
            cache_hits: hits,
            cache_misses: self.counters.misses.load(Ordering::Relaxed),
            enhanced_total: self.counters.enhanced.load(Ordering::Relaxed),
            failed_total: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Start the worker pool. Fails if already running.
    pub async fn start_enhancement_workers(&self) -> Result<()> {
        self.pool.start(Arc::clone(&self.worker)).await?;
        info!(
            workers = self.config.worker_count,
            provider = %self.worker.provider.name(),
            "🚀 Enhancement workers started"
        );
        Ok(())
    }

    /// Stop the worker pool after the buffered items are handled. No-op when stopped.
    pub async fn stop_enhancement_workers(&self) -> Result<()> {
        self.pool.shutdown().await
    }

    /// Stop the workers at their next receive, discarding queued jobs.
    /// Returns how many jobs were discarded.
    pub async fn cancel_enhancement_workers(&self) -> Result<usize> {
        self.pool.cancel().await
    }
}

struct EnhancementWorker {
    config: EnhancementConfig,
    store: Arc<ProcessedIncidentStore>,
    hasher: Arc<ContentHasher>,
    provider: Arc<dyn EnhancementProvider>,
    counters: Arc<EnhancementCounters>,
}

impl EnhancementWorker {
    async fn enhance(&self, job: &EnhancementJob) -> Result<bool> {
        let hash = self.hasher.hash_incident(&job.record)?;

        // Several fast-path misses may queue the same incident
        if self
            .store
            .contains_stage(&hash.content_hash, ProcessingStage::Enhanced)
        {
            return Ok(false);
        }

        let start = Instant::now();
        let result =
            tokio::time::timeout(self.config.item_timeout(), self.provider.enhance(&job.record)).await;
        let elapsed = start.elapsed();
        FEED_CORE_METRICS
            .enhancement_duration
            .observe(elapsed.as_secs_f64());

        let payload = match result {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                return Err(AppError::ExternalCall(format!(
                    "provider '{}' failed: {}",
                    self.provider.name(),
                    e
                )))
            }
            Err(_) => {
                return Err(AppError::Timeout(format!(
                    "provider '{}' exceeded {}s",
                    self.provider.name(),
                    self.config.item_timeout_secs
                )))
            }
        };

        let entry = ProcessedEntry::new(
            hash.content_hash.clone(),
            job.record.to_payload(),
            StagePayload::Enhanced(payload),
            self.config.enhanced_ttl(),
            elapsed,
        );
        self.store.store_processed(&entry)?;

        debug!(
            content_hash = %hash.short(),
            duration_ms = elapsed.as_millis() as u64,
            queued_ms = job.queued_at.elapsed().as_millis() as u64,
            "Stored enhanced incident"
        );
        Ok(true)
    }
}

#[async_trait]
impl WorkHandler<EnhancementJob> for EnhancementWorker {
    async fn handle(&self, worker_id: usize, job: EnhancementJob) {
        match self.enhance(&job).await {
            Ok(true) => {
                self.counters.enhanced.fetch_add(1, Ordering::Relaxed);
                FEED_CORE_METRICS
                    .enhancement_results
                    .with_label_values(&["success"])
                    .inc();
            }
            Ok(false) => {
                FEED_CORE_METRICS
                    .enhancement_results
                    .with_label_values(&["skipped"])
                    .inc();
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                let result = if matches!(e, AppError::Timeout(_)) {
                    "timeout"
                } else {
                    "failed"
                };
                FEED_CORE_METRICS
                    .enhancement_results
                    .with_label_values(&[result])
                    .inc();
                warn!(worker_id, error = %e, error_code = e.error_code(), "Enhancement failed");
            }
        }
    }
}
