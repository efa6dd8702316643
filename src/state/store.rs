use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::metrics::FEED_CORE_METRICS;
use crate::models::{remaining_until, to_chrono, ProcessedEntry, ProcessingStage};
use crate::state::cache::{CacheEntry, TtlCache};

/// Source tag for every cache entry written by the store
pub const STORE_SOURCE: &str = "processed_incident";

const KEY_PREFIX: &str = "processed";

/// Rough per-entry bookkeeping cost added to payload sizes
const ENTRY_OVERHEAD_BYTES: usize = 128;

/// Configuration for the processed-incident store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Expiry extension applied when an incident reappears in a feed (seconds)
    #[serde(default = "default_feed_grace")]
    pub feed_grace_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            feed_grace_secs: default_feed_grace(),
        }
    }
}

fn default_feed_grace() -> u64 {
    3600
}

/// Deterministic cache key for one stage of one incident
pub fn stage_key(content_hash: &str, stage: ProcessingStage) -> String {
    format!("{}:{}:{}", KEY_PREFIX, stage, content_hash)
}

/// Store-level metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub total_processed: usize,
    /// Fresh store entries over all store entries
    pub hit_rate: f64,
    pub stage_counts: HashMap<ProcessingStage, usize>,
    pub estimated_memory_bytes: usize,
}

/// Multi-stage, content-keyed view over a [`TtlCache`].
///
/// The store keeps its own expiry clock (`cache_expires_at` on each entry),
/// independent of the cache's TTL accounting.
pub struct ProcessedIncidentStore {
    cache: Arc<TtlCache>,
    feed_grace: chrono::Duration,
}

impl ProcessedIncidentStore {
    pub fn new(cache: Arc<TtlCache>, config: StoreConfig) -> Self {
        Self {
            cache,
            feed_grace: to_chrono(Duration::from_secs(config.feed_grace_secs)),
        }
    }

    /// Underlying cache
    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    /// Fetch a stage entry, counting the read as a serve.
    ///
    /// Entries past `cache_expires_at` are deleted and reported as a miss.
    pub fn get_processed(
        &self,
        content_hash: &str,
        stage: ProcessingStage,
    ) -> Result<Option<ProcessedEntry>> {
        let key = stage_key(content_hash, stage);
        let Some(cached) = self.cache.get_with_metadata(&key) else {
            return Ok(None);
        };

        let mut entry = self.decode(&cached)?;
        let now = Utc::now();

        if entry.is_expired_at(now) {
            self.cache.delete(&key);
            FEED_CORE_METRICS
                .entries_removed
                .with_label_values(&["lazy_expiry"])
                .inc();
            debug!(content_hash = %content_hash, stage = %stage, "Processed entry expired on read");
            return Ok(None);
        }

        entry.serve_count += 1;
        self.write(&key, &entry, now)?;
        Ok(Some(entry))
    }

    /// Whether a live entry exists for the stage, without counting a serve
    pub fn contains_stage(&self, content_hash: &str, stage: ProcessingStage) -> bool {
        let key = stage_key(content_hash, stage);
        self.cache
            .get_with_metadata(&key)
            .and_then(|cached| self.decode(&cached).ok())
            .map_or(false, |entry| !entry.is_expired_at(Utc::now()))
    }

    /// Persist an entry. Entries whose `cache_expires_at` has passed are ignored.
    pub fn store_processed(&self, entry: &ProcessedEntry) -> Result<()> {
        if !entry.is_consistent() {
            return Err(AppError::Internal(format!(
                "entry stage {} does not match payload stage {}",
                entry.stage,
                entry.processed_payload.stage()
            )));
        }

        let now = Utc::now();
        if entry.is_expired_at(now) {
            debug!(
                content_hash = %entry.content_hash,
                stage = %entry.stage,
                "Skipping store of already-expired entry"
            );
            return Ok(());
        }

        let key = stage_key(&entry.content_hash, entry.stage);
        self.write(&key, entry, now)?;

        FEED_CORE_METRICS
            .stage_writes
            .with_label_values(&[&entry.stage.to_string()])
            .inc();

        Ok(())
    }

    /// Record that the incident is present in the current feed.
    ///
    /// Every existing stage gets `last_seen_in_feed = seen_at` and an expiry
    /// of `seen_at` plus the grace window. Undecodable stages are skipped and
    /// left to `expire_old_incidents`. Returns how many stages were updated.
    pub fn mark_seen_in_current_feed(&self, content_hash: &str, seen_at: DateTime<Utc>) -> Result<usize> {
        let now = Utc::now();
        let mut updated = 0;

        for stage in ProcessingStage::all() {
            let key = stage_key(content_hash, stage);
            let Some(cached) = self.cache.get_with_metadata(&key) else {
                continue;
            };

            let mut entry = match self.decode(&cached) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping undecodable stage while refreshing feed presence");
                    continue;
                }
            };
            entry.last_seen_in_feed = seen_at;
            entry.cache_expires_at = seen_at + self.feed_grace;
            self.write(&key, &entry, now)?;
            updated += 1;
        }

        if updated > 0 {
            debug!(content_hash = %content_hash, stages = updated, "Extended expiry for incident seen in feed");
        }

        Ok(updated)
    }

    /// Remove store entries whose own expiry has passed
    pub fn expire_old_incidents(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;

        for cached in self.cache.entries_by_source(STORE_SOURCE) {
            match self.decode(&cached) {
                Ok(entry) if !entry.is_expired_at(now) => {}
                Ok(_) => {
                    if self.cache.delete(&cached.key) {
                        removed += 1;
                    }
                }
                Err(e) => {
                    warn!(key = %cached.key, error = %e, "Removing undecodable processed entry");
                    if self.cache.delete(&cached.key) {
                        removed += 1;
                    }
                }
            }
        }

        if removed > 0 {
            FEED_CORE_METRICS
                .entries_removed
                .with_label_values(&["store_expiry"])
                .inc_by(removed as f64);
            debug!(removed, "Expired processed incidents");
        }

        removed
    }

    pub fn get_cache_metrics(&self) -> CacheMetrics {
        let now = Utc::now();
        let mut stage_counts: HashMap<ProcessingStage, usize> =
            ProcessingStage::all().map(|stage| (stage, 0)).collect();
        let mut estimated_memory_bytes = 0;
        let mut fresh = 0;

        let entries = self.cache.entries_by_source(STORE_SOURCE);
        for entry in &entries {
            if !entry.is_stale_at(now) {
                fresh += 1;
            }
            if let Some(stage) = stage_from_key(&entry.key) {
                *stage_counts.entry(stage).or_insert(0) += 1;
            }
            estimated_memory_bytes += entry.key.len() + entry.payload.len() + ENTRY_OVERHEAD_BYTES;
        }

        let hit_rate = if entries.is_empty() {
            0.0
        } else {
            fresh as f64 / entries.len() as f64
        };

        CacheMetrics {
            total_processed: entries.len(),
            hit_rate,
            stage_counts,
            estimated_memory_bytes,
        }
    }

    /// Drop every cached stage
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn write(&self, key: &str, entry: &ProcessedEntry, now: DateTime<Utc>) -> Result<()> {
        let ttl = remaining_until(entry.cache_expires_at, now);
        self.cache.set_json(key, entry, ttl, STORE_SOURCE)
    }

    fn decode(&self, cached: &CacheEntry) -> Result<ProcessedEntry> {
        let entry: ProcessedEntry = cached.decode()?;
        if !entry.is_consistent() {
            return Err(AppError::Serialization(format!(
                "stored entry '{}' has stage {} but payload stage {}",
                cached.key,
                entry.stage,
                entry.processed_payload.stage()
            )));
        }
        Ok(entry)
    }
}

fn stage_from_key(key: &str) -> Option<ProcessingStage> {
    let mut parts = key.splitn(3, ':');
    if parts.next()? != KEY_PREFIX {
        return None;
    }
    parts.next()?.parse().ok()
}
