use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::metrics::FEED_CORE_METRICS;
use crate::models::to_chrono;

/// A cached value plus the timestamps its staleness is derived from.
///
/// `expires_at` is always `created_at + refresh_interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub refresh_interval: Duration,
    pub source: String,
}

impl CacheEntry {
    fn new(key: String, payload: Vec<u8>, refresh_interval: Duration, source: String) -> Self {
        let created_at = Utc::now();
        Self {
            key,
            payload,
            created_at,
            expires_at: created_at + to_chrono(refresh_interval),
            refresh_interval,
            source,
        }
    }

    /// Past its TTL
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Past twice its refresh interval
    pub fn is_very_stale_at(&self, now: DateTime<Utc>) -> bool {
        now > self.created_at + to_chrono(self.refresh_interval) * 2
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn is_very_stale(&self) -> bool {
        self.is_very_stale_at(Utc::now())
    }

    /// Decode the payload as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Point-in-time cache statistics. `fresh + stale == total`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Expiring key/value store with staleness levels.
///
/// One reader/writer lock guards the whole map; separate instances share
/// nothing.
pub struct TtlCache {
    name: String,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or replace a value
    pub fn set(&self, key: impl Into<String>, value: Vec<u8>, refresh_interval: Duration, source: &str) {
        let key = key.into();
        let entry = CacheEntry::new(key.clone(), value, refresh_interval, source.to_string());
        self.entries.write().insert(key, entry);
    }

    /// Serialize `value` as JSON and store it
    pub fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        refresh_interval: Duration,
        source: &str,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, refresh_interval, source);
        Ok(())
    }

    /// Value for `key`, or `None` when absent or stale
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read();
        let now = Utc::now();
        entries
            .get(key)
            .filter(|entry| !entry.is_stale_at(now))
            .map(|entry| entry.payload.clone())
    }

    /// Decoded value for `key`, or `None` when absent or stale
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Full entry regardless of staleness, so callers can apply their own policy
    pub fn get_with_metadata(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Missing keys count as stale
    pub fn is_stale(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map_or(true, |entry| entry.is_stale())
    }

    /// Missing keys count as very stale
    pub fn is_very_stale(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map_or(true, |entry| entry.is_very_stale())
    }

    /// Remove a key, returning whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        debug!(cache = %self.name, removed, "Cache cleared");
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of every entry written with the given source tag
    pub fn entries_by_source(&self, source: &str) -> Vec<CacheEntry> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.source == source)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let now = Utc::now();

        let mut stats = CacheStats {
            total_entries: entries.len(),
            ..Default::default()
        };

        for entry in entries.values() {
            if entry.is_stale_at(now) {
                stats.stale_entries += 1;
            } else {
                stats.fresh_entries += 1;
            }

            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(oldest) if oldest <= entry.created_at => oldest,
                _ => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(newest) if newest >= entry.created_at => newest,
                _ => entry.created_at,
            });
        }

        stats
    }

    /// Remove every stale entry, returning how many were removed
    pub fn cleanup_stale(&self) -> usize {
        let mut entries = self.entries.write();
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_stale_at(now));
        let removed = before - entries.len();

        if removed > 0 {
            FEED_CORE_METRICS
                .entries_removed
                .with_label_values(&["stale_sweep"])
                .inc_by(removed as f64);
            debug!(cache = %self.name, removed, remaining = entries.len(), "Removed stale cache entries");
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let cache = TtlCache::new("test");

        cache.set("key1", b"value1".to_vec(), Duration::from_secs(60), "test");
        assert_eq!(cache.get("key1"), Some(b"value1".to_vec()));
        assert_eq!(cache.len(), 1);

        assert!(cache.delete("key1"));
        assert!(!cache.delete("key1"));
        assert_eq!(cache.get("key1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expires_at_invariant() {
        let cache = TtlCache::new("test");
        cache.set("k", vec![1], Duration::from_secs(90), "src");

        let entry = cache.get_with_metadata("k").unwrap();
        assert_eq!(entry.expires_at - entry.created_at, chrono::Duration::seconds(90));
        assert_eq!(entry.source, "src");
    }

    #[test]
    fn test_zero_interval_is_miss_but_visible_with_metadata() {
        let cache = TtlCache::new("test");
        cache.set("k", vec![1], Duration::ZERO, "src");
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(cache.get("k"), None);
        assert!(cache.get_with_metadata("k").is_some());
        assert!(cache.is_stale("k"));
    }

    #[test]
    fn test_missing_key_is_stale() {
        let cache = TtlCache::new("test");
        assert!(cache.is_stale("missing"));
        assert!(cache.is_very_stale("missing"));
    }

    #[test]
    fn test_json_helpers() {
        let cache = TtlCache::new("test");
        cache
            .set_json("k", &vec!["a".to_string(), "b".to_string()], Duration::from_secs(60), "src")
            .unwrap();

        let value: Option<Vec<String>> = cache.get_json("k").unwrap();
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_entries_by_source() {
        let cache = TtlCache::new("test");
        cache.set("a", vec![], Duration::from_secs(60), "store");
        cache.set("b", vec![], Duration::from_secs(60), "other");
        cache.set("c", vec![], Duration::from_secs(60), "store");

        let mut keys: Vec<_> = cache
            .entries_by_source("store")
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_stats_on_empty_cache() {
        let cache = TtlCache::new("test");
        let stats = cache.stats();
        assert_eq!(stats, CacheStats::default());
    }
}
