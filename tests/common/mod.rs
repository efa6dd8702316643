//! Shared fixtures for integration tests
//!
//! Sample feed records, scripted enhancement providers and small helpers for
//! waiting on background workers.

#![allow(dead_code)]

use async_trait::async_trait;
use incident_feed_core::enhancement::{AsyncEnhancer, EnhancementConfig, EnhancementProvider};
use incident_feed_core::error::{AppError, Result};
use incident_feed_core::hashing::{ContentHasher, HashingConfig};
use incident_feed_core::models::{FeedIncident, FeedRecord, IncidentSource};
use incident_feed_core::state::{ProcessedIncidentStore, StoreConfig, TtlCache};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Struct-backed record in the closure category
pub fn incident(description: &str) -> FeedRecord {
    FeedIncident::new(description, 39.3201, -120.3304, "closure")
        .with_source("caltrans-cc")
        .into()
}

/// Map-backed record as a loosely-typed JSON feed would produce it
pub fn map_record(value: Value) -> FeedRecord {
    FeedRecord::from_json(value).unwrap()
}

pub fn chain_control_record() -> FeedRecord {
    map_record(json!({
        "summary": "  I-80 WESTBOUND CHAIN CONTROLS!!! ",
        "type": "chain_control",
        "location": { "lat": 39.1234, "lng": -120.5678 },
        "source": "ndot-511"
    }))
}

/// `count` distinct records
pub fn distinct_incidents(count: usize) -> Vec<FeedRecord> {
    (0..count)
        .map(|i| incident(&format!("Lane {} closed for repairs", i)))
        .collect()
}

pub fn hasher() -> Arc<ContentHasher> {
    Arc::new(ContentHasher::new(HashingConfig::default()))
}

pub fn store() -> Arc<ProcessedIncidentStore> {
    Arc::new(ProcessedIncidentStore::new(
        Arc::new(TtlCache::new("test")),
        StoreConfig::default(),
    ))
}

pub fn enhancer(
    config: EnhancementConfig,
    store: Arc<ProcessedIncidentStore>,
    provider: Arc<dyn EnhancementProvider>,
) -> Arc<AsyncEnhancer> {
    Arc::new(AsyncEnhancer::new(config, store, hasher(), provider))
}

/// Provider that answers after a fixed delay and counts its calls
pub struct SlowProvider {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnhancementProvider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    async fn enhance(&self, record: &FeedRecord) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(json!({
            "summary": record.extract()?.description,
            "enhanced_by": "slow",
        }))
    }
}

/// Provider that always fails
pub struct FailingProvider {
    pub calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EnhancementProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn enhance(&self, _record: &FeedRecord) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::ExternalCall("upstream returned 503".to_string()))
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Value of the first sample of `metric` whose line contains `label`
pub fn metric_value(output: &str, metric: &str, label: &str) -> Option<f64> {
    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.starts_with(metric) && line.contains(label))
        .find_map(|line| line.split_whitespace().last()?.parse().ok())
}
