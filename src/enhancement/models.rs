use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use validator::Validate;

/// Configuration for the asynchronous enhancer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnhancementConfig {
    /// Bounded queue capacity
    #[validate(range(min = 1))]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Worker count (kept small to respect provider rate limits)
    #[validate(range(min = 1))]
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Per-item budget for the provider call (seconds)
    #[validate(range(min = 1))]
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,

    /// TTL of ENHANCED entries (seconds)
    #[serde(default = "default_enhanced_ttl")]
    pub enhanced_ttl_secs: u64,

    /// Fast-path p95 target used for the health flag (milliseconds)
    #[serde(default = "default_latency_target")]
    pub latency_target_ms: u64,

    /// Number of fast-path samples kept for the p95 estimate
    #[validate(range(min = 1))]
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

impl EnhancementConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn enhanced_ttl(&self) -> Duration {
        Duration::from_secs(self.enhanced_ttl_secs)
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            item_timeout_secs: default_item_timeout(),
            enhanced_ttl_secs: default_enhanced_ttl(),
            latency_target_ms: default_latency_target(),
            latency_window: default_latency_window(),
        }
    }
}

fn default_queue_capacity() -> usize {
    500
}

fn default_worker_count() -> usize {
    3
}

fn default_item_timeout() -> u64 {
    45
}

fn default_enhanced_ttl() -> u64 {
    86400 // 24 hours
}

fn default_latency_target() -> u64 {
    200
}

fn default_latency_window() -> usize {
    1000
}

/// Result of a fast-path lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedAlert {
    /// Enhanced payload on a hit, the record's own payload on a miss
    pub payload: Value,

    pub from_cache: bool,

    pub content_hash: String,
}

/// Point-in-time enhancer snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancementStatus {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub workers_running: bool,

    /// Fast-path hits over fast-path requests
    pub cache_hit_rate: f64,

    /// Approximate p95 of fast-path response times
    pub p95_response_time_ms: f64,

    /// p95 is under the latency target
    pub healthy: bool,

    pub requests_total: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub enhanced_total: u64,
    pub failed_total: u64,
}
