/// Asynchronous enhancement of feed incidents
///
/// - Cache-aware fast path that never waits on the provider
/// - Small worker pool draining a bounded queue
/// - Per-item timeout around every provider call
/// - p95 fast-path latency tracking for health reporting

pub mod latency;
pub mod models;
pub mod provider;
pub mod service;

pub use latency::LatencyTracker;
pub use models::{EnhancedAlert, EnhancementConfig, EnhancementStatus};
pub use provider::{EnhancementProvider, PassthroughProvider};
pub use service::{AsyncEnhancer, EnhancementJob};
