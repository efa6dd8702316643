/// Volatile, in-memory state
///
/// - `cache`: generic TTL cache with staleness levels
/// - `store`: multi-stage processed-incident store layered on the cache

pub mod cache;
pub mod store;

pub use cache::{CacheEntry, CacheStats, TtlCache};
pub use store::{stage_key, CacheMetrics, ProcessedIncidentStore, StoreConfig, STORE_SOURCE};
