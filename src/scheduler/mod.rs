//! Background maintenance scheduling
//!
//! Periodic sweeps (stale cache cleanup, processed-incident expiry) run as
//! supervised tasks: each iteration is isolated, so one failing or panicking
//! sweep never ends the schedule.
//!
//! # Example
//!
//! ```no_run
//! use incident_feed_core::scheduler::{MaintenanceJob, MaintenanceTask};
//! use incident_feed_core::state::TtlCache;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = Arc::new(TtlCache::new("alerts"));
//!     let sweep = Arc::clone(&cache);
//!     let job: MaintenanceJob = Arc::new(move || Ok(sweep.cleanup_stale()));
//!
//!     let mut task = MaintenanceTask::spawn("cache_cleanup", Duration::from_secs(300), job);
//!     // ...
//!     task.stop().await.unwrap();
//! }
//! ```

mod maintenance;

pub use maintenance::{MaintenanceJob, MaintenanceMetrics, MaintenanceSnapshot, MaintenanceTask};
