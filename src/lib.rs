//! Incident feed core
//!
//! Content-addressed deduplication, multi-stage caching and asynchronous
//! enhancement for road-incident feeds. Records are fingerprinted by their
//! normalized description, coarse location and category; each fingerprint
//! moves through RAW, ROUTE_FILTERED and ENHANCED stages held in a volatile
//! TTL cache, and API callers are always served from that cache without
//! waiting on the enhancement provider.

pub mod config;
pub mod enhancement;
pub mod error;
pub mod hashing;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod scheduler;
pub mod state;
pub mod workers;

pub use error::{AppError, Result};
