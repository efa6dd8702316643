//! Batch ingestion of feed records

pub mod processor;

pub use processor::{BatchProcessor, BatchSummary, ProcessingConfig, ProcessingStats, QueuedIncident};
