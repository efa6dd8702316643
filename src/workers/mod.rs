//! Bounded queues drained by fixed worker pools

pub mod pool;

pub use pool::{WorkHandler, WorkerPool};
