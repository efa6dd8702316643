use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::enhancement::{AsyncEnhancer, EnhancementProvider};
use crate::error::{AppError, Result};
use crate::hashing::ContentHasher;
use crate::processing::BatchProcessor;
use crate::scheduler::{MaintenanceJob, MaintenanceSnapshot, MaintenanceTask};
use crate::state::{ProcessedIncidentStore, TtlCache};

/// Every component of one ingestion process, wired explicitly.
///
/// Nothing here is global: tests build as many isolated pipelines as they
/// need.
pub struct IncidentPipeline {
    config: Config,
    cache: Arc<TtlCache>,
    store: Arc<ProcessedIncidentStore>,
    hasher: Arc<ContentHasher>,
    enhancer: Arc<AsyncEnhancer>,
    processor: Arc<BatchProcessor>,
    maintenance: Mutex<Vec<MaintenanceTask>>,
}

impl IncidentPipeline {
    /// Build cache, store, hasher, enhancer and processor from configuration
    pub fn from_config(config: Config, provider: Arc<dyn EnhancementProvider>) -> Self {
        let cache = Arc::new(TtlCache::new(config.cache.name.clone()));
        let store = Arc::new(ProcessedIncidentStore::new(
            Arc::clone(&cache),
            config.store.clone(),
        ));
        let hasher = Arc::new(ContentHasher::new(config.hashing.clone()));
        let enhancer = Arc::new(AsyncEnhancer::new(
            config.enhancement.clone(),
            Arc::clone(&store),
            Arc::clone(&hasher),
            provider,
        ));
        let processor = Arc::new(BatchProcessor::new(
            config.processing.clone(),
            Arc::clone(&store),
            Arc::clone(&hasher),
            Arc::clone(&enhancer),
        ));

        Self {
            config,
            cache,
            store,
            hasher,
            enhancer,
            processor,
            maintenance: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<ProcessedIncidentStore> {
        &self.store
    }

    pub fn hasher(&self) -> &Arc<ContentHasher> {
        &self.hasher
    }

    pub fn enhancer(&self) -> &Arc<AsyncEnhancer> {
        &self.enhancer
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    /// Start both worker pools and the maintenance sweeps
    pub async fn start(&self) -> Result<()> {
        let mut maintenance = self.maintenance.lock().await;
        if !maintenance.is_empty() {
            return Err(AppError::Lifecycle("pipeline already running".to_string()));
        }

        self.enhancer.start_enhancement_workers().await?;
        if let Err(e) = self.processor.start_background_processing().await {
            self.enhancer.stop_enhancement_workers().await?;
            return Err(e);
        }

        let cache = Arc::clone(&self.cache);
        let cleanup: MaintenanceJob = Arc::new(move || Ok(cache.cleanup_stale()));
        maintenance.push(MaintenanceTask::spawn(
            "cache_cleanup",
            self.config.cache.cleanup_interval(),
            cleanup,
        ));

        let store = Arc::clone(&self.store);
        let expiry: MaintenanceJob = Arc::new(move || Ok(store.expire_old_incidents()));
        maintenance.push(MaintenanceTask::spawn(
            "store_expiry",
            self.config.cache.store_expiry_interval(),
            expiry,
        ));

        info!(cache = %self.cache.name(), "🚀 Incident pipeline started");
        Ok(())
    }

    /// Stop ingestion, then enhancement, then maintenance. No-op when stopped.
    pub async fn shutdown(&self) -> Result<Vec<(String, MaintenanceSnapshot)>> {
        let mut maintenance = self.maintenance.lock().await;
        if maintenance.is_empty() {
            return Ok(Vec::new());
        }

        // Ingestion workers feed the enhancement queue, so they go first
        self.processor.stop().await?;
        self.enhancer.stop_enhancement_workers().await?;

        let snapshots = stop_maintenance(&mut maintenance).await?;
        info!("🛑 Incident pipeline stopped");
        Ok(snapshots)
    }

    /// Cancel both worker pools without draining, then stop maintenance.
    ///
    /// Workers exit at their next receive; only in-flight items finish.
    /// Also cuts short a `shutdown` that is still draining. No-op when stopped.
    pub async fn abort(&self) -> Result<Vec<(String, MaintenanceSnapshot)>> {
        // Cancel before taking the lifecycle lock, which a draining shutdown holds
        let discarded_ingestion = self.processor.cancel().await?;
        let discarded_enhancement = self.enhancer.cancel_enhancement_workers().await?;

        let mut maintenance = self.maintenance.lock().await;
        let snapshots = stop_maintenance(&mut maintenance).await?;

        warn!(
            discarded_ingestion,
            discarded_enhancement, "Incident pipeline aborted"
        );
        Ok(snapshots)
    }
}

async fn stop_maintenance(
    tasks: &mut Vec<MaintenanceTask>,
) -> Result<Vec<(String, MaintenanceSnapshot)>> {
    let mut snapshots = Vec::with_capacity(tasks.len());
    for mut task in tasks.drain(..) {
        let snapshot = task.stop().await?;
        snapshots.push((task.name().to_string(), snapshot));
    }
    Ok(snapshots)
}
