//! Supervised periodic maintenance

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::metrics::FEED_CORE_METRICS;

/// A maintenance job: one sweep, returning how many items it removed
pub type MaintenanceJob = Arc<dyn Fn() -> Result<usize> + Send + Sync>;

/// Counters for a maintenance task
#[derive(Debug, Default)]
pub struct MaintenanceMetrics {
    pub runs: AtomicU64,
    pub errors: AtomicU64,
    pub panics: AtomicU64,
    pub removed: AtomicU64,
}

impl MaintenanceMetrics {
    pub fn snapshot(&self) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of maintenance metrics at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MaintenanceSnapshot {
    pub runs: u64,
    pub errors: u64,
    pub panics: u64,
    pub removed: u64,
}

/// Runs a job on a fixed interval until stopped.
///
/// Every sweep executes on its own blocking task, so an error or a panic in
/// one sweep is recorded and the next tick runs as usual.
pub struct MaintenanceTask {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    metrics: Arc<MaintenanceMetrics>,
}

impl MaintenanceTask {
    /// Spawn the task. The first sweep happens one full interval after spawning.
    pub fn spawn(name: impl Into<String>, period: Duration, job: MaintenanceJob) -> Self {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(MaintenanceMetrics::default());

        let handle = tokio::spawn(run_loop(
            name.clone(),
            period,
            job,
            shutdown_rx,
            Arc::clone(&metrics),
        ));

        Self {
            name,
            shutdown_tx,
            handle: Some(handle),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> MaintenanceSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(&mut self) -> Result<MaintenanceSnapshot> {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| AppError::Internal(format!("maintenance task '{}' failed: {}", self.name, e)))?;
        }

        Ok(self.metrics.snapshot())
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_loop(
    name: String,
    period: Duration,
    job: MaintenanceJob,
    mut shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<MaintenanceMetrics>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    info!(task = %name, interval_ms = period.as_millis() as u64, "Maintenance task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_once(&name, &job, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        task = %name,
        runs = snapshot.runs,
        errors = snapshot.errors,
        panics = snapshot.panics,
        removed = snapshot.removed,
        "Maintenance task stopped"
    );
}

/// One isolated sweep
async fn run_once(name: &str, job: &MaintenanceJob, metrics: &MaintenanceMetrics) {
    metrics.runs.fetch_add(1, Ordering::Relaxed);
    let job = Arc::clone(job);

    match tokio::task::spawn_blocking(move || job()).await {
        Ok(Ok(removed)) => {
            metrics.removed.fetch_add(removed as u64, Ordering::Relaxed);
            FEED_CORE_METRICS
                .maintenance_runs
                .with_label_values(&[name, "ok"])
                .inc();
            debug!(task = %name, removed, "Maintenance sweep completed");
        }
        Ok(Err(e)) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            FEED_CORE_METRICS
                .maintenance_runs
                .with_label_values(&[name, "error"])
                .inc();
            warn!(task = %name, error = %e, "Maintenance sweep failed");
        }
        Err(e) => {
            metrics.panics.fetch_add(1, Ordering::Relaxed);
            FEED_CORE_METRICS
                .maintenance_runs
                .with_label_values(&[name, "panic"])
                .inc();
            error!(task = %name, error = %e, "Maintenance sweep panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_task_runs_periodically() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job: MaintenanceJob = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        });

        let mut task = MaintenanceTask::spawn("test", Duration::from_millis(20), job);
        tokio::time::sleep(Duration::from_millis(130)).await;
        let snapshot = task.stop().await.unwrap();

        assert!(snapshot.runs >= 3);
        assert_eq!(snapshot.removed, snapshot.runs * 2);
        assert_eq!(calls.load(Ordering::SeqCst) as u64, snapshot.runs);
        assert!(!task.is_running());
    }

    #[tokio::test]
    async fn test_panicking_sweep_does_not_stop_future_sweeps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job: MaintenanceJob = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                panic!("sweep blew up");
            }
            Ok(1)
        });

        let mut task = MaintenanceTask::spawn("panicky", Duration::from_millis(20), job);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let snapshot = task.stop().await.unwrap();

        assert_eq!(snapshot.panics, 1);
        assert!(snapshot.runs >= 3);
        assert!(snapshot.removed >= 2);
    }

    #[tokio::test]
    async fn test_failing_sweep_is_counted() {
        let job: MaintenanceJob =
            Arc::new(|| Err(AppError::Internal("sweep failed".to_string())));

        let mut task = MaintenanceTask::spawn("failing", Duration::from_millis(20), job);
        tokio::time::sleep(Duration::from_millis(90)).await;
        let snapshot = task.stop().await.unwrap();

        assert!(snapshot.errors >= 2);
        assert_eq!(snapshot.errors, snapshot.runs);
        assert_eq!(snapshot.removed, 0);
    }
}
