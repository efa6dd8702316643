//! Prometheus metrics for the ingestion and enhancement pipeline

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, TextEncoder,
};

/// Pipeline metrics
pub struct FeedCoreMetrics {
    /// Ingestion outcomes per record (queued, dropped, skipped_enhanced, hash_failed)
    pub records_ingested: CounterVec,

    /// Raw-stage worker outcomes (success, failed, timeout)
    pub ingestion_results: CounterVec,

    /// Processed entries written, by stage
    pub stage_writes: CounterVec,

    /// Fast-path lookups (hit, miss)
    pub fast_path_lookups: CounterVec,

    /// Fast-path latency
    pub fast_path_duration: Histogram,

    /// Enhancement outcomes (success, failed, timeout)
    pub enhancement_results: CounterVec,

    /// Enhancement call latency
    pub enhancement_duration: Histogram,

    /// Cache entries removed, by reason (stale_sweep, store_expiry, lazy_expiry)
    pub entries_removed: CounterVec,

    /// Maintenance task runs, by task and result (ok, error, panic)
    pub maintenance_runs: CounterVec,

    /// Items buffered per queue
    pub queue_depth: GaugeVec,

    /// Items rejected per queue
    pub queue_rejections: CounterVec,

    /// Worker item durations per pool
    pub worker_item_duration: HistogramVec,
}

lazy_static! {
    pub static ref FEED_CORE_METRICS: FeedCoreMetrics = FeedCoreMetrics {
        records_ingested: register_counter_vec!(
            "feed_core_records_ingested_total",
            "Feed records seen by the batch processor, by outcome",
            &["outcome"]
        )
        .unwrap(),

        ingestion_results: register_counter_vec!(
            "feed_core_ingestion_results_total",
            "Raw-stage worker results",
            &["result"]
        )
        .unwrap(),

        stage_writes: register_counter_vec!(
            "feed_core_stage_writes_total",
            "Processed entries written, by stage",
            &["stage"]
        )
        .unwrap(),

        fast_path_lookups: register_counter_vec!(
            "feed_core_fast_path_lookups_total",
            "Enhanced alert lookups on the fast path",
            &["result"]
        )
        .unwrap(),

        fast_path_duration: register_histogram!(
            "feed_core_fast_path_duration_seconds",
            "Enhanced alert fast-path latency in seconds",
            vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.5, 1.0]
        )
        .unwrap(),

        enhancement_results: register_counter_vec!(
            "feed_core_enhancement_results_total",
            "Background enhancement results",
            &["result"]
        )
        .unwrap(),

        enhancement_duration: register_histogram!(
            "feed_core_enhancement_duration_seconds",
            "External enhancement call duration in seconds",
            vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]
        )
        .unwrap(),

        entries_removed: register_counter_vec!(
            "feed_core_cache_entries_removed_total",
            "Cache entries removed, by reason",
            &["reason"]
        )
        .unwrap(),

        maintenance_runs: register_counter_vec!(
            "feed_core_maintenance_runs_total",
            "Periodic maintenance runs, by task and result",
            &["task", "result"]
        )
        .unwrap(),

        queue_depth: register_gauge_vec!(
            "feed_core_queue_depth",
            "Items currently buffered in a worker queue",
            &["queue"]
        )
        .unwrap(),

        queue_rejections: register_counter_vec!(
            "feed_core_queue_rejections_total",
            "Items rejected by a worker queue",
            &["queue", "reason"]
        )
        .unwrap(),

        worker_item_duration: register_histogram_vec!(
            "feed_core_worker_item_duration_seconds",
            "Time a worker spent on one item",
            &["queue"],
            vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
        )
        .unwrap(),
    };
}

/// Initialize pipeline metrics
pub fn init_metrics() {
    lazy_static::initialize(&FEED_CORE_METRICS);
}

/// Render the default registry in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}
