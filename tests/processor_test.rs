mod common;

use incident_feed_core::enhancement::{AsyncEnhancer, EnhancementConfig, PassthroughProvider};
use incident_feed_core::error::AppError;
use incident_feed_core::metrics::{gather_metrics, init_metrics};
use incident_feed_core::models::ProcessingStage;
use incident_feed_core::processing::{BatchProcessor, ProcessingConfig};
use incident_feed_core::state::ProcessedIncidentStore;
use incident_feed_core::workers::WorkerPool;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn processor_with(
    config: ProcessingConfig,
    enhancement: EnhancementConfig,
) -> (BatchProcessor, Arc<AsyncEnhancer>, Arc<ProcessedIncidentStore>) {
    let store = common::store();
    let enhancer = common::enhancer(enhancement, Arc::clone(&store), Arc::new(PassthroughProvider));
    let processor = BatchProcessor::new(config, Arc::clone(&store), common::hasher(), Arc::clone(&enhancer));
    (processor, enhancer, store)
}

#[tokio::test]
async fn test_queue_backpressure_at_capacity() {
    let pool: WorkerPool<usize> = WorkerPool::new("backpressure", 500, 5);

    for i in 0..500 {
        pool.try_submit(i).unwrap();
    }
    let rejected = pool.try_submit(500);

    assert!(matches!(rejected, Err(AppError::QueueFull { capacity: 500, .. })));
    assert!(pool.queue_len() <= 500);
}

#[tokio::test]
async fn test_batch_without_workers_drops_overflow() {
    let (processor, _enhancer, _store) = processor_with(
        ProcessingConfig {
            queue_capacity: 500,
            ..Default::default()
        },
        EnhancementConfig::default(),
    );

    let start = Instant::now();
    let summary = processor.process_incident_batch(common::distinct_incidents(501));

    // Never blocks the feed refresh
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(summary.received, 501);
    assert_eq!(summary.queued, 500);
    assert_eq!(summary.dropped, 1);
    assert_eq!(processor.queue_len(), 500);

    let stats = processor.get_processing_stats();
    assert_eq!(stats.queued, 500);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_batch_flows_to_raw_and_enhanced() {
    let (processor, enhancer, store) =
        processor_with(ProcessingConfig::default(), EnhancementConfig::default());
    enhancer.start_enhancement_workers().await.unwrap();
    processor.start_background_processing().await.unwrap();

    let summary = processor.process_incident_batch(common::distinct_incidents(10));
    assert_eq!(summary.queued, 10);

    let done = common::wait_until(Duration::from_secs(5), || {
        let store = Arc::clone(&store);
        async move { store.get_cache_metrics().stage_counts[&ProcessingStage::Enhanced] == 10 }
    })
    .await;
    assert!(done, "records were not enhanced in time");

    processor.stop().await.unwrap();
    enhancer.stop_enhancement_workers().await.unwrap();

    let stats = processor.get_processing_stats();
    assert_eq!(stats.processed, 10);
    assert_eq!(stats.failed, 0);
    assert_eq!(store.get_cache_metrics().stage_counts[&ProcessingStage::Raw], 10);
}

#[tokio::test]
async fn test_second_feed_cycle_skips_enhanced_records() {
    let (processor, enhancer, store) =
        processor_with(ProcessingConfig::default(), EnhancementConfig::default());
    enhancer.start_enhancement_workers().await.unwrap();
    processor.start_background_processing().await.unwrap();

    processor.process_incident_batch(common::distinct_incidents(3));
    let done = common::wait_until(Duration::from_secs(5), || {
        let store = Arc::clone(&store);
        async move { store.get_cache_metrics().stage_counts[&ProcessingStage::Enhanced] == 3 }
    })
    .await;
    assert!(done);

    let mut next_cycle = common::distinct_incidents(3);
    next_cycle.push(common::incident("New rock slide"));
    let summary = processor.process_incident_batch(next_cycle);

    assert_eq!(summary.skipped_enhanced, 3);
    assert_eq!(summary.queued, 1);

    processor.stop().await.unwrap();
    enhancer.stop_enhancement_workers().await.unwrap();
    assert_eq!(processor.get_processing_stats().skipped_enhanced, 3);
}

#[tokio::test]
async fn test_hand_off_to_full_queue_times_out() {
    init_metrics();
    // The enhancement queue holds one item and has no workers
    let (processor, enhancer, store) = processor_with(
        ProcessingConfig {
            item_timeout_secs: 1,
            ..Default::default()
        },
        EnhancementConfig {
            queue_capacity: 1,
            ..Default::default()
        },
    );
    processor.start_background_processing().await.unwrap();

    let start = Instant::now();
    processor.process_incident_batch(common::distinct_incidents(3));
    processor.stop().await.unwrap();

    // The two waiting hand-offs give up together after the budget
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3));

    let stats = processor.get_processing_stats();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(enhancer.get_enhancement_status().await.queue_depth, 1);
    // RAW entries are written before the hand-off
    assert_eq!(store.get_cache_metrics().stage_counts[&ProcessingStage::Raw], 3);

    let output = gather_metrics();
    assert!(common::metric_value(&output, "feed_core_ingestion_results_total", "timeout").unwrap() >= 2.0);
}

#[tokio::test]
async fn test_hand_off_waits_for_room_within_budget() {
    let (processor, enhancer, store) = processor_with(
        ProcessingConfig::default(),
        EnhancementConfig {
            queue_capacity: 1,
            ..Default::default()
        },
    );
    processor.start_background_processing().await.unwrap();
    processor.process_incident_batch(common::distinct_incidents(2));

    // One hand-off fills the queue, the other waits until workers free a slot
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(processor.get_processing_stats().processed, 1);
    enhancer.start_enhancement_workers().await.unwrap();

    let done = common::wait_until(Duration::from_secs(5), || {
        let store = Arc::clone(&store);
        async move { store.get_cache_metrics().stage_counts[&ProcessingStage::Enhanced] == 2 }
    })
    .await;
    assert!(done);

    processor.stop().await.unwrap();
    enhancer.stop_enhancement_workers().await.unwrap();

    let stats = processor.get_processing_stats();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_mixed_batch_counts_each_outcome() {
    let (processor, _enhancer, _store) = processor_with(
        ProcessingConfig {
            queue_capacity: 2,
            ..Default::default()
        },
        EnhancementConfig::default(),
    );

    let mut records = common::distinct_incidents(3);
    records.push(common::map_record(json!({"description": "   ", "category": "closure"})));
    let summary = processor.process_incident_batch(records);

    assert_eq!(summary.received, 4);
    assert_eq!(summary.queued, 2);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let (processor, _enhancer, _store) =
        processor_with(ProcessingConfig::default(), EnhancementConfig::default());

    // Stopping a stopped processor is a no-op
    processor.stop().await.unwrap();

    processor.start_background_processing().await.unwrap();
    assert!(processor.is_running());
    assert!(matches!(
        processor.start_background_processing().await,
        Err(AppError::Lifecycle(_))
    ));

    processor.stop().await.unwrap();
    assert!(!processor.is_running());
}
