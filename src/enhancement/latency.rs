use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of recent response times
pub struct LatencyTracker {
    window: usize,
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    /// Record one sample, evicting the oldest once the window is full
    pub fn record(&self, elapsed: Duration) {
        let mut samples = self.samples.lock();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Nearest-rank 95th percentile in milliseconds; 0 with no samples
    pub fn p95_ms(&self) -> f64 {
        self.percentile_ms(0.95)
    }

    /// Nearest-rank percentile in milliseconds
    pub fn percentile_ms(&self, quantile: f64) -> f64 {
        let mut sorted: Vec<Duration> = self.samples.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let rank = (quantile.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(sorted.len() - 1);
        sorted[index].as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_reports_zero() {
        let tracker = LatencyTracker::new(10);
        assert_eq!(tracker.p95_ms(), 0.0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_p95_nearest_rank() {
        let tracker = LatencyTracker::new(100);
        for ms in 1..=100 {
            tracker.record(Duration::from_millis(ms));
        }
        assert_eq!(tracker.p95_ms(), 95.0);
        assert_eq!(tracker.percentile_ms(1.0), 100.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let tracker = LatencyTracker::new(3);
        tracker.record(Duration::from_millis(900));
        for _ in 0..3 {
            tracker.record(Duration::from_millis(5));
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.p95_ms(), 5.0);
    }
}
