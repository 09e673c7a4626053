use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sink for the statistics a stage reports
///
/// Implementations must never block for long and must never fail; they are
/// called from every stage thread on the hot path.
pub trait StatsRecorder: Send + Sync {
    /// An ordinary item reached a worker
    fn inc_records_in(&self);

    /// The transform finished `count` invocations
    fn inc_messages_processed(&self, count: u64);

    /// An item was broadcast downstream
    fn inc_records_out(&self);

    /// Current depth of the node's input queue
    fn set_buffer_length(&self, len: usize);

    /// Time spent inside one transform invocation
    fn record_process_latency(&self, _elapsed: Duration) {}
}

/// A simple percentile tracker that maintains a sliding window of measurements
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    measurements: Arc<Mutex<VecDeque<u64>>>,
    window_size: usize,
}

impl PercentileTracker {
    /// Create a new percentile tracker with a specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            measurements: Arc::new(Mutex::new(VecDeque::with_capacity(window_size))),
            window_size,
        }
    }

    /// Record a measurement (in nanoseconds)
    pub fn record(&self, nanos: u64) {
        let mut measurements = self.measurements.lock();
        if measurements.len() >= self.window_size {
            measurements.pop_front();
        }
        measurements.push_back(nanos);
    }

    /// Median latency in microseconds
    pub fn p50_us(&self) -> f64 {
        self.percentile(0.50)
    }

    /// 95th percentile latency in microseconds
    pub fn p95_us(&self) -> f64 {
        self.percentile(0.95)
    }

    /// 99th percentile latency in microseconds
    pub fn p99_us(&self) -> f64 {
        self.percentile(0.99)
    }

    fn percentile(&self, p: f64) -> f64 {
        let mut sorted: Vec<_> = self.measurements.lock().iter().copied().collect();
        if sorted.is_empty() {
            return 0.0;
        }
        sorted.sort_unstable();

        let idx = ((sorted.len() as f64 * p).ceil() as usize).saturating_sub(1);
        sorted[idx] as f64 / 1000.0
    }

    /// Get the count of recorded measurements
    pub fn count(&self) -> usize {
        self.measurements.lock().len()
    }
}

/// Per-stage statistics, cheap to clone and share with the stage threads
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Ordinary items that reached a worker
    records_in: Arc<AtomicU64>,
    /// Completed transform invocations
    messages_processed: Arc<AtomicU64>,
    /// Items broadcast downstream
    records_out: Arc<AtomicU64>,
    /// Last observed input queue depth
    buffer_length: Arc<AtomicUsize>,
    /// Transform latency (p50, p95, p99)
    latency_tracker: PercentileTracker,
    start_time: Instant,
}

impl StageMetrics {
    /// Create an empty metrics collector
    pub fn new() -> Self {
        Self {
            records_in: Arc::new(AtomicU64::new(0)),
            messages_processed: Arc::new(AtomicU64::new(0)),
            records_out: Arc::new(AtomicU64::new(0)),
            buffer_length: Arc::new(AtomicUsize::new(0)),
            latency_tracker: PercentileTracker::new(1000),
            start_time: Instant::now(),
        }
    }

    /// Ordinary items handed to the transform
    pub fn records_in(&self) -> u64 {
        self.records_in.load(Ordering::Relaxed)
    }

    /// Transform invocations that returned
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    /// Items broadcast downstream
    pub fn records_out(&self) -> u64 {
        self.records_out.load(Ordering::Relaxed)
    }

    /// Input queue depth last sampled by the distributor
    pub fn buffer_length(&self) -> usize {
        self.buffer_length.load(Ordering::Relaxed)
    }

    /// Items emitted downstream per second since creation
    pub fn throughput_rps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.records_out() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_in: self.records_in(),
            messages_processed: self.messages_processed(),
            records_out: self.records_out(),
            buffer_length: self.buffer_length(),
            throughput_rps: self.throughput_rps(),
            latency_p50_us: self.latency_tracker.p50_us(),
            latency_p95_us: self.latency_tracker.p95_us(),
            latency_p99_us: self.latency_tracker.p99_us(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRecorder for StageMetrics {
    fn inc_records_in(&self) {
        self.records_in.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_messages_processed(&self, count: u64) {
        self.messages_processed.fetch_add(count, Ordering::Relaxed);
    }

    fn inc_records_out(&self) {
        self.records_out.fetch_add(1, Ordering::Relaxed);
    }

    fn set_buffer_length(&self, len: usize) {
        self.buffer_length.store(len, Ordering::Relaxed);
    }

    fn record_process_latency(&self, elapsed: Duration) {
        self.latency_tracker
            .record(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
    }
}

/// A snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub records_in: u64,
    pub messages_processed: u64,
    pub records_out: u64,
    pub buffer_length: usize,
    pub throughput_rps: f64,
    pub latency_p50_us: f64,
    pub latency_p95_us: f64,
    pub latency_p99_us: f64,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    /// Format metrics as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "In: {}, Processed: {}, Out: {}, Buffered: {}, Throughput: {:.2} rec/s, \
             Latency P50: {:.2}µs, P95: {:.2}µs, P99: {:.2}µs, Elapsed: {:.2}s",
            self.records_in,
            self.messages_processed,
            self.records_out,
            self.buffer_length,
            self.throughput_rps,
            self.latency_p50_us,
            self.latency_p95_us,
            self.latency_p99_us,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_tracker() {
        let tracker = PercentileTracker::new(10);
        for i in 1..=10 {
            tracker.record(i * 1000);
        }
        assert_eq!(tracker.count(), 10);
        assert_eq!(tracker.p50_us(), 5.0);
        assert!(tracker.p99_us() >= tracker.p50_us());
    }

    #[test]
    fn test_tracker_window_slides() {
        let tracker = PercentileTracker::new(3);
        for nanos in [1000, 2000, 3000, 4000] {
            tracker.record(nanos);
        }
        assert_eq!(tracker.count(), 3);
        assert_eq!(tracker.p99_us(), 4.0);
    }

    #[test]
    fn test_stage_metrics_counters() {
        let metrics = StageMetrics::new();
        for _ in 0..100 {
            metrics.inc_records_in();
            metrics.inc_messages_processed(1);
            metrics.inc_records_out();
            metrics.record_process_latency(Duration::from_micros(1));
        }
        metrics.set_buffer_length(7);
        assert_eq!(metrics.records_in(), 100);
        assert_eq!(metrics.messages_processed(), 100);
        assert_eq!(metrics.records_out(), 100);
        assert_eq!(metrics.buffer_length(), 7);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_in, 100);
        assert_eq!(snapshot.messages_processed, 100);
        assert_eq!(snapshot.records_out, 100);
        assert_eq!(snapshot.buffer_length, 7);
        assert!(snapshot.throughput_rps > 0.0);
        assert!(snapshot.format().contains("Out: 100"));
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StageMetrics::new();
        let shared = metrics.clone();
        shared.inc_records_out();
        assert_eq!(metrics.records_out(), 1);
    }
}
