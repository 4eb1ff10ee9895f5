use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Latency samples kept per operation for percentile estimates.
pub const DEFAULT_SAMPLE_WINDOW: usize = 1024;

/// Thread-safe per-operation latency and error counters
pub struct MetricsCollector {
    operations: Mutex<HashMap<String, OperationStats>>,
    window: usize,
}

#[derive(Default)]
struct OperationStats {
    count: u64,
    errors: u64,
    samples: VecDeque<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSummary {
    pub operation_count: u64,
    pub error_count: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p50_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, OperationStats>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one completed operation
    pub fn track_duration(&self, operation: &str, duration_ms: f64) {
        let mut operations = self.lock();
        let stats = operations.entry(operation.to_string()).or_default();
        stats.count += 1;
        if stats.samples.len() == self.window {
            stats.samples.pop_front();
        }
        stats.samples.push_back(duration_ms);
        tracing::trace!(operation, duration_ms, "operation finished");
    }

    pub fn record_error(&self, operation: &str) {
        let mut operations = self.lock();
        operations.entry(operation.to_string()).or_default().errors += 1;
    }

    /// Summary for one operation; all zeros if it never ran
    pub fn get_summary(&self, operation: &str) -> MetricsSummary {
        self.lock()
            .get(operation)
            .map(OperationStats::summary)
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricsSummary> {
        self.lock()
            .iter()
            .map(|(name, stats)| (name.clone(), stats.summary()))
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl OperationStats {
    fn summary(&self) -> MetricsSummary {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let (avg, min, max) = match (sorted.first(), sorted.last()) {
            (Some(&min), Some(&max)) => (sorted.iter().sum::<f64>() / sorted.len() as f64, min, max),
            _ => (0.0, 0.0, 0.0),
        };

        MetricsSummary {
            operation_count: self.count,
            error_count: self.errors,
            avg_duration_ms: avg,
            min_duration_ms: min,
            max_duration_ms: max,
            p50_duration_ms: percentile(&sorted, 50.0),
            p95_duration_ms: percentile(&sorted, 95.0),
            p99_duration_ms: percentile(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile over already sorted samples.
fn percentile(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (percentile / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Global metrics collector instance
pub static METRICS_COLLECTOR: OnceLock<MetricsCollector> = OnceLock::new();

/// Get the global metrics collector
pub fn get_metrics_collector() -> &'static MetricsCollector {
    METRICS_COLLECTOR.get_or_init(MetricsCollector::new)
}

/// Times the enclosing scope and reports it to the global collector when
/// the returned guard drops.
#[macro_export]
macro_rules! measure_operation {
    ($operation_name:expr) => {{
        struct OperationTimer {
            start: std::time::Instant,
            name: &'static str,
        }

        impl Drop for OperationTimer {
            fn drop(&mut self) {
                let duration = self.start.elapsed().as_secs_f64() * 1000.0;
                $crate::metrics::get_metrics_collector().track_duration(self.name, duration);
            }
        }

        OperationTimer {
            start: std::time::Instant::now(),
            name: $operation_name,
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_percentiles() {
        let collector = MetricsCollector::new();
        for ms in 1..=100 {
            collector.track_duration("search", ms as f64);
        }
        collector.record_error("search");

        let summary = collector.get_summary("search");
        assert_eq!(summary.operation_count, 100);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.min_duration_ms, 1.0);
        assert_eq!(summary.max_duration_ms, 100.0);
        assert_eq!(summary.p50_duration_ms, 51.0);
        assert_eq!(summary.p99_duration_ms, 99.0);
        assert!((summary.avg_duration_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_latest_samples() {
        let collector = MetricsCollector::with_window(3);
        for ms in [100.0, 1.0, 2.0, 3.0] {
            collector.track_duration("ingest", ms);
        }
        let summary = collector.get_summary("ingest");
        assert_eq!(summary.operation_count, 4);
        assert_eq!(summary.max_duration_ms, 3.0);
    }

    #[test]
    fn unknown_operation_is_empty() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.get_summary("nothing"), MetricsSummary::default());
        collector.record_error("failing");
        assert_eq!(collector.snapshot()["failing"].error_count, 1);
        collector.clear();
        assert!(collector.snapshot().is_empty());
    }

    #[test]
    fn guard_reports_on_drop() {
        {
            let _timer = crate::measure_operation!("metrics_guard_test");
        }
        let summary = get_metrics_collector().get_summary("metrics_guard_test");
        assert_eq!(summary.operation_count, 1);
    }
}
