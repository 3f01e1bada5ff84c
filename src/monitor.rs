//! Per-operation performance counters.
//!
//! The router records one sample per dispatch (operation name, latency,
//! outcome, payload size); `getStatistics` serves the snapshot back over the
//! bridge. Recording is fire-and-forget: the single mutex is held only for
//! the map update and recording never awaits, so it cannot stall the hot
//! path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Running statistics for one operation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    /// Total samples recorded.
    pub count: u64,
    /// Simple moving average latency in milliseconds.
    #[serde(rename = "avgLatencyMs")]
    pub avg_latency_ms: f64,
    /// Samples that completed successfully.
    #[serde(rename = "successCount")]
    pub success_count: u64,
    /// Fraction of samples that succeeded, in `[0, 1]`.
    #[serde(rename = "successRate")]
    pub success_rate: f64,
    /// Cumulative response payload bytes.
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
}

/// Aggregates latency/throughput/error counters per operation.
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct PerformanceMonitor {
    operations: Arc<Mutex<HashMap<String, OperationStats>>>,
}

impl PerformanceMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample for an operation.
    pub fn record(&self, name: &str, latency_ms: f64, success: bool, payload_bytes: usize) {
        let mut operations = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let stats = operations.entry(name.to_string()).or_default();
        stats.count += 1;
        stats.avg_latency_ms += (latency_ms - stats.avg_latency_ms) / stats.count as f64;
        if success {
            stats.success_count += 1;
        }
        stats.success_rate = stats.success_count as f64 / stats.count as f64;
        stats.total_bytes += payload_bytes as u64;
    }

    /// Snapshot of all operation stats.
    pub fn snapshot(&self) -> HashMap<String, OperationStats> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stats for one operation name, if any sample was recorded.
    pub fn operation(&self, name: &str) -> Option<OperationStats> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Clear all recorded samples.
    pub fn reset(&self) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_single_sample() {
        let monitor = PerformanceMonitor::new();
        monitor.record("filters.executeFilter", 12.0, true, 256);

        let stats = monitor.operation("filters.executeFilter").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg_latency_ms, 12.0);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_bytes, 256);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn test_moving_average() {
        let monitor = PerformanceMonitor::new();
        monitor.record("op", 10.0, true, 0);
        monitor.record("op", 20.0, true, 0);
        monitor.record("op", 30.0, true, 0);

        let stats = monitor.operation("op").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_rate_mixed() {
        let monitor = PerformanceMonitor::new();
        monitor.record("op", 1.0, true, 0);
        monitor.record("op", 1.0, false, 0);
        monitor.record("op", 1.0, true, 0);
        monitor.record("op", 1.0, false, 0);

        let stats = monitor.operation("op").unwrap();
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn test_success_rate_empty() {
        assert_eq!(OperationStats::default().success_rate, 0.0);
    }

    #[test]
    fn test_snapshot_serializes_success_rate() {
        let monitor = PerformanceMonitor::new();
        monitor.record("op", 1.0, true, 0);
        monitor.record("op", 1.0, false, 0);

        let json = serde_json::to_value(monitor.snapshot()).unwrap();
        assert_eq!(json["op"]["successRate"], serde_json::json!(0.5));
        assert_eq!(json["op"]["successCount"], serde_json::json!(1));
    }

    #[test]
    fn test_operations_tracked_independently() {
        let monitor = PerformanceMonitor::new();
        monitor.record("a", 5.0, true, 10);
        monitor.record("b", 50.0, false, 20);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["a"].count, 1);
        assert_eq!(snapshot["b"].success_count, 0);
    }

    #[test]
    fn test_clone_shares_state() {
        let monitor = PerformanceMonitor::new();
        let clone = monitor.clone();
        monitor.record("op", 1.0, true, 0);
        assert_eq!(clone.operation("op").unwrap().count, 1);
    }

    #[test]
    fn test_reset() {
        let monitor = PerformanceMonitor::new();
        monitor.record("op", 1.0, true, 0);
        monitor.reset();
        assert!(monitor.snapshot().is_empty());
    }
}
