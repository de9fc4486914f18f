//! Latency and memory instrumentation for destination benchmarks
//!
//! Write and read round trips are recorded separately. Counters are atomics
//! so parallel probes can share one `PerformanceMetrics` without locking.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Average write latency above which a run is flagged (10ms)
const SLOW_AVG_WRITE_US: u64 = 10_000;
const SLOW_MAX_WRITE_US: u64 = 100_000;
/// Average read latency above which a run is flagged (100ms)
const SLOW_AVG_READ_US: u64 = 100_000;
const SLOW_MAX_READ_US: u64 = 1_000_000;

#[derive(Default)]
struct LatencyCounter {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl LatencyCounter {
    fn record(&self, latency: Duration) {
        let latency_us = latency.as_micros() as u64;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(latency_us, Ordering::Relaxed);
        self.max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    /// (count, average, max)
    fn load(&self) -> (u64, u64, u64) {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_us.load(Ordering::Relaxed);
        let avg = if count > 0 { total / count } else { 0 };
        (count, avg, self.max_us.load(Ordering::Relaxed))
    }

    fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.total_us.store(0, Ordering::Relaxed);
        self.max_us.store(0, Ordering::Relaxed);
    }
}

/// Shared latency counters for destination reads and writes
#[derive(Clone, Default)]
pub struct PerformanceMetrics {
    writes: Arc<LatencyCounter>,
    reads: Arc<LatencyCounter>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write_latency(&self, latency: Duration) {
        self.writes.record(latency);
    }

    pub fn record_read_latency(&self, latency: Duration) {
        self.reads.record(latency);
    }

    /// Point-in-time view of the counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (write_count, avg_write_latency_us, max_write_latency_us) = self.writes.load();
        let (read_count, avg_read_latency_us, max_read_latency_us) = self.reads.load();

        MetricsSnapshot {
            write_count,
            read_count,
            avg_write_latency_us,
            avg_read_latency_us,
            max_write_latency_us,
            max_read_latency_us,
        }
    }

    pub fn reset(&self) {
        self.writes.reset();
        self.reads.reset();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub write_count: u64,
    pub read_count: u64,
    pub avg_write_latency_us: u64,
    pub avg_read_latency_us: u64,
    pub max_write_latency_us: u64,
    pub max_read_latency_us: u64,
}

impl MetricsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Writes: {} (avg: {:.2}ms, max: {:.2}ms) | Reads: {} (avg: {:.2}ms, max: {:.2}ms)",
            self.write_count,
            self.avg_write_latency_us as f64 / 1000.0,
            self.max_write_latency_us as f64 / 1000.0,
            self.read_count,
            self.avg_read_latency_us as f64 / 1000.0,
            self.max_read_latency_us as f64 / 1000.0,
        )
    }

    pub fn has_performance_issues(&self) -> bool {
        !self.warnings().is_empty()
    }

    pub fn warnings(&self) -> Vec<String> {
        let checks = [
            (self.avg_write_latency_us, SLOW_AVG_WRITE_US, "average write"),
            (self.max_write_latency_us, SLOW_MAX_WRITE_US, "max write"),
            (self.avg_read_latency_us, SLOW_AVG_READ_US, "average read"),
            (self.max_read_latency_us, SLOW_MAX_READ_US, "max read"),
        ];

        checks
            .into_iter()
            .filter(|(value, limit, _)| value > limit)
            .map(|(value, _, label)| {
                format!("High {} latency: {:.2}ms", label, value as f64 / 1000.0)
            })
            .collect()
    }
}

/// Records elapsed time into `PerformanceMetrics` when dropped
pub struct MetricTimer<'a> {
    metrics: &'a PerformanceMetrics,
    start: Instant,
    operation: MetricOperation,
}

impl<'a> MetricTimer<'a> {
    pub fn write(metrics: &'a PerformanceMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            operation: MetricOperation::Write,
        }
    }

    pub fn read(metrics: &'a PerformanceMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            operation: MetricOperation::Read,
        }
    }

    /// Stop the timer, record it and return the elapsed time
    pub fn stop(self) -> Duration {
        self.start.elapsed()
    }
}

impl<'a> Drop for MetricTimer<'a> {
    fn drop(&mut self) {
        let latency = self.start.elapsed();
        match self.operation {
            MetricOperation::Write => self.metrics.record_write_latency(latency),
            MetricOperation::Read => self.metrics.record_read_latency(latency),
        }
    }
}

enum MetricOperation {
    Write,
    Read,
}

/// Resident and virtual memory of this process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub resident_bytes: u64,
    pub virtual_bytes: u64,
}

/// Sample process memory; `None` where the platform exposes no cheap source
pub fn process_memory() -> Option<MemoryUsage> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_proc_status(&status)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg_attr(not(any(target_os = "linux", test)), allow(dead_code))]
fn parse_proc_status(status: &str) -> Option<MemoryUsage> {
    let field_kb = |name: &str| -> Option<u64> {
        status
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };

    Some(MemoryUsage {
        resident_bytes: field_kb("VmRSS:")? * 1024,
        virtual_bytes: field_kb("VmSize:")? * 1024,
    })
}
