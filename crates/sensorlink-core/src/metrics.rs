//! Link and operation metrics tracking.
//!
//! Counters are plain atomics so the sampling thread, the worker and the
//! callback task can all record without coordination.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Metrics for a single operation type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Total number of operations.
    pub count: u64,
    /// Number of successful operations.
    pub success_count: u64,
    /// Number of failed operations.
    pub failure_count: u64,
    /// Total duration of all operations.
    pub total_duration_ms: u64,
    /// Minimum operation duration.
    pub min_duration_ms: Option<u64>,
    /// Maximum operation duration.
    pub max_duration_ms: Option<u64>,
    /// Average operation duration.
    pub avg_duration_ms: Option<f64>,
}

/// Thread-safe atomic operation metrics tracker.
#[derive(Debug)]
pub struct AtomicOperationMetrics {
    count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_ms: AtomicU64,
    min_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
}

impl Default for AtomicOperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicOperationMetrics {
    /// Create new empty metrics.
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            min_duration_ms: AtomicU64::new(u64::MAX),
            max_duration_ms: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, duration: Duration) {
        self.record(duration, &self.success_count);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.record(duration, &self.failure_count);
    }

    fn record(&self, duration: Duration, outcome: &AtomicU64) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        outcome.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms.fetch_add(ms, Ordering::Relaxed);
        self.min_duration_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Get a snapshot of the current metrics.
    pub fn snapshot(&self) -> OperationMetrics {
        let count = self.count.load(Ordering::Relaxed);
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);
        let min = self.min_duration_ms.load(Ordering::Relaxed);
        let max = self.max_duration_ms.load(Ordering::Relaxed);

        OperationMetrics {
            count,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            total_duration_ms,
            min_duration_ms: (min != u64::MAX).then_some(min),
            max_duration_ms: (count > 0).then_some(max),
            avg_duration_ms: (count > 0).then(|| total_duration_ms as f64 / count as f64),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Relaxed);
        self.total_duration_ms.store(0, Ordering::Relaxed);
        self.min_duration_ms.store(u64::MAX, Ordering::Relaxed);
        self.max_duration_ms.store(0, Ordering::Relaxed);
    }
}

/// Per-link counters.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    connected_at: Mutex<Option<Instant>>,
    /// Accept/connect (or attribute open) attempts.
    pub connect: AtomicOperationMetrics,
    /// Attempts made after the first connection was lost.
    pub reconnects: AtomicOperationMetrics,
    /// Frames or notifications received.
    pub reads: AtomicOperationMetrics,
    /// Frames sent to the peer.
    pub writes: AtomicOperationMetrics,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    frame_mismatches: AtomicU64,
    malformed_payloads: AtomicU64,
    requests_issued: AtomicU64,
    requests_completed: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create shared link metrics.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record the moment the link became connected (or clear it).
    pub fn set_connected(&self, connected: bool) {
        if let Ok(mut at) = self.connected_at.lock() {
            *at = connected.then(Instant::now);
        }
    }

    /// Time since the current connection was established.
    pub fn uptime(&self) -> Option<Duration> {
        self.connected_at
            .lock()
            .ok()
            .and_then(|at| at.map(|t| t.elapsed()))
    }

    pub fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_frame_mismatch(&self) {
        self.frame_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_mismatches(&self) -> u64 {
        self.frame_mismatches.load(Ordering::Relaxed)
    }

    pub fn malformed_payloads(&self) -> u64 {
        self.malformed_payloads.load(Ordering::Relaxed)
    }

    /// Get a summary of all metrics.
    pub fn summary(&self) -> LinkMetricsSummary {
        LinkMetricsSummary {
            uptime_ms: self.uptime().map(|d| d.as_millis() as u64),
            connect: self.connect.snapshot(),
            reconnects: self.reconnects.snapshot(),
            reads: self.reads.snapshot(),
            writes: self.writes.snapshot(),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            frame_mismatches: self.frame_mismatches(),
            malformed_payloads: self.malformed_payloads(),
            requests_issued: self.requests_issued.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
        }
    }
}

/// Serializable summary of link metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkMetricsSummary {
    pub uptime_ms: Option<u64>,
    pub connect: OperationMetrics,
    pub reconnects: OperationMetrics,
    pub reads: OperationMetrics,
    pub writes: OperationMetrics,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub frame_mismatches: u64,
    pub malformed_payloads: u64,
    pub requests_issued: u64,
    pub requests_completed: u64,
}
