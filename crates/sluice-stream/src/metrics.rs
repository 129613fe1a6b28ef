//! Per-partition instrumentation for the stream processor.
//!
//! - **Throughput**: records processed, skipped, replayed and written
//! - **Errors**: error-handling entries, retries, failed side effects
//! - **Latency**: histogram of command processing time
//! - **Progress**: last processed / written positions, error phase
//!
//! All fields are atomics; the processing task writes, any thread reads.
//!
//! ## Usage
//!
//! ```ignore
//! let snapshot = handle.metrics();
//! println!("{}", handle.export_metrics());
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use sluice_types::{PartitionId, Position};

const LATENCY_BOUNDS_MS: [f64; 8] = [0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0];

/// Metrics of one partition's stream processor.
#[derive(Debug)]
pub struct ProcessingMetrics {
    partition_id: PartitionId,

    // === Throughput Counters ===
    records_processed_total: AtomicU64,
    records_skipped_total: AtomicU64,
    events_replayed_total: AtomicU64,
    records_written_total: AtomicU64,

    // === Error Counters ===
    error_handling_total: AtomicU64,
    processing_retries_total: AtomicU64,
    side_effect_failures_total: AtomicU64,

    // === Processing Latency ===
    processing_latency_buckets: [AtomicU64; LATENCY_BOUNDS_MS.len()],
    processing_latency_sum_ns: AtomicU64,
    processing_latency_count: AtomicU64,

    // === Progress Gauges ===
    last_processed_position: AtomicI64,
    last_written_position: AtomicI64,
    /// Numeric [`ErrorHandlingPhase`](crate::ErrorHandlingPhase) (0 = no error)
    error_phase: AtomicU64,
}

impl ProcessingMetrics {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            records_processed_total: AtomicU64::new(0),
            records_skipped_total: AtomicU64::new(0),
            events_replayed_total: AtomicU64::new(0),
            records_written_total: AtomicU64::new(0),
            error_handling_total: AtomicU64::new(0),
            processing_retries_total: AtomicU64::new(0),
            side_effect_failures_total: AtomicU64::new(0),
            processing_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            processing_latency_sum_ns: AtomicU64::new(0),
            processing_latency_count: AtomicU64::new(0),
            last_processed_position: AtomicI64::new(Position::UNSET.as_i64()),
            last_written_position: AtomicI64::new(Position::UNSET.as_i64()),
            error_phase: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn increment_processed(&self) {
        self.records_processed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_skipped(&self) {
        self.records_skipped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replayed(&self) {
        self.events_replayed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_written(&self, count: usize) {
        self.records_written_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn increment_error_handling(&self) {
        self.error_handling_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.processing_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_side_effect_failures(&self) {
        self.side_effect_failures_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_latency(&self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        if let Some(bucket) = LATENCY_BOUNDS_MS.iter().position(|&bound| ms <= bound) {
            self.processing_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        }
        self.processing_latency_sum_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        self.processing_latency_count
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_processed_position(&self, position: Position) {
        self.last_processed_position
            .store(position.as_i64(), Ordering::Relaxed);
    }

    pub fn set_last_written_position(&self, position: Position) {
        self.last_written_position
            .store(position.as_i64(), Ordering::Relaxed);
    }

    pub fn set_error_phase(&self, phase: u64) {
        self.error_phase.store(phase, Ordering::Relaxed);
    }

    // ========================================================================
    // Reading
    // ========================================================================

    pub fn last_processed_position(&self) -> Position {
        Position::new(self.last_processed_position.load(Ordering::Relaxed))
    }

    pub fn last_written_position(&self) -> Position {
        Position::new(self.last_written_position.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_processed_total: self.records_processed_total.load(Ordering::Relaxed),
            records_skipped_total: self.records_skipped_total.load(Ordering::Relaxed),
            events_replayed_total: self.events_replayed_total.load(Ordering::Relaxed),
            records_written_total: self.records_written_total.load(Ordering::Relaxed),
            error_handling_total: self.error_handling_total.load(Ordering::Relaxed),
            processing_retries_total: self.processing_retries_total.load(Ordering::Relaxed),
            side_effect_failures_total: self.side_effect_failures_total.load(Ordering::Relaxed),
            last_processed_position: self.last_processed_position(),
            last_written_position: self.last_written_position(),
        }
    }

    /// Exports all metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut output = String::new();
        let partition = self.partition_id;

        let counters = [
            (
                "sluice_records_processed_total",
                "Commands processed",
                &self.records_processed_total,
            ),
            (
                "sluice_records_skipped_total",
                "Records skipped by the processing state machine",
                &self.records_skipped_total,
            ),
            (
                "sluice_events_replayed_total",
                "Events applied during replay",
                &self.events_replayed_total,
            ),
            (
                "sluice_records_written_total",
                "Follow-up records written",
                &self.records_written_total,
            ),
            (
                "sluice_error_handling_total",
                "Times the error-handling path was entered",
                &self.error_handling_total,
            ),
            (
                "sluice_processing_retries_total",
                "Recoverable processing retries",
                &self.processing_retries_total,
            ),
            (
                "sluice_side_effect_failures_total",
                "Side effects that could not be executed",
                &self.side_effect_failures_total,
            ),
        ];
        for (name, help, value) in counters {
            let _ = write!(
                output,
                "# HELP {name} {help}\n\
                 # TYPE {name} counter\n\
                 {name}{{partition=\"{partition}\"}} {}\n",
                value.load(Ordering::Relaxed)
            );
        }

        output.push_str(
            "# HELP sluice_processing_latency_ms Command processing latency histogram\n\
             # TYPE sluice_processing_latency_ms histogram\n",
        );
        let mut cumulative = 0u64;
        for (i, bound) in LATENCY_BOUNDS_MS.iter().enumerate() {
            cumulative += self.processing_latency_buckets[i].load(Ordering::Relaxed);
            let _ = writeln!(
                output,
                "sluice_processing_latency_ms_bucket{{partition=\"{partition}\",le=\"{bound}\"}} {cumulative}",
            );
        }
        let count = self.processing_latency_count.load(Ordering::Relaxed);
        let _ = write!(
            output,
            "sluice_processing_latency_ms_bucket{{partition=\"{partition}\",le=\"+Inf\"}} {count}\n\
             sluice_processing_latency_ms_sum{{partition=\"{partition}\"}} {}\n\
             sluice_processing_latency_ms_count{{partition=\"{partition}\"}} {count}\n",
            self.processing_latency_sum_ns.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        );

        let gauges = [
            (
                "sluice_last_processed_position",
                "Position of the last committed command",
                self.last_processed_position.load(Ordering::Relaxed),
            ),
            (
                "sluice_last_written_position",
                "Highest position written by this processor",
                self.last_written_position.load(Ordering::Relaxed),
            ),
            (
                "sluice_error_phase",
                "Error handling phase (0 = no error)",
                self.error_phase.load(Ordering::Relaxed) as i64,
            ),
        ];
        for (name, help, value) in gauges {
            let _ = write!(
                output,
                "# HELP {name} {help}\n\
                 # TYPE {name} gauge\n\
                 {name}{{partition=\"{partition}\"}} {value}\n",
            );
        }

        output
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_processed_total: u64,
    pub records_skipped_total: u64,
    pub events_replayed_total: u64,
    pub records_written_total: u64,
    pub error_handling_total: u64,
    pub processing_retries_total: u64,
    pub side_effect_failures_total: u64,
    pub last_processed_position: Position,
    pub last_written_position: Position,
}
