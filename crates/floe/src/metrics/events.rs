//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the compaction
//! fleet. Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric. Metrics carry a `table` label so
//! multi-table fleets can be observed per table.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when a compaction cycle for one table completes.
pub struct CompactionCycleCompleted {
    pub table: String,
    pub duration: Duration,
}

impl InternalEvent for CompactionCycleCompleted {
    fn emit(self) {
        trace!(
            table = %self.table,
            duration_ms = self.duration.as_millis(),
            "Compaction cycle completed"
        );
        histogram!("floe_cycle_duration_seconds", "table" => self.table)
            .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a confirmed boundary is applied.
pub struct BoundaryApplied {
    pub table: String,
}

impl InternalEvent for BoundaryApplied {
    fn emit(self) {
        trace!(table = %self.table, "Boundary applied");
        counter!("floe_boundaries_applied_total", "table" => self.table).increment(1);
    }
}

/// Event emitted when the head is processed as a synthetic boundary
/// because no version classified.
pub struct SyntheticBoundaryApplied {
    pub table: String,
}

impl InternalEvent for SyntheticBoundaryApplied {
    fn emit(self) {
        trace!(table = %self.table, "Synthetic boundary applied");
        counter!("floe_synthetic_boundaries_total", "table" => self.table).increment(1);
    }
}

/// Event emitted when a publish was a duplicate of an earlier one.
pub struct PublishDuplicate {
    pub table: String,
}

impl InternalEvent for PublishDuplicate {
    fn emit(self) {
        trace!(table = %self.table, "Duplicate publish");
        counter!("floe_publish_duplicates_total", "table" => self.table).increment(1);
    }
}

/// Event emitted after walking a table's lineage.
pub struct LineageWalked {
    pub table: String,
    /// Versions committed since the checkpoint.
    pub versions: usize,
}

impl InternalEvent for LineageWalked {
    fn emit(self) {
        trace!(table = %self.table, versions = self.versions, "Lineage walked");
        gauge!("floe_lineage_versions", "table" => self.table).set(self.versions as f64);
    }
}

/// Event emitted when a table's cycle fails.
pub struct TableCycleFailed {
    pub table: String,
}

impl InternalEvent for TableCycleFailed {
    fn emit(self) {
        trace!(table = %self.table, "Table cycle failed");
        counter!("floe_table_cycles_failed_total", "table" => self.table).increment(1);
    }
}
