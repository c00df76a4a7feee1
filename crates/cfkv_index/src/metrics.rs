//! In-process counters for scan routing, index maintenance and schema
//! transitions.
//!
//! Counters are lock-free so they can be bumped on every row without
//! contention.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct IndexMetrics {
    /// Scans routed through an index table.
    indexed_scans: AtomicU64,
    /// Scans that evaluated predicates over the base table.
    direct_scans: AtomicU64,
    /// Rows read from the base table before predicate evaluation.
    rows_scanned: AtomicU64,
    /// Rows handed back to callers.
    rows_returned: AtomicU64,
    /// Index entries written.
    index_puts: AtomicU64,
    /// Index entries removed.
    index_deletes: AtomicU64,
    /// Index mutations that failed after their base mutation succeeded.
    index_inconsistencies: AtomicU64,
    /// Completed schema transitions.
    schema_transitions: AtomicU64,
    /// Schema transitions that left the table disabled.
    schema_failures: AtomicU64,
}

/// Point-in-time copy of [`IndexMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexMetricsSnapshot {
    pub indexed_scans: u64,
    pub direct_scans: u64,
    pub rows_scanned: u64,
    pub rows_returned: u64,
    pub index_puts: u64,
    pub index_deletes: u64,
    pub index_inconsistencies: u64,
    pub schema_transitions: u64,
    pub schema_failures: u64,
}

impl IndexMetrics {
    pub fn record_indexed_scan(&self) {
        self.indexed_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_direct_scan(&self) {
        self.direct_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_scanned(&self, rows: u64) {
        self.rows_scanned.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_row_returned(&self) {
        self.rows_returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_put(&self) {
        self.index_puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_delete(&self) {
        self.index_deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_index_inconsistency(&self) {
        self.index_inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schema_transition(&self) {
        self.schema_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schema_failure(&self) {
        self.schema_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexMetricsSnapshot {
        IndexMetricsSnapshot {
            indexed_scans: self.indexed_scans.load(Ordering::Relaxed),
            direct_scans: self.direct_scans.load(Ordering::Relaxed),
            rows_scanned: self.rows_scanned.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
            index_puts: self.index_puts.load(Ordering::Relaxed),
            index_deletes: self.index_deletes.load(Ordering::Relaxed),
            index_inconsistencies: self.index_inconsistencies.load(Ordering::Relaxed),
            schema_transitions: self.schema_transitions.load(Ordering::Relaxed),
            schema_failures: self.schema_failures.load(Ordering::Relaxed),
        }
    }
}
