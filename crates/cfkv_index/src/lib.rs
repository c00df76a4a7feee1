//! Secondary-index coordination over a column-family key-value store.
//!
//! The crate sits between callers and a [`cfkv_store::StoreClient`]:
//! - index metadata lives in each table's schema descriptor,
//! - every schema change runs through a disable/modify/enable transition,
//! - writes maintain index tables inline,
//! - predicate scans are routed through an index when one applies.
//!
//! All operations take a [`ClientContext`] built once by the caller.

pub mod admin;
pub mod config;
pub mod context;
pub mod error;
pub mod indexing;
mod locks;
pub mod metrics;
pub mod mutation;
pub mod optimizer;
pub mod schema;

pub use admin::{
    add_column_family, create_table, describe_table, drop_table, flush_table, table_exists,
};
pub use config::IndexConfig;
pub use context::ClientContext;
pub use error::{ErrorCode, IndexError, IndexInconsistency, IndexResult};
pub use indexing::{
    create_index, drop_index, find_index, list_indexes, lookup_index_for, rebuild_index,
    IndexSpec, IndexState, RebuildReport,
};
pub use metrics::{IndexMetrics, IndexMetricsSnapshot};
pub use mutation::{delete_row, put_batch, put_row, BatchOutcome, MutationOutcome};
pub use optimizer::{get_row, plan_scan, scan, AccessPath, PlannedScan, PredicateScanner, ScanQuery};
pub use schema::{apply_schema_change, disable_table, enable_table, TableHandle, TableState};
