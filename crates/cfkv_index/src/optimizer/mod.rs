//! Scan planning and execution.
//!
//! The planner picks between a base-table scan and an index probe for a
//! predicate query; the scanner executes the choice and yields rows in key
//! order either way.

use tracing::warn;

use crate::error::IndexResult;

pub mod planner;
pub mod scanner;

pub use planner::{
    choose_access_path, plan_scan, resolve_value_type, AccessPath, PlannedScan, ScanQuery,
};
pub use scanner::{get_row, scan, PredicateScanner};

/// Combines the outcome of some work with the outcome of the cleanup that
/// follows it. The work's error wins; a cleanup error is then only logged.
pub(crate) fn finish_with_cleanup(
    work: IndexResult<()>,
    cleanup: IndexResult<()>,
    what: &str,
) -> IndexResult<()> {
    match (work, cleanup) {
        (Err(err), Err(cleanup_err)) => {
            warn!(
                error = %err,
                cleanup_error = %cleanup_err,
                "{what} cleanup failed after an earlier error"
            );
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), cleanup) => cleanup,
    }
}
