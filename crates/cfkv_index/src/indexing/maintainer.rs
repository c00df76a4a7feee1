//! Keeps index tables in step with base-table writes.
//!
//! Index writes happen after the base write and are best-effort: a failure
//! is reported as an [`IndexInconsistency`] warning, never rolled back into
//! the base write.

use cfkv_store::{Column, Delete, Put, TableName};
use tracing::{debug, warn};

use crate::context::ClientContext;
use crate::error::IndexInconsistency;
use crate::indexing::keys::{encode_index_entry_key, INDEX_FAMILY, INDEX_MARKER_QUALIFIER};
use crate::indexing::metadata::IndexSpec;

/// New state of one indexed column after a base mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellChange<'a> {
    Value(&'a [u8]),
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMutationKind {
    Put,
    Delete,
}

/// One write against an index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMutation {
    pub index: String,
    pub index_table: TableName,
    pub kind: IndexMutationKind,
    pub entry_key: Vec<u8>,
}

/// Plans the index-table writes implied by one base-column change.
///
/// Inputs:
/// - `prior`: the cell value before the base write, if any.
/// - `change`: the cell value after it.
///
/// Outputs:
/// - Per covering index, a delete of the old entry followed by a put of the
///   new one. Nothing when the entry key does not change.
pub fn plan_index_mutations(
    ctx: &ClientContext,
    specs: &[IndexSpec],
    row_key: &[u8],
    column: &Column,
    prior: Option<&[u8]>,
    change: CellChange<'_>,
) -> Vec<IndexMutation> {
    let mut out = Vec::new();
    for spec in specs.iter().filter(|spec| spec.covers(column)) {
        let old_key = prior.map(|value| encode_index_entry_key(spec.value_type, value, row_key));
        let new_key = match change {
            CellChange::Value(value) => {
                Some(encode_index_entry_key(spec.value_type, value, row_key))
            }
            CellChange::Removed => None,
        };
        if old_key == new_key {
            continue;
        }
        let index_table = ctx.index_table_name(&spec.table, &spec.name);
        if let Some(entry_key) = old_key {
            out.push(IndexMutation {
                index: spec.name.clone(),
                index_table: index_table.clone(),
                kind: IndexMutationKind::Delete,
                entry_key,
            });
        }
        if let Some(entry_key) = new_key {
            out.push(IndexMutation {
                index: spec.name.clone(),
                index_table,
                kind: IndexMutationKind::Put,
                entry_key,
            });
        }
    }
    out
}

/// Applies planned index writes in order, collecting a warning per failure.
pub async fn apply_index_mutations(
    ctx: &ClientContext,
    table: &TableName,
    row_key: &[u8],
    mutations: Vec<IndexMutation>,
) -> Vec<IndexInconsistency> {
    let mut warnings = Vec::new();
    for mutation in mutations {
        let result = match mutation.kind {
            IndexMutationKind::Put => {
                let put = Put::new(mutation.entry_key).with_column(
                    INDEX_FAMILY,
                    INDEX_MARKER_QUALIFIER,
                    Vec::new(),
                );
                ctx.store().put(&mutation.index_table, put).await
            }
            IndexMutationKind::Delete => {
                ctx.store()
                    .delete(&mutation.index_table, Delete::row(mutation.entry_key))
                    .await
            }
        };
        match result {
            Ok(()) => {
                match mutation.kind {
                    IndexMutationKind::Put => ctx.metrics().record_index_put(),
                    IndexMutationKind::Delete => ctx.metrics().record_index_delete(),
                }
                debug!(
                    table = %table,
                    index = %mutation.index,
                    kind = ?mutation.kind,
                    "index entry updated"
                );
            }
            Err(err) => {
                ctx.metrics().record_index_inconsistency();
                let warning = IndexInconsistency {
                    table: table.clone(),
                    index: mutation.index,
                    row_key: row_key.to_vec(),
                    reason: format!("{:?} on '{}' failed: {err}", mutation.kind, mutation.index_table),
                };
                warn!(warning = %warning, "index maintenance failed after base write");
                warnings.push(warning);
            }
        }
    }
    warnings
}

/// Maintains every index covering `column` after a base write to `row_key`.
pub async fn on_mutation(
    ctx: &ClientContext,
    table: &TableName,
    specs: &[IndexSpec],
    row_key: &[u8],
    column: &Column,
    prior: Option<&[u8]>,
    change: CellChange<'_>,
) -> Vec<IndexInconsistency> {
    let mutations = plan_index_mutations(ctx, specs, row_key, column, prior, change);
    if mutations.is_empty() {
        return Vec::new();
    }
    apply_index_mutations(ctx, table, row_key, mutations).await
}
