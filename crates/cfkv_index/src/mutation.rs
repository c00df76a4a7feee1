//! Row writes routed through the index layer.
//!
//! Each write claims a table handle and its row lock, reads the prior values
//! of indexed columns it touches, applies the base mutation, then maintains
//! the affected indexes before releasing the row. Index failures surface as
//! warnings in the outcome.

use cfkv_store::{Column, Delete, Put, Row, TableName};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::ClientContext;
use crate::error::{IndexInconsistency, IndexResult};
use crate::indexing::{list_indexes, on_mutation, CellChange, IndexSpec};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    /// Index writes that failed after the base write was applied.
    pub index_warnings: Vec<IndexInconsistency>,
}

impl MutationOutcome {
    pub fn is_consistent(&self) -> bool {
        self.index_warnings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Puts applied to the base table, in submission order.
    pub applied: usize,
    /// Whether the batch stopped early because it was cancelled.
    pub cancelled: bool,
    pub index_warnings: Vec<IndexInconsistency>,
}

/// Writes `put` to `table` and maintains every index it affects.
pub async fn put_row(ctx: &ClientContext, table: &TableName, put: Put) -> IndexResult<MutationOutcome> {
    let _handle = ctx.open_table(table)?;
    let specs = list_indexes(ctx, table).await?;
    apply_put(ctx, table, &specs, put).await
}

/// Writes `puts` in order, stopping before the next put once `cancel` fires.
///
/// Puts applied before a failure or cancellation stay applied. On failure
/// the error is returned and the count of applied puts is logged.
pub async fn put_batch(
    ctx: &ClientContext,
    table: &TableName,
    puts: Vec<Put>,
    cancel: &CancellationToken,
) -> IndexResult<BatchOutcome> {
    let _handle = ctx.open_table(table)?;
    let specs = list_indexes(ctx, table).await?;
    let total = puts.len();
    let mut outcome = BatchOutcome::default();
    for put in puts {
        if cancel.is_cancelled() {
            outcome.cancelled = true;
            info!(
                table = %table,
                applied = outcome.applied,
                total,
                "put batch cancelled"
            );
            break;
        }
        match apply_put(ctx, table, &specs, put).await {
            Ok(result) => {
                outcome.applied += 1;
                outcome.index_warnings.extend(result.index_warnings);
            }
            Err(err) => {
                warn!(
                    table = %table,
                    applied = outcome.applied,
                    total,
                    error = %err,
                    "put batch failed part way"
                );
                return Err(err);
            }
        }
    }
    Ok(outcome)
}

/// Removes `delete` from `table` and the index entries of removed cells.
pub async fn delete_row(
    ctx: &ClientContext,
    table: &TableName,
    delete: Delete,
) -> IndexResult<MutationOutcome> {
    let _handle = ctx.open_table(table)?;
    let specs = list_indexes(ctx, table).await?;

    let mut affected: Vec<Column> = Vec::new();
    for spec in &specs {
        if delete.removes(&spec.column) && !affected.contains(&spec.column) {
            affected.push(spec.column.clone());
        }
    }
    let row_key = delete.key.clone();
    let _row = ctx.lock_row(table, &row_key).await;
    let prior = read_prior(ctx, table, &row_key, &affected).await?;
    ctx.store().delete(table, delete).await?;

    let mut outcome = MutationOutcome::default();
    let Some(prior) = prior else {
        return Ok(outcome);
    };
    for column in &affected {
        if let Some(cell) = prior.cell(column) {
            let warnings = on_mutation(
                ctx,
                table,
                &specs,
                &row_key,
                column,
                Some(&cell.value),
                CellChange::Removed,
            )
            .await;
            outcome.index_warnings.extend(warnings);
        }
    }
    Ok(outcome)
}

async fn apply_put(
    ctx: &ClientContext,
    table: &TableName,
    specs: &[IndexSpec],
    put: Put,
) -> IndexResult<MutationOutcome> {
    let indexed: Vec<(Column, Vec<u8>)> = put
        .final_values()
        .into_iter()
        .filter(|(column, _)| specs.iter().any(|spec| spec.covers(column)))
        .map(|(column, value)| (column.clone(), value.to_vec()))
        .collect();
    let columns: Vec<Column> = indexed.iter().map(|(column, _)| column.clone()).collect();
    let row_key = put.key.clone();
    let _row = ctx.lock_row(table, &row_key).await;
    let prior = read_prior(ctx, table, &row_key, &columns).await?;
    ctx.store().put(table, put).await?;

    let mut outcome = MutationOutcome::default();
    for (column, value) in &indexed {
        let prior_value = prior
            .as_ref()
            .and_then(|row| row.cell(column))
            .map(|cell| cell.value.as_slice());
        let warnings = on_mutation(
            ctx,
            table,
            specs,
            &row_key,
            column,
            prior_value,
            CellChange::Value(value),
        )
        .await;
        outcome.index_warnings.extend(warnings);
    }
    Ok(outcome)
}

/// Current values of `columns` in row `key`; skipped when nothing is indexed.
async fn read_prior(
    ctx: &ClientContext,
    table: &TableName,
    key: &[u8],
    columns: &[Column],
) -> IndexResult<Option<Row>> {
    if columns.is_empty() {
        return Ok(None);
    }
    Ok(ctx.store().get(table, key, columns).await?)
}
