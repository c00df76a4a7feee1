//! Index lifecycle: create, rebuild and drop.
//!
//! An index is registered `WriteOnly` so writes start maintaining it, then
//! backfilled from the base table, then published `Public` so scans may use
//! it. Both state changes are schema transitions.

use std::collections::BTreeSet;

use cfkv_store::{
    ColumnFamilyDescriptor, Delete, Put, Row, ScanCursor, ScanRequest, TableDescriptor, TableName,
};
use tracing::{info, info_span, warn, Instrument};

use crate::context::ClientContext;
use crate::error::{IndexError, IndexResult};
use crate::indexing::keys::{
    decode_index_entry_row_key, encode_index_entry_key, INDEX_FAMILY, INDEX_MARKER_QUALIFIER,
};
use crate::indexing::metadata::{self, read_index_specs, IndexSpec, IndexState};
use crate::optimizer::finish_with_cleanup;
use crate::schema::apply_schema_change;

/// Entry counts from reconciling an index table with its base table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Entries the index holds once reconciled.
    pub entries: u64,
    pub added: u64,
    pub removed: u64,
}

/// Creates index `spec` on `table`, backfills it and publishes it.
///
/// Fails with [`IndexError::DuplicateIndex`] before touching the table when
/// the name is taken. A backfill failure leaves the index registered as
/// `WriteOnly`; [`rebuild_index`] completes it.
pub async fn create_index(
    ctx: &ClientContext,
    table: &TableName,
    spec: IndexSpec,
) -> IndexResult<IndexSpec> {
    let span = info_span!("create_index", table = %table, index = %spec.name);
    async move {
        let descriptor = ctx.store().get_schema(table).await?;
        let wanted = spec.name.trim().to_ascii_lowercase();
        if read_index_specs(&descriptor)?
            .iter()
            .any(|existing| existing.name == wanted)
        {
            return Err(IndexError::DuplicateIndex {
                table: table.clone(),
                index: wanted,
            });
        }
        spec.validate_against(&descriptor)?;

        let index_table = ctx.index_table_name(table, &wanted);
        prepare_index_table(ctx, &index_table).await?;

        let registered =
            apply_schema_change(ctx, table, |descriptor| metadata::add_index(descriptor, spec))
                .await?;
        let report = reconcile_index(ctx, table, &registered).await?;
        let published = apply_schema_change(ctx, table, |descriptor| {
            metadata::set_index_state(descriptor, &registered.name, IndexState::Public)
        })
        .await?;
        info!(
            index_table = %index_table,
            entries = report.entries,
            "index created"
        );
        Ok(published)
    }
    .instrument(span)
    .await
}

/// Reconciles index `name` with the current base-table contents and
/// publishes it if it was still `WriteOnly`.
pub async fn rebuild_index(
    ctx: &ClientContext,
    table: &TableName,
    name: &str,
) -> IndexResult<RebuildReport> {
    let spec = metadata::find_index(ctx, table, name).await?;
    let index_table = ctx.index_table_name(table, &spec.name);
    if !ctx.store().table_exists(&index_table).await? {
        prepare_index_table(ctx, &index_table).await?;
    }
    let report = reconcile_index(ctx, table, &spec).await?;
    if !spec.is_public() {
        apply_schema_change(ctx, table, |descriptor| {
            metadata::set_index_state(descriptor, &spec.name, IndexState::Public)
        })
        .await?;
    }
    info!(
        table = %table,
        index = %spec.name,
        entries = report.entries,
        added = report.added,
        removed = report.removed,
        "index rebuilt"
    );
    Ok(report)
}

/// Unregisters index `name` from `table` and deletes its index table.
///
/// Fails with [`IndexError::IndexNotFound`] before touching the table when
/// no such index exists. A failure to delete the index table after the
/// schema change is logged; the leftover table is replaced on re-create.
pub async fn drop_index(ctx: &ClientContext, table: &TableName, name: &str) -> IndexResult<IndexSpec> {
    let spec = metadata::find_index(ctx, table, name).await?;
    let removed =
        apply_schema_change(ctx, table, |descriptor| metadata::drop_index(descriptor, &spec.name))
            .await?;
    let index_table = ctx.index_table_name(table, &removed.name);
    if let Err(err) = delete_store_table(ctx, &index_table).await {
        warn!(
            table = %table,
            index_table = %index_table,
            error = %err,
            "index dropped but its table could not be deleted"
        );
    } else {
        info!(table = %table, index = %removed.name, "index dropped");
    }
    Ok(removed)
}

/// Creates an empty index table, replacing any leftover one.
async fn prepare_index_table(ctx: &ClientContext, index_table: &TableName) -> IndexResult<()> {
    if ctx.store().table_exists(index_table).await? {
        warn!(index_table = %index_table, "replacing leftover index table");
        delete_store_table(ctx, index_table).await?;
    }
    let descriptor =
        TableDescriptor::new(index_table.clone()).with_family(ColumnFamilyDescriptor::new(INDEX_FAMILY));
    ctx.store().create_table(descriptor).await?;
    Ok(())
}

pub(crate) async fn delete_store_table(ctx: &ClientContext, table: &TableName) -> IndexResult<()> {
    ctx.store().disable_table(table).await?;
    ctx.store().delete_table(table).await?;
    Ok(())
}

/// Brings the index table of `spec` in line with the base table.
///
/// The index table is read before the base table. Each difference between
/// the two snapshots is re-checked against the base row under its row lock
/// before it is repaired, so entries written by concurrent writers survive.
/// The base table is read through a table handle, so a concurrent schema
/// change on it waits for the reconcile to finish.
async fn reconcile_index(
    ctx: &ClientContext,
    table: &TableName,
    spec: &IndexSpec,
) -> IndexResult<RebuildReport> {
    let index_table = ctx.index_table_name(table, &spec.name);

    let request = ScanRequest::new()
        .with_column(INDEX_FAMILY, INDEX_MARKER_QUALIFIER)
        .with_caching(ctx.config().scan_caching);
    let cursor = ctx.store().scan(&index_table, request).await?;
    let actual = collect_keys(cursor, |row| Some(row.key.clone())).await?;

    let _handle = ctx.open_table(table)?;
    let request = ScanRequest::new()
        .with_columns(vec![spec.column.clone()])
        .with_caching(ctx.config().scan_caching);
    let cursor = ctx.store().scan(table, request).await?;
    let expected = collect_keys(cursor, |row| {
        row.cell(&spec.column)
            .map(|cell| encode_index_entry_key(spec.value_type, &cell.value, &row.key))
    })
    .await?;

    let mut report = RebuildReport::default();
    let mut entries = expected.len() as u64;
    for stale in actual.difference(&expected) {
        let row_key = match decode_index_entry_row_key(stale) {
            Ok(row_key) => row_key,
            Err(err) => {
                warn!(index_table = %index_table, error = %err, "removing malformed index entry");
                delete_entry(ctx, &index_table, stale).await?;
                report.removed += 1;
                continue;
            }
        };
        let _row = ctx.lock_row(table, &row_key).await;
        if current_entry_key(ctx, table, spec, &row_key).await?.as_ref() == Some(stale) {
            entries += 1;
            continue;
        }
        delete_entry(ctx, &index_table, stale).await?;
        report.removed += 1;
    }
    for missing in expected.difference(&actual) {
        let row_key = decode_index_entry_row_key(missing)?;
        let _row = ctx.lock_row(table, &row_key).await;
        if current_entry_key(ctx, table, spec, &row_key).await?.as_ref() != Some(missing) {
            entries -= 1;
            continue;
        }
        let put = Put::new(missing.clone()).with_column(INDEX_FAMILY, INDEX_MARKER_QUALIFIER, Vec::new());
        ctx.store().put(&index_table, put).await?;
        report.added += 1;
    }
    report.entries = entries;
    Ok(report)
}

/// Entry key row `row_key` needs in the index of `spec` right now.
async fn current_entry_key(
    ctx: &ClientContext,
    table: &TableName,
    spec: &IndexSpec,
    row_key: &[u8],
) -> IndexResult<Option<Vec<u8>>> {
    let row = ctx
        .store()
        .get(table, row_key, std::slice::from_ref(&spec.column))
        .await?;
    Ok(row.and_then(|row| {
        row.cell(&spec.column)
            .map(|cell| encode_index_entry_key(spec.value_type, &cell.value, row_key))
    }))
}

async fn delete_entry(ctx: &ClientContext, index_table: &TableName, key: &[u8]) -> IndexResult<()> {
    ctx.store().delete(index_table, Delete::row(key.to_vec())).await?;
    Ok(())
}

/// Drains `cursor` into a key set, closing it on every path.
async fn collect_keys<F>(
    mut cursor: Box<dyn ScanCursor>,
    mut key_of: F,
) -> IndexResult<BTreeSet<Vec<u8>>>
where
    F: FnMut(&Row) -> Option<Vec<u8>>,
{
    let mut keys = BTreeSet::new();
    let read = loop {
        match cursor.next_row().await {
            Ok(Some(row)) => {
                if let Some(key) = key_of(&row) {
                    keys.insert(key);
                }
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(IndexError::from(err)),
        }
    };
    let closed = cursor.close().await.map_err(IndexError::from);
    finish_with_cleanup(read, closed, "index reconcile scan")?;
    Ok(keys)
}
