//! Table administration through the index layer.
//!
//! Table creation and deletion pass straight to the store; adding a column
//! family is a schema transition. Dropping a table also removes the index
//! tables of every index registered on it.

use cfkv_store::{ColumnFamilyDescriptor, TableDescriptor, TableName};
use tracing::{info, warn};

use crate::context::ClientContext;
use crate::error::IndexResult;
use crate::indexing::{delete_store_table, read_index_specs};
use crate::schema::{apply_schema_change, disable_table};

pub async fn table_exists(ctx: &ClientContext, table: &TableName) -> IndexResult<bool> {
    Ok(ctx.store().table_exists(table).await?)
}

/// Current descriptor of `table`, index metadata included.
pub async fn describe_table(ctx: &ClientContext, table: &TableName) -> IndexResult<TableDescriptor> {
    Ok(ctx.store().get_schema(table).await?)
}

/// Creates the table described by `descriptor`. Returns `false` and leaves
/// the existing table alone when one of that name exists.
pub async fn create_table(ctx: &ClientContext, descriptor: TableDescriptor) -> IndexResult<bool> {
    let table = descriptor.name.clone();
    if ctx.store().table_exists(&table).await? {
        warn!(table = %table, "table already exists");
        return Ok(false);
    }
    ctx.store().create_table(descriptor).await?;
    info!(table = %table, "table created");
    Ok(true)
}

/// Disables and deletes `table` together with its index tables. Returns
/// `false` when the table does not exist.
pub async fn drop_table(ctx: &ClientContext, table: &TableName) -> IndexResult<bool> {
    if !ctx.store().table_exists(table).await? {
        warn!(table = %table, "table does not exist");
        return Ok(false);
    }
    let specs = read_index_specs(&ctx.store().get_schema(table).await?)?;
    disable_table(ctx, table).await?;
    ctx.store().delete_table(table).await?;
    ctx.gates().forget(table);

    for spec in &specs {
        let index_table = ctx.index_table_name(table, &spec.name);
        if let Err(err) = delete_store_table(ctx, &index_table).await {
            warn!(
                table = %table,
                index_table = %index_table,
                error = %err,
                "failed to delete index table of dropped table"
            );
        }
    }
    info!(table = %table, indexes = specs.len(), "table dropped");
    Ok(true)
}

/// Adds `family` to `table` unless a family of that name exists. Returns
/// whether the schema changed.
pub async fn add_column_family(
    ctx: &ClientContext,
    table: &TableName,
    family: ColumnFamilyDescriptor,
) -> IndexResult<bool> {
    let descriptor = ctx.store().get_schema(table).await?;
    if descriptor.has_family(&family.name) {
        info!(table = %table, family = %family.name, "column family already present");
        return Ok(false);
    }
    let name = family.name.clone();
    let added = apply_schema_change(ctx, table, |descriptor| Ok(descriptor.add_family(family))).await?;
    if added {
        info!(table = %table, family = %name, "column family added");
    }
    Ok(added)
}

/// Asks the store to persist buffered writes of `table`.
pub async fn flush_table(ctx: &ClientContext, table: &TableName) -> IndexResult<()> {
    Ok(ctx.store().flush(table).await?)
}
