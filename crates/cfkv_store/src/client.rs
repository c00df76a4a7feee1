//! Store client interface consumed by the index layer.

use async_trait::async_trait;

use crate::descriptor::TableDescriptor;
use crate::error::StoreResult;
use crate::filter::Predicate;
use crate::types::{Column, Delete, Put, Row, RowRange, TableName};

/// Rows fetched per round-trip when a request does not say otherwise.
pub const DEFAULT_SCAN_CACHING: usize = 1000;

/// Parameters of one base-table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub range: RowRange,
    /// Columns to return; empty returns every cell.
    pub columns: Vec<Column>,
    /// Store-side filter, evaluated before projection. Empty means none.
    pub filter: Vec<Predicate>,
    /// Rows fetched per round-trip.
    pub caching: usize,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            range: RowRange::full(),
            columns: Vec::new(),
            filter: Vec::new(),
            caching: DEFAULT_SCAN_CACHING,
        }
    }
}

impl ScanRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, range: RowRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_column(mut self, family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    pub fn with_caching(mut self, caching: usize) -> Self {
        self.caching = caching.max(1);
        self
    }
}

/// Pull-based, finite cursor over rows in key order.
///
/// A cursor must be closed by its owner; callers may stop before exhaustion.
#[async_trait]
pub trait ScanCursor: Send {
    /// Next row, or `None` once the range is exhausted.
    async fn next_row(&mut self) -> StoreResult<Option<Row>>;

    /// Releases server-side resources. Closing twice is a no-op.
    async fn close(&mut self) -> StoreResult<()>;
}

/// Row and schema operations offered by a column-family store.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    async fn table_exists(&self, table: &TableName) -> StoreResult<bool>;

    async fn create_table(&self, descriptor: TableDescriptor) -> StoreResult<()>;

    async fn disable_table(&self, table: &TableName) -> StoreResult<()>;

    async fn enable_table(&self, table: &TableName) -> StoreResult<()>;

    /// Deletes a disabled table and all of its rows.
    async fn delete_table(&self, table: &TableName) -> StoreResult<()>;

    async fn is_table_enabled(&self, table: &TableName) -> StoreResult<bool>;

    async fn get_schema(&self, table: &TableName) -> StoreResult<TableDescriptor>;

    /// Replaces the whole descriptor of a disabled table.
    async fn modify_schema(&self, table: &TableName, descriptor: TableDescriptor)
        -> StoreResult<()>;

    /// Reads `columns` of one row (all cells when empty). `None` when the
    /// row has no matching cells.
    async fn get(&self, table: &TableName, key: &[u8], columns: &[Column])
        -> StoreResult<Option<Row>>;

    async fn put(&self, table: &TableName, put: Put) -> StoreResult<()>;

    async fn delete(&self, table: &TableName, delete: Delete) -> StoreResult<()>;

    async fn scan(&self, table: &TableName, request: ScanRequest)
        -> StoreResult<Box<dyn ScanCursor>>;

    /// Persists buffered writes of `table`.
    async fn flush(&self, table: &TableName) -> StoreResult<()>;
}
