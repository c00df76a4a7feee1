//! Client context shared by every operation of the index layer.

use std::sync::Arc;

use cfkv_store::{StoreClient, TableName};
use tokio::sync::MutexGuard;

use crate::config::IndexConfig;
use crate::error::IndexResult;
use crate::locks::RowLocks;
use crate::metrics::IndexMetrics;
use crate::schema::{TableGates, TableHandle, TableState};

/// Store connection plus per-process state.
///
/// Built once at startup and passed by reference into every operation. Its
/// lifecycle belongs to the caller.
pub struct ClientContext {
    store: Arc<dyn StoreClient>,
    config: IndexConfig,
    metrics: Arc<IndexMetrics>,
    gates: TableGates,
    row_locks: RowLocks,
}

impl ClientContext {
    pub fn new(store: Arc<dyn StoreClient>, config: IndexConfig) -> Self {
        Self {
            store,
            config,
            metrics: Arc::new(IndexMetrics::default()),
            gates: TableGates::default(),
            row_locks: RowLocks::default(),
        }
    }

    pub fn with_defaults(store: Arc<dyn StoreClient>) -> Self {
        Self::new(store, IndexConfig::default())
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<IndexMetrics> {
        &self.metrics
    }

    /// Availability of `table` as seen by this context.
    pub fn table_state(&self, table: &TableName) -> TableState {
        self.gates.state(table)
    }

    /// Claims a shared handle on `table` for one row operation or scan.
    pub fn open_table(&self, table: &TableName) -> IndexResult<TableHandle> {
        self.gates.open(table)
    }

    /// Name of the table holding entries of index `index` on `table`.
    pub fn index_table_name(&self, table: &TableName, index: &str) -> TableName {
        TableName::new(format!(
            "{}{}{}",
            table, self.config.index_table_separator, index
        ))
    }

    pub(crate) fn gates(&self) -> &TableGates {
        &self.gates
    }

    /// Serializes writers of row `key` in `table`, including index repair.
    pub(crate) async fn lock_row(&self, table: &TableName, key: &[u8]) -> MutexGuard<'_, ()> {
        self.row_locks.lock(table, key).await
    }
}
