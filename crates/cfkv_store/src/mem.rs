//! In-process [`StoreClient`] used by tests and the walkthrough binary.
//!
//! `MemStore` keeps every table in a `BTreeMap` guarded by one lock and
//! enforces the same enable/disable discipline as a real cluster: row
//! operations on a disabled table fail, schema writes and table deletion
//! require the table to be disabled. Scans take a snapshot of the requested
//! range when they open. A [`FaultInjector`] lets tests fail selected calls.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use crate::client::{ScanCursor, ScanRequest, StoreClient};
use crate::descriptor::TableDescriptor;
use crate::error::{StoreError, StoreResult};
use crate::filter::matches_all;
use crate::types::{CellValue, Column, Delete, Put, Row, TableName};

/// Store calls a [`FaultInjector`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    TableExists,
    CreateTable,
    DisableTable,
    EnableTable,
    DeleteTable,
    GetSchema,
    ModifySchema,
    Get,
    Put,
    Delete,
    Scan,
    ScanNext,
    CursorClose,
    Flush,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: StoreOp,
    table: Option<TableName>,
    remaining: usize,
}

/// Scripted failures: the next `times` matching calls return
/// [`StoreError::Unavailable`] without side effects.
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<Vec<Fault>>,
}

impl FaultInjector {
    /// Fails the next `times` calls of `op`, on `table` only when given.
    pub fn fail_next(&self, op: StoreOp, table: Option<&TableName>, times: usize) {
        if times == 0 {
            return;
        }
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                op,
                table: table.cloned(),
                remaining: times,
            });
        }
    }

    pub fn clear(&self) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.clear();
        }
    }

    fn check(&self, op: StoreOp, table: &TableName) -> StoreResult<()> {
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        let Some(idx) = faults.iter().position(|fault| {
            fault.op == op && fault.table.as_ref().map_or(true, |name| name == table)
        }) else {
            return Ok(());
        };
        faults[idx].remaining -= 1;
        if faults[idx].remaining == 0 {
            faults.remove(idx);
        }
        debug!(op = %op, table = %table, "injecting store failure");
        Err(StoreError::Unavailable(format!(
            "injected {op} failure on table '{table}'"
        )))
    }
}

type RowCells = BTreeMap<Column, CellValue>;

struct MemTable {
    descriptor: TableDescriptor,
    enabled: bool,
    rows: BTreeMap<Vec<u8>, RowCells>,
}

impl MemTable {
    fn require_enabled(&self) -> StoreResult<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(StoreError::TableDisabled(self.descriptor.name.clone()))
        }
    }

    fn require_disabled(&self) -> StoreResult<()> {
        if self.enabled {
            Err(StoreError::TableNotDisabled(self.descriptor.name.clone()))
        } else {
            Ok(())
        }
    }
}

fn materialize(key: &[u8], cells: &RowCells, columns: &[Column]) -> Row {
    let mut row = Row {
        key: key.to_vec(),
        cells: cells.clone(),
    };
    row.project(columns);
    row
}

/// Decrements the store's open-cursor count when dropped.
struct CursorLease(Arc<AtomicUsize>);

impl CursorLease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemCursor {
    table: TableName,
    rows: VecDeque<Row>,
    faults: Arc<FaultInjector>,
    lease: Option<CursorLease>,
}

#[async_trait]
impl ScanCursor for MemCursor {
    async fn next_row(&mut self) -> StoreResult<Option<Row>> {
        if self.lease.is_none() {
            return Err(StoreError::CursorClosed);
        }
        self.faults.check(StoreOp::ScanNext, &self.table)?;
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> StoreResult<()> {
        // Resources are released even when the close call reports failure.
        if self.lease.take().is_none() {
            return Ok(());
        }
        self.rows.clear();
        self.faults.check(StoreOp::CursorClose, &self.table)
    }
}

pub struct MemStore {
    tables: RwLock<BTreeMap<TableName, MemTable>>,
    last_timestamp: AtomicU64,
    faults: Arc<FaultInjector>,
    open_cursors: Arc<AtomicUsize>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            last_timestamp: AtomicU64::new(0),
            faults: Arc::new(FaultInjector::default()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of scan cursors opened and not yet closed or dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Row count of `table`, regardless of its enabled state.
    pub fn row_count(&self, table: &TableName) -> StoreResult<usize> {
        let tables = self.read()?;
        let mem = lookup(&tables, table)?;
        Ok(mem.rows.len())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<TableName, MemTable>>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memstore lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<TableName, MemTable>>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memstore lock poisoned".to_string()))
    }

    /// Wall-clock milliseconds, forced strictly increasing.
    fn next_timestamp(&self) -> u64 {
        let now = now_unix_epoch_millis();
        let mut current = self.last_timestamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(current + 1);
            match self.last_timestamp.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}

fn lookup<'a>(
    tables: &'a BTreeMap<TableName, MemTable>,
    table: &TableName,
) -> StoreResult<&'a MemTable> {
    tables
        .get(table)
        .ok_or_else(|| StoreError::TableNotFound(table.clone()))
}

fn lookup_mut<'a>(
    tables: &'a mut BTreeMap<TableName, MemTable>,
    table: &TableName,
) -> StoreResult<&'a mut MemTable> {
    tables
        .get_mut(table)
        .ok_or_else(|| StoreError::TableNotFound(table.clone()))
}

fn now_unix_epoch_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(u64::MAX as u128) as u64,
        Err(_) => 0,
    }
}

#[async_trait]
impl StoreClient for MemStore {
    async fn table_exists(&self, table: &TableName) -> StoreResult<bool> {
        self.faults.check(StoreOp::TableExists, table)?;
        Ok(self.read()?.contains_key(table))
    }

    async fn create_table(&self, mut descriptor: TableDescriptor) -> StoreResult<()> {
        let name = descriptor.name.clone();
        self.faults.check(StoreOp::CreateTable, &name)?;
        descriptor.validate()?;
        let mut tables = self.write()?;
        if tables.contains_key(&name) {
            return Err(StoreError::TableExists(name));
        }
        descriptor.version = 1;
        tables.insert(
            name,
            MemTable {
                descriptor,
                enabled: true,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn disable_table(&self, table: &TableName) -> StoreResult<()> {
        self.faults.check(StoreOp::DisableTable, table)?;
        let mut tables = self.write()?;
        lookup_mut(&mut tables, table)?.enabled = false;
        Ok(())
    }

    async fn enable_table(&self, table: &TableName) -> StoreResult<()> {
        self.faults.check(StoreOp::EnableTable, table)?;
        let mut tables = self.write()?;
        lookup_mut(&mut tables, table)?.enabled = true;
        Ok(())
    }

    async fn delete_table(&self, table: &TableName) -> StoreResult<()> {
        self.faults.check(StoreOp::DeleteTable, table)?;
        let mut tables = self.write()?;
        lookup(&tables, table)?.require_disabled()?;
        tables.remove(table);
        Ok(())
    }

    async fn is_table_enabled(&self, table: &TableName) -> StoreResult<bool> {
        let tables = self.read()?;
        Ok(lookup(&tables, table)?.enabled)
    }

    async fn get_schema(&self, table: &TableName) -> StoreResult<TableDescriptor> {
        self.faults.check(StoreOp::GetSchema, table)?;
        let tables = self.read()?;
        Ok(lookup(&tables, table)?.descriptor.clone())
    }

    async fn modify_schema(
        &self,
        table: &TableName,
        mut descriptor: TableDescriptor,
    ) -> StoreResult<()> {
        self.faults.check(StoreOp::ModifySchema, table)?;
        if &descriptor.name != table {
            return Err(StoreError::InvalidDescriptor(format!(
                "descriptor for '{}' cannot replace schema of '{}'",
                descriptor.name, table
            )));
        }
        descriptor.validate()?;
        let mut tables = self.write()?;
        let mem = lookup_mut(&mut tables, table)?;
        mem.require_disabled()?;
        descriptor.version = mem.descriptor.version + 1;
        // Cells of removed families go away with the family.
        for cells in mem.rows.values_mut() {
            cells.retain(|column, _| descriptor.has_family(&column.family));
        }
        mem.rows.retain(|_, cells| !cells.is_empty());
        mem.descriptor = descriptor;
        Ok(())
    }

    async fn get(
        &self,
        table: &TableName,
        key: &[u8],
        columns: &[Column],
    ) -> StoreResult<Option<Row>> {
        self.faults.check(StoreOp::Get, table)?;
        let tables = self.read()?;
        let mem = lookup(&tables, table)?;
        mem.require_enabled()?;
        let row = mem
            .rows
            .get(key)
            .map(|cells| materialize(key, cells, columns))
            .filter(|row| !row.is_empty());
        Ok(row)
    }

    async fn put(&self, table: &TableName, put: Put) -> StoreResult<()> {
        self.faults.check(StoreOp::Put, table)?;
        if put.cells.is_empty() {
            return Err(StoreError::InvalidMutation(format!(
                "put for row {} has no cells",
                hex::encode(&put.key)
            )));
        }
        let mut tables = self.write()?;
        let mem = lookup_mut(&mut tables, table)?;
        mem.require_enabled()?;
        if let Some((column, _)) = put
            .cells
            .iter()
            .find(|(column, _)| !mem.descriptor.has_family(&column.family))
        {
            return Err(StoreError::NoSuchColumnFamily {
                table: table.clone(),
                family: column.family.clone(),
            });
        }
        let row = mem.rows.entry(put.key).or_default();
        for (column, value) in put.cells {
            let timestamp = self.next_timestamp();
            row.insert(column, CellValue { value, timestamp });
        }
        Ok(())
    }

    async fn delete(&self, table: &TableName, delete: Delete) -> StoreResult<()> {
        self.faults.check(StoreOp::Delete, table)?;
        let mut tables = self.write()?;
        let mem = lookup_mut(&mut tables, table)?;
        mem.require_enabled()?;
        if delete.is_whole_row() {
            mem.rows.remove(&delete.key);
            return Ok(());
        }
        let now_empty = match mem.rows.get_mut(&delete.key) {
            Some(cells) => {
                for column in &delete.columns {
                    cells.remove(column);
                }
                cells.is_empty()
            }
            None => false,
        };
        if now_empty {
            mem.rows.remove(&delete.key);
        }
        Ok(())
    }

    async fn scan(
        &self,
        table: &TableName,
        request: ScanRequest,
    ) -> StoreResult<Box<dyn ScanCursor>> {
        self.faults.check(StoreOp::Scan, table)?;
        let tables = self.read()?;
        let mem = lookup(&tables, table)?;
        mem.require_enabled()?;

        let mut rows = VecDeque::new();
        for (key, cells) in &mem.rows {
            if !request.range.contains(key) {
                if let Some(end) = &request.range.end {
                    if key.as_slice() >= end.as_slice() {
                        break;
                    }
                }
                continue;
            }
            let full = materialize(key, cells, &[]);
            if !matches_all(&request.filter, &full) {
                continue;
            }
            let mut row = full;
            row.project(&request.columns);
            if !row.is_empty() {
                rows.push_back(row);
            }
        }

        Ok(Box::new(MemCursor {
            table: table.clone(),
            rows,
            faults: self.faults.clone(),
            lease: Some(CursorLease::acquire(&self.open_cursors)),
        }))
    }

    async fn flush(&self, table: &TableName) -> StoreResult<()> {
        self.faults.check(StoreOp::Flush, table)?;
        let tables = self.read()?;
        lookup(&tables, table)?;
        Ok(())
    }
}
