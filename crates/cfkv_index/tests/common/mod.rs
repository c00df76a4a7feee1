//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cfkv_index::indexing::encode_index_entry_key;
use cfkv_index::{
    create_index, create_table, put_row, scan, ClientContext, IndexConfig, IndexSpec, ScanQuery,
};
use cfkv_store::{
    Column, ColumnFamilyDescriptor, Compression, DataBlockEncoding, Delete, MemStore, Predicate,
    Put, Row, ScanCursor, ScanRequest, StoreClient, StoreOp, StoreResult, TableDescriptor,
    TableName, ValueType,
};
use tokio::sync::oneshot;

pub const FAMILY: &str = "info";
pub const NAME_INDEX: &str = "index_name";

/// Sample rows: key, name, sex, age, address.
pub const PEOPLE: [(&str, &str, &str, &str, &str); 6] = [
    ("2017122601", "zhang san", "M", "18", "beijing"),
    ("2017122602", "li si", "F", "22", "shanghai"),
    ("2017122603", "wang wu", "M", "35", "guangzhou"),
    ("2017122604", "zhang san", "F", "27", "shenzhen"),
    ("2017122605", "zhao liu", "F", "18", "hangzhou"),
    ("2017122606", "sun qi", "M", "41", "chengdu"),
];

/// Store plus a context over it, with a short drain timeout.
pub fn setup() -> (Arc<MemStore>, ClientContext) {
    let store = Arc::new(MemStore::new());
    let config = IndexConfig {
        schema_drain_timeout: Duration::from_millis(200),
        fetch_concurrency: 4,
        ..IndexConfig::default()
    };
    let ctx = ClientContext::new(store.clone(), config);
    (store, ctx)
}

/// Like [`setup`], with a [`ScriptedStore`] between the context and the store.
pub fn scripted_setup() -> (Arc<ScriptedStore>, Arc<ClientContext>) {
    let (store, ctx) = setup();
    let scripted = Arc::new(ScriptedStore::new(store));
    let ctx = ClientContext::new(scripted.clone(), ctx.config().clone());
    (scripted, Arc::new(ctx))
}

pub fn people_descriptor(table: &TableName) -> TableDescriptor {
    TableDescriptor::new(table.clone()).with_family(
        ColumnFamilyDescriptor::new(FAMILY)
            .with_encoding(DataBlockEncoding::PrefixTree)
            .with_compression(Compression::Snappy),
    )
}

pub fn person_put(key: &str, name: &str, sex: &str, age: &str, address: &str) -> Put {
    Put::new(key)
        .with_column(FAMILY, "name", name)
        .with_column(FAMILY, "sex", sex)
        .with_column(FAMILY, "age", age)
        .with_column(FAMILY, "address", address)
}

/// Creates `table` and loads [`PEOPLE`].
pub async fn create_people_table(ctx: &ClientContext, table: &TableName) -> Result<()> {
    create_table(ctx, people_descriptor(table)).await?;
    for (key, name, sex, age, address) in PEOPLE {
        let outcome = put_row(ctx, table, person_put(key, name, sex, age, address)).await?;
        assert!(outcome.is_consistent());
    }
    Ok(())
}

pub async fn create_name_index(ctx: &ClientContext, table: &TableName) -> Result<IndexSpec> {
    let spec = IndexSpec::new(table.clone(), NAME_INDEX, FAMILY, "name", ValueType::String);
    Ok(create_index(ctx, table, spec).await?)
}

pub async fn scan_all(ctx: &ClientContext, table: &TableName, query: ScanQuery) -> Result<Vec<Row>> {
    Ok(scan(ctx, table, query).await?.collect_rows().await?)
}

pub fn keys(rows: &[Row]) -> Vec<String> {
    rows.iter().map(Row::key_display).collect()
}

pub fn name_equals(value: &str) -> Predicate {
    Predicate::equals(FAMILY, "name", value)
}

/// Keys currently stored in the index table of `index` on `table`.
pub async fn index_entry_keys(
    ctx: &ClientContext,
    table: &TableName,
    index: &str,
) -> Result<BTreeSet<Vec<u8>>> {
    let index_table = ctx.index_table_name(table, index);
    let mut cursor = ctx.store().scan(&index_table, ScanRequest::new()).await?;
    let mut out = BTreeSet::new();
    while let Some(row) = cursor.next_row().await? {
        out.insert(row.key);
    }
    cursor.close().await?;
    Ok(out)
}

/// Entry keys the index of `spec` should hold for the current base rows.
pub async fn expected_entry_keys(
    ctx: &ClientContext,
    table: &TableName,
    spec: &IndexSpec,
) -> Result<BTreeSet<Vec<u8>>> {
    let request = ScanRequest::new().with_columns(vec![spec.column.clone()]);
    let mut cursor = ctx.store().scan(table, request).await?;
    let mut out = BTreeSet::new();
    while let Some(row) = cursor.next_row().await? {
        if let Some(cell) = row.cell(&spec.column) {
            out.insert(encode_index_entry_key(spec.value_type, &cell.value, &row.key));
        }
    }
    cursor.close().await?;
    Ok(out)
}

pub async fn assert_index_consistent(
    ctx: &ClientContext,
    table: &TableName,
    spec: &IndexSpec,
) -> Result<()> {
    let expected = expected_entry_keys(ctx, table, spec).await?;
    let actual = index_entry_keys(ctx, table, &spec.name).await?;
    assert_eq!(
        actual, expected,
        "index '{}' on '{}' diverged from its base table",
        spec.name, table
    );
    Ok(())
}

/// Row contents without write timestamps, for comparing scans across tables.
pub fn row_values(rows: &[Row]) -> Vec<(String, Vec<(String, String)>)> {
    rows.iter()
        .map(|row| {
            let cells = row
                .cells
                .iter()
                .map(|(column, cell)| {
                    (
                        column.to_string(),
                        String::from_utf8_lossy(&cell.value).into_owned(),
                    )
                })
                .collect();
            (row.key_display(), cells)
        })
        .collect()
}

/// Signals for one paused store call.
pub struct PausedCall {
    /// Fires once the call reached the store and is waiting.
    pub reached: oneshot::Receiver<()>,
    /// Lets the call proceed.
    pub resume: oneshot::Sender<()>,
}

struct PauseTrigger {
    op: StoreOp,
    table: TableName,
    reached: oneshot::Sender<()>,
    resume: oneshot::Receiver<()>,
}

/// [`MemStore`] wrapper that can hold one call mid-flight or ignore scan
/// filters, to drive interleavings the in-process store never produces.
pub struct ScriptedStore {
    inner: Arc<MemStore>,
    pause: Mutex<Option<PauseTrigger>>,
    ignore_filters: AtomicBool,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemStore>) -> Self {
        Self {
            inner,
            pause: Mutex::new(None),
            ignore_filters: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &Arc<MemStore> {
        &self.inner
    }

    /// Holds the next `op` on `table`. Row calls are held before they reach
    /// the store; a scan is held once its cursor has taken its snapshot.
    pub fn pause_next(&self, op: StoreOp, table: &TableName) -> PausedCall {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *self.pause.lock().expect("pause lock") = Some(PauseTrigger {
            op,
            table: table.clone(),
            reached: reached_tx,
            resume: resume_rx,
        });
        PausedCall {
            reached: reached_rx,
            resume: resume_tx,
        }
    }

    /// Drops the filter of every later scan request.
    pub fn ignore_scan_filters(&self) {
        self.ignore_filters.store(true, Ordering::SeqCst);
    }

    async fn checkpoint(&self, op: StoreOp, table: &TableName) {
        let trigger = {
            let mut pause = self.pause.lock().expect("pause lock");
            match pause.as_ref() {
                Some(trigger) if trigger.op == op && &trigger.table == table => pause.take(),
                _ => None,
            }
        };
        if let Some(trigger) = trigger {
            let _ = trigger.reached.send(());
            let _ = trigger.resume.await;
        }
    }
}

#[async_trait]
impl StoreClient for ScriptedStore {
    async fn table_exists(&self, table: &TableName) -> StoreResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn create_table(&self, descriptor: TableDescriptor) -> StoreResult<()> {
        self.inner.create_table(descriptor).await
    }

    async fn disable_table(&self, table: &TableName) -> StoreResult<()> {
        self.inner.disable_table(table).await
    }

    async fn enable_table(&self, table: &TableName) -> StoreResult<()> {
        self.inner.enable_table(table).await
    }

    async fn delete_table(&self, table: &TableName) -> StoreResult<()> {
        self.inner.delete_table(table).await
    }

    async fn is_table_enabled(&self, table: &TableName) -> StoreResult<bool> {
        self.inner.is_table_enabled(table).await
    }

    async fn get_schema(&self, table: &TableName) -> StoreResult<TableDescriptor> {
        self.inner.get_schema(table).await
    }

    async fn modify_schema(
        &self,
        table: &TableName,
        descriptor: TableDescriptor,
    ) -> StoreResult<()> {
        self.inner.modify_schema(table, descriptor).await
    }

    async fn get(
        &self,
        table: &TableName,
        key: &[u8],
        columns: &[Column],
    ) -> StoreResult<Option<Row>> {
        self.checkpoint(StoreOp::Get, table).await;
        self.inner.get(table, key, columns).await
    }

    async fn put(&self, table: &TableName, put: Put) -> StoreResult<()> {
        self.checkpoint(StoreOp::Put, table).await;
        self.inner.put(table, put).await
    }

    async fn delete(&self, table: &TableName, delete: Delete) -> StoreResult<()> {
        self.checkpoint(StoreOp::Delete, table).await;
        self.inner.delete(table, delete).await
    }

    async fn scan(
        &self,
        table: &TableName,
        mut request: ScanRequest,
    ) -> StoreResult<Box<dyn ScanCursor>> {
        if self.ignore_filters.load(Ordering::SeqCst) {
            request.filter.clear();
        }
        let cursor = self.inner.scan(table, request).await?;
        self.checkpoint(StoreOp::Scan, table).await;
        Ok(cursor)
    }

    async fn flush(&self, table: &TableName) -> StoreResult<()> {
        self.inner.flush(table).await
    }
}
