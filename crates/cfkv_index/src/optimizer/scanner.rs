use std::collections::VecDeque;
use std::sync::Arc;

use cfkv_store::{
    matches_all, Column, Row, RowRange, ScanCursor, ScanRequest, StoreClient, TableName,
};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

use crate::context::ClientContext;
use crate::error::{IndexError, IndexResult};
use crate::indexing::{
    decode_index_entry_row_key, index_lookup_range, list_indexes, INDEX_FAMILY,
    INDEX_MARKER_QUALIFIER,
};
use crate::metrics::IndexMetrics;
use crate::optimizer::finish_with_cleanup;
use crate::optimizer::planner::{choose_access_path, AccessPath, PlannedScan, ScanQuery};
use crate::schema::TableHandle;

enum RowSource {
    Direct {
        cursor: Box<dyn ScanCursor>,
    },
    Indexed {
        cursor: Box<dyn ScanCursor>,
        pending: VecDeque<Row>,
        exhausted: bool,
    },
}

impl RowSource {
    fn cursor_mut(&mut self) -> &mut Box<dyn ScanCursor> {
        match self {
            Self::Direct { cursor } | Self::Indexed { cursor, .. } => cursor,
        }
    }
}

/// Open scan over one table. Holds a table handle until closed or dropped,
/// so schema changes on the table wait for it.
pub struct PredicateScanner {
    _handle: TableHandle,
    store: Arc<dyn StoreClient>,
    metrics: Arc<IndexMetrics>,
    table: TableName,
    plan: PlannedScan,
    columns: Vec<Column>,
    range: RowRange,
    fetch_concurrency: usize,
    source: RowSource,
}

/// Opens a scan of `table` for `query`, through an index when one applies.
pub async fn scan(
    ctx: &ClientContext,
    table: &TableName,
    query: ScanQuery,
) -> IndexResult<PredicateScanner> {
    let handle = ctx.open_table(table)?;
    let specs = list_indexes(ctx, table).await?;
    let plan = choose_access_path(ctx, table, &specs, &query);
    let caching = ctx.config().scan_caching;

    let source = match &plan.path {
        AccessPath::TableScan => {
            let mut request = ScanRequest::new()
                .with_range(query.range.clone())
                .with_columns(plan.fetch_columns.clone())
                .with_caching(caching);
            for predicate in &plan.predicates {
                request = request.with_filter(predicate.clone());
            }
            let cursor = ctx.store().scan(table, request).await?;
            ctx.metrics().record_direct_scan();
            RowSource::Direct { cursor }
        }
        AccessPath::Index {
            index,
            index_table,
            lookup_value,
        } => {
            let request = ScanRequest::new()
                .with_range(index_lookup_range(index.value_type, lookup_value))
                .with_column(INDEX_FAMILY, INDEX_MARKER_QUALIFIER)
                .with_caching(caching);
            let cursor = ctx.store().scan(index_table, request).await?;
            ctx.metrics().record_indexed_scan();
            RowSource::Indexed {
                cursor,
                pending: VecDeque::new(),
                exhausted: false,
            }
        }
    };
    debug!(
        table = %table,
        index = plan.index().map(|spec| spec.name.as_str()).unwrap_or("-"),
        predicates = plan.predicates.len(),
        "scan opened"
    );

    Ok(PredicateScanner {
        _handle: handle,
        store: ctx.store().clone(),
        metrics: ctx.metrics().clone(),
        table: table.clone(),
        plan,
        columns: query.columns,
        range: query.range,
        fetch_concurrency: ctx.config().fetch_concurrency.max(1),
        source,
    })
}

impl PredicateScanner {
    pub fn plan(&self) -> &PlannedScan {
        &self.plan
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Next matching row in key order, or `None` once exhausted.
    pub async fn next_row(&mut self) -> IndexResult<Option<Row>> {
        let row = match self.source {
            RowSource::Direct { .. } => self.next_direct().await?,
            RowSource::Indexed { .. } => self.next_indexed().await?,
        };
        if row.is_some() {
            self.metrics.record_row_returned();
        }
        Ok(row)
    }

    async fn next_direct(&mut self) -> IndexResult<Option<Row>> {
        let RowSource::Direct { cursor } = &mut self.source else {
            return Ok(None);
        };
        while let Some(mut row) = cursor.next_row().await? {
            self.metrics.record_rows_scanned(1);
            if !matches_all(&self.plan.predicates, &row) {
                continue;
            }
            row.project(&self.columns);
            if !row.is_empty() {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    async fn next_indexed(&mut self) -> IndexResult<Option<Row>> {
        let RowSource::Indexed {
            cursor,
            pending,
            exhausted,
        } = &mut self.source
        else {
            return Ok(None);
        };
        loop {
            if let Some(row) = pending.pop_front() {
                return Ok(Some(row));
            }
            if *exhausted {
                return Ok(None);
            }

            let mut keys = Vec::with_capacity(self.fetch_concurrency);
            while keys.len() < self.fetch_concurrency {
                match cursor.next_row().await? {
                    Some(entry) => {
                        let key = decode_index_entry_row_key(&entry.key)?;
                        if self.range.contains(&key) {
                            keys.push(key);
                        }
                    }
                    None => {
                        *exhausted = true;
                        break;
                    }
                }
            }

            let fetched = fetch_rows(
                &self.store,
                &self.table,
                keys,
                &self.plan.fetch_columns,
                self.fetch_concurrency,
            )
            .await?;
            // A missing base row means the entry outlived its row.
            for mut row in fetched.into_iter().flatten() {
                self.metrics.record_rows_scanned(1);
                if !matches_all(&self.plan.predicates, &row) {
                    continue;
                }
                row.project(&self.columns);
                if !row.is_empty() {
                    pending.push_back(row);
                }
            }
        }
    }

    /// Releases the store cursor and the table handle.
    pub async fn close(mut self) -> IndexResult<()> {
        let result = self
            .source
            .cursor_mut()
            .close()
            .await
            .map_err(IndexError::from);
        if let Err(err) = &result {
            warn!(table = %self.table, error = %err, "failed to close scan cursor");
        }
        result
    }

    /// Reads every remaining row, then closes.
    pub async fn collect_rows(self) -> IndexResult<Vec<Row>> {
        self.collect_limit(usize::MAX).await
    }

    /// Reads up to `limit` rows, then closes without draining the rest.
    ///
    /// The scanner is closed on every path. When reading failed, that error
    /// is returned even if closing also fails.
    pub async fn collect_limit(mut self, limit: usize) -> IndexResult<Vec<Row>> {
        let mut rows = Vec::new();
        let read = loop {
            if rows.len() >= limit {
                break Ok(());
            }
            match self.next_row().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        let closed = self.close().await;
        finish_with_cleanup(read, closed, "scan")?;
        Ok(rows)
    }
}

/// Point-fetches `keys` with bounded concurrency, preserving key order.
async fn fetch_rows(
    store: &Arc<dyn StoreClient>,
    table: &TableName,
    keys: Vec<Vec<u8>>,
    columns: &[Column],
    concurrency: usize,
) -> IndexResult<Vec<Option<Row>>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    stream::iter(
        keys.into_iter()
            .map(move |key| async move { store.get(table, &key, columns).await }),
    )
    .buffered(concurrency.max(1))
    .map_err(IndexError::from)
    .try_collect()
    .await
}

/// Reads one row by key through the table gate.
pub async fn get_row(
    ctx: &ClientContext,
    table: &TableName,
    key: &[u8],
    columns: &[Column],
) -> IndexResult<Option<Row>> {
    let _handle = ctx.open_table(table)?;
    Ok(ctx.store().get(table, key, columns).await?)
}
