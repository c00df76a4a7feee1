use cfkv_store::{Column, Predicate, RowRange, TableName, ValueType};

use crate::context::ClientContext;
use crate::error::IndexResult;
use crate::indexing::{list_indexes, select_index_for, IndexSpec};

/// Row-key range, projection and predicates of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanQuery {
    pub range: RowRange,
    /// Columns to return; empty returns every column.
    pub columns: Vec<Column>,
    /// Conjunction; empty returns every row in the range.
    pub predicates: Vec<Predicate>,
}

impl ScanQuery {
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

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Scan the base table and filter every row.
    TableScan,
    /// Probe an index table for one value and fetch matching base rows.
    Index {
        index: IndexSpec,
        index_table: TableName,
        lookup_value: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedScan {
    pub path: AccessPath,
    /// Every predicate of the query with its value type resolved. All of them
    /// are checked against each row the access path yields.
    pub predicates: Vec<Predicate>,
    /// Base-table columns to read: the projection plus predicate columns.
    /// Empty reads every column.
    pub fetch_columns: Vec<Column>,
}

impl PlannedScan {
    pub fn is_indexed(&self) -> bool {
        matches!(self.path, AccessPath::Index { .. })
    }

    pub fn index(&self) -> Option<&IndexSpec> {
        match &self.path {
            AccessPath::Index { index, .. } => Some(index),
            AccessPath::TableScan => None,
        }
    }
}

/// Comparison semantics of `predicate`: its explicit type, else the type of
/// the index covering its column, else raw bytes.
pub fn resolve_value_type(predicate: &Predicate, specs: &[IndexSpec]) -> ValueType {
    predicate
        .value_type()
        .or_else(|| select_index_for(specs, predicate.column()).map(|spec| spec.value_type))
        .unwrap_or_default()
}

/// Whether an index built with `index_type` finds exactly the rows an
/// equality evaluated with `predicate_type` matches.
fn equality_compatible(index_type: ValueType, predicate_type: ValueType) -> bool {
    (index_type.is_integer() && predicate_type.is_integer())
        || (index_type.is_float() && predicate_type.is_float())
        || (!index_type.is_integer()
            && !index_type.is_float()
            && !predicate_type.is_integer()
            && !predicate_type.is_float())
}

/// Chooses how to execute `query` against `table`.
///
/// Design:
/// - The index path is taken only for exactly one equality predicate whose
///   column has a `Public` index with compatible semantics. Any other shape
///   (no equality, several equalities, comparison-only) scans the table.
/// - Both paths evaluate the full predicate list, so they return the same
///   rows. A direct scan yields them in row-key order, an indexed scan in
///   index-value order and then row-key order.
pub fn choose_access_path(
    ctx: &ClientContext,
    table: &TableName,
    specs: &[IndexSpec],
    query: &ScanQuery,
) -> PlannedScan {
    let predicates: Vec<Predicate> = query
        .predicates
        .iter()
        .map(|predicate| {
            let value_type = resolve_value_type(predicate, specs);
            predicate.clone().with_value_type(value_type)
        })
        .collect();

    let mut fetch_columns = Vec::new();
    if !query.columns.is_empty() {
        for column in query
            .columns
            .iter()
            .chain(predicates.iter().map(Predicate::column))
        {
            if !fetch_columns.contains(column) {
                fetch_columns.push(column.clone());
            }
        }
    }

    let mut equalities = predicates.iter().filter(|predicate| predicate.is_equality());
    let path = match (equalities.next(), equalities.next()) {
        (Some(lookup), None) => specs
            .iter()
            .find(|spec| {
                spec.is_public()
                    && spec.covers(lookup.column())
                    && equality_compatible(spec.value_type, lookup.value_type().unwrap_or_default())
            })
            .map(|spec| AccessPath::Index {
                index: spec.clone(),
                index_table: ctx.index_table_name(table, &spec.name),
                lookup_value: lookup.literal().to_vec(),
            })
            .unwrap_or(AccessPath::TableScan),
        _ => AccessPath::TableScan,
    };

    PlannedScan {
        path,
        predicates,
        fetch_columns,
    }
}

/// Plans `query` against the indexes currently registered on `table`.
pub async fn plan_scan(
    ctx: &ClientContext,
    table: &TableName,
    query: &ScanQuery,
) -> IndexResult<PlannedScan> {
    let specs = list_indexes(ctx, table).await?;
    Ok(choose_access_path(ctx, table, &specs, query))
}
