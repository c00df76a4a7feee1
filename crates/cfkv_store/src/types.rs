//! Row-level data model shared by the store interface and its callers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a table in the store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TableName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A `(family, qualifier)` coordinate inside a row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Column {
    pub family: String,
    pub qualifier: String,
}

impl Column {
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.qualifier)
    }
}

/// Stored value of one cell plus the timestamp assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellValue {
    pub value: Vec<u8>,
    pub timestamp: u64,
}

/// One row as returned by `get` or a scan cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Row {
    pub key: Vec<u8>,
    pub cells: BTreeMap<Column, CellValue>,
}

impl Row {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn cell(&self, column: &Column) -> Option<&CellValue> {
        self.cells.get(column)
    }

    /// Returns the current value at `family:qualifier`, if present.
    pub fn value(&self, family: &str, qualifier: &str) -> Option<&[u8]> {
        self.cells
            .get(&Column::new(family, qualifier))
            .map(|cell| cell.value.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Keeps only `columns`; an empty projection keeps every cell.
    pub fn project(&mut self, columns: &[Column]) {
        if columns.is_empty() {
            return;
        }
        self.cells.retain(|column, _| columns.contains(column));
    }

    /// Lossy UTF-8 rendering of the key for logs.
    pub fn key_display(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// Half-open row-key range `[start, end)`. Missing bounds are unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowRange {
    pub start: Option<Vec<u8>>,
    pub end: Option<Vec<u8>>,
}

impl RowRange {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    pub fn starting_at(start: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Some(start.into()),
            end: None,
        }
    }

    /// Every key beginning with `prefix`.
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            start: Some(prefix.to_vec()),
            end: prefix_end(prefix),
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.as_ref().map_or(true, |start| start.is_empty()) && self.end.is_none()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        match &self.end {
            Some(end) => key < end.as_slice(),
            None => true,
        }
    }
}

/// Smallest key strictly greater than every key with `prefix`, or `None`
/// when the prefix is all `0xFF` (unbounded).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != 0xFF {
            out[idx] += 1;
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}

/// Cell writes for a single row, applied in submission order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Put {
    pub key: Vec<u8>,
    pub cells: Vec<(Column, Vec<u8>)>,
}

impl Put {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            cells: Vec::new(),
        }
    }

    pub fn add_column(
        &mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.cells
            .push((Column::new(family, qualifier), value.into()));
        self
    }

    pub fn with_column(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.add_column(family, qualifier, value);
        self
    }

    /// Final value per column once every cell in the put has been applied.
    pub fn final_values(&self) -> BTreeMap<&Column, &[u8]> {
        let mut out = BTreeMap::new();
        for (column, value) in &self.cells {
            out.insert(column, value.as_slice());
        }
        out
    }
}

/// Removal of a whole row (no columns) or of specific cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delete {
    pub key: Vec<u8>,
    pub columns: Vec<Column>,
}

impl Delete {
    pub fn row(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        self.columns.push(Column::new(family, qualifier));
        self
    }

    pub fn is_whole_row(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn removes(&self, column: &Column) -> bool {
        self.is_whole_row() || self.columns.contains(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_non_ff_byte() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xFF]), Some(vec![0x02]));
        assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn range_contains_is_half_open() {
        let range = RowRange::new(b"b".to_vec(), b"d".to_vec());
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(!range.contains(b"d"));
        assert!(RowRange::full().contains(b""));
        assert!(RowRange::prefix(b"ab").contains(b"abz"));
        assert!(!RowRange::prefix(b"ab").contains(b"ac"));
    }

    #[test]
    fn put_final_values_prefer_last_write() {
        let put = Put::new("r1")
            .with_column("info", "name", "a")
            .with_column("info", "name", "b")
            .with_column("info", "age", "3");
        let values = put.final_values();
        assert_eq!(values[&Column::new("info", "name")], b"b");
        assert_eq!(values.len(), 2);
    }
}
