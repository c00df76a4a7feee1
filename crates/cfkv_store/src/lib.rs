//! Client-side model of a column-family key-value store.
//!
//! This crate defines the narrow interface the index layer consumes:
//! - row and schema types (`Row`, `Put`, `Delete`, `TableDescriptor`),
//! - single-column predicates with value-type comparison semantics,
//! - the async [`StoreClient`] / [`ScanCursor`] traits,
//! - [`MemStore`], an in-process implementation with fault injection.

mod client;
mod descriptor;
mod error;
mod filter;
mod mem;
mod types;

pub use client::{ScanCursor, ScanRequest, StoreClient, DEFAULT_SCAN_CACHING};
pub use descriptor::{ColumnFamilyDescriptor, Compression, DataBlockEncoding, TableDescriptor};
pub use error::{StoreError, StoreResult};
pub use filter::{matches_all, parse_float, parse_integer, CompareOp, Predicate, ValueType};
pub use mem::{FaultInjector, MemStore, StoreOp};
pub use types::{prefix_end, CellValue, Column, Delete, Put, Row, RowRange, TableName};
