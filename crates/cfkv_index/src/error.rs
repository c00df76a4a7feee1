//! Error taxonomy surfaced by index and schema operations.

use std::fmt;

use cfkv_store::{StoreError, TableName};
use thiserror::Error;

use crate::schema::TableState;

pub type IndexResult<T> = Result<T, IndexError>;

/// Stable classification attached to every failure or warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TableUnavailable,
    DuplicateIndex,
    IndexNotFound,
    SchemaMutation,
    TransientStore,
    InvalidRequest,
    IndexInconsistency,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TableUnavailable => "TABLE_UNAVAILABLE",
            Self::DuplicateIndex => "DUPLICATE_INDEX",
            Self::IndexNotFound => "INDEX_NOT_FOUND",
            Self::SchemaMutation => "SCHEMA_MUTATION",
            Self::TransientStore => "TRANSIENT_STORE",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::IndexInconsistency => "INDEX_INCONSISTENCY",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The table is not `Enabled`; retry after backoff.
    #[error("table '{table}' is unavailable (state: {state})")]
    TableUnavailable { table: TableName, state: TableState },

    #[error("index '{index}' already exists on table '{table}'")]
    DuplicateIndex { table: TableName, index: String },

    #[error("index '{index}' not found on table '{table}'")]
    IndexNotFound { table: TableName, index: String },

    /// The modify step of a schema transition failed. The table stays
    /// disabled with its previous descriptor until an operator intervenes.
    #[error("schema change on table '{table}' failed, table left disabled: {cause}")]
    SchemaMutation {
        table: TableName,
        #[source]
        cause: Box<IndexError>,
    },

    #[error("transient store failure: {0}")]
    TransientStore(#[source] StoreError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl IndexError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TableUnavailable { .. } => ErrorCode::TableUnavailable,
            Self::DuplicateIndex { .. } => ErrorCode::DuplicateIndex,
            Self::IndexNotFound { .. } => ErrorCode::IndexNotFound,
            Self::SchemaMutation { .. } => ErrorCode::SchemaMutation,
            Self::TransientStore(_) => ErrorCode::TransientStore,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// Whether a caller may retry the same call after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TableUnavailable { .. } | Self::TransientStore(_)
        )
    }
}

impl From<StoreError> for IndexError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TableDisabled(table) => Self::TableUnavailable {
                table,
                state: TableState::Disabled,
            },
            StoreError::Unavailable(_) => Self::TransientStore(err),
            other => Self::InvalidRequest(other.to_string()),
        }
    }
}

/// Warning returned when an index mutation failed after its base mutation
/// was applied. The base write stands; the index entry may be stale until
/// the index is rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInconsistency {
    pub table: TableName,
    pub index: String,
    pub row_key: Vec<u8>,
    pub reason: String,
}

impl IndexInconsistency {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::IndexInconsistency
    }
}

impl fmt::Display for IndexInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] index '{}' on table '{}' may be stale for row {}: {}",
            self.code(),
            self.index,
            self.table,
            hex::encode(&self.row_key),
            self.reason
        )
    }
}
