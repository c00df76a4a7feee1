use thiserror::Error;

use crate::types::TableName;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures reported by a [`crate::StoreClient`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("table '{0}' not found")]
    TableNotFound(TableName),

    #[error("table '{0}' already exists")]
    TableExists(TableName),

    #[error("table '{0}' is disabled")]
    TableDisabled(TableName),

    #[error("table '{0}' must be disabled for this operation")]
    TableNotDisabled(TableName),

    #[error("column family '{family}' does not exist in table '{table}'")]
    NoSuchColumnFamily { table: TableName, family: String },

    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("scan cursor already closed")]
    CursorClosed,

    /// Transport or cluster-level failure; the call had no effect.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}
