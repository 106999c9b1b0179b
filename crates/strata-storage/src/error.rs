//! Storage error types.

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying sled error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Row or catalog entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A table with this name already exists.
    #[error("table '{0}' already exists")]
    TableExists(String),

    /// No table with this name exists.
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// Table name is empty or contains a NUL byte.
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    /// Insert hit an existing row key.
    #[error("duplicate key {key:?} in table '{table}'")]
    DuplicateKey {
        /// Table name.
        table: String,
        /// Offending row key, lossily decoded.
        key: String,
    },

    /// Update targeted a row that does not exist.
    #[error("row {key:?} not found in table '{table}'")]
    RowNotFound {
        /// Table name.
        table: String,
        /// Missing row key, lossily decoded.
        key: String,
    },

    /// A schema alteration referenced a missing or duplicate element.
    #[error("invalid schema change on '{table}': {reason}")]
    InvalidSchema {
        /// Table name.
        table: String,
        /// What was wrong.
        reason: String,
    },

    /// Transaction could not be applied.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl Error {
    /// True if this error only reports that a table is already present.
    pub fn is_table_exists(&self) -> bool {
        matches!(self, Error::TableExists(_))
    }
}
