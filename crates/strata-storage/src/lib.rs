//! Strata Storage - transactional table store backing the migration engine.
//!
//! Tables live in a sled database: a catalog tree maps table names to their
//! [`TableDef`], and a rows tree holds JSON rows keyed by table and row key.
//! All access goes through a [`Transaction`], which buffers schema and row
//! changes and applies them atomically on commit.

mod config;
mod engine;
pub mod error;
pub mod key;
mod table;
mod transaction;

pub use config::StorageConfig;
pub use engine::StorageEngine;
pub use error::Error;
pub use table::{
    ColumnDef, ColumnType, ConstraintDef, ConstraintKind, ForeignKeyDef, IndexDef, TableDef,
};
pub use transaction::Transaction;

/// A stored row.
pub type Row = serde_json::Value;
