//! Transaction support for atomic schema and row changes.

use std::collections::BTreeMap;

use super::key::{row_key, table_prefix, validate_table_name};
use super::{Row, StorageEngine, TableDef};
use crate::error::Error;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::debug;

/// Buffered changes for a single table.
#[derive(Debug, Clone, Default)]
struct StagedTable {
    /// Definition as of this transaction. None means the table does not exist.
    def: Option<TableDef>,
    /// Committed rows are hidden (table was dropped or recreated).
    truncated: bool,
    /// Row writes: Some = upsert, None = delete.
    rows: BTreeMap<Vec<u8>, Option<Row>>,
}

/// A transaction over the table store.
///
/// Schema and row changes are buffered and applied atomically on commit.
/// Reads see the transaction's own uncommitted writes. Dropping a transaction
/// without committing discards everything.
pub struct Transaction<'a> {
    engine: &'a StorageEngine,
    staged: BTreeMap<String, StagedTable>,
    op_count: usize,
}

impl<'a> Transaction<'a> {
    /// Create a new transaction.
    pub(crate) fn new(engine: &'a StorageEngine) -> Self {
        Self {
            engine,
            staged: BTreeMap::new(),
            op_count: 0,
        }
    }

    /// Get a table definition as seen by this transaction.
    pub fn table(&self, name: &str) -> Result<Option<TableDef>, Error> {
        match self.staged.get(name) {
            Some(staged) => Ok(staged.def.clone()),
            None => self.engine.table(name),
        }
    }

    /// Check whether a table exists as seen by this transaction.
    pub fn has_table(&self, name: &str) -> Result<bool, Error> {
        match self.staged.get(name) {
            Some(staged) => Ok(staged.def.is_some()),
            None => self.engine.has_table(name),
        }
    }

    /// Create a table. Fails with `TableExists` if the name is taken.
    pub fn create_table(&mut self, def: TableDef) -> Result<(), Error> {
        validate_table_name(&def.name)?;
        if self.has_table(&def.name)? {
            return Err(Error::TableExists(def.name));
        }

        let name = def.name.clone();
        self.staged.insert(
            name,
            StagedTable {
                def: Some(def),
                truncated: true,
                rows: BTreeMap::new(),
            },
        );
        self.op_count += 1;
        Ok(())
    }

    /// Drop a table and all its rows.
    pub fn drop_table(&mut self, name: &str) -> Result<(), Error> {
        self.require_table(name)?;
        self.staged.insert(
            name.to_string(),
            StagedTable {
                def: None,
                truncated: true,
                rows: BTreeMap::new(),
            },
        );
        self.op_count += 1;
        Ok(())
    }

    /// Replace the definition of an existing table. Rows are untouched.
    pub fn alter_table(&mut self, def: TableDef) -> Result<(), Error> {
        self.require_table(&def.name)?;
        let staged = self.stage(&def.name)?;
        staged.def = Some(def);
        self.op_count += 1;
        Ok(())
    }

    /// Rename a table, moving its rows.
    pub fn rename_table(&mut self, from: &str, to: &str) -> Result<(), Error> {
        validate_table_name(to)?;
        let mut def = self
            .table(from)?
            .ok_or_else(|| Error::TableNotFound(from.to_string()))?;
        if self.has_table(to)? {
            return Err(Error::TableExists(to.to_string()));
        }

        let rows = self.scan(from)?;
        self.drop_table(from)?;
        def.name = to.to_string();
        self.create_table(def)?;

        let staged = self.stage(to)?;
        for (key, row) in rows {
            staged.rows.insert(key, Some(row));
        }
        Ok(())
    }

    /// Read a row.
    pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Row>, Error> {
        self.require_table(table)?;
        if let Some(staged) = self.staged.get(table) {
            if let Some(cached) = staged.rows.get(key) {
                return Ok(cached.clone());
            }
            if staged.truncated {
                return Ok(None);
            }
        }
        self.engine.get(table, key)
    }

    /// Scan all rows of a table in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Row)>, Error> {
        self.require_table(table)?;
        let staged = self.staged.get(table);

        let mut rows: BTreeMap<Vec<u8>, Row> = match staged {
            Some(staged) if staged.truncated => BTreeMap::new(),
            _ => self.engine.scan_rows(table)?.into_iter().collect(),
        };

        if let Some(staged) = staged {
            for (key, row) in &staged.rows {
                match row {
                    Some(row) => {
                        rows.insert(key.clone(), row.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                }
            }
        }

        Ok(rows.into_iter().collect())
    }

    /// Insert a new row. Fails with `DuplicateKey` if the key exists.
    pub fn insert(&mut self, table: &str, key: &[u8], row: Row) -> Result<(), Error> {
        if self.get(table, key)?.is_some() {
            return Err(Error::DuplicateKey {
                table: table.to_string(),
                key: String::from_utf8_lossy(key).into_owned(),
            });
        }
        self.write(table, key, Some(row))
    }

    /// Update an existing row. Fails with `RowNotFound` if the key is absent.
    pub fn update(&mut self, table: &str, key: &[u8], row: Row) -> Result<(), Error> {
        if self.get(table, key)?.is_none() {
            return Err(Error::RowNotFound {
                table: table.to_string(),
                key: String::from_utf8_lossy(key).into_owned(),
            });
        }
        self.write(table, key, Some(row))
    }

    /// Insert or replace a row.
    pub fn put(&mut self, table: &str, key: &[u8], row: Row) -> Result<(), Error> {
        self.require_table(table)?;
        self.write(table, key, Some(row))
    }

    /// Delete a row. Returns whether a row was removed.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> Result<bool, Error> {
        if self.get(table, key)?.is_none() {
            return Ok(false);
        }
        self.write(table, key, None)?;
        Ok(true)
    }

    /// Number of buffered operations.
    pub fn operation_count(&self) -> usize {
        self.op_count
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.op_count == 0
    }

    /// Commit the transaction atomically.
    ///
    /// All operations succeed or none do.
    pub fn commit(self) -> Result<(), Error> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let catalog_tree = self.engine.catalog_tree();
        let rows_tree = self.engine.rows_tree();

        // Everything fallible outside sled's closure is resolved up front.
        let mut cleared = Vec::new();
        let mut catalog = Vec::with_capacity(self.staged.len());
        let mut writes = Vec::new();

        for (name, staged) in &self.staged {
            if staged.truncated {
                for key in rows_tree.scan_prefix(table_prefix(name)).keys() {
                    cleared.push(key?.to_vec());
                }
            }

            let encoded_def = match &staged.def {
                Some(def) => Some(serde_json::to_vec(def)?),
                None => None,
            };
            catalog.push((name.as_bytes().to_vec(), encoded_def));

            for (key, row) in &staged.rows {
                let encoded_row = match row {
                    Some(row) => Some(serde_json::to_vec(row)?),
                    None => None,
                };
                writes.push((row_key(name, key), encoded_row));
            }
        }

        let result: Result<(), TransactionError<Error>> =
            (catalog_tree, rows_tree).transaction(|(catalog_tx, rows_tx)| {
                for key in &cleared {
                    rows_tx.remove(key.as_slice())?;
                }
                for (key, value) in &writes {
                    match value {
                        Some(bytes) => {
                            rows_tx.insert(key.as_slice(), bytes.as_slice())?;
                        }
                        None => {
                            rows_tx.remove(key.as_slice())?;
                        }
                    }
                }
                for (name, def) in &catalog {
                    match def {
                        Some(bytes) => {
                            catalog_tx.insert(name.as_slice(), bytes.as_slice())?;
                        }
                        None => {
                            catalog_tx.remove(name.as_slice())?;
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<Error>>(())
            });

        match result {
            Ok(()) => {
                debug!(
                    tables = catalog.len(),
                    rows_written = writes.len(),
                    rows_cleared = cleared.len(),
                    "transaction committed"
                );
                Ok(())
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Rollback the transaction (discard all pending operations).
    pub fn rollback(self) {
        debug!(operations = self.op_count, "transaction rolled back");
    }

    fn require_table(&self, name: &str) -> Result<(), Error> {
        if self.has_table(name)? {
            Ok(())
        } else {
            Err(Error::TableNotFound(name.to_string()))
        }
    }

    fn stage(&mut self, name: &str) -> Result<&mut StagedTable, Error> {
        if !self.staged.contains_key(name) {
            let def = self.engine.table(name)?;
            self.staged.insert(
                name.to_string(),
                StagedTable {
                    def,
                    ..Default::default()
                },
            );
        }
        self.staged
            .get_mut(name)
            .ok_or_else(|| Error::Transaction(format!("table '{}' not staged", name)))
    }

    fn write(&mut self, table: &str, key: &[u8], row: Option<Row>) -> Result<(), Error> {
        let staged = self.stage(table)?;
        staged.rows.insert(key.to_vec(), row);
        self.op_count += 1;
        Ok(())
    }
}

impl StorageEngine {
    /// Begin a new transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }
}
