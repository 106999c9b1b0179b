//! Storage engine implementation.

use super::key::{row_key, strip_prefix, table_prefix, validate_table_name};
use super::{Row, StorageConfig, TableDef};
use crate::error::Error;
use sled::{Db, Tree};

/// Tree name for table definitions.
const CATALOG_TREE: &str = "catalog";

/// Tree name for table rows.
const ROWS_TREE: &str = "rows";

/// The main storage engine wrapping sled.
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Tree for table definitions (table name -> JSON `TableDef`).
    catalog_tree: Tree,

    /// Tree for rows (table name + NUL + row key -> JSON row).
    rows_tree: Tree,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let sled_config = config.to_sled_config();
        let db = sled_config.open()?;
        let catalog_tree = db.open_tree(CATALOG_TREE)?;
        let rows_tree = db.open_tree(ROWS_TREE)?;

        Ok(Self {
            db,
            catalog_tree,
            rows_tree,
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Get the committed definition of a table.
    pub fn table(&self, name: &str) -> Result<Option<TableDef>, Error> {
        match self.catalog_tree.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a committed table exists.
    pub fn has_table(&self, name: &str) -> Result<bool, Error> {
        Ok(self.catalog_tree.contains_key(name.as_bytes())?)
    }

    /// List committed table names in ascending order.
    pub fn tables(&self) -> Result<Vec<String>, Error> {
        self.catalog_tree
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                Ok(String::from_utf8_lossy(&key).into_owned())
            })
            .collect()
    }

    /// Get a committed row.
    pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Row>, Error> {
        validate_table_name(table)?;
        match self.rows_tree.get(row_key(table, key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Scan the committed rows of a table in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<(Vec<u8>, Row)>, Error> {
        if !self.has_table(table)? {
            return Err(Error::TableNotFound(table.to_string()));
        }
        self.scan_rows(table)
    }

    /// Scan rows without checking the catalog.
    pub(crate) fn scan_rows(&self, table: &str) -> Result<Vec<(Vec<u8>, Row)>, Error> {
        let mut rows = Vec::new();
        for item in self.rows_tree.scan_prefix(table_prefix(table)) {
            let (key, value) = item?;
            if let Some(row_key) = strip_prefix(table, &key) {
                rows.push((row_key.to_vec(), serde_json::from_slice(&value)?));
            }
        }
        Ok(rows)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get database size in bytes.
    pub fn size_on_disk(&self) -> Result<u64, Error> {
        Ok(self.db.size_on_disk()?)
    }

    /// Get access to the catalog tree (for transactions).
    pub(crate) fn catalog_tree(&self) -> &Tree {
        &self.catalog_tree
    }

    /// Get access to the rows tree (for transactions).
    pub(crate) fn rows_tree(&self) -> &Tree {
        &self.rows_tree
    }

    /// Get the underlying sled database.
    pub fn db(&self) -> &Db {
        &self.db
    }
}
