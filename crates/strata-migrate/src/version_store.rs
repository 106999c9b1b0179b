//! Persisted record of where the database currently is.
//!
//! The backing table has one of two layouts:
//!
//! - number style: a single row `{version}` under a fixed key
//! - step style: one row `{description, class_name, installed_at}` per applied
//!   step, keyed by the step key
//!
//! The table is created lazily on first use. A table that already exists is
//! reused as is.

use crate::error::MigrationError;
use crate::id::{StepKey, VersionStyle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use strata_storage::{ColumnDef, ColumnType, StorageEngine, TableDef, Transaction};
use tracing::{debug, info};

/// Row key of the number-style scalar.
const VERSION_ROW: &[u8] = b"version";

/// Width of the step-style string columns.
const STEP_COLUMN_LENGTH: u32 = 255;

/// One applied step as stored in the version table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Human description derived from the step key's slug.
    pub description: String,
    /// The step key.
    pub class_name: String,
    /// When the step was applied.
    pub installed_at: DateTime<Utc>,
}

impl StepRecord {
    /// Build the record for `key` applied at `installed_at`.
    pub fn new(key: &StepKey, installed_at: DateTime<Utc>) -> Self {
        Self {
            description: key.description(),
            class_name: key.to_string(),
            installed_at,
        }
    }
}

/// Version bookkeeping over a `strata-storage` table.
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
    style: VersionStyle,
    created: bool,
}

impl VersionStore {
    /// Create a store for `table` in the given style. Nothing is touched until
    /// first use.
    pub fn new(table: impl Into<String>, style: VersionStyle) -> Self {
        Self {
            table: table.into(),
            style,
            created: false,
        }
    }

    /// Name of the backing table.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Style this store reads and writes.
    pub fn style(&self) -> VersionStyle {
        self.style
    }

    /// Whether the backing table is known to exist.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Create the backing table if it is missing.
    ///
    /// "Already exists" is the steady state and is swallowed. Any other
    /// storage error fails with `StorageCreateFailure`.
    pub fn ensure_created(&mut self, storage: &StorageEngine) -> Result<(), MigrationError> {
        if self.created {
            return Ok(());
        }

        match create_backing(storage, self.table_def()) {
            Ok(()) => {
                info!(table = %self.table, style = %self.style, "created version table");
            }
            Err(err) if err.is_table_exists() => {}
            Err(source) => {
                return Err(MigrationError::StorageCreateFailure {
                    table: self.table.clone(),
                    source,
                })
            }
        }

        self.created = true;
        Ok(())
    }

    /// Stage creation of the backing table inside `tx`.
    pub fn create_in(&mut self, tx: &mut Transaction<'_>) -> Result<(), MigrationError> {
        tx.create_table(self.table_def())
            .map_err(|source| MigrationError::StorageCreateFailure {
                table: self.table.clone(),
                source,
            })?;
        self.created = true;
        Ok(())
    }

    /// Stage removal of the backing table inside `tx`.
    pub fn drop_storage(&mut self, tx: &mut Transaction<'_>) -> Result<(), MigrationError> {
        if tx.has_table(&self.table)? {
            tx.drop_table(&self.table)?;
        }
        self.created = false;
        Ok(())
    }

    /// Switch the style this store reads and writes. The backing table has to
    /// be recreated afterwards.
    pub fn switch_style(&mut self, style: VersionStyle) {
        self.style = style;
        self.created = false;
    }

    /// Table layout for the current style.
    pub fn table_def(&self) -> TableDef {
        match self.style {
            VersionStyle::Number => TableDef::new(&self.table).with_column(
                ColumnDef::new("version", ColumnType::Integer)
                    .primary()
                    .autoincrement(),
            ),
            VersionStyle::Steps => TableDef::new(&self.table)
                .with_column(
                    ColumnDef::new("description", ColumnType::String)
                        .with_length(STEP_COLUMN_LENGTH),
                )
                .with_column(
                    ColumnDef::new("class_name", ColumnType::String)
                        .with_length(STEP_COLUMN_LENGTH)
                        .not_null()
                        .unique(),
                )
                .with_column(ColumnDef::new("installed_at", ColumnType::Timestamp).not_null()),
        }
    }

    // Number style.

    /// Stored scalar version, or 0 if never migrated.
    pub fn current_version(&self, tx: &Transaction<'_>) -> Result<u64, MigrationError> {
        let version = tx
            .get(&self.table, VERSION_ROW)?
            .and_then(|row| row.get("version").and_then(|v| v.as_u64()))
            .unwrap_or(0);
        Ok(version)
    }

    /// Whether a scalar version row exists yet.
    pub fn has_migrated(&self, tx: &Transaction<'_>) -> Result<bool, MigrationError> {
        Ok(tx.get(&self.table, VERSION_ROW)?.is_some())
    }

    /// Persist the scalar version, inserting the first row or updating it.
    pub fn set_version(&self, tx: &mut Transaction<'_>, version: u64) -> Result<(), MigrationError> {
        let row = json!({ "version": version });
        if self.has_migrated(tx)? {
            tx.update(&self.table, VERSION_ROW, row)?;
        } else {
            tx.insert(&self.table, VERSION_ROW, row)?;
        }
        debug!(table = %self.table, version, "set version");
        Ok(())
    }

    // Step style.

    /// Every applied step record, ordered by step key.
    pub fn step_records(&self, tx: &Transaction<'_>) -> Result<Vec<StepRecord>, MigrationError> {
        tx.scan(&self.table)?
            .into_iter()
            .map(|(_, row)| serde_json::from_value(row).map_err(MigrationError::from))
            .collect()
    }

    /// The set of applied step keys.
    pub fn applied_steps(&self, tx: &Transaction<'_>) -> Result<BTreeSet<StepKey>, MigrationError> {
        self.step_records(tx)?
            .iter()
            .map(|record| StepKey::parse(&record.class_name))
            .collect()
    }

    /// Record `key` as applied at `installed_at`.
    pub fn record_step(
        &self,
        tx: &mut Transaction<'_>,
        key: &StepKey,
        installed_at: DateTime<Utc>,
    ) -> Result<(), MigrationError> {
        let record = StepRecord::new(key, installed_at);
        tx.insert(
            &self.table,
            key.as_str().as_bytes(),
            serde_json::to_value(&record)?,
        )?;
        debug!(table = %self.table, step = %key, "recorded step");
        Ok(())
    }

    /// Remove `key` from the applied set. Fails with `NotApplied` unless
    /// exactly one row was removed.
    pub fn remove_step(&self, tx: &mut Transaction<'_>, key: &StepKey) -> Result<(), MigrationError> {
        if !tx.delete(&self.table, key.as_str().as_bytes())? {
            return Err(MigrationError::NotApplied {
                step: key.to_string(),
            });
        }
        debug!(table = %self.table, step = %key, "removed step");
        Ok(())
    }
}

fn create_backing(storage: &StorageEngine, def: TableDef) -> Result<(), strata_storage::Error> {
    let mut tx = storage.transaction();
    tx.create_table(def)?;
    tx.commit()
}
