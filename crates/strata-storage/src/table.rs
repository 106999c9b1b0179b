//! Table definitions stored in the catalog.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Floating point number.
    Float,
    /// Fixed-precision decimal.
    Decimal,
    /// Boolean.
    Boolean,
    /// Bounded string (see `ColumnDef::length`).
    String,
    /// Unbounded text.
    Text,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    Timestamp,
    /// Binary data.
    Blob,
    /// Arbitrary JSON document.
    Json,
}

fn default_nullable() -> bool {
    true
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Maximum length for bounded types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Whether NULL is allowed.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Values are generated on insert.
    #[serde(default)]
    pub autoincrement: bool,
    /// Values must be unique.
    #[serde(default)]
    pub unique: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ColumnDef {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: None,
            nullable: true,
            primary: false,
            autoincrement: false,
            unique: false,
            default: None,
        }
    }

    /// Set the maximum length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Mark as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as primary key (implies NOT NULL).
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    /// Mark as autoincrement.
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

impl IndexDef {
    /// Create a non-unique index.
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
        }
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Kind of a named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConstraintKind {
    /// Columns must be unique together.
    Unique {
        /// Constrained columns.
        columns: Vec<String>,
    },
    /// Primary key over the given columns.
    PrimaryKey {
        /// Key columns.
        columns: Vec<String>,
    },
    /// Check expression.
    Check {
        /// Expression text, stored verbatim.
        expression: String,
    },
}

/// A named table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDef {
    /// Constraint name.
    pub name: String,
    /// Constraint kind.
    #[serde(flatten)]
    pub kind: ConstraintKind,
}

/// A foreign key definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Foreign key name.
    pub name: String,
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// Action on delete (e.g. "CASCADE").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<String>,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Named constraints.
    #[serde(default)]
    pub constraints: Vec<ConstraintDef>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a column (builder form, no duplicate check).
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Add an index (builder form, no duplicate check).
    pub fn with_index(mut self, index: IndexDef) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Add a column.
    pub fn add_column(&mut self, column: ColumnDef) -> Result<(), Error> {
        if self.column(&column.name).is_some() {
            return Err(self.invalid(format!("column '{}' already exists", column.name)));
        }
        self.columns.push(column);
        Ok(())
    }

    /// Remove a column, returning its definition.
    pub fn remove_column(&mut self, name: &str) -> Result<ColumnDef, Error> {
        let pos = self.column_position(name)?;
        Ok(self.columns.remove(pos))
    }

    /// Rename a column. Indexes and constraints follow the new name.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), Error> {
        if self.column(to).is_some() {
            return Err(self.invalid(format!("column '{}' already exists", to)));
        }
        let pos = self.column_position(from)?;
        self.columns[pos].name = to.to_string();

        let rename = |columns: &mut Vec<String>| {
            for column in columns.iter_mut().filter(|c| c.as_str() == from) {
                *column = to.to_string();
            }
        };
        for index in &mut self.indexes {
            rename(&mut index.columns);
        }
        for constraint in &mut self.constraints {
            match &mut constraint.kind {
                ConstraintKind::Unique { columns } | ConstraintKind::PrimaryKey { columns } => {
                    rename(columns)
                }
                ConstraintKind::Check { .. } => {}
            }
        }
        for fk in &mut self.foreign_keys {
            rename(&mut fk.columns);
        }
        Ok(())
    }

    /// Replace a column's definition, keeping its position.
    pub fn change_column(&mut self, column: ColumnDef) -> Result<ColumnDef, Error> {
        let pos = self.column_position(&column.name)?;
        Ok(std::mem::replace(&mut self.columns[pos], column))
    }

    /// Add an index.
    pub fn add_index(&mut self, index: IndexDef) -> Result<(), Error> {
        if self.index(&index.name).is_some() {
            return Err(self.invalid(format!("index '{}' already exists", index.name)));
        }
        if let Some(missing) = index.columns.iter().find(|c| self.column(c).is_none()) {
            return Err(self.invalid(format!(
                "index '{}' references unknown column '{}'",
                index.name, missing
            )));
        }
        self.indexes.push(index);
        Ok(())
    }

    /// Remove an index.
    pub fn remove_index(&mut self, name: &str) -> Result<IndexDef, Error> {
        match self.indexes.iter().position(|i| i.name == name) {
            Some(pos) => Ok(self.indexes.remove(pos)),
            None => Err(self.invalid(format!("index '{}' does not exist", name))),
        }
    }

    /// Add a named constraint.
    pub fn add_constraint(&mut self, constraint: ConstraintDef) -> Result<(), Error> {
        if self.constraints.iter().any(|c| c.name == constraint.name) {
            return Err(self.invalid(format!(
                "constraint '{}' already exists",
                constraint.name
            )));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Remove a named constraint.
    pub fn remove_constraint(&mut self, name: &str) -> Result<ConstraintDef, Error> {
        match self.constraints.iter().position(|c| c.name == name) {
            Some(pos) => Ok(self.constraints.remove(pos)),
            None => Err(self.invalid(format!("constraint '{}' does not exist", name))),
        }
    }

    /// Add a foreign key.
    pub fn add_foreign_key(&mut self, foreign_key: ForeignKeyDef) -> Result<(), Error> {
        if self.foreign_keys.iter().any(|f| f.name == foreign_key.name) {
            return Err(self.invalid(format!(
                "foreign key '{}' already exists",
                foreign_key.name
            )));
        }
        self.foreign_keys.push(foreign_key);
        Ok(())
    }

    /// Remove a foreign key.
    pub fn remove_foreign_key(&mut self, name: &str) -> Result<ForeignKeyDef, Error> {
        match self.foreign_keys.iter().position(|f| f.name == name) {
            Some(pos) => Ok(self.foreign_keys.remove(pos)),
            None => Err(self.invalid(format!("foreign key '{}' does not exist", name))),
        }
    }

    fn column_position(&self, name: &str) -> Result<usize, Error> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| self.invalid(format!("column '{}' does not exist", name)))
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidSchema {
            table: self.name.clone(),
            reason,
        }
    }
}
