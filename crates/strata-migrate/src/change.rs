//! Declared changes.
//!
//! A migration's `up`, `down` or `migrate` hook records what it wants done
//! into a [`ChangeSet`]; the engine dispatches the recorded changes after the
//! hook returns.

use crate::error::MigrationError;
use crate::id::Direction;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use strata_storage::{ColumnDef, ConstraintDef, ForeignKeyDef, IndexDef};

/// The closed set of change kinds the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    CreateTable,
    DropTable,
    RenameTable,
    CreateConstraint,
    DropConstraint,
    CreateForeignKey,
    DropForeignKey,
    AddColumn,
    RenameColumn,
    ChangeColumn,
    RemoveColumn,
    AddIndex,
    RemoveIndex,
}

impl ChangeKind {
    /// Every kind, in declaration order.
    pub const ALL: [ChangeKind; 13] = [
        ChangeKind::CreateTable,
        ChangeKind::DropTable,
        ChangeKind::RenameTable,
        ChangeKind::CreateConstraint,
        ChangeKind::DropConstraint,
        ChangeKind::CreateForeignKey,
        ChangeKind::DropForeignKey,
        ChangeKind::AddColumn,
        ChangeKind::RenameColumn,
        ChangeKind::ChangeColumn,
        ChangeKind::RemoveColumn,
        ChangeKind::AddIndex,
        ChangeKind::RemoveIndex,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::CreateTable => "create_table",
            ChangeKind::DropTable => "drop_table",
            ChangeKind::RenameTable => "rename_table",
            ChangeKind::CreateConstraint => "create_constraint",
            ChangeKind::DropConstraint => "drop_constraint",
            ChangeKind::CreateForeignKey => "create_foreign_key",
            ChangeKind::DropForeignKey => "drop_foreign_key",
            ChangeKind::AddColumn => "add_column",
            ChangeKind::RenameColumn => "rename_column",
            ChangeKind::ChangeColumn => "change_column",
            ChangeKind::RemoveColumn => "remove_column",
            ChangeKind::AddIndex => "add_index",
            ChangeKind::RemoveIndex => "remove_index",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a change type: drop `_`, `-` and spaces, lowercase the rest.
fn normalize(change_type: &str) -> String {
    change_type
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for ChangeKind {
    type Err = MigrationError;

    /// Accepts `create_table`, `createTable`, `CreateTable`, `create-table`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        ChangeKind::ALL
            .into_iter()
            .find(|kind| normalize(kind.as_str()) == wanted)
            .ok_or_else(|| MigrationError::UnsupportedChangeType {
                change_type: s.to_string(),
            })
    }
}

/// One declared change: a type tag plus an opaque payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Raw change type as declared.
    pub change_type: String,
    /// Payload handed to the handler.
    pub payload: Value,
}

impl Change {
    /// Create a change from a raw type string.
    pub fn new(change_type: impl Into<String>, payload: Value) -> Self {
        Self {
            change_type: change_type.into(),
            payload,
        }
    }

    /// Create a change of a known kind.
    pub fn of(kind: ChangeKind, payload: Value) -> Self {
        Self::new(kind.as_str(), payload)
    }

    /// The kind, if the type string names one.
    pub fn kind(&self) -> Option<ChangeKind> {
        self.change_type.parse().ok()
    }
}

/// Ordered changes declared by one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw change.
    pub fn declare(&mut self, change_type: impl Into<String>, payload: Value) -> &mut Self {
        self.changes.push(Change::new(change_type, payload));
        self
    }

    /// Record a change of a known kind.
    pub fn push(&mut self, kind: ChangeKind, payload: Value) -> &mut Self {
        self.changes.push(Change::of(kind, payload));
        self
    }

    pub fn create_table(&mut self, table: &str, columns: Vec<ColumnDef>) -> &mut Self {
        self.push(
            ChangeKind::CreateTable,
            json!({ "table": table, "columns": columns }),
        )
    }

    pub fn drop_table(&mut self, table: &str) -> &mut Self {
        self.push(ChangeKind::DropTable, json!({ "table": table }))
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.push(ChangeKind::RenameTable, json!({ "from": from, "to": to }))
    }

    pub fn add_column(&mut self, table: &str, column: ColumnDef) -> &mut Self {
        self.push(
            ChangeKind::AddColumn,
            json!({ "table": table, "column": column }),
        )
    }

    pub fn remove_column(&mut self, table: &str, column: &str) -> &mut Self {
        self.push(
            ChangeKind::RemoveColumn,
            json!({ "table": table, "column": column }),
        )
    }

    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> &mut Self {
        self.push(
            ChangeKind::RenameColumn,
            json!({ "table": table, "from": from, "to": to }),
        )
    }

    pub fn change_column(&mut self, table: &str, column: ColumnDef) -> &mut Self {
        self.push(
            ChangeKind::ChangeColumn,
            json!({ "table": table, "column": column }),
        )
    }

    pub fn add_index(&mut self, table: &str, index: IndexDef) -> &mut Self {
        self.push(
            ChangeKind::AddIndex,
            json!({ "table": table, "index": index }),
        )
    }

    pub fn remove_index(&mut self, table: &str, name: &str) -> &mut Self {
        self.push(
            ChangeKind::RemoveIndex,
            json!({ "table": table, "name": name }),
        )
    }

    pub fn create_constraint(&mut self, table: &str, constraint: ConstraintDef) -> &mut Self {
        self.push(
            ChangeKind::CreateConstraint,
            json!({ "table": table, "constraint": constraint }),
        )
    }

    pub fn drop_constraint(&mut self, table: &str, name: &str) -> &mut Self {
        self.push(
            ChangeKind::DropConstraint,
            json!({ "table": table, "name": name }),
        )
    }

    pub fn create_foreign_key(&mut self, table: &str, foreign_key: ForeignKeyDef) -> &mut Self {
        self.push(
            ChangeKind::CreateForeignKey,
            json!({ "table": table, "foreign_key": foreign_key }),
        )
    }

    pub fn drop_foreign_key(&mut self, table: &str, name: &str) -> &mut Self {
        self.push(
            ChangeKind::DropForeignKey,
            json!({ "table": table, "name": name }),
        )
    }

    // Direction-aware forms for unified `migrate(direction)` definitions.
    // Each emits the create form going up and the matching drop going down.

    /// Create the table going up, drop it going down.
    pub fn table(&mut self, direction: Direction, table: &str, columns: Vec<ColumnDef>) -> &mut Self {
        match direction {
            Direction::Up => self.create_table(table, columns),
            Direction::Down => self.drop_table(table),
        }
    }

    /// Add the column going up, remove it going down.
    pub fn column(&mut self, direction: Direction, table: &str, column: ColumnDef) -> &mut Self {
        match direction {
            Direction::Up => self.add_column(table, column),
            Direction::Down => self.remove_column(table, &column.name),
        }
    }

    /// Add the index going up, remove it going down.
    pub fn index(&mut self, direction: Direction, table: &str, index: IndexDef) -> &mut Self {
        match direction {
            Direction::Up => self.add_index(table, index),
            Direction::Down => self.remove_index(table, &index.name),
        }
    }

    /// Create the constraint going up, drop it going down.
    pub fn constraint(
        &mut self,
        direction: Direction,
        table: &str,
        constraint: ConstraintDef,
    ) -> &mut Self {
        match direction {
            Direction::Up => self.create_constraint(table, constraint),
            Direction::Down => self.drop_constraint(table, &constraint.name),
        }
    }

    /// Create the foreign key going up, drop it going down.
    pub fn foreign_key(
        &mut self,
        direction: Direction,
        table: &str,
        foreign_key: ForeignKeyDef,
    ) -> &mut Self {
        match direction {
            Direction::Up => self.create_foreign_key(table, foreign_key),
            Direction::Down => self.drop_foreign_key(table, &foreign_key.name),
        }
    }

    /// Declared changes in declaration order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Number of declared changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Consume into the declared changes.
    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }
}
