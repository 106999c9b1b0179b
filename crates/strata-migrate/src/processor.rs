//! Built-in schema change handlers.
//!
//! Each handler deserializes its payload and applies the change to the table
//! catalog through the run transaction. Payload shapes match what the
//! [`ChangeSet`](crate::ChangeSet) helpers emit.

use crate::change::ChangeKind;
use crate::error::MigrationError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use strata_storage::{ColumnDef, ConstraintDef, ForeignKeyDef, IndexDef, TableDef, Transaction};

/// Signature shared by the built-in handlers.
pub(crate) type SchemaHandler = fn(&mut Transaction<'_>, &Value) -> Result<(), MigrationError>;

/// The built-in handler for `kind`.
pub(crate) fn schema_handler(kind: ChangeKind) -> SchemaHandler {
    match kind {
        ChangeKind::CreateTable => create_table,
        ChangeKind::DropTable => drop_table,
        ChangeKind::RenameTable => rename_table,
        ChangeKind::CreateConstraint => create_constraint,
        ChangeKind::DropConstraint => drop_constraint,
        ChangeKind::CreateForeignKey => create_foreign_key,
        ChangeKind::DropForeignKey => drop_foreign_key,
        ChangeKind::AddColumn => add_column,
        ChangeKind::RenameColumn => rename_column,
        ChangeKind::ChangeColumn => change_column,
        ChangeKind::RemoveColumn => remove_column,
        ChangeKind::AddIndex => add_index,
        ChangeKind::RemoveIndex => remove_index,
    }
}

#[derive(Deserialize)]
struct CreateTablePayload {
    table: String,
    #[serde(default)]
    columns: Vec<ColumnDef>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
}

#[derive(Deserialize)]
struct TablePayload {
    table: String,
}

#[derive(Deserialize)]
struct RenamePayload {
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct ColumnPayload {
    table: String,
    column: ColumnDef,
}

#[derive(Deserialize)]
struct ColumnNamePayload {
    table: String,
    column: String,
}

#[derive(Deserialize)]
struct RenameColumnPayload {
    table: String,
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct IndexPayload {
    table: String,
    index: IndexDef,
}

#[derive(Deserialize)]
struct ConstraintPayload {
    table: String,
    constraint: ConstraintDef,
}

#[derive(Deserialize)]
struct ForeignKeyPayload {
    table: String,
    foreign_key: ForeignKeyDef,
}

/// Payload naming a table element (index, constraint, foreign key).
#[derive(Deserialize)]
struct NamedPayload {
    table: String,
    name: String,
}

fn parse<T: DeserializeOwned>(kind: ChangeKind, payload: &Value) -> Result<T, MigrationError> {
    T::deserialize(payload).map_err(|e| MigrationError::InvalidPayload {
        change_type: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Load `table`, let `f` modify its definition, then stage the result.
fn alter<F>(tx: &mut Transaction<'_>, table: &str, f: F) -> Result<(), MigrationError>
where
    F: FnOnce(&mut TableDef) -> Result<(), strata_storage::Error>,
{
    let mut def = tx
        .table(table)?
        .ok_or_else(|| strata_storage::Error::TableNotFound(table.to_string()))?;
    f(&mut def)?;
    tx.alter_table(def)?;
    Ok(())
}

fn create_table(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: CreateTablePayload = parse(ChangeKind::CreateTable, payload)?;
    let mut def = TableDef::new(p.table);
    for column in p.columns {
        def.add_column(column)?;
    }
    for index in p.indexes {
        def.add_index(index)?;
    }
    tx.create_table(def)?;
    Ok(())
}

fn drop_table(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: TablePayload = parse(ChangeKind::DropTable, payload)?;
    tx.drop_table(&p.table)?;
    Ok(())
}

fn rename_table(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: RenamePayload = parse(ChangeKind::RenameTable, payload)?;
    tx.rename_table(&p.from, &p.to)?;
    Ok(())
}

fn add_column(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: ColumnPayload = parse(ChangeKind::AddColumn, payload)?;
    alter(tx, &p.table, |def| def.add_column(p.column))
}

fn remove_column(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: ColumnNamePayload = parse(ChangeKind::RemoveColumn, payload)?;
    alter(tx, &p.table, |def| def.remove_column(&p.column).map(drop))
}

fn rename_column(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: RenameColumnPayload = parse(ChangeKind::RenameColumn, payload)?;
    alter(tx, &p.table, |def| def.rename_column(&p.from, &p.to))
}

fn change_column(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: ColumnPayload = parse(ChangeKind::ChangeColumn, payload)?;
    alter(tx, &p.table, |def| def.change_column(p.column).map(drop))
}

fn add_index(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: IndexPayload = parse(ChangeKind::AddIndex, payload)?;
    alter(tx, &p.table, |def| def.add_index(p.index))
}

fn remove_index(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: NamedPayload = parse(ChangeKind::RemoveIndex, payload)?;
    alter(tx, &p.table, |def| def.remove_index(&p.name).map(drop))
}

fn create_constraint(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: ConstraintPayload = parse(ChangeKind::CreateConstraint, payload)?;
    alter(tx, &p.table, |def| def.add_constraint(p.constraint))
}

fn drop_constraint(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: NamedPayload = parse(ChangeKind::DropConstraint, payload)?;
    alter(tx, &p.table, |def| def.remove_constraint(&p.name).map(drop))
}

fn create_foreign_key(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: ForeignKeyPayload = parse(ChangeKind::CreateForeignKey, payload)?;
    if !tx.has_table(&p.foreign_key.references_table)? {
        return Err(strata_storage::Error::InvalidSchema {
            table: p.table,
            reason: format!(
                "foreign key '{}' references unknown table '{}'",
                p.foreign_key.name, p.foreign_key.references_table
            ),
        }
        .into());
    }
    alter(tx, &p.table, |def| def.add_foreign_key(p.foreign_key))
}

fn drop_foreign_key(tx: &mut Transaction<'_>, payload: &Value) -> Result<(), MigrationError> {
    let p: NamedPayload = parse(ChangeKind::DropForeignKey, payload)?;
    alter(tx, &p.table, |def| def.remove_foreign_key(&p.name).map(drop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeSet;
    use crate::dispatcher::ChangeDispatcher;
    use serde_json::json;
    use strata_storage::{ColumnType, ConstraintKind, StorageConfig, StorageEngine};

    fn apply_all(tx: &mut Transaction<'_>, changes: &ChangeSet) -> Result<(), MigrationError> {
        let dispatcher = ChangeDispatcher::with_schema_handlers();
        for change in changes.changes() {
            dispatcher.apply(tx, change)?;
        }
        Ok(())
    }

    #[test]
    fn test_table_lifecycle() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let mut tx = storage.transaction();

        let mut changes = ChangeSet::new();
        changes
            .create_table(
                "users",
                vec![
                    ColumnDef::new("id", ColumnType::Integer).primary(),
                    ColumnDef::new("name", ColumnType::String).with_length(100),
                ],
            )
            .add_column("users", ColumnDef::new("email", ColumnType::String))
            .rename_column("users", "name", "full_name")
            .add_index("users", IndexDef::new("idx_email", vec!["email".into()]).unique())
            .create_constraint(
                "users",
                ConstraintDef {
                    name: "uq_full_name".into(),
                    kind: ConstraintKind::Unique {
                        columns: vec!["full_name".into()],
                    },
                },
            )
            .rename_table("users", "accounts");
        apply_all(&mut tx, &changes).unwrap();
        tx.commit().unwrap();

        let def = storage.table("accounts").unwrap().unwrap();
        assert_eq!(def.column_names(), vec!["id", "full_name", "email"]);
        assert!(def.index("idx_email").unwrap().unique);
        assert_eq!(def.constraints.len(), 1);
        assert!(!storage.has_table("users").unwrap());
    }

    #[test]
    fn test_foreign_keys() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let mut tx = storage.transaction();

        let fk = ForeignKeyDef {
            name: "fk_posts_user".into(),
            columns: vec!["user_id".into()],
            references_table: "users".into(),
            references_columns: vec!["id".into()],
            on_delete: Some("CASCADE".into()),
        };

        let mut changes = ChangeSet::new();
        changes
            .create_table("posts", vec![ColumnDef::new("user_id", ColumnType::Integer)])
            .create_foreign_key("posts", fk.clone());
        let err = apply_all(&mut tx, &changes).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Storage(strata_storage::Error::InvalidSchema { .. })
        ));

        let mut changes = ChangeSet::new();
        changes
            .create_table("users", vec![ColumnDef::new("id", ColumnType::Integer)])
            .create_foreign_key("posts", fk)
            .drop_foreign_key("posts", "fk_posts_user");
        apply_all(&mut tx, &changes).unwrap();
        assert!(tx.table("posts").unwrap().unwrap().foreign_keys.is_empty());
    }

    #[test]
    fn test_missing_table_and_bad_payload() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let mut tx = storage.transaction();

        let err = add_column(
            &mut tx,
            &json!({ "table": "ghost", "column": { "name": "x", "type": "integer" } }),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Storage(strata_storage::Error::TableNotFound(_))
        ));

        let err = create_table(&mut tx, &json!({ "columns": [] })).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::InvalidPayload { change_type, .. } if change_type == "create_table"
        ));
    }

    #[test]
    fn test_remove_and_change_column() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let mut tx = storage.transaction();

        let mut changes = ChangeSet::new();
        changes
            .create_table(
                "items",
                vec![
                    ColumnDef::new("id", ColumnType::Integer),
                    ColumnDef::new("price", ColumnType::Float),
                    ColumnDef::new("legacy", ColumnType::Text),
                ],
            )
            .change_column("items", ColumnDef::new("price", ColumnType::Decimal).not_null())
            .remove_column("items", "legacy");
        apply_all(&mut tx, &changes).unwrap();

        let def = tx.table("items").unwrap().unwrap();
        assert_eq!(def.column_names(), vec!["id", "price"]);
        assert_eq!(def.column("price").unwrap().column_type, ColumnType::Decimal);
        assert!(!def.column("price").unwrap().nullable);
    }
}
