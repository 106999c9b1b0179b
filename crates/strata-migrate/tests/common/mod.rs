//! Shared fixtures for the migration integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use strata_migrate::{
    ChangeSet, Direction, HookResult, Migration, MigrationConfig, MigrationEngine,
    MigrationRegistry,
};
use strata_storage::{ColumnDef, ColumnType, StorageConfig, StorageEngine, Transaction};

/// Ordered record of hook calls across definitions.
pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An on-disk storage engine that lives as long as the context.
pub struct TestContext {
    pub storage: Arc<StorageEngine>,
    dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageEngine::open(StorageConfig::new(dir.path().join("db"))).unwrap();
        Self {
            storage: Arc::new(storage),
            dir,
        }
    }

    pub fn engine(&self, registry: MigrationRegistry, config: MigrationConfig) -> MigrationEngine {
        MigrationEngine::new(Arc::clone(&self.storage), registry, config)
    }

    /// Directory for definition files, next to the database.
    pub fn definitions_dir(&self) -> std::path::PathBuf {
        let path = self.dir.path().join("migrations");
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn tables(&self) -> Vec<String> {
        self.storage.tables().unwrap()
    }
}

/// Logs `"<direction> <name>"` and declares nothing. Fails in `fail_on`.
pub struct Recorder {
    pub name: String,
    pub log: Log,
    pub fail_on: Option<Direction>,
}

impl Recorder {
    pub fn new(name: &str, log: &Log) -> Arc<dyn Migration> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_on: None,
        })
    }

    pub fn failing(name: &str, log: &Log, direction: Direction) -> Arc<dyn Migration> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_on: Some(direction),
        })
    }

    fn visit(&self, direction: Direction) -> HookResult {
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", direction, self.name));
        if self.fail_on == Some(direction) {
            return Err(format!("{} refused to go {}", self.name, direction).into());
        }
        Ok(())
    }
}

impl Migration for Recorder {
    fn up(&self, _changes: &mut ChangeSet) -> HookResult {
        self.visit(Direction::Up)
    }

    fn down(&self, _changes: &mut ChangeSet) -> HookResult {
        self.visit(Direction::Down)
    }
}

/// Creates a table going up and drops it going down.
pub struct TableStep {
    pub table: String,
    pub log: Log,
}

impl TableStep {
    pub fn new(table: &str, log: &Log) -> Arc<dyn Migration> {
        Arc::new(Self {
            table: table.to_string(),
            log: Arc::clone(log),
        })
    }
}

impl Migration for TableStep {
    fn pre_up(&self, _tx: &mut Transaction<'_>) -> HookResult {
        self.log.lock().unwrap().push(format!("pre_up {}", self.table));
        Ok(())
    }

    fn up(&self, changes: &mut ChangeSet) -> HookResult {
        self.log.lock().unwrap().push(format!("up {}", self.table));
        changes.create_table(
            &self.table,
            vec![ColumnDef::new("id", ColumnType::Integer).primary()],
        );
        Ok(())
    }

    fn post_up(&self, _tx: &mut Transaction<'_>) -> HookResult {
        self.log.lock().unwrap().push(format!("post_up {}", self.table));
        Ok(())
    }

    fn down(&self, changes: &mut ChangeSet) -> HookResult {
        self.log.lock().unwrap().push(format!("down {}", self.table));
        changes.drop_table(&self.table);
        Ok(())
    }
}

/// Number-style registry of `TableStep`s, one per table, discovered one
/// second apart.
pub fn table_registry(tables: &[&str], log: &Log) -> MigrationRegistry {
    MigrationRegistry::from_entries(
        tables
            .iter()
            .enumerate()
            .map(|(i, table)| ((1_700_000_000 + i as i64).to_string(), TableStep::new(table, log))),
    )
    .unwrap()
}
