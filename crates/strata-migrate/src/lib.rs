//! Strata Migrate - reversible schema migrations over `strata-storage`.
//!
//! A [`MigrationRegistry`] holds resolved [`Migration`] definitions keyed by
//! either a contiguous version number or a timestamped step key. The
//! [`MigrationEngine`] moves the database between positions in one storage
//! transaction, dispatching each definition's declared changes through a
//! [`ChangeDispatcher`] and recording the position in a [`VersionStore`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_migrate::{
//!     ChangeSet, HookResult, Migration, MigrationConfig, MigrationEngine, MigrationRegistry,
//! };
//! use strata_storage::{ColumnDef, ColumnType, StorageConfig, StorageEngine};
//!
//! struct CreateUsers;
//!
//! impl Migration for CreateUsers {
//!     fn up(&self, changes: &mut ChangeSet) -> HookResult {
//!         changes.create_table("users", vec![ColumnDef::new("id", ColumnType::Integer)]);
//!         Ok(())
//!     }
//!
//!     fn down(&self, changes: &mut ChangeSet) -> HookResult {
//!         changes.drop_table("users");
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(StorageEngine::open(StorageConfig::new("./data"))?);
//! let registry = MigrationRegistry::from_entries(vec![(
//!     "1700000000",
//!     Arc::new(CreateUsers) as Arc<dyn Migration>,
//! )])?;
//!
//! let mut engine = MigrationEngine::new(storage, registry, MigrationConfig::default());
//! engine.migrate(None)?;
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod config;
pub mod convert;
pub mod definition;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod id;
mod processor;
pub mod registry;
pub mod version_store;

pub use change::{Change, ChangeKind, ChangeSet};
pub use config::MigrationConfig;
pub use convert::{
    ConversionReport, ConvertedStep, DefinitionSource, DirectorySource, NumberedArtifact,
    StyleConverter,
};
pub use definition::{HookResult, Migration, MigrationDefinition, MigrationForm};
pub use dispatcher::{ChangeDispatcher, ChangeHandler};
pub use engine::{MigrateOutcome, MigrationEngine, RunState};
pub use error::{FailureEntry, HookError, MigrationError, RecordedError, RunFailure};
pub use id::{step_key_for_timestamp, DefinitionKey, Direction, MigrationId, StepKey, VersionStyle};
pub use registry::MigrationRegistry;
pub use version_store::{StepRecord, VersionStore};
