//! Migration definitions.
//!
//! A definition is the executable unit behind one identifier. It comes in one
//! of two authoring forms:
//!
//! - **Directional**: separate `up` and `down` hooks, each declaring its
//!   changes already in the order that direction needs.
//! - **Unified**: a single `migrate(direction)` hook. Changes are declared in
//!   "up" order; going down the engine dispatches them in reverse.
//!
//! Both forms get `pre_*` / `post_*` hooks around the change dispatch. The
//! pre/post hooks run against the live run transaction, so they can move data.

use crate::change::ChangeSet;
use crate::error::HookError;
use crate::id::{DefinitionKey, Direction, MigrationId};
use std::fmt;
use std::sync::Arc;
use strata_storage::Transaction;

/// Result of a lifecycle hook.
pub type HookResult = Result<(), HookError>;

/// How a definition declares its changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationForm {
    /// Separate `up` / `down` hooks.
    #[default]
    Directional,
    /// A single `migrate(direction)` hook.
    Unified,
}

/// The executable handle of a migration.
///
/// Every hook defaults to a no-op, so a definition only implements what it
/// uses. A definition that implements neither `up`/`down` nor `migrate` is a
/// legal no-op step.
pub trait Migration: Send + Sync {
    /// Which authoring form this definition uses.
    fn form(&self) -> MigrationForm {
        MigrationForm::Directional
    }

    fn pre_up(&self, _tx: &mut Transaction<'_>) -> HookResult {
        Ok(())
    }

    fn up(&self, _changes: &mut ChangeSet) -> HookResult {
        Ok(())
    }

    fn post_up(&self, _tx: &mut Transaction<'_>) -> HookResult {
        Ok(())
    }

    fn pre_down(&self, _tx: &mut Transaction<'_>) -> HookResult {
        Ok(())
    }

    fn down(&self, _changes: &mut ChangeSet) -> HookResult {
        Ok(())
    }

    fn post_down(&self, _tx: &mut Transaction<'_>) -> HookResult {
        Ok(())
    }

    /// Unified hook, used when `form()` is `Unified`.
    fn migrate(&self, _direction: Direction, _changes: &mut ChangeSet) -> HookResult {
        Ok(())
    }
}

/// A registered migration: its resolved identifier plus the handle.
#[derive(Clone)]
pub struct MigrationDefinition {
    id: MigrationId,
    key: DefinitionKey,
    handle: Arc<dyn Migration>,
}

impl MigrationDefinition {
    pub(crate) fn new(id: MigrationId, key: DefinitionKey, handle: Arc<dyn Migration>) -> Self {
        Self { id, key, handle }
    }

    /// Identifier the engine uses for this definition.
    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    /// Identifier the loader supplied.
    pub fn key(&self) -> &DefinitionKey {
        &self.key
    }

    /// The executable handle.
    pub fn handle(&self) -> &Arc<dyn Migration> {
        &self.handle
    }

    /// Run the pre hook for `direction`.
    pub(crate) fn pre(&self, direction: Direction, tx: &mut Transaction<'_>) -> HookResult {
        match direction {
            Direction::Up => self.handle.pre_up(tx),
            Direction::Down => self.handle.pre_down(tx),
        }
    }

    /// Run the body hook for `direction`, collecting declared changes.
    pub(crate) fn body(&self, direction: Direction, changes: &mut ChangeSet) -> HookResult {
        match (self.handle.form(), direction) {
            (MigrationForm::Directional, Direction::Up) => self.handle.up(changes),
            (MigrationForm::Directional, Direction::Down) => self.handle.down(changes),
            (MigrationForm::Unified, direction) => self.handle.migrate(direction, changes),
        }
    }

    /// Run the post hook for `direction`.
    pub(crate) fn post(&self, direction: Direction, tx: &mut Transaction<'_>) -> HookResult {
        match direction {
            Direction::Up => self.handle.post_up(tx),
            Direction::Down => self.handle.post_down(tx),
        }
    }

    /// Whether declared changes are dispatched in reverse for `direction`.
    pub(crate) fn reverses_changes(&self, direction: Direction) -> bool {
        direction == Direction::Down && self.handle.form() == MigrationForm::Unified
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("form", &self.handle.form())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use serde_json::json;

    struct Unified;

    impl Migration for Unified {
        fn form(&self) -> MigrationForm {
            MigrationForm::Unified
        }

        fn migrate(&self, direction: Direction, changes: &mut ChangeSet) -> HookResult {
            changes.table(direction, "posts", vec![]);
            Ok(())
        }
    }

    struct Directional;

    impl Migration for Directional {
        fn up(&self, changes: &mut ChangeSet) -> HookResult {
            changes.push(ChangeKind::CreateTable, json!({"table": "t", "columns": []}));
            Ok(())
        }
    }

    fn definition(handle: Arc<dyn Migration>) -> MigrationDefinition {
        MigrationDefinition::new(MigrationId::Number(1), DefinitionKey::Timestamp(1), handle)
    }

    #[test]
    fn test_unified_body_uses_migrate() {
        let def = definition(Arc::new(Unified));
        let mut changes = ChangeSet::new();
        def.body(Direction::Down, &mut changes).unwrap();
        assert_eq!(changes.changes()[0].kind(), Some(ChangeKind::DropTable));
        assert!(def.reverses_changes(Direction::Down));
        assert!(!def.reverses_changes(Direction::Up));
    }

    #[test]
    fn test_directional_defaults_are_noops() {
        let def = definition(Arc::new(Directional));
        let mut changes = ChangeSet::new();
        def.body(Direction::Down, &mut changes).unwrap();
        assert!(changes.is_empty());
        assert!(!def.reverses_changes(Direction::Down));

        def.body(Direction::Up, &mut changes).unwrap();
        assert_eq!(changes.len(), 1);
    }
}
