//! Migration engine - orchestrates a migration run.
//!
//! A run computes the steps between the current position and the target,
//! executes each inside one storage transaction, and commits only when no step
//! failed. Step failures are contained: they are recorded in the error log and
//! the run moves on to the next step, so a failed run reports every problem at
//! once before rolling back.

use crate::change::ChangeSet;
use crate::config::MigrationConfig;
use crate::convert::{ConversionReport, DefinitionSource, DirectorySource, StyleConverter};
use crate::definition::{MigrationDefinition, MigrationForm};
use crate::dispatcher::ChangeDispatcher;
use crate::error::{FailureEntry, HookError, MigrationError, RecordedError, RunFailure};
use crate::id::{Direction, MigrationId, StepKey, VersionStyle};
use crate::registry::MigrationRegistry;
use crate::version_store::VersionStore;
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use strata_storage::{StorageEngine, Transaction};
use tracing::{debug, info, instrument, warn};

/// Where the engine is within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run has started, or the last one failed a precondition.
    Idle,
    /// Checking preconditions and preparing the version table.
    Preparing,
    /// Executing steps inside the run transaction.
    Running,
    /// The last run committed.
    Committed,
    /// The last run was rolled back (errors, no-op or dry run).
    RolledBack,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Preparing => write!(f, "preparing"),
            RunState::Running => write!(f, "running"),
            RunState::Committed => write!(f, "committed"),
            RunState::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    /// The run reached this position. For a dry run, it would have.
    Applied(MigrationId),
    /// Already at the requested position. Nothing ran.
    NoOp(Option<MigrationId>),
    /// A dry run collected these failures.
    Failed(Vec<FailureEntry>),
}

impl MigrateOutcome {
    /// Whether the run reached (or would reach) its target.
    pub fn is_applied(&self) -> bool {
        matches!(self, MigrateOutcome::Applied(_))
    }
}

/// Where the step loop ended up.
enum Progress {
    Reached(MigrationId),
    AlreadyAt(Option<MigrationId>),
}

/// The migration orchestrator.
pub struct MigrationEngine {
    storage: Arc<StorageEngine>,
    registry: MigrationRegistry,
    dispatcher: ChangeDispatcher,
    store: VersionStore,
    config: MigrationConfig,
    errors: Vec<RecordedError>,
    state: RunState,
}

impl MigrationEngine {
    /// Create an engine with the built-in schema change handlers.
    pub fn new(
        storage: Arc<StorageEngine>,
        registry: MigrationRegistry,
        config: MigrationConfig,
    ) -> Self {
        let store = VersionStore::new(config.table_name.clone(), config.style);
        Self {
            storage,
            registry,
            dispatcher: ChangeDispatcher::with_schema_handlers(),
            store,
            config,
            errors: Vec::new(),
            state: RunState::Idle,
        }
    }

    /// Replace the change dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: ChangeDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// The change dispatcher, for registering custom handlers.
    pub fn dispatcher_mut(&mut self) -> &mut ChangeDispatcher {
        &mut self.dispatcher
    }

    /// Swap in a rebuilt registry.
    pub fn set_registry(&mut self, registry: MigrationRegistry) {
        self.registry = registry;
    }

    /// The registry in use.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The configuration in use.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The storage engine.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// State of the last run.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Migrate to `target`, or to the latest definition when `None`.
    pub fn migrate(
        &mut self,
        target: Option<MigrationId>,
    ) -> Result<MigrateOutcome, MigrationError> {
        self.migrate_with(target, false)
    }

    /// Run a migration and roll it back, reporting whether it would succeed.
    pub fn migrate_dry_run(&mut self, target: Option<MigrationId>) -> Result<bool, MigrationError> {
        Ok(self.migrate_with(target, true)?.is_applied())
    }

    /// Migrate to `target`, or to the latest definition when `None`.
    ///
    /// A dry run always rolls back. A non-dry run with any collected failure
    /// rolls back and returns `RunFailed` carrying every failure.
    #[instrument(skip(self, target), fields(style = %self.config.style, to = ?target))]
    pub fn migrate_with(
        &mut self,
        target: Option<MigrationId>,
        dry_run: bool,
    ) -> Result<MigrateOutcome, MigrationError> {
        self.errors.clear();
        self.state = RunState::Preparing;

        if let Err(err) = self.prepare(target.as_ref()) {
            self.state = RunState::Idle;
            return Err(err);
        }

        let storage = Arc::clone(&self.storage);
        let mut tx = storage.transaction();
        self.state = RunState::Running;
        info!(dry_run, "migration run started");

        let progress = match self.config.style {
            VersionStyle::Number => self.run_numbers(&mut tx, target.as_ref()),
            VersionStyle::Steps => {
                self.run_steps(&mut tx, target.as_ref().and_then(MigrationId::as_step))
            }
        };

        let reached = match progress {
            Ok(Progress::Reached(reached)) => reached,
            Ok(Progress::AlreadyAt(current)) => {
                let version = current
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "0".to_string());
                self.record(None, MigrationError::AlreadyAtVersion { version });
                self.roll_back(tx);
                return Ok(MigrateOutcome::NoOp(current));
            }
            Err(err) => {
                self.record(None, err);
                self.roll_back(tx);
                return self.failed(dry_run);
            }
        };

        if !self.errors.is_empty() {
            self.roll_back(tx);
            return self.failed(dry_run);
        }

        if dry_run {
            self.roll_back(tx);
            info!(reached = %reached, "dry run would succeed");
            return Ok(MigrateOutcome::Applied(reached));
        }

        if let MigrationId::Number(version) = reached {
            if let Err(err) = self.store.set_version(&mut tx, version) {
                self.record(None, err);
                self.roll_back(tx);
                return self.failed(false);
            }
        }

        if let Err(err) = tx.commit() {
            self.state = RunState::RolledBack;
            self.record(None, err.into());
            return self.failed(false);
        }

        self.state = RunState::Committed;
        info!(reached = %reached, "migration committed");
        Ok(MigrateOutcome::Applied(reached))
    }

    /// Check everything that must hold before the run transaction opens, then
    /// make sure the version table exists.
    fn prepare(&mut self, target: Option<&MigrationId>) -> Result<(), MigrationError> {
        let style = self.config.style;

        if let Some(registered) = self.registry.style() {
            if registered != style {
                return Err(MigrationError::StyleConflict {
                    identifier: format!("{} style registry", registered),
                    established: style,
                });
            }
        }

        if let Some(target) = target {
            if target.style() != style {
                return Err(MigrationError::StyleConflict {
                    identifier: target.to_string(),
                    established: style,
                });
            }
            let known = match target {
                MigrationId::Number(n) => *n <= self.registry.latest_version(),
                MigrationId::Step(_) => self.registry.contains(target),
            };
            if !known {
                return Err(MigrationError::UnknownMigration {
                    identifier: target.to_string(),
                });
            }
        }

        self.store.ensure_created(&self.storage)
    }

    fn run_numbers(
        &mut self,
        tx: &mut Transaction<'_>,
        target: Option<&MigrationId>,
    ) -> Result<Progress, MigrationError> {
        let from = self.store.current_version(tx)?;
        let to = target
            .and_then(MigrationId::as_number)
            .unwrap_or_else(|| self.registry.latest_version());

        if from == to {
            return Ok(Progress::AlreadyAt(Some(MigrationId::Number(from))));
        }

        if to > from {
            for version in from + 1..=to {
                self.run_step(tx, Direction::Up, &MigrationId::Number(version));
            }
        } else {
            for version in (to + 1..=from).rev() {
                self.run_step(tx, Direction::Down, &MigrationId::Number(version));
            }
        }

        Ok(Progress::Reached(MigrationId::Number(to)))
    }

    /// Two passes: rewind applied steps past the target (newest first), then
    /// apply everything missing up to and including the target.
    fn run_steps(
        &mut self,
        tx: &mut Transaction<'_>,
        target: Option<&StepKey>,
    ) -> Result<Progress, MigrationError> {
        let applied = self.store.applied_steps(tx)?;
        let migrations: Vec<StepKey> = self
            .registry
            .ascending()
            .into_iter()
            .filter_map(|id| id.as_step().cloned())
            .collect();
        let mut executed = 0usize;

        if let Some(target) = target {
            for key in migrations.iter().rev() {
                if key == target {
                    break;
                }
                if applied.contains(key) {
                    self.run_step(tx, Direction::Down, &MigrationId::Step(key.clone()));
                    executed += 1;
                }
            }
        }

        let mut last = None;
        for key in &migrations {
            if !applied.contains(key) {
                self.run_step(tx, Direction::Up, &MigrationId::Step(key.clone()));
                executed += 1;
            }
            last = Some(key);
            if Some(key) == target {
                break;
            }
        }

        let last = last.map(|key| MigrationId::Step(key.clone()));
        match last {
            Some(last) if executed > 0 => Ok(Progress::Reached(last)),
            last => Ok(Progress::AlreadyAt(last)),
        }
    }

    /// Execute one step, recording any failure. Returns whether it succeeded.
    fn run_step(&mut self, tx: &mut Transaction<'_>, direction: Direction, id: &MigrationId) -> bool {
        match self.execute_step(tx, direction, id) {
            Ok(()) => {
                debug!(migration = %id, %direction, "step completed");
                true
            }
            Err(error) => {
                warn!(migration = %id, %direction, %error, "step failed");
                self.record(Some((id.clone(), direction)), error);
                false
            }
        }
    }

    fn execute_step(
        &self,
        tx: &mut Transaction<'_>,
        direction: Direction,
        id: &MigrationId,
    ) -> Result<(), MigrationError> {
        let definition = self.registry.resolve(id)?;
        let hook = |stage: Stage| hook_name(stage, definition, direction);

        definition
            .pre(direction, tx)
            .map_err(|source| hook_failed(hook(Stage::Pre), id, source))?;

        let mut changes = ChangeSet::new();
        definition
            .body(direction, &mut changes)
            .map_err(|source| hook_failed(hook(Stage::Body), id, source))?;

        let mut changes = changes.into_changes();
        if definition.reverses_changes(direction) {
            changes.reverse();
        }
        for change in &changes {
            self.dispatcher.apply(tx, change)?;
        }

        definition
            .post(direction, tx)
            .map_err(|source| hook_failed(hook(Stage::Post), id, source))?;

        if let MigrationId::Step(key) = id {
            match direction {
                Direction::Up => self.store.record_step(tx, key, Utc::now())?,
                Direction::Down => self.store.remove_step(tx, key)?,
            }
        }
        Ok(())
    }

    fn record(&mut self, step: Option<(MigrationId, Direction)>, error: MigrationError) {
        self.errors.push(RecordedError { step, error });
    }

    fn roll_back(&mut self, tx: Transaction<'_>) {
        tx.rollback();
        self.state = RunState::RolledBack;
        if !self.errors.is_empty() {
            info!(errors = self.errors.len(), "migration rolled back");
        }
    }

    fn failed(&self, dry_run: bool) -> Result<MigrateOutcome, MigrationError> {
        let entries = self.failure_entries();
        if dry_run {
            Ok(MigrateOutcome::Failed(entries))
        } else {
            Err(MigrationError::RunFailed(RunFailure { entries }))
        }
    }

    /// Stored scalar version. Number style only.
    pub fn current_version(&mut self) -> Result<u64, MigrationError> {
        self.require_style(VersionStyle::Number, "current_version")?;
        self.store.ensure_created(&self.storage)?;
        self.store.current_version(&self.storage.transaction())
    }

    /// Applied step keys. Step style only.
    pub fn current_steps(&mut self) -> Result<BTreeSet<StepKey>, MigrationError> {
        self.require_style(VersionStyle::Steps, "current_steps")?;
        self.store.ensure_created(&self.storage)?;
        self.store.applied_steps(&self.storage.transaction())
    }

    fn require_style(&self, wanted: VersionStyle, operation: &str) -> Result<(), MigrationError> {
        if self.config.style != wanted {
            return Err(MigrationError::StyleConflict {
                identifier: operation.to_string(),
                established: self.config.style,
            });
        }
        Ok(())
    }

    /// Failures collected by the last run.
    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    /// The last run's failures rendered for reporting.
    pub fn failure_entries(&self) -> Vec<FailureEntry> {
        self.errors
            .iter()
            .enumerate()
            .map(|(i, recorded)| recorded.entry(i + 1))
            .collect()
    }

    /// Whether the last run collected any failure.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of failures collected by the last run.
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Forget collected failures.
    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Convert the version table and the definition files under `path` to
    /// `target` style. Returns `None` when already in that style.
    pub fn change_style(
        &mut self,
        target: VersionStyle,
        path: impl AsRef<Path>,
    ) -> Result<Option<ConversionReport>, MigrationError> {
        let source = DirectorySource::new(path.as_ref())?;
        self.change_style_with(target, &source)
    }

    /// Convert the version table and the definitions held by `source` to
    /// `target` style.
    ///
    /// Only number to steps is supported. The registry still holds the
    /// number-style definitions afterwards; reload them and call
    /// [`set_registry`](Self::set_registry).
    #[instrument(skip(self, target, source), fields(to = %target))]
    pub fn change_style_with<S>(
        &mut self,
        target: VersionStyle,
        source: &S,
    ) -> Result<Option<ConversionReport>, MigrationError>
    where
        S: DefinitionSource + ?Sized,
    {
        if self.config.style == target {
            info!("version table already in requested style");
            return Ok(None);
        }

        match target {
            VersionStyle::Number => Err(MigrationError::NotImplemented(
                "converting steps style back to number style".to_string(),
            )),
            VersionStyle::Steps => {
                self.store.ensure_created(&self.storage)?;
                let converted = StyleConverter::new(source).convert(&self.storage, &mut self.store);
                // The store switches once the table rewrite commits, even if a
                // rename fails afterwards.
                self.config.style = self.store.style();
                let report = converted?;
                info!(
                    table = %report.table,
                    converted = report.steps.len(),
                    "style changed to steps, rebuild the registry from the renamed definitions"
                );
                Ok(Some(report))
            }
        }
    }
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .field("errors", &self.errors.len())
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Pre,
    Body,
    Post,
}

fn hook_name(stage: Stage, definition: &MigrationDefinition, direction: Direction) -> &'static str {
    match (stage, direction) {
        (Stage::Pre, Direction::Up) => "pre_up",
        (Stage::Pre, Direction::Down) => "pre_down",
        (Stage::Post, Direction::Up) => "post_up",
        (Stage::Post, Direction::Down) => "post_down",
        (Stage::Body, direction) => match (definition.handle().form(), direction) {
            (MigrationForm::Unified, _) => "migrate",
            (MigrationForm::Directional, Direction::Up) => "up",
            (MigrationForm::Directional, Direction::Down) => "down",
        },
    }
}

fn hook_failed(hook: &'static str, id: &MigrationId, source: HookError) -> MigrationError {
    MigrationError::Hook {
        hook,
        migration: id.to_string(),
        source,
    }
}
