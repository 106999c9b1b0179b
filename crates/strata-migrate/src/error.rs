//! Migration error types.

use crate::id::{Direction, MigrationId, VersionStyle};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by migration hooks and custom change handlers.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Number-style and step-style identifiers were mixed.
    #[error("illegal mixing of numbered and stepped migrations: '{identifier}' conflicts with {established} style")]
    StyleConflict {
        /// The offending identifier or operation.
        identifier: String,
        /// The style already in effect.
        established: VersionStyle,
    },

    /// Identifier is neither a discovery timestamp nor a step key.
    #[error("invalid migration identifier '{identifier}': {reason}")]
    InvalidIdentifier {
        /// The offending identifier.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Identifier registered twice.
    #[error("migration '{identifier}' is already registered")]
    DuplicateMigration {
        /// The duplicated identifier.
        identifier: String,
    },

    /// Number-style definitions registered out of discovery order.
    #[error("migration '{identifier}' registered after newer migration '{previous}'")]
    OutOfOrder {
        /// The late identifier.
        identifier: String,
        /// The newest identifier registered before it.
        previous: String,
    },

    /// No definition exists for the identifier.
    #[error("could not find migration for step '{identifier}'")]
    UnknownMigration {
        /// The unresolved identifier.
        identifier: String,
    },

    /// No handler is registered for a declared change type.
    #[error("invalid migration change type: {change_type}")]
    UnsupportedChangeType {
        /// The raw change type.
        change_type: String,
    },

    /// A declared change carried a malformed payload.
    #[error("invalid payload for {change_type}: {reason}")]
    InvalidPayload {
        /// The change type.
        change_type: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// The requested target is the current position.
    #[error("already at version # {version}")]
    AlreadyAtVersion {
        /// The current position.
        version: String,
    },

    /// A step key being removed is not recorded as applied.
    #[error("step '{step}' is not recorded as applied")]
    NotApplied {
        /// The step key.
        step: String,
    },

    /// Stored version does not match the definitions on disk.
    #[error("current version of database ({stored}) does not match number of migration definitions ({discovered}), fix this before continuing")]
    InconsistentState {
        /// The stored scalar version.
        stored: u64,
        /// The number of convertible definitions found.
        discovered: usize,
    },

    /// The version table could not be created.
    #[error("failed to create migration table '{table}': {source}")]
    StorageCreateFailure {
        /// The version table name.
        table: String,
        /// Underlying storage error.
        #[source]
        source: strata_storage::Error,
    },

    /// Unknown version style name.
    #[error("valid styles are \"number\" and \"steps\", got '{0}'")]
    InvalidStyle(String),

    /// The operation is deliberately unsupported.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A lifecycle hook failed.
    #[error("{hook} hook of '{migration}' failed: {source}")]
    Hook {
        /// Hook name, e.g. "pre_up".
        hook: &'static str,
        /// Migration identifier.
        migration: String,
        /// Error raised by the hook.
        #[source]
        source: HookError,
    },

    /// Filesystem error during style conversion.
    #[error("i/o error on {path:?}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A definition-source pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A non-dry run collected one or more errors and was rolled back.
    #[error("{0}")]
    RunFailed(RunFailure),
}

impl MigrationError {
    /// True for the "nothing to do" outcome.
    pub fn is_already_at_version(&self) -> bool {
        matches!(self, MigrationError::AlreadyAtVersion { .. })
    }
}

/// Failure collected during a run, with the step it happened in.
#[derive(Debug)]
pub struct RecordedError {
    /// The step and direction being executed, if any.
    pub step: Option<(MigrationId, Direction)>,
    /// The error raised.
    pub error: MigrationError,
}

impl RecordedError {
    /// Render for reporting at 1-based `position`.
    pub fn entry(&self, position: usize) -> FailureEntry {
        FailureEntry {
            position,
            step: self
                .step
                .as_ref()
                .map(|(id, direction)| (id.to_string(), *direction)),
            message: self.error.to_string(),
        }
    }
}

/// One collected failure, rendered for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureEntry {
    /// 1-based position in the error log.
    pub position: usize,
    /// The step that failed, if the failure happened inside one.
    pub step: Option<(String, Direction)>,
    /// The error message.
    pub message: String,
}

impl fmt::Display for FailureEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Some((id, direction)) => write!(
                f,
                " Error #{} - [{} {}] {}",
                self.position, id, direction, self.message
            ),
            None => write!(f, " Error #{} - {}", self.position, self.message),
        }
    }
}

/// Aggregate of every failure collected during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    /// Collected failures in order.
    pub entries: Vec<FailureEntry>,
}

impl RunFailure {
    /// Number of collected failures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no failures were collected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = format!("{} error(s) encountered during migration", self.entries.len());
        writeln!(f, "{}", title)?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}
