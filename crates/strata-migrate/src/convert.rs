//! One-way conversion of the version table from number style to step style.
//!
//! Conversion has three phases:
//!
//! 1. A dry pass lists every number-style definition artifact and computes
//!    the step key it becomes. The count must equal the stored scalar
//!    version, otherwise nothing is touched.
//! 2. The version table is dropped, recreated in step layout and filled with
//!    one row per converted step, in a single storage transaction.
//! 3. Each artifact is renamed and its declaration rewritten to the new key.
//!
//! Phase 3 runs after the commit and is not undone if it fails part way.

use crate::error::MigrationError;
use crate::id::{step_key_for_timestamp, StepKey, VersionStyle};
use crate::version_store::VersionStore;
use chrono::{DateTime, Utc};
use regex::{Captures, Regex};
use std::fs;
use std::path::{Path, PathBuf};
use strata_storage::StorageEngine;
use tracing::{debug, info};

/// Stem of a number-style artifact: ten digit discovery timestamp, `_`, slug.
const NUMBERED_STEM: &str = r"^(\d{10})_([A-Za-z_][A-Za-z0-9_]*)$";

/// First declaration in an artifact. Group 1 is kept, the name after it is
/// replaced.
const DEFAULT_DECLARATION: &str = r"\b((?:struct|class)\s+)[A-Za-z_][A-Za-z0-9_]*";

/// Default artifact extension.
const DEFAULT_EXTENSION: &str = "rs";

/// A number-style definition artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedArtifact {
    /// Where the artifact lives.
    pub path: PathBuf,
    /// Discovery timestamp encoded in the name.
    pub timestamp: i64,
    /// Slug after the timestamp.
    pub slug: String,
}

/// Where number-style definitions are stored outside the database.
pub trait DefinitionSource {
    /// List every number-style artifact.
    fn numbered(&self) -> Result<Vec<NumberedArtifact>, MigrationError>;

    /// Rename `artifact` to `key` and rewrite its identifier token. Returns
    /// the new location.
    fn rename(&self, artifact: &NumberedArtifact, key: &StepKey)
        -> Result<PathBuf, MigrationError>;
}

/// Definition files in a directory tree.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extension: String,
    declaration: Regex,
    stem: Regex,
}

impl DirectorySource {
    /// Source rooted at `root`, matching `.rs` files.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        Ok(Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            declaration: Regex::new(DEFAULT_DECLARATION)?,
            stem: Regex::new(NUMBERED_STEM)?,
        })
    }

    /// Match files with `extension` instead.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Use `pattern` to find the declaration to rewrite. Capture group 1 is
    /// kept and the rest of the match is replaced by the step key.
    pub fn with_declaration_pattern(mut self, pattern: &str) -> Result<Self, MigrationError> {
        self.declaration = Regex::new(pattern)?;
        Ok(self)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, dir: &Path, found: &mut Vec<NumberedArtifact>) -> Result<(), MigrationError> {
        let entries = fs::read_dir(dir).map_err(|source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();

            if path.is_dir() {
                self.walk(&path, found)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(caps) = self.stem.captures(stem) else {
                continue;
            };
            let timestamp = caps[1]
                .parse::<i64>()
                .map_err(|e| MigrationError::InvalidIdentifier {
                    identifier: stem.to_string(),
                    reason: e.to_string(),
                })?;
            let slug = caps[2].to_string();

            found.push(NumberedArtifact {
                path,
                timestamp,
                slug,
            });
        }
        Ok(())
    }
}

impl DefinitionSource for DirectorySource {
    fn numbered(&self) -> Result<Vec<NumberedArtifact>, MigrationError> {
        let mut found = Vec::new();
        self.walk(&self.root, &mut found)?;
        found.sort_by(|a, b| (a.timestamp, &a.slug).cmp(&(b.timestamp, &b.slug)));
        Ok(found)
    }

    fn rename(
        &self,
        artifact: &NumberedArtifact,
        key: &StepKey,
    ) -> Result<PathBuf, MigrationError> {
        let content = fs::read_to_string(&artifact.path).map_err(io_error(&artifact.path))?;
        let rewritten = self
            .declaration
            .replacen(&content, 1, |caps: &Captures| {
                let keep = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", keep, key)
            })
            .into_owned();

        let target = artifact
            .path
            .with_file_name(format!("{}.{}", key, self.extension));
        fs::write(&target, rewritten).map_err(io_error(&target))?;
        fs::remove_file(&artifact.path).map_err(io_error(&artifact.path))?;

        debug!(from = ?artifact.path, to = ?target, "renamed definition");
        Ok(target)
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> MigrationError {
    let path = path.to_path_buf();
    move |source| MigrationError::Io { path, source }
}

/// One artifact converted to step style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedStep {
    /// Location before conversion.
    pub old_path: PathBuf,
    /// Location after conversion.
    pub new_path: PathBuf,
    /// The step key it now carries.
    pub key: StepKey,
    /// Recorded installation time (the discovery timestamp).
    pub installed_at: DateTime<Utc>,
}

/// Result of a completed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// Version table that was rewritten.
    pub table: String,
    /// Scalar version stored before conversion.
    pub previous_version: u64,
    /// Converted artifacts in step order.
    pub steps: Vec<ConvertedStep>,
}

/// A step key planned for an artifact by the dry pass.
#[derive(Debug, Clone)]
struct PlannedStep {
    artifact: NumberedArtifact,
    key: StepKey,
    installed_at: DateTime<Utc>,
}

/// Converts a number-style version table and its definitions to step style.
pub struct StyleConverter<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S: DefinitionSource + ?Sized> StyleConverter<'a, S> {
    /// Create a converter over `source`.
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Step keys every artifact would receive, without writing anything.
    pub fn preview(&self) -> Result<Vec<(NumberedArtifact, StepKey)>, MigrationError> {
        Ok(self
            .plan()?
            .into_iter()
            .map(|planned| (planned.artifact, planned.key))
            .collect())
    }

    fn plan(&self) -> Result<Vec<PlannedStep>, MigrationError> {
        self.source
            .numbered()?
            .into_iter()
            .map(|artifact| {
                let key = step_key_for_timestamp(artifact.timestamp, &artifact.slug)?;
                let installed_at = key.timestamp().and_utc();
                Ok(PlannedStep {
                    artifact,
                    key,
                    installed_at,
                })
            })
            .collect()
    }

    /// Convert `store` to step style.
    ///
    /// `store` must be in number style with its table created. It is only
    /// updated once the database part has committed, so a rename failure
    /// returns an error with `store` already in step style.
    pub fn convert(
        &self,
        storage: &StorageEngine,
        store: &mut VersionStore,
    ) -> Result<ConversionReport, MigrationError> {
        if store.style() != VersionStyle::Number {
            return Err(MigrationError::StyleConflict {
                identifier: "convert to steps".to_string(),
                established: store.style(),
            });
        }

        let planned = self.plan()?;
        let previous_version = store.current_version(&storage.transaction())?;
        if previous_version != planned.len() as u64 {
            return Err(MigrationError::InconsistentState {
                stored: previous_version,
                discovered: planned.len(),
            });
        }

        let mut next = store.clone();
        let mut tx = storage.transaction();
        next.drop_storage(&mut tx)?;
        next.switch_style(VersionStyle::Steps);
        next.create_in(&mut tx)?;
        for step in &planned {
            next.record_step(&mut tx, &step.key, step.installed_at)?;
        }
        tx.commit()?;
        *store = next;

        info!(
            table = store.table_name(),
            steps = planned.len(),
            "version table converted to steps style"
        );

        let mut steps = Vec::with_capacity(planned.len());
        for step in planned {
            let new_path = self.source.rename(&step.artifact, &step.key)?;
            steps.push(ConvertedStep {
                old_path: step.artifact.path,
                new_path,
                key: step.key,
                installed_at: step.installed_at,
            });
        }

        Ok(ConversionReport {
            table: store.table_name().to_string(),
            previous_version,
            steps,
        })
    }
}
