//! Integration tests for converting the version table to step style.

mod common;

use chrono::{TimeZone, Utc};
use common::{new_log, Recorder, TestContext};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strata_migrate::{
    DefinitionSource, MigrateOutcome, MigrationConfig, MigrationError, MigrationId,
    MigrationRegistry, NumberedArtifact, StepKey, VersionStyle,
};

/// Discovery timestamps, one day apart from 2009-02-13 23:31:30 UTC.
const TIMESTAMPS: [i64; 5] = [
    1_234_567_890,
    1_234_654_290,
    1_234_740_690,
    1_234_827_090,
    1_234_913_490,
];

const SLUGS: [&str; 5] = ["add_users", "add_posts", "add_tags", "add_likes", "add_votes"];

fn write_definitions(dir: &Path, count: usize) {
    for (ts, slug) in TIMESTAMPS.iter().zip(SLUGS).take(count) {
        let body = format!("pub struct Migration{};\n", ts);
        fs::write(dir.join(format!("{}_{}.rs", ts, slug)), body).unwrap();
    }
}

fn number_registry(count: usize) -> MigrationRegistry {
    let log = new_log();
    MigrationRegistry::from_entries(
        TIMESTAMPS
            .iter()
            .zip(SLUGS)
            .take(count)
            .map(|(ts, slug)| (ts.to_string(), Recorder::new(slug, &log))),
    )
    .unwrap()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_mismatched_version_aborts_before_any_write() {
    let ctx = TestContext::new();
    let dir = ctx.definitions_dir();
    write_definitions(&dir, 4);

    let mut engine = ctx.engine(number_registry(5), MigrationConfig::default());
    engine.migrate(None).unwrap();
    assert_eq!(engine.current_version().unwrap(), 5);
    let files = file_names(&dir);
    let layout = ctx.storage.table("migration_version").unwrap();

    let err = engine.change_style(VersionStyle::Steps, &dir).unwrap_err();

    assert!(matches!(
        err,
        MigrationError::InconsistentState {
            stored: 5,
            discovered: 4
        }
    ));
    assert_eq!(file_names(&dir), files);
    assert_eq!(ctx.storage.table("migration_version").unwrap(), layout);
    assert_eq!(engine.config().style, VersionStyle::Number);
    assert_eq!(engine.current_version().unwrap(), 5);
}

#[test]
fn test_convert_number_to_steps() {
    let ctx = TestContext::new();
    let dir = ctx.definitions_dir();
    write_definitions(&dir, 3);

    let mut engine = ctx.engine(number_registry(3), MigrationConfig::default());
    engine.migrate(None).unwrap();

    let report = engine
        .change_style(VersionStyle::Steps, &dir)
        .unwrap()
        .expect("conversion ran");

    assert_eq!(report.previous_version, 3);
    assert_eq!(report.table, "migration_version");
    let keys: Vec<&str> = report.steps.iter().map(|s| s.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "V20090213233130__add_users",
            "V20090214233130__add_posts",
            "V20090215233130__add_tags",
        ]
    );
    assert_eq!(
        report.steps[0].installed_at,
        Utc.timestamp_opt(TIMESTAMPS[0], 0).unwrap()
    );
    assert_eq!(
        file_names(&dir),
        vec![
            "V20090213233130__add_users.rs",
            "V20090214233130__add_posts.rs",
            "V20090215233130__add_tags.rs",
        ]
    );
    assert_eq!(
        fs::read_to_string(&report.steps[1].new_path).unwrap(),
        "pub struct V20090214233130__add_posts;\n"
    );

    assert_eq!(engine.config().style, VersionStyle::Steps);
    let applied: Vec<String> = engine
        .current_steps()
        .unwrap()
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(applied, keys);

    // The registry still holds number-style definitions until it is rebuilt.
    assert!(matches!(
        engine.migrate(None),
        Err(MigrationError::StyleConflict { .. })
    ));

    let log = new_log();
    let rebuilt = MigrationRegistry::from_entries(
        keys.iter()
            .map(|k| (k.to_string(), Recorder::new(k, &log))),
    )
    .unwrap();
    engine.set_registry(rebuilt);
    let last = MigrationId::Step(StepKey::parse(keys[2]).unwrap());
    assert_eq!(engine.migrate(None).unwrap(), MigrateOutcome::NoOp(Some(last)));
}

/// Lists one artifact and refuses to rename it.
struct ReadOnlySource {
    dir: PathBuf,
}

impl DefinitionSource for ReadOnlySource {
    fn numbered(&self) -> Result<Vec<NumberedArtifact>, MigrationError> {
        Ok(vec![NumberedArtifact {
            path: self.dir.join("1234567890_add_users.rs"),
            timestamp: TIMESTAMPS[0],
            slug: "add_users".to_string(),
        }])
    }

    fn rename(&self, artifact: &NumberedArtifact, _key: &StepKey) -> Result<PathBuf, MigrationError> {
        Err(MigrationError::Io {
            path: artifact.path.clone(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}

#[test]
fn test_rename_failure_after_commit_keeps_steps_style() {
    let ctx = TestContext::new();
    let source = ReadOnlySource {
        dir: ctx.definitions_dir(),
    };

    let mut engine = ctx.engine(number_registry(1), MigrationConfig::default());
    engine.migrate(None).unwrap();

    let err = engine.change_style_with(VersionStyle::Steps, &source).unwrap_err();
    assert!(matches!(err, MigrationError::Io { .. }));

    assert_eq!(engine.config().style, VersionStyle::Steps);
    let applied: Vec<String> = engine
        .current_steps()
        .unwrap()
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(applied, vec!["V20090213233130__add_users"]);

    assert!(matches!(
        engine.migrate(None),
        Err(MigrationError::StyleConflict { .. })
    ));
    assert_eq!(ctx.storage.scan("migration_version").unwrap().len(), 1);
}

#[test]
fn test_convert_twice_is_noop() {
    let ctx = TestContext::new();
    let dir = ctx.definitions_dir();
    write_definitions(&dir, 1);

    let mut engine = ctx.engine(number_registry(1), MigrationConfig::default());
    engine.migrate(None).unwrap();

    assert!(engine.change_style(VersionStyle::Steps, &dir).unwrap().is_some());
    assert!(engine.change_style(VersionStyle::Steps, &dir).unwrap().is_none());
    assert!(matches!(
        engine.change_style(VersionStyle::Number, &dir),
        Err(MigrationError::NotImplemented(_))
    ));
}

#[test]
fn test_empty_database_with_no_definitions() {
    let ctx = TestContext::new();
    let dir = ctx.definitions_dir();

    let mut engine = ctx.engine(MigrationRegistry::new(), MigrationConfig::default());
    let report = engine
        .change_style(VersionStyle::Steps, &dir)
        .unwrap()
        .expect("conversion ran");

    assert!(report.steps.is_empty());
    assert!(engine.current_steps().unwrap().is_empty());
    let layout = ctx.storage.table("migration_version").unwrap().unwrap();
    assert_eq!(
        layout.column_names(),
        vec!["description", "class_name", "installed_at"]
    );
}
