//! Integration tests for step-style migration runs.

mod common;

use chrono::{TimeZone, Utc};
use common::{entries, new_log, Log, Recorder, TableStep, TestContext};
use std::collections::BTreeSet;
use strata_migrate::{
    Direction, MigrateOutcome, MigrationConfig, MigrationEngine, MigrationError, MigrationId,
    MigrationRegistry, StepKey, VersionStore, VersionStyle,
};

const A: &str = "V20240101000000__a";
const B: &str = "V20240201000000__b";
const C: &str = "V20240301000000__c";

fn key(s: &str) -> StepKey {
    StepKey::parse(s).unwrap()
}

fn step(s: &str) -> MigrationId {
    MigrationId::Step(key(s))
}

fn config() -> MigrationConfig {
    MigrationConfig::default().with_style(VersionStyle::Steps)
}

/// Registry of recorders named after the step slug.
fn recorders(log: &Log) -> MigrationRegistry {
    MigrationRegistry::from_entries(
        [C, A, B]
            .into_iter()
            .map(|k| (k, Recorder::new(key(k).slug(), log))),
    )
    .unwrap()
}

/// Mark `applied` as installed without running anything.
fn seed(ctx: &TestContext, applied: &[&str]) {
    let mut store = VersionStore::new("migration_version", VersionStyle::Steps);
    store.ensure_created(&ctx.storage).unwrap();
    let mut tx = ctx.storage.transaction();
    for k in applied {
        store.record_step(&mut tx, &key(k), Utc::now()).unwrap();
    }
    tx.commit().unwrap();
}

fn applied(engine: &mut MigrationEngine) -> Vec<String> {
    engine
        .current_steps()
        .unwrap()
        .into_iter()
        .map(|k| k.to_string())
        .collect()
}

#[test]
fn test_migrate_applies_everything_in_order() {
    let ctx = TestContext::new();
    let log = new_log();
    let mut engine = ctx.engine(recorders(&log), config());

    assert_eq!(engine.migrate(None).unwrap(), MigrateOutcome::Applied(step(C)));
    assert_eq!(entries(&log), vec!["up a", "up b", "up c"]);
    assert_eq!(applied(&mut engine), vec![A, B, C]);
}

#[test]
fn test_target_rewinds_later_steps() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A, B]);
    let mut engine = ctx.engine(recorders(&log), config());

    let outcome = engine.migrate(Some(step(A))).unwrap();

    assert_eq!(outcome, MigrateOutcome::Applied(step(A)));
    assert_eq!(entries(&log), vec!["down b"]);
    assert_eq!(applied(&mut engine), vec![A]);
}

#[test]
fn test_gaps_are_filled() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A, C]);
    let mut engine = ctx.engine(recorders(&log), config());

    assert_eq!(engine.migrate(None).unwrap(), MigrateOutcome::Applied(step(C)));
    assert_eq!(entries(&log), vec!["up b"]);
    assert_eq!(applied(&mut engine), vec![A, B, C]);
}

#[test]
fn test_target_in_gap_rewinds_then_applies() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A, C]);
    let mut engine = ctx.engine(recorders(&log), config());

    assert_eq!(
        engine.migrate(Some(step(B))).unwrap(),
        MigrateOutcome::Applied(step(B))
    );
    assert_eq!(entries(&log), vec!["down c", "up b"]);
    assert_eq!(applied(&mut engine), vec![A, B]);
}

#[test]
fn test_nothing_to_do_is_noop() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A, B, C]);
    let mut engine = ctx.engine(recorders(&log), config());

    assert_eq!(
        engine.migrate(None).unwrap(),
        MigrateOutcome::NoOp(Some(step(C)))
    );
    assert!(engine.errors()[0].error.is_already_at_version());
    assert!(entries(&log).is_empty());
}

#[test]
fn test_unknown_target_fails_before_running() {
    let ctx = TestContext::new();
    let log = new_log();
    let mut engine = ctx.engine(recorders(&log), config());

    let err = engine
        .migrate(Some(step("V20250101000000__missing")))
        .unwrap_err();
    assert!(matches!(err, MigrationError::UnknownMigration { .. }));
    assert!(matches!(
        engine.migrate(Some(MigrationId::Number(1))),
        Err(MigrationError::StyleConflict { .. })
    ));
    assert!(entries(&log).is_empty());
}

#[test]
fn test_failed_step_leaves_applied_set_untouched() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A]);
    let registry = MigrationRegistry::from_entries(vec![
        (A, Recorder::new("a", &log)),
        (B, Recorder::failing("b", &log, Direction::Up)),
        (C, Recorder::new("c", &log)),
    ])
    .unwrap();
    let mut engine = ctx.engine(registry, config());

    let err = engine.migrate(None).unwrap_err();
    assert!(matches!(err, MigrationError::RunFailed(ref f) if f.len() == 1));
    assert_eq!(entries(&log), vec!["up b", "up c"]);
    assert_eq!(applied(&mut engine), vec![A]);
}

#[test]
fn test_recorded_rows_describe_the_step() {
    let ctx = TestContext::new();
    let log = new_log();
    let registry = MigrationRegistry::from_entries(vec![(
        "V20240101000000__create_users_table",
        TableStep::new("users", &log),
    )])
    .unwrap();
    let mut engine = ctx.engine(registry, config());
    let before = Utc::now() - chrono::Duration::seconds(1);

    engine.migrate(None).unwrap();

    let store = VersionStore::new("migration_version", VersionStyle::Steps);
    let records = store.step_records(&ctx.storage.transaction()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "create users table");
    assert_eq!(records[0].class_name, "V20240101000000__create_users_table");
    assert!(records[0].installed_at >= before);
    assert!(ctx.storage.has_table("users").unwrap());

    engine
        .migrate(Some(step("V20240101000000__create_users_table")))
        .unwrap();
    assert_eq!(engine.error_count(), 1);
}

#[test]
fn test_down_removes_recorded_rows() {
    let ctx = TestContext::new();
    let log = new_log();
    let registry = MigrationRegistry::from_entries(vec![
        (A, TableStep::new("users", &log)),
        (B, TableStep::new("posts", &log)),
    ])
    .unwrap();
    let mut engine = ctx.engine(registry, config());

    engine.migrate(None).unwrap();
    engine.migrate(Some(step(A))).unwrap();

    assert_eq!(applied(&mut engine), vec![A]);
    assert!(!ctx.storage.has_table("posts").unwrap());
    assert!(ctx.storage.has_table("users").unwrap());
}

#[test]
fn test_dry_run_keeps_applied_set() {
    let ctx = TestContext::new();
    let log = new_log();
    seed(&ctx, &[A, B]);
    let mut engine = ctx.engine(recorders(&log), config());

    assert!(engine.migrate_dry_run(Some(step(A))).unwrap());
    assert_eq!(applied(&mut engine), vec![A, B]);
}

/// Every applied subset of `[A, B, C]` against every target.
#[test]
fn test_all_orderings() {
    let keys = [A, B, C];
    let targets = [None, Some(0), Some(1), Some(2)];

    for mask in 0u8..8 {
        let initial: Vec<&str> = (0..3)
            .filter(|i| mask & (1 << i) != 0)
            .map(|i| keys[i])
            .collect();

        for target in targets {
            let ctx = TestContext::new();
            let log = new_log();
            seed(&ctx, &initial);
            let mut engine = ctx.engine(recorders(&log), config());

            let limit = target.unwrap_or(2);
            let expected: Vec<&str> = keys[..=limit].to_vec();
            let resulting = step(keys[limit]);

            let mut expected_log: Vec<String> = Vec::new();
            if target.is_some() {
                for k in keys[limit + 1..].iter().rev() {
                    if initial.contains(k) {
                        expected_log.push(format!("down {}", key(k).slug()));
                    }
                }
            }
            for k in &keys[..=limit] {
                if !initial.contains(k) {
                    expected_log.push(format!("up {}", key(k).slug()));
                }
            }

            let outcome = engine.migrate(target.map(|t| step(keys[t]))).unwrap();
            let context = format!("initial {:?}, target {:?}", initial, target);

            if expected_log.is_empty() {
                assert_eq!(outcome, MigrateOutcome::NoOp(Some(resulting)), "{context}");
            } else {
                assert_eq!(outcome, MigrateOutcome::Applied(resulting), "{context}");
            }
            assert_eq!(entries(&log), expected_log, "{context}");

            let got: BTreeSet<String> = applied(&mut engine).into_iter().collect();
            let want: BTreeSet<String> = expected.into_iter().map(String::from).collect();
            assert_eq!(got, want, "{context}");
        }
    }
}

#[test]
fn test_installed_at_is_kept_when_seeding() {
    let ctx = TestContext::new();
    let mut store = VersionStore::new("migration_version", VersionStyle::Steps);
    store.ensure_created(&ctx.storage).unwrap();
    let at = Utc.with_ymd_and_hms(2020, 5, 17, 8, 0, 0).unwrap();

    let mut tx = ctx.storage.transaction();
    store.record_step(&mut tx, &key(A), at).unwrap();
    tx.commit().unwrap();

    let records = store.step_records(&ctx.storage.transaction()).unwrap();
    assert_eq!(records[0].installed_at, at);
}
