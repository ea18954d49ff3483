mod common;

use common::{open_db, seed_users, users_descriptor};
use tablemigrate::core::{
    engine,
    error::{MigrateError, ValidationFailure},
    journal::Journal,
    output::Reporter,
};

fn migrated() -> (tempfile::TempDir, rusqlite::Connection) {
    let (tmp, mut conn) = open_db();
    seed_users(&conn);
    let d = users_descriptor();
    engine::run_forward(&mut conn, &d, &mut Reporter::quiet(), &Journal::disabled(&d))
        .expect("forward run");
    (tmp, conn)
}

fn failure(err: &MigrateError) -> &ValidationFailure {
    match err.root() {
        MigrateError::ValidationError(f) => f,
        other => panic!("expected a validation failure, got: {other}"),
    }
}

#[test]
fn clean_migration_validates() {
    let (_tmp, mut conn) = migrated();
    let report = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect("valid");
    assert_eq!(report.source_migrated, 3);
    assert_eq!(report.target_migrated, 3);
    assert_eq!(report.pivot_rows, Some(3));
    assert_eq!(report.valid_references, Some(3));
}

#[test]
fn corrupted_field_is_reported_with_its_source_id() {
    let (_tmp, mut conn) = migrated();
    conn.execute("UPDATE users SET email = 'BOB@example.com' WHERE legacy_id = 2", [])
        .expect("corrupt");
    let mut reporter = Reporter::buffered();

    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut reporter)
        .expect_err("mismatch");

    assert_eq!(
        failure(&err),
        &ValidationFailure::FieldMismatch {
            sample: vec!["2".to_string()]
        }
    );
    assert!(reporter.captured().contains("Example mismatched ids: 2"));
}

#[test]
fn rounding_and_timestamp_normalization_hide_insignificant_differences() {
    let (_tmp, mut conn) = migrated();
    conn.execute_batch(
        "UPDATE users SET score = 9.501 WHERE legacy_id = 1;
         UPDATE users SET joined_ts = '2024-02-03T04:05:06' WHERE legacy_id = 2;",
    )
    .expect("normalize");
    engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect("differences below comparison precision are accepted");

    conn.execute("UPDATE users SET score = 9.6 WHERE legacy_id = 1", [])
        .expect("corrupt");
    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect_err("mismatch");
    assert!(matches!(failure(&err), ValidationFailure::FieldMismatch { sample } if sample == &["1"]));
}

#[test]
fn unparseable_timestamps_still_count_as_mismatches() {
    let (_tmp, mut conn) = migrated();
    conn.execute_batch(
        "UPDATE legacy_users SET joined = 'n/a' WHERE id = 1;
         UPDATE users SET joined_ts = 'unknown' WHERE legacy_id = 1;
         UPDATE users SET joined_ts = 'garbage' WHERE legacy_id = 3;",
    )
    .expect("corrupt timestamps");

    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect_err("mismatch");

    match failure(&err) {
        ValidationFailure::FieldMismatch { sample } => {
            let mut ids = sample.clone();
            ids.sort();
            assert_eq!(ids, vec!["1", "3"]);
        }
        other => panic!("unexpected failure: {other}"),
    }
}

#[test]
fn mismatch_sample_is_bounded() {
    let (_tmp, mut conn) = migrated();
    conn.execute("UPDATE users SET email = upper(email)", [])
        .expect("corrupt all");
    let text = common::USERS.replace(
        "pivot_table = \"map_users_legacy\"",
        "pivot_table = \"map_users_legacy\"\nsample_limit = 2",
    );
    let d = tablemigrate::core::descriptor::MigrationDescriptor::from_toml(&text).expect("descriptor");

    let err = engine::validate_only(&mut conn, &d, &mut Reporter::quiet()).expect_err("mismatch");
    match failure(&err) {
        ValidationFailure::FieldMismatch { sample } => assert_eq!(sample.len(), 2),
        other => panic!("unexpected failure: {other}"),
    }
}

#[test]
fn orphaned_pivot_row_fails_the_referential_check() {
    let (_tmp, mut conn) = migrated();
    conn.execute(
        "UPDATE map_users_legacy SET user_id = 999 WHERE legacy_id = 3",
        [],
    )
    .expect("orphan");

    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect_err("orphan");
    assert_eq!(
        failure(&err),
        &ValidationFailure::DanglingPivotReferences {
            expected: 3,
            actual: 2
        }
    );
}

#[test]
fn missing_pivot_row_fails_the_pivot_count() {
    let (_tmp, mut conn) = migrated();
    conn.execute("DELETE FROM map_users_legacy WHERE legacy_id = 1", [])
        .expect("delete link");

    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect_err("pivot count");
    assert_eq!(
        failure(&err),
        &ValidationFailure::PivotCountMismatch {
            expected: 3,
            actual: 2
        }
    );
}

#[test]
fn flag_count_mismatch_is_checked_first() {
    let (_tmp, mut conn) = migrated();
    conn.execute("UPDATE legacy_users SET migration_done = 0 WHERE id = 3", [])
        .expect("unflag");

    let err = engine::validate_only(&mut conn, &users_descriptor(), &mut Reporter::quiet())
        .expect_err("row counts");
    assert_eq!(
        failure(&err),
        &ValidationFailure::RowCountMismatch {
            source_rows: 2,
            target_rows: 3
        }
    );
}

#[test]
fn validate_only_never_writes() {
    let (_tmp, mut conn) = migrated();
    let d = users_descriptor();
    let before = engine::status(&conn, &d).expect("status");
    engine::validate_only(&mut conn, &d, &mut Reporter::quiet()).expect("valid");
    assert_eq!(engine::status(&conn, &d).expect("status"), before);
}
