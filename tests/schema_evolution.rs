mod common;

use common::{count, open_db, seed_users, users_descriptor};
use tablemigrate::core::{
    db,
    descriptor::ColumnMap,
    engine,
    error::{MigrateError, Phase},
    journal::Journal,
    output::Reporter,
    schema,
};

fn columns(pairs: &[(&str, &str)]) -> ColumnMap {
    pairs
        .iter()
        .map(|(c, t)| (c.to_string(), t.to_string()))
        .collect()
}

#[test]
fn adding_columns_twice_is_a_no_op_the_second_time() {
    let (_tmp, conn) = open_db();
    seed_users(&conn);
    let add = columns(&[("is_migrated", "INTEGER DEFAULT 0"), ("legacy_id", "INTEGER")]);
    let mut reporter = Reporter::buffered();

    let first = schema::evolve(&conn, "users", &add, &ColumnMap::new(), &mut reporter)
        .expect("first evolve");
    assert_eq!(first.added, vec!["is_migrated", "legacy_id"]);
    assert!(first.changed());

    let second = schema::evolve(&conn, "users", &add, &ColumnMap::new(), &mut reporter)
        .expect("second evolve");
    assert!(second.added.is_empty());
    assert_eq!(second.already_present, vec!["is_migrated", "legacy_id"]);
    assert!(!second.changed());
    assert!(
        reporter
            .captured()
            .contains("No changes detected for table users"),
        "{}",
        reporter.captured()
    );

    let cols = db::table_columns(&conn, "users").expect("columns");
    assert_eq!(cols.iter().filter(|c| c.name == "is_migrated").count(), 1);
}

#[test]
fn modifying_a_column_rebuilds_the_table_and_keeps_rows_and_indexes() {
    let (_tmp, conn) = open_db();
    seed_users(&conn);
    conn.execute_batch(
        "INSERT INTO users (email, score) VALUES ('x@example.com', 1.0), ('y@example.com', 2.0);",
    )
    .expect("rows");
    let modify = columns(&[("email", "VARCHAR(255)")]);

    for _ in 0..2 {
        let report = schema::evolve(
            &conn,
            "users",
            &ColumnMap::new(),
            &modify,
            &mut Reporter::quiet(),
        )
        .expect("modify");
        assert_eq!(report.modified, vec!["email"]);
    }

    let email = db::table_columns(&conn, "users")
        .expect("columns")
        .into_iter()
        .find(|c| c.name == "email")
        .expect("email column");
    assert_eq!(email.decl_type, "VARCHAR(255)");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM users"), 2);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM users WHERE email = 'y@example.com' AND score = 2.0"),
        1
    );
    let deps = db::dependent_sql(&conn, "users").expect("dependents");
    assert!(deps.own.iter().any(|o| o.name == "idx_users_email"), "{deps:?}");
    assert!(!db::table_exists(&conn, "__rebuild_users").expect("catalog"));
}

#[test]
fn rebuild_restores_foreign_key_enforcement() {
    let (_tmp, conn) = open_db();
    conn.execute_batch(
        "CREATE TABLE owners (id INTEGER PRIMARY KEY, label VARCHAR(10));
         CREATE TABLE pets (id INTEGER PRIMARY KEY, owner_id INTEGER REFERENCES owners(id));
         INSERT INTO owners VALUES (1, 'a');
         INSERT INTO pets VALUES (1, 1);",
    )
    .expect("schema");

    schema::modify_column(&conn, "owners", "label", "TEXT").expect("modify");

    let fk: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
        .expect("pragma");
    assert_eq!(fk, 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM pets WHERE owner_id = 1"), 1);
    let orphan = conn.execute("INSERT INTO pets VALUES (2, 99)", []);
    assert!(orphan.is_err(), "foreign keys must be enforced after a rebuild");
}

#[test]
fn rebuild_keeps_the_autoincrement_high_water_mark() {
    let (_tmp, conn) = open_db();
    conn.execute_batch(
        "CREATE TABLE domains (id INTEGER PRIMARY KEY AUTOINCREMENT, v VARCHAR(10));
         INSERT INTO domains (v) VALUES ('a'), ('b'), ('c');
         DELETE FROM domains WHERE id IN (2, 3);",
    )
    .expect("schema");
    let modify = columns(&[("v", "VARCHAR(255)")]);

    schema::evolve(&conn, "domains", &ColumnMap::new(), &modify, &mut Reporter::quiet())
        .expect("modify");
    conn.execute("INSERT INTO domains (v) VALUES ('d')", [])
        .expect("insert");

    assert_eq!(count(&conn, "SELECT MAX(id) FROM domains"), 4, "deleted ids must not be reused");
    assert_eq!(count(&conn, "SELECT seq FROM sqlite_sequence WHERE name = 'domains'"), 4);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM sqlite_sequence WHERE name LIKE '__rebuild%'"),
        0
    );
}

#[test]
fn rebuild_of_an_emptied_autoincrement_table_keeps_counting() {
    let (_tmp, conn) = open_db();
    conn.execute_batch(
        "CREATE TABLE domains (id INTEGER PRIMARY KEY AUTOINCREMENT, v VARCHAR(10));
         INSERT INTO domains (v) VALUES ('a'), ('b'), ('c');
         DELETE FROM domains;",
    )
    .expect("schema");

    schema::modify_column(&conn, "domains", "v", "VARCHAR(255)").expect("modify");
    conn.execute("INSERT INTO domains (v) VALUES ('d')", [])
        .expect("insert");

    assert_eq!(count(&conn, "SELECT id FROM domains"), 4);
}

#[test]
fn undo_and_rerun_never_hand_out_an_old_target_id() {
    let (_tmp, mut conn) = open_db();
    seed_users(&conn);
    let d = users_descriptor();
    let journal = Journal::disabled(&d);

    engine::run_forward(&mut conn, &d, &mut Reporter::quiet(), &journal).expect("first run");
    engine::run_rollback(&conn, &d, &mut Reporter::quiet(), &journal).expect("undo");
    engine::run_forward(&mut conn, &d, &mut Reporter::quiet(), &journal).expect("second run");

    assert_eq!(count(&conn, "SELECT MIN(user_id) FROM users"), 4);
}

#[test]
fn rebuild_carries_views_and_triggers_that_mention_the_table() {
    let (_tmp, conn) = open_db();
    conn.execute_batch(
        "CREATE TABLE t (id INTEGER PRIMARY KEY, v VARCHAR(10));
         CREATE TABLE inbox (id INTEGER PRIMARY KEY, note TEXT);
         CREATE VIEW tv AS SELECT id, v FROM t;
         CREATE VIEW tv_upper AS SELECT id, upper(v) AS v FROM tv;
         CREATE TRIGGER inbox_ai AFTER INSERT ON inbox BEGIN
             INSERT INTO t (v) VALUES (NEW.note);
         END;
         INSERT INTO t (v) VALUES ('a');",
    )
    .expect("schema");

    schema::modify_column(&conn, "t", "v", "VARCHAR(255)").expect("modify with dependent views");

    conn.execute("INSERT INTO inbox (note) VALUES ('b')", [])
        .expect("foreign trigger still fires");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM tv"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM tv_upper WHERE v = 'B'"), 1);
    let deps = db::dependent_sql(&conn, "t").expect("dependents");
    let views: Vec<&str> = deps.views.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(views, vec!["tv", "tv_upper"]);
    let triggers: Vec<&str> = deps.foreign_triggers.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(triggers, vec!["inbox_ai"]);
}

#[test]
fn modifying_a_missing_column_fails() {
    let (_tmp, conn) = open_db();
    seed_users(&conn);
    let err = schema::modify_column(&conn, "users", "nickname", "TEXT").expect_err("missing");
    assert!(
        matches!(err, MigrateError::ColumnMissing { ref table, ref column } if table == "users" && column == "nickname"),
        "{err}"
    );
}

#[test]
fn schema_failure_keeps_earlier_changes_and_touches_no_data() {
    let (_tmp, mut conn) = open_db();
    seed_users(&conn);
    let text = common::USERS.replace("email = \"VARCHAR(255)\"", "nickname = \"VARCHAR(255)\"");
    let d = tablemigrate::core::descriptor::MigrationDescriptor::from_toml(&text).expect("descriptor");

    let err = engine::run_forward(
        &mut conn,
        &d,
        &mut Reporter::quiet(),
        &Journal::disabled(&d),
    )
    .expect_err("schema phase must fail");

    match &err {
        MigrateError::PhaseError { phase, .. } => assert_eq!(*phase, Phase::EvolveTarget),
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(err.root(), MigrateError::ColumnMissing { .. }));
    // Additions made before the failure stay; no rows were moved.
    assert!(db::column_exists(&conn, "users", "is_migrated").expect("catalog"));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM users"), 0);
    assert!(!db::table_exists(&conn, "map_users_legacy").expect("catalog"));

    // The unmodified descriptor converges on the same schema and migrates.
    let d = users_descriptor();
    engine::run_forward(&mut conn, &d, &mut Reporter::quiet(), &Journal::disabled(&d))
        .expect("forward run");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM users WHERE is_migrated = 1"), 3);
}
