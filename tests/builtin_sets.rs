mod common;

use common::{count, open_db, seed_sites};
use tablemigrate::core::{
    db, engine,
    error::{MigrateError, ValidationFailure},
    journal::Journal,
    output::Reporter,
    sets,
};

#[test]
fn set_1_then_set_2_migrate_sites_and_their_settings() {
    let (_tmp, mut conn) = open_db();
    seed_sites(&conn);

    let sites = sets::load_set("set_1").expect("set_1");
    let report = engine::run_forward(&mut conn, &sites, &mut Reporter::quiet(), &Journal::disabled(&sites))
        .expect("set_1 forward run");
    assert_eq!(report.moved.inserted, 2);
    assert_eq!(report.validation.pivot_rows, Some(2));
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM lk_domains_2 WHERE domain_name = domain_cname AND domain_cname = domain_alias"
        ),
        2
    );
    let postal = db::table_columns(&conn, "lk_domains_2")
        .expect("columns")
        .into_iter()
        .find(|c| c.name == "domain_postal")
        .expect("domain_postal");
    assert_eq!(postal.decl_type, "VARCHAR(255)");

    let settings = sets::load_set("set_2").expect("set_2");
    let report = engine::run_forward(
        &mut conn,
        &settings,
        &mut Reporter::quiet(),
        &Journal::disabled(&settings),
    )
    .expect("set_2 forward run");
    assert_eq!(report.moved.inserted, 3);
    assert_eq!(report.moved.marked, 3);
    assert_eq!(report.moved.linked, 3);
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM lk_domains_settings_2 t
             JOIN mapping_lk_domains_sites m ON t.domain_id = m.domain_id
             WHERE m.site_id = 10"
        ),
        2
    );

    engine::run_rollback(&conn, &settings, &mut Reporter::quiet(), &Journal::disabled(&settings))
        .expect("set_2 rollback");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM lk_domains_settings_2"), 0);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM mapping_lk_domains_settings_sites_settings"),
        0
    );
    // set_1's data is untouched by set_2's undo.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM mapping_lk_domains_sites"), 2);
}

#[test]
fn set_1_rerun_is_a_no_op() {
    let (_tmp, mut conn) = open_db();
    seed_sites(&conn);
    let sites = sets::load_set("set_1").expect("set_1");
    let journal = Journal::disabled(&sites);

    engine::run_forward(&mut conn, &sites, &mut Reporter::quiet(), &journal).expect("first");
    let again = engine::run_forward(&mut conn, &sites, &mut Reporter::quiet(), &journal)
        .expect("second");
    assert_eq!(again.moved.inserted, 0);
    assert_eq!(again.moved.linked, 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM lk_domains_2"), 2);
}

#[test]
fn set_2_without_set_1_fails_inside_the_transaction() {
    let (_tmp, mut conn) = open_db();
    seed_sites(&conn);
    let settings = sets::load_set("set_2").expect("set_2");

    let err = engine::run_forward(
        &mut conn,
        &settings,
        &mut Reporter::quiet(),
        &Journal::disabled(&settings),
    )
    .expect_err("set_1's pivot table is missing");
    assert!(err.to_string().contains("mapping_lk_domains_sites"), "{err}");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM lk_domains_settings_2"), 0);
    // Schema work happened before the transaction and stays.
    assert!(db::column_exists(&conn, "site_settings", "migration_done").expect("catalog"));
}

#[test]
fn set_1_validation_catches_a_case_change_in_a_text_field() {
    let (_tmp, mut conn) = open_db();
    seed_sites(&conn);
    let sites = sets::load_set("set_1").expect("set_1");
    engine::run_forward(&mut conn, &sites, &mut Reporter::quiet(), &Journal::disabled(&sites))
        .expect("set_1 forward run");

    conn.execute("UPDATE lk_domains_2 SET domain_alias = 'ALPHA.TEST' WHERE sites_id = 10", [])
        .expect("corrupt");

    let err = engine::validate_only(&mut conn, &sites, &mut Reporter::quiet()).expect_err("mismatch");
    match err.root() {
        MigrateError::ValidationError(ValidationFailure::FieldMismatch { sample }) => {
            assert_eq!(sample, &vec!["10".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}
