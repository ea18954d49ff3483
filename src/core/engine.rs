//! Migration orchestration.
//!
//! A forward run has two failure domains:
//!
//! - schema work (column additions/modifications, pivot creation) happens first,
//!   outside any transaction, and stays applied if a later phase fails;
//! - the data move and its validation share one transaction and either commit
//!   together or leave no trace.
//!
//! Progress that must survive between runs lives in the database itself: the two
//! flag columns and the pivot table. Nothing is kept in memory across runs.
//!
//! The journal is advisory. Only the opening `started` event is required; a
//! failed write after that is reported as a warning and never changes the outcome
//! of the run.

use crate::core::db;
use crate::core::descriptor::MigrationDescriptor;
use crate::core::error::{MigrateError, Phase, RollbackFailure};
use crate::core::journal::Journal;
use crate::core::mover::{self, MoveReport};
use crate::core::output::{Reporter, compact_line};
use crate::core::pivot;
use crate::core::rollback::{self, RollbackReport};
use crate::core::schema::{self, EvolveReport};
use crate::core::validate::{self, ValidationReport};
use rusqlite::{Connection, Transaction};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ForwardReport {
    pub run_id: String,
    pub schema: Vec<EvolveReport>,
    pub moved: MoveReport,
    pub validation: ValidationReport,
}

/// Row counts describing where the last run left off.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub source_rows: i64,
    /// `None` until the flag column exists.
    pub source_migrated: Option<i64>,
    pub target_rows: i64,
    pub target_migrated: Option<i64>,
    /// `None` until the pivot table exists, or if the descriptor has none.
    pub pivot_rows: Option<i64>,
}

impl MigrationStatus {
    pub fn pending(&self) -> Option<i64> {
        self.source_migrated.map(|m| self.source_rows - m)
    }
}

/// Every table the descriptor reads from must already exist.
pub fn preflight(conn: &Connection, d: &MigrationDescriptor) -> Result<(), MigrateError> {
    for table in d.required_tables() {
        if !db::table_exists(conn, table)? {
            return Err(MigrateError::MissingTable(table.to_string()));
        }
    }
    Ok(())
}

pub fn run_forward(
    conn: &mut Connection,
    d: &MigrationDescriptor,
    reporter: &mut Reporter,
    journal: &Journal,
) -> Result<ForwardReport, MigrateError> {
    reporter.banner("Starting migration");
    reporter.blank();
    journal.record("run.forward", "started", Some(format!("{} -> {}", d.source_table, d.target_table)))?;

    let result = forward_phases(conn, d, reporter, journal);
    conclude_forward(journal, reporter, result)
}

fn conclude_forward(
    journal: &Journal,
    reporter: &mut Reporter,
    result: Result<ForwardReport, MigrateError>,
) -> Result<ForwardReport, MigrateError> {
    match &result {
        Ok(report) => {
            note(
                journal,
                reporter,
                "run.forward",
                "success",
                Some(format!(
                    "inserted={} marked={} linked={}",
                    report.moved.inserted, report.moved.marked, report.moved.linked
                )),
            );
            reporter.ok("Migration successful!");
        }
        Err(e) => {
            note(journal, reporter, "run.forward", "error", Some(e.to_string()));
            reporter.fail(format!("Migration failed: {}", e));
        }
    }
    result
}

/// Append a journal event; a failed write only warns.
fn note(
    journal: &Journal,
    reporter: &mut Reporter,
    op: &str,
    status: &str,
    detail: Option<String>,
) {
    if let Err(e) = journal.record(op, status, detail) {
        reporter.warn(format!("Journal write failed for {} ({}): {}", op, status, e));
    }
}

fn forward_phases(
    conn: &mut Connection,
    d: &MigrationDescriptor,
    reporter: &mut Reporter,
    journal: &Journal,
) -> Result<ForwardReport, MigrateError> {
    let mut schema_reports = Vec::new();

    recorded(journal, reporter, Phase::Preflight, "preflight", |_| preflight(conn, d))?;

    let target = recorded(
        journal,
        reporter,
        Phase::EvolveTarget,
        "schema.evolve",
        |reporter| {
            schema::evolve(
                conn,
                &d.target_table,
                &d.new_target_columns,
                &d.altered_target_columns,
                reporter,
            )
        },
    )?;
    schema_reports.push(target);
    let source = recorded(
        journal,
        reporter,
        Phase::EvolveSource,
        "schema.evolve",
        |reporter| {
            schema::evolve(
                conn,
                &d.source_table,
                &d.new_source_columns,
                &Default::default(),
                reporter,
            )
        },
    )?;
    schema_reports.push(source);

    if let Some(pivot_table) = &d.pivot_table {
        recorded(journal, reporter, Phase::CreatePivot, "pivot.create", |reporter| {
            pivot::create_pivot(conn, pivot_table, &d.pivot_columns, reporter)
        })?;
    }

    let tx = conn.transaction().map_err(|source| {
        MigrateError::TransactionError {
            action: "begin",
            source,
        }
        .in_phase(Phase::BeginTransaction)
    })?;

    let moved = match mover::move_rows(&tx, &d.statements, reporter) {
        Ok(moved) => moved,
        Err(e) => {
            abort(tx, reporter);
            let e = e.in_phase(Phase::MoveData);
            note(journal, reporter, "data.move", "error", Some(e.to_string()));
            return Err(e);
        }
    };
    note(
        journal,
        reporter,
        "data.move",
        "success",
        Some(format!(
            "inserted={} marked={} linked={}",
            moved.inserted, moved.marked, moved.linked
        )),
    );

    let validation = match validate::validate(&tx, &d.validation_inputs(), reporter) {
        Ok(v) => v,
        Err(e) => {
            abort(tx, reporter);
            let e = e.in_phase(Phase::Validate);
            note(journal, reporter, "data.validate", "error", Some(e.to_string()));
            return Err(e);
        }
    };
    note(
        journal,
        reporter,
        "data.validate",
        "success",
        Some(format!(
            "source={} target={} pivot={:?} references={:?}",
            validation.source_migrated,
            validation.target_migrated,
            validation.pivot_rows,
            validation.valid_references
        )),
    );

    tx.commit().map_err(|source| {
        MigrateError::TransactionError {
            action: "commit",
            source,
        }
        .in_phase(Phase::Commit)
    })?;
    note(journal, reporter, "commit", "success", None);

    Ok(ForwardReport {
        run_id: journal.run_id().to_string(),
        schema: schema_reports,
        moved,
        validation,
    })
}

/// Run one non-transactional phase and journal its outcome.
fn recorded<T>(
    journal: &Journal,
    reporter: &mut Reporter,
    phase: Phase,
    op: &str,
    f: impl FnOnce(&mut Reporter) -> Result<T, MigrateError>,
) -> Result<T, MigrateError> {
    match f(reporter) {
        Ok(v) => {
            note(journal, reporter, op, "success", Some(phase.to_string()));
            Ok(v)
        }
        Err(e) => {
            let e = e.in_phase(phase);
            note(journal, reporter, op, "error", Some(e.to_string()));
            Err(e)
        }
    }
}

fn abort(tx: Transaction<'_>, reporter: &mut Reporter) {
    match tx.rollback() {
        Ok(()) => reporter.warn("Transaction rolled back; no rows were changed"),
        Err(e) => reporter.fail(format!("Transaction rollback failed: {}", e)),
    }
}

pub fn run_rollback(
    conn: &Connection,
    d: &MigrationDescriptor,
    reporter: &mut Reporter,
    journal: &Journal,
) -> Result<RollbackReport, MigrateError> {
    reporter.banner("Starting rollback");
    reporter.blank();
    journal.record("run.rollback", "started", None)?;

    let outcome = rollback::rollback(conn, &d.rollback_steps, reporter);
    conclude_rollback(journal, reporter, outcome)
}

fn conclude_rollback(
    journal: &Journal,
    reporter: &mut Reporter,
    outcome: Result<RollbackReport, RollbackFailure>,
) -> Result<RollbackReport, MigrateError> {
    let completed = match &outcome {
        Ok(report) => &report.completed,
        Err(failure) => &failure.completed,
    };
    for step in completed {
        note(
            journal,
            reporter,
            "rollback.step",
            "success",
            Some(format!(
                "{} {}: {}",
                step.description,
                step.table,
                compact_line(&step.query, 160)
            )),
        );
    }

    match outcome {
        Ok(report) => {
            note(journal, reporter, "run.rollback", "success", None);
            reporter.ok("Rollback completed");
            Ok(report)
        }
        Err(failure) => {
            note(journal, reporter, "rollback.step", "error", Some(failure.to_string()));
            note(
                journal,
                reporter,
                "run.rollback",
                "partial",
                Some(format!("{} step(s) left for manual recovery", failure.checklist.len())),
            );
            Err(MigrateError::from(failure).in_phase(Phase::Rollback))
        }
    }
}

/// Validate the current state without changing anything.
pub fn validate_only(
    conn: &mut Connection,
    d: &MigrationDescriptor,
    reporter: &mut Reporter,
) -> Result<ValidationReport, MigrateError> {
    let tx = conn.transaction().map_err(|source| MigrateError::TransactionError {
        action: "begin",
        source,
    })?;
    let result = validate::validate(&tx, &d.validation_inputs(), reporter);
    tx.rollback().map_err(|source| MigrateError::TransactionError {
        action: "rollback",
        source,
    })?;
    result.map_err(|e| e.in_phase(Phase::Validate))
}

pub fn status(conn: &Connection, d: &MigrationDescriptor) -> Result<MigrationStatus, MigrateError> {
    preflight(conn, d)?;
    let count = |sql: String| -> Result<i64, MigrateError> {
        db::count(conn, &sql).map_err(MigrateError::RusqliteError)
    };

    let mut status = MigrationStatus {
        source_rows: count(format!("SELECT COUNT(*) FROM {}", d.source_table))?,
        target_rows: count(format!("SELECT COUNT(*) FROM {}", d.target_table))?,
        ..Default::default()
    };
    if db::column_exists(conn, &d.source_table, &d.flags.source)? {
        status.source_migrated = Some(count(format!(
            "SELECT COUNT(*) FROM {} WHERE {} = 1",
            d.source_table, d.flags.source
        ))?);
    }
    if db::column_exists(conn, &d.target_table, &d.flags.target)? {
        status.target_migrated = Some(count(format!(
            "SELECT COUNT(*) FROM {} WHERE {} = 1",
            d.target_table, d.flags.target
        ))?);
    }
    if let Some(pivot_table) = &d.pivot_table {
        if db::table_exists(conn, pivot_table)? {
            status.pivot_rows = Some(count(format!("SELECT COUNT(*) FROM {}", pivot_table))?);
        }
    }
    Ok(status)
}
