//! Data mover: insert, mark, link.
//!
//! Runs inside the caller's transaction. Each statement depends on the previous
//! one: the insert copies unflagged source rows, the mark flags exactly those source
//! rows so the next run's insert skips them, and the link records one pivot row per
//! newly migrated target row.

use crate::core::db;
use crate::core::descriptor::Statements;
use crate::core::error::{MigrateError, MoveStep};
use crate::core::output::Reporter;
use rusqlite::Transaction;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MoveReport {
    pub inserted: usize,
    pub marked: usize,
    pub linked: usize,
}

pub fn move_rows(
    tx: &Transaction<'_>,
    statements: &Statements,
    reporter: &mut Reporter,
) -> Result<MoveReport, MigrateError> {
    let mut report = MoveReport::default();

    reporter.phase("Inserting into target table...");
    report.inserted = run_step(tx, MoveStep::InsertTarget, &statements.insert)?;
    reporter.ok(format!("Target table insert done ({} rows)", report.inserted));

    reporter.phase("Updating source table...");
    report.marked = run_step(tx, MoveStep::MarkSource, &statements.mark_migrated)?;
    reporter.ok(format!("Source table update done ({} rows)", report.marked));

    if let Some(link) = &statements.link_pivot {
        reporter.phase("Linking data into pivot table...");
        report.linked = run_step(tx, MoveStep::LinkPivot, link)?;
        reporter.ok(format!("Pivot table insert done ({} rows)", report.linked));
    }
    reporter.blank();

    Ok(report)
}

fn run_step(tx: &Transaction<'_>, step: MoveStep, sql: &str) -> Result<usize, MigrateError> {
    tx.execute(db::statement_text(sql), [])
        .map_err(|source| MigrateError::DataMoveError { step, source })
}
