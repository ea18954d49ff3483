//! Rollback executor.
//!
//! Undo is an ordered list of independent statements run against the live database,
//! outside any transaction. The first failing step stops automatic execution; the
//! failing step and everything after it are handed back as a manual checklist.
//! Schema changes made by a forward run are never reverted here.

use crate::core::db;
use crate::core::error::RollbackFailure;
use crate::core::output::Reporter;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackStep {
    pub query: String,
    pub description: String,
    pub table: String,
}

impl RollbackStep {
    pub fn new(query: &str, description: &str, table: &str) -> Self {
        Self {
            query: query.to_string(),
            description: description.to_string(),
            table: table.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    pub completed: Vec<RollbackStep>,
    /// Rows affected per completed step, same order.
    pub affected: Vec<usize>,
}

pub fn rollback(
    conn: &Connection,
    steps: &[RollbackStep],
    reporter: &mut Reporter,
) -> Result<RollbackReport, RollbackFailure> {
    let mut report = RollbackReport::default();

    for (index, step) in steps.iter().enumerate() {
        match conn.execute(db::statement_text(&step.query), []) {
            Ok(affected) => {
                reporter.ok(format!(
                    "{} {} ({} rows)",
                    step.description, step.table, affected
                ));
                report.completed.push(step.clone());
                report.affected.push(affected);
            }
            Err(e) => {
                let failure = RollbackFailure {
                    index,
                    description: step.description.clone(),
                    table: step.table.clone(),
                    cause: e.to_string(),
                    completed: report.completed,
                    checklist: steps[index..].to_vec(),
                };
                reporter.fail(format!(
                    "Rollback step failed: {} {}",
                    step.description, step.table
                ));
                reporter.line(format!("  Error: {}", failure.cause));
                print_checklist(reporter, &failure.checklist);
                return Err(failure);
            }
        }
    }

    Ok(report)
}

/// Manual recovery instructions for an operator.
pub fn print_checklist(reporter: &mut Reporter, checklist: &[RollbackStep]) {
    reporter.blank();
    reporter.warn("Rollback was not fully completed.");
    reporter.line("Execute the following statements manually to finish the rollback:");
    for step in checklist {
        reporter.blank();
        reporter.line(format!("---- {} {} ----", step.description, step.table));
        reporter.line(db::statement_text(&step.query));
    }
    reporter.blank();
}
