//! Consistency validator.
//!
//! Three checks, run in the same transaction as the data move so they see exactly
//! what was just written:
//!
//! 1. flagged source rows == flagged target rows;
//! 2. pivot rows == flagged target rows, and every pivot row joins to exactly one
//!    target and one source row;
//! 3. no flagged source/target pair differs on a mapped field.
//!
//! The first failing check ends validation.

use crate::core::db;
use crate::core::descriptor::ValidationInputs;
use crate::core::error::{MigrateError, ValidationFailure};
use crate::core::output::Reporter;
use rusqlite::Transaction;
use rusqlite::types::Value;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub source_migrated: i64,
    pub target_migrated: i64,
    pub pivot_rows: Option<i64>,
    pub valid_references: Option<i64>,
}

pub fn validate(
    tx: &Transaction<'_>,
    inputs: &ValidationInputs<'_>,
    reporter: &mut Reporter,
) -> Result<ValidationReport, MigrateError> {
    let mut report = check_row_counts(tx, inputs)?;
    reporter.ok(format!(
        "Migration validated: {} rows migrated successfully",
        report.source_migrated
    ));

    if let Some(pivot) = inputs.pivot_table {
        let (pivot_rows, valid_references) = check_pivot(tx, inputs, pivot, report.target_migrated)?;
        report.pivot_rows = Some(pivot_rows);
        report.valid_references = Some(valid_references);
        reporter.ok(format!("Pivot table validated: {} mappings exist", pivot_rows));
        reporter.ok(format!(
            "Referential integrity validated: {} valid foreign key mappings found in pivot table",
            valid_references
        ));
    }

    let sample = field_mismatches(tx, inputs)?;
    if !sample.is_empty() {
        reporter.fail(format!(
            "Field mismatch in {} rows. Example mismatched ids: {}",
            sample.len(),
            sample.join(", ")
        ));
        return Err(ValidationFailure::FieldMismatch { sample }.into());
    }
    reporter.ok("Field-level validation passed");

    Ok(report)
}

pub fn check_row_counts(
    tx: &Transaction<'_>,
    inputs: &ValidationInputs<'_>,
) -> Result<ValidationReport, MigrateError> {
    let source_migrated = db::count(
        tx,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = 1",
            inputs.source_table, inputs.source_flag
        ),
    )
    .map_err(|source| MigrateError::ValidationQueryError {
        check: "count migrated source rows",
        source,
    })?;
    let target_migrated = db::count(
        tx,
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = 1",
            inputs.target_table, inputs.target_flag
        ),
    )
    .map_err(|source| MigrateError::ValidationQueryError {
        check: "count migrated target rows",
        source,
    })?;

    if source_migrated != target_migrated {
        return Err(ValidationFailure::RowCountMismatch {
            source_rows: source_migrated,
            target_rows: target_migrated,
        }
        .into());
    }
    Ok(ValidationReport {
        source_migrated,
        target_migrated,
        pivot_rows: None,
        valid_references: None,
    })
}

fn check_pivot(
    tx: &Transaction<'_>,
    inputs: &ValidationInputs<'_>,
    pivot: &str,
    target_migrated: i64,
) -> Result<(i64, i64), MigrateError> {
    let pivot_rows = db::count(tx, &format!("SELECT COUNT(*) FROM {}", pivot)).map_err(
        |source| MigrateError::ValidationQueryError {
            check: "count pivot rows",
            source,
        },
    )?;
    if pivot_rows != target_migrated {
        return Err(ValidationFailure::PivotCountMismatch {
            expected: target_migrated,
            actual: pivot_rows,
        }
        .into());
    }

    let referential = inputs.referential_query.ok_or_else(|| {
        MigrateError::DescriptorError(format!(
            "no referential check statement for pivot table {}",
            pivot
        ))
    })?;
    let valid_references =
        db::count(tx, referential).map_err(|source| MigrateError::ValidationQueryError {
            check: "pivot referential integrity",
            source,
        })?;
    if valid_references != pivot_rows {
        return Err(ValidationFailure::DanglingPivotReferences {
            expected: pivot_rows,
            actual: valid_references,
        }
        .into());
    }
    Ok((pivot_rows, valid_references))
}

/// Source ids of mismatched pairs, at most `sample_limit` of them.
pub fn field_mismatches(
    tx: &Transaction<'_>,
    inputs: &ValidationInputs<'_>,
) -> Result<Vec<String>, MigrateError> {
    let query_err = |source| MigrateError::ValidationQueryError {
        check: "field-level equality",
        source,
    };
    let mut stmt = tx
        .prepare(db::statement_text(inputs.field_equality_query))
        .map_err(query_err)?;
    let mut rows = stmt.query([]).map_err(query_err)?;

    let mut sample = Vec::new();
    while sample.len() < inputs.sample_limit {
        match rows.next().map_err(query_err)? {
            Some(row) => {
                let id: Value = row.get(0).map_err(query_err)?;
                sample.push(db::value_to_string(&id));
            }
            None => break,
        }
    }
    Ok(sample)
}
