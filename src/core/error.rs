use rusqlite;
use std::fmt;
use std::io;
use thiserror::Error;

use crate::core::rollback::RollbackStep;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Descriptor error: {0}")]
    DescriptorError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Catalog lookup failed for {}: {source}", display_target(.table, .column.as_deref()))]
    CatalogError {
        table: String,
        column: Option<String>,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Table {0} does not exist")]
    MissingTable(String),
    #[error("Column {column} does not exist on {table}")]
    ColumnMissing { table: String, column: String },
    #[error("Schema change on {table}.{column} failed: {source}")]
    SchemaEvolutionError {
        table: String,
        column: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Create pivot table {table} failed: {source}")]
    PivotCreationError {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Pivot table {table} does not match its definition: {detail}")]
    SchemaDrift { table: String, detail: String },
    #[error("Data move step '{step}' failed: {source}")]
    DataMoveError {
        step: MoveStep,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationFailure),
    #[error("Validation query '{check}' failed: {source}")]
    ValidationQueryError {
        check: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("Transaction {action} failed: {source}")]
    TransactionError {
        action: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    #[error("{0}")]
    RollbackError(#[from] RollbackFailure),
    #[error("{phase} failed: {source}")]
    PhaseError {
        phase: Phase,
        #[source]
        source: Box<MigrateError>,
    },
}

impl MigrateError {
    /// Attach the orchestrator phase a failure happened in.
    pub fn in_phase(self, phase: Phase) -> Self {
        MigrateError::PhaseError {
            phase,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping phase wrappers.
    pub fn root(&self) -> &MigrateError {
        match self {
            MigrateError::PhaseError { source, .. } => source.root(),
            other => other,
        }
    }
}

fn display_target(table: &str, column: Option<&str>) -> String {
    match column {
        Some(c) => format!("{}.{}", table, c),
        None => table.to_string(),
    }
}

/// Orchestrator phases, in forward-run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preflight,
    EvolveTarget,
    EvolveSource,
    CreatePivot,
    BeginTransaction,
    MoveData,
    Validate,
    Commit,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Preflight => "preflight",
            Phase::EvolveTarget => "alter target table",
            Phase::EvolveSource => "alter source table",
            Phase::CreatePivot => "pivot table creation",
            Phase::BeginTransaction => "transaction start",
            Phase::MoveData => "data migration",
            Phase::Validate => "migration validation",
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three ordered data-movement statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    InsertTarget,
    MarkSource,
    LinkPivot,
}

impl fmt::Display for MoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MoveStep::InsertTarget => "insert into target table",
            MoveStep::MarkSource => "update source table",
            MoveStep::LinkPivot => "insert into pivot table",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("mismatch in migrated rows: source has {source_rows}, target has {target_rows}")]
    RowCountMismatch { source_rows: i64, target_rows: i64 },
    #[error("pivot table validation failed: expected {expected} rows, got {actual}")]
    PivotCountMismatch { expected: i64, actual: i64 },
    #[error(
        "referential integrity check failed: expected {expected} valid mappings, but got {actual}"
    )]
    DanglingPivotReferences { expected: i64, actual: i64 },
    #[error("field-level mismatch detected, example source ids: {}", .sample.join(", "))]
    FieldMismatch { sample: Vec<String> },
}

#[derive(Error, Debug, Clone)]
#[error("rollback failed at step {} [{} {}]: {cause}", .index + 1, .description, .table)]
pub struct RollbackFailure {
    /// Zero-based position of the failing step.
    pub index: usize,
    pub description: String,
    pub table: String,
    pub cause: String,
    pub completed: Vec<RollbackStep>,
    /// Failing step followed by every step not yet attempted.
    pub checklist: Vec<RollbackStep>,
}
