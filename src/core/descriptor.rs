//! Migration descriptors.
//!
//! A descriptor names the source, target and (optional) pivot tables of one
//! migration, the column changes to make ahead of the data move, and the statements
//! that move, link, validate and undo the data. Descriptors are written in TOML in
//! one of two forms:
//!
//! - explicit: a `[statements]` table holding every statement verbatim;
//! - structured: a `[mapping]` table of source→target column pairs from which the
//!   statements (and, if omitted, the rollback steps) are generated.
//!
//! Either way the result is a resolved [`MigrationDescriptor`], which is never
//! mutated once built.

use crate::core::error::MigrateError;
use crate::core::rollback::RollbackStep;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

pub const DEFAULT_SOURCE_FLAG: &str = "migration_done";
pub const DEFAULT_TARGET_FLAG: &str = "is_migrated";
pub const DEFAULT_SAMPLE_LIMIT: u32 = 3;

/// Column name → type/constraint clause.
pub type ColumnMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagColumns {
    #[serde(default = "default_source_flag")]
    pub source: String,
    #[serde(default = "default_target_flag")]
    pub target: String,
}

impl Default for FlagColumns {
    fn default() -> Self {
        Self {
            source: default_source_flag(),
            target: default_target_flag(),
        }
    }
}

fn default_source_flag() -> String {
    DEFAULT_SOURCE_FLAG.to_string()
}

fn default_target_flag() -> String {
    DEFAULT_TARGET_FLAG.to_string()
}

fn default_sample_limit() -> u32 {
    DEFAULT_SAMPLE_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_key() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Statements {
    pub insert: String,
    pub mark_migrated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_pivot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referential_check: Option<String>,
    pub field_equality: String,
}

/// How a mapped field pair is normalized before the null-safe comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compare {
    #[default]
    Exact,
    /// Byte-exact, immune to affinity conversion and collation folding.
    Binary,
    /// Second precision; values that are not timestamps compare as text.
    Timestamp,
    /// Rounded to the given number of decimal places.
    Round(u8),
}

impl Compare {
    fn wrap(&self, expr: &str) -> String {
        match self {
            Compare::Exact => expr.to_string(),
            Compare::Binary => format!("CAST({} AS BLOB)", expr),
            // Unparseable values compare as their text instead of collapsing to NULL.
            Compare::Timestamp => format!(
                "COALESCE(strftime('%Y-%m-%d %H:%M:%S', {e}), CAST({e} AS TEXT))",
                e = expr
            ),
            Compare::Round(places) => format!("ROUND({}, {})", expr, places),
        }
    }
}

impl TryFrom<String> for Compare {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "exact" => Ok(Compare::Exact),
            "binary" => Ok(Compare::Binary),
            "timestamp" => Ok(Compare::Timestamp),
            other => match other.strip_prefix("round:") {
                Some(places) => places
                    .trim()
                    .parse::<u8>()
                    .map(Compare::Round)
                    .map_err(|_| format!("invalid rounding precision in '{}'", other)),
                None => Err(format!(
                    "unknown comparison '{}' (expected exact, binary, timestamp or round:<n>)",
                    other
                )),
            },
        }
    }
}

impl From<Compare> for String {
    fn from(value: Compare) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compare::Exact => f.write_str("exact"),
            Compare::Binary => f.write_str("binary"),
            Compare::Timestamp => f.write_str("timestamp"),
            Compare::Round(n) => write!(f, "round:{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldPair {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub compare: Compare,
    /// Copied but left out of the field-level check (e.g. re-encoded enums).
    #[serde(default = "default_true")]
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    /// Identity column of the source table.
    #[serde(default = "default_key")]
    pub source_key: String,
    /// Identity column of the target table.
    #[serde(default = "default_key")]
    pub target_key: String,
    /// Target column that receives the source identity.
    pub target_link: String,
    #[serde(default)]
    pub pivot_source_column: Option<String>,
    #[serde(default)]
    pub pivot_target_column: Option<String>,
    pub fields: Vec<FieldPair>,
}

/// Descriptor as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorFile {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    #[serde(default)]
    pub pivot_table: Option<String>,
    #[serde(default)]
    pub pivot_columns: ColumnMap,
    #[serde(default)]
    pub new_target_columns: ColumnMap,
    #[serde(default)]
    pub altered_target_columns: ColumnMap,
    #[serde(default)]
    pub new_source_columns: ColumnMap,
    #[serde(default)]
    pub flags: FlagColumns,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: u32,
    #[serde(default)]
    pub statements: Option<Statements>,
    #[serde(default)]
    pub mapping: Option<FieldMapping>,
    #[serde(default)]
    pub rollback: Vec<RollbackStep>,
}

/// Resolved, immutable description of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationDescriptor {
    pub name: String,
    pub source_table: String,
    pub target_table: String,
    pub pivot_table: Option<String>,
    pub pivot_columns: ColumnMap,
    pub new_target_columns: ColumnMap,
    pub altered_target_columns: ColumnMap,
    pub new_source_columns: ColumnMap,
    pub flags: FlagColumns,
    pub sample_limit: u32,
    pub statements: Statements,
    pub rollback_steps: Vec<RollbackStep>,
}

/// What the validator needs to know about a descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ValidationInputs<'a> {
    pub source_table: &'a str,
    pub target_table: &'a str,
    pub pivot_table: Option<&'a str>,
    pub source_flag: &'a str,
    pub target_flag: &'a str,
    pub referential_query: Option<&'a str>,
    pub field_equality_query: &'a str,
    pub sample_limit: usize,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier regex"))
}

fn check_identifier(kind: &str, value: &str) -> Result<(), MigrateError> {
    if identifier_re().is_match(value) {
        Ok(())
    } else {
        Err(MigrateError::DescriptorError(format!(
            "{} '{}' is not a plain identifier",
            kind, value
        )))
    }
}

fn check_statement(name: &str, sql: &str) -> Result<(), MigrateError> {
    if sql.trim().trim_end_matches(';').trim().is_empty() {
        return Err(MigrateError::DescriptorError(format!(
            "statement '{}' is empty",
            name
        )));
    }
    Ok(())
}

impl DescriptorFile {
    pub fn from_toml(text: &str) -> Result<Self, MigrateError> {
        toml::from_str(text).map_err(|e| MigrateError::DescriptorError(e.to_string()))
    }

    /// Check the descriptor's invariants and produce the resolved form.
    pub fn resolve(self) -> Result<MigrationDescriptor, MigrateError> {
        self.check()?;

        let statements = match (&self.statements, &self.mapping) {
            (Some(s), None) => s.clone(),
            (None, Some(m)) => generate_statements(&self, m)?,
            (Some(_), Some(_)) => {
                return Err(MigrateError::DescriptorError(format!(
                    "{}: give either [statements] or [mapping], not both",
                    self.name
                )));
            }
            (None, None) => {
                return Err(MigrateError::DescriptorError(format!(
                    "{}: one of [statements] or [mapping] is required",
                    self.name
                )));
            }
        };
        check_statements(&self, &statements)?;

        let rollback_steps = if self.rollback.is_empty() && self.mapping.is_some() {
            standard_rollback(&self)
        } else {
            self.rollback.clone()
        };
        if rollback_steps.is_empty() {
            return Err(MigrateError::DescriptorError(format!(
                "{}: at least one [[rollback]] step is required",
                self.name
            )));
        }
        for (i, step) in rollback_steps.iter().enumerate() {
            check_statement(&format!("rollback[{}]", i), &step.query)?;
        }

        Ok(MigrationDescriptor {
            name: self.name,
            source_table: self.source_table,
            target_table: self.target_table,
            pivot_table: self.pivot_table,
            pivot_columns: self.pivot_columns,
            new_target_columns: self.new_target_columns,
            altered_target_columns: self.altered_target_columns,
            new_source_columns: self.new_source_columns,
            flags: self.flags,
            sample_limit: self.sample_limit,
            statements,
            rollback_steps,
        })
    }

    fn check(&self) -> Result<(), MigrateError> {
        if self.name.trim().is_empty() {
            return Err(MigrateError::DescriptorError(
                "descriptor name is empty".to_string(),
            ));
        }
        check_identifier("source table", &self.source_table)?;
        check_identifier("target table", &self.target_table)?;
        check_identifier("source flag", &self.flags.source)?;
        check_identifier("target flag", &self.flags.target)?;
        for col in self
            .new_target_columns
            .keys()
            .chain(self.altered_target_columns.keys())
            .chain(self.new_source_columns.keys())
            .chain(self.pivot_columns.keys())
        {
            check_identifier("column", col)?;
        }

        let overlap: Vec<&String> = self
            .new_target_columns
            .keys()
            .filter(|c| self.altered_target_columns.contains_key(*c))
            .collect();
        if !overlap.is_empty() {
            return Err(MigrateError::DescriptorError(format!(
                "{}: columns both added and modified on {}: {}",
                self.name,
                self.target_table,
                overlap
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        match &self.pivot_table {
            Some(pivot) => {
                check_identifier("pivot table", pivot)?;
                if self.pivot_columns.is_empty() {
                    return Err(MigrateError::DescriptorError(format!(
                        "{}: pivot table {} needs at least one foreign-key column",
                        self.name, pivot
                    )));
                }
                let distinct: BTreeSet<&str> = [
                    self.source_table.as_str(),
                    self.target_table.as_str(),
                    pivot.as_str(),
                ]
                .into_iter()
                .collect();
                if distinct.len() != 3 {
                    return Err(MigrateError::DescriptorError(format!(
                        "{}: source, target and pivot tables must be distinct",
                        self.name
                    )));
                }
            }
            None => {
                if !self.pivot_columns.is_empty() {
                    return Err(MigrateError::DescriptorError(format!(
                        "{}: pivot_columns given without a pivot_table",
                        self.name
                    )));
                }
            }
        }
        if self.source_table == self.target_table {
            return Err(MigrateError::DescriptorError(format!(
                "{}: source and target table are both {}",
                self.name, self.source_table
            )));
        }

        if self.sample_limit == 0 {
            return Err(MigrateError::DescriptorError(format!(
                "{}: sample_limit must be at least 1",
                self.name
            )));
        }
        Ok(())
    }
}

fn check_statements(file: &DescriptorFile, s: &Statements) -> Result<(), MigrateError> {
    check_statement("insert", &s.insert)?;
    check_statement("mark_migrated", &s.mark_migrated)?;
    check_statement("field_equality", &s.field_equality)?;
    match &file.pivot_table {
        Some(pivot) => {
            let link = s.link_pivot.as_deref().ok_or_else(|| {
                MigrateError::DescriptorError(format!(
                    "{}: link_pivot is required when pivot table {} is named",
                    file.name, pivot
                ))
            })?;
            check_statement("link_pivot", link)?;
            let referential = s.referential_check.as_deref().ok_or_else(|| {
                MigrateError::DescriptorError(format!(
                    "{}: referential_check is required when pivot table {} is named",
                    file.name, pivot
                ))
            })?;
            check_statement("referential_check", referential)?;
        }
        None => {
            if s.link_pivot.is_some() || s.referential_check.is_some() {
                return Err(MigrateError::DescriptorError(format!(
                    "{}: pivot statements given without a pivot_table",
                    file.name
                )));
            }
        }
    }
    Ok(())
}

fn generate_statements(
    file: &DescriptorFile,
    m: &FieldMapping,
) -> Result<Statements, MigrateError> {
    check_identifier("source key", &m.source_key)?;
    check_identifier("target key", &m.target_key)?;
    check_identifier("target link", &m.target_link)?;
    if m.fields.is_empty() {
        return Err(MigrateError::DescriptorError(format!(
            "{}: [mapping] needs at least one field pair",
            file.name
        )));
    }
    for pair in &m.fields {
        check_identifier("mapped source column", &pair.source)?;
        check_identifier("mapped target column", &pair.target)?;
    }
    if !m.fields.iter().any(|f| f.verify) {
        return Err(MigrateError::DescriptorError(format!(
            "{}: every mapped field has verify = false; nothing left to compare",
            file.name
        )));
    }

    let s = &file.source_table;
    let t = &file.target_table;
    let sflag = &file.flags.source;
    let tflag = &file.flags.target;

    let target_cols: Vec<&str> = std::iter::once(m.target_link.as_str())
        .chain(m.fields.iter().map(|f| f.target.as_str()))
        .chain(std::iter::once(tflag.as_str()))
        .collect();
    let source_exprs: Vec<&str> = std::iter::once(m.source_key.as_str())
        .chain(m.fields.iter().map(|f| f.source.as_str()))
        .chain(std::iter::once("1"))
        .collect();

    let insert = format!(
        "INSERT INTO {t} (\n    {}\n)\nSELECT\n    {}\nFROM {s}\nWHERE COALESCE({sflag}, 0) = 0",
        target_cols.join(",\n    "),
        source_exprs.join(",\n    "),
    );

    let mark_migrated = format!(
        "UPDATE {s}\nSET {sflag} = 1\nWHERE COALESCE({sflag}, 0) = 0\n  AND {skey} IN (SELECT {link} FROM {t} WHERE {tflag} = 1)",
        skey = m.source_key,
        link = m.target_link,
    );

    let (link_pivot, referential_check) = match &file.pivot_table {
        Some(p) => {
            let psrc = pivot_column(file, "pivot_source_column", m.pivot_source_column.as_deref())?;
            let ptgt = pivot_column(file, "pivot_target_column", m.pivot_target_column.as_deref())?;
            if psrc == ptgt {
                return Err(MigrateError::DescriptorError(format!(
                    "{}: pivot_source_column and pivot_target_column are both {}",
                    file.name, psrc
                )));
            }
            let link = format!(
                "INSERT INTO {p} ({ptgt}, {psrc})\nSELECT t.{tkey}, t.{link}\nFROM {t} t\nWHERE t.{tflag} = 1\n  AND NOT EXISTS (\n    SELECT 1 FROM {p} p WHERE p.{ptgt} = t.{tkey} AND p.{psrc} = t.{link}\n  )",
                tkey = m.target_key,
                link = m.target_link,
            );
            let referential = format!(
                "SELECT COUNT(*)\nFROM {p} p\nJOIN {t} t ON p.{ptgt} = t.{tkey}\nJOIN {s} s ON p.{psrc} = s.{skey}",
                tkey = m.target_key,
                skey = m.source_key,
            );
            (Some(link), Some(referential))
        }
        None => (None, None),
    };

    let comparisons: Vec<String> = m
        .fields
        .iter()
        .filter(|f| f.verify)
        .map(|f| {
            format!(
                "NOT ({} IS {})",
                f.compare.wrap(&format!("t.{}", f.target)),
                f.compare.wrap(&format!("s.{}", f.source))
            )
        })
        .collect();
    let field_equality = format!(
        "SELECT s.{skey}\nFROM {s} s\nJOIN {t} t ON s.{skey} = t.{link}\nWHERE s.{sflag} = 1 AND t.{tflag} = 1 AND (\n    {}\n)\nLIMIT {limit}",
        comparisons.join("\n    OR "),
        skey = m.source_key,
        link = m.target_link,
        limit = file.sample_limit,
    );

    Ok(Statements {
        insert,
        mark_migrated,
        link_pivot,
        referential_check,
        field_equality,
    })
}

fn pivot_column<'a>(
    file: &DescriptorFile,
    field: &str,
    value: Option<&'a str>,
) -> Result<&'a str, MigrateError> {
    let col = value.ok_or_else(|| {
        MigrateError::DescriptorError(format!(
            "{}: [mapping] needs {} when a pivot table is named",
            file.name, field
        ))
    })?;
    if !file.pivot_columns.contains_key(col) {
        return Err(MigrateError::DescriptorError(format!(
            "{}: {} '{}' is not one of the pivot columns",
            file.name, field, col
        )));
    }
    Ok(col)
}

fn standard_rollback(file: &DescriptorFile) -> Vec<RollbackStep> {
    let t = &file.target_table;
    let s = &file.source_table;
    let tflag = &file.flags.target;
    let sflag = &file.flags.source;
    let mut steps = vec![
        RollbackStep::new(
            &format!("DELETE FROM {t} WHERE {tflag} = 1"),
            "Deleted migrated rows from",
            t,
        ),
        RollbackStep::new(
            &format!("UPDATE {s} SET {sflag} = 0 WHERE {sflag} = 1"),
            &format!("Reset {sflag} = 0 in"),
            s,
        ),
    ];
    if let Some(p) = &file.pivot_table {
        steps.push(RollbackStep::new(
            &format!("DELETE FROM {p}"),
            "Deleted rows from",
            p,
        ));
    }
    steps
}

impl MigrationDescriptor {
    pub fn from_toml(text: &str) -> Result<Self, MigrateError> {
        DescriptorFile::from_toml(text)?.resolve()
    }

    /// Tables that must exist before a forward run. The pivot is created by the engine.
    pub fn required_tables(&self) -> [&str; 2] {
        [self.source_table.as_str(), self.target_table.as_str()]
    }

    pub fn validation_inputs(&self) -> ValidationInputs<'_> {
        ValidationInputs {
            source_table: &self.source_table,
            target_table: &self.target_table,
            pivot_table: self.pivot_table.as_deref(),
            source_flag: &self.flags.source,
            target_flag: &self.flags.target,
            referential_query: self.statements.referential_check.as_deref(),
            field_equality_query: &self.statements.field_equality,
            sample_limit: self.sample_limit as usize,
        }
    }

    /// Hex SHA-256 of the canonical JSON form.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}
