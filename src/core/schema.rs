//! Schema evolver.
//!
//! Adds missing columns and changes the definition of existing ones. Nothing here
//! runs inside the data-migration transaction: every change is permanent once made,
//! and a re-run after a partial failure must converge on the same schema. Column
//! additions are guarded by a catalog lookup; modifications are repeated as-is.
//!
//! SQLite cannot change a column's type in place, so a modification rebuilds the
//! table: the stored `CREATE TABLE` text is rewritten with the new column
//! definition, rows are copied into the rebuilt table, and the table's indexes,
//! triggers, dependent views and AUTOINCREMENT high-water mark are carried over.

use crate::core::db;
use crate::core::descriptor::ColumnMap;
use crate::core::error::MigrateError;
use crate::core::output::Reporter;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvolveReport {
    pub table: String,
    pub added: Vec<String>,
    pub already_present: Vec<String>,
    pub modified: Vec<String>,
}

impl EvolveReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty()
    }
}

pub fn evolve(
    conn: &Connection,
    table: &str,
    add: &ColumnMap,
    modify: &ColumnMap,
    reporter: &mut Reporter,
) -> Result<EvolveReport, MigrateError> {
    let mut report = EvolveReport {
        table: table.to_string(),
        ..Default::default()
    };
    reporter.phase(format!("Altering table {}", table));

    if !add.is_empty() {
        reporter.line(format!("  Adding new columns to {}:", table));
        for (col, clause) in add {
            reporter.item(format!("{} {}", col, clause));
        }
        for (col, clause) in add {
            if db::column_exists(conn, table, col)? {
                reporter.line(format!("     column {} already exists", col));
                report.already_present.push(col.clone());
                continue;
            }
            add_column(conn, table, col, clause)?;
            report.added.push(col.clone());
        }
        if !report.added.is_empty() {
            reporter.ok(format!("Added {} column(s) to {}", report.added.len(), table));
        }
    }

    if !modify.is_empty() {
        reporter.line(format!("  Modifying existing columns in {}:", table));
        for (col, clause) in modify {
            reporter.item(format!("{} => {}", col, clause));
        }
        for (col, clause) in modify {
            modify_column(conn, table, col, clause)?;
            report.modified.push(col.clone());
        }
        reporter.ok(format!(
            "Updated {} column(s) in {}",
            report.modified.len(),
            table
        ));
    }

    if !report.changed() {
        reporter.line(format!("  No changes detected for table {}", table));
    }
    reporter.blank();
    Ok(report)
}

pub fn add_column(
    conn: &Connection,
    table: &str,
    column: &str,
    clause: &str,
) -> Result<(), MigrateError> {
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, clause),
        [],
    )
    .map_err(|source| MigrateError::SchemaEvolutionError {
        table: table.to_string(),
        column: column.to_string(),
        source,
    })?;
    Ok(())
}

pub fn modify_column(
    conn: &Connection,
    table: &str,
    column: &str,
    clause: &str,
) -> Result<(), MigrateError> {
    if !db::column_exists(conn, table, column)? {
        return Err(MigrateError::ColumnMissing {
            table: table.to_string(),
            column: column.to_string(),
        });
    }
    let create_sql =
        db::table_sql(conn, table)?.ok_or_else(|| MigrateError::MissingTable(table.to_string()))?;
    let rebuilt_name = format!("__rebuild_{}", table);
    let rebuilt_sql = rewrite_column_definition(&create_sql, &rebuilt_name, column, clause)
        .ok_or_else(|| {
            MigrateError::DescriptorError(format!(
                "cannot locate the definition of {}.{} in the stored table schema",
                table, column
            ))
        })?;
    let dependents = db::dependent_sql(conn, table)?;
    let columns: Vec<String> = db::table_columns(conn, table)?
        .into_iter()
        .map(|c| quote(&c.name))
        .collect();
    let column_list = columns.join(", ");

    let ddl_err = |source| MigrateError::SchemaEvolutionError {
        table: table.to_string(),
        column: column.to_string(),
        source,
    };

    let fk_enabled: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .map_err(ddl_err)?;
    conn.execute_batch("PRAGMA foreign_keys=OFF").map_err(ddl_err)?;

    let result = (|| -> Result<(), rusqlite::Error> {
        let tx = conn.unchecked_transaction()?;
        let sequence = autoincrement_seq(&tx, table)?;
        for trigger in &dependents.foreign_triggers {
            tx.execute(&format!("DROP TRIGGER IF EXISTS {}", quote(&trigger.name)), [])?;
        }
        for view in dependents.views.iter().rev() {
            tx.execute(&format!("DROP VIEW IF EXISTS {}", quote(&view.name)), [])?;
        }
        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote(&rebuilt_name)), [])?;
        tx.execute(&rebuilt_sql, [])?;
        tx.execute(
            &format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                quote(&rebuilt_name),
                column_list,
                column_list,
                quote(table)
            ),
            [],
        )?;
        tx.execute(&format!("DROP TABLE {}", quote(table)), [])?;
        tx.execute(
            &format!(
                "ALTER TABLE {} RENAME TO {}",
                quote(&rebuilt_name),
                quote(table)
            ),
            [],
        )?;
        if let Some(seq) = sequence {
            restore_autoincrement_seq(&tx, table, seq)?;
        }
        for object in dependents.recreate_order() {
            tx.execute_batch(&object.sql)?;
        }
        let violations: i64 = tx.query_row(
            &format!(
                "SELECT COUNT(*) FROM pragma_foreign_key_check({})",
                sql_literal(table)
            ),
            [],
            |row| row.get(0),
        )?;
        if violations > 0 {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
                Some(format!(
                    "{} foreign key violation(s) after rebuilding {}",
                    violations, table
                )),
            ));
        }
        tx.commit()
    })();

    let restore = if fk_enabled != 0 {
        conn.execute_batch("PRAGMA foreign_keys=ON")
    } else {
        Ok(())
    };

    result.map_err(ddl_err)?;
    restore.map_err(ddl_err)?;
    Ok(())
}

/// High-water mark of an AUTOINCREMENT table. Dropping the table forgets it.
fn autoincrement_seq(conn: &Connection, table: &str) -> Result<Option<i64>, rusqlite::Error> {
    let has_sequence: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
        [],
        |row| row.get(0),
    )?;
    if has_sequence == 0 {
        return Ok(None);
    }
    conn.query_row(
        "SELECT seq FROM sqlite_sequence WHERE name = ?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
}

fn restore_autoincrement_seq(
    conn: &Connection,
    table: &str,
    seq: i64,
) -> Result<(), rusqlite::Error> {
    let updated = conn.execute(
        "UPDATE sqlite_sequence SET seq = MAX(seq, ?2) WHERE name = ?1",
        params![table, seq],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
            params![table, seq],
        )?;
    }
    Ok(())
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Rewrite a stored `CREATE TABLE` statement under a new name with one column's
/// definition replaced. Returns `None` if the column definition cannot be found.
pub fn rewrite_column_definition(
    create_sql: &str,
    new_name: &str,
    column: &str,
    clause: &str,
) -> Option<String> {
    let open = create_sql.find('(')?;
    let close = matching_paren(create_sql, open)?;
    let body = &create_sql[open + 1..close];
    let suffix = create_sql[close + 1..].trim_end();

    let mut found = false;
    let defs: Vec<String> = split_top_level(body)
        .into_iter()
        .map(|def| {
            let def = def.trim().to_string();
            if !found && is_column_definition(&def, column) {
                found = true;
                format!("{} {}", quote(column), clause.trim())
            } else {
                def
            }
        })
        .collect();
    if !found {
        return None;
    }

    Some(format!(
        "CREATE TABLE {} (\n    {}\n){}",
        quote(new_name),
        defs.join(",\n    "),
        suffix
    ))
}

const CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

fn is_column_definition(def: &str, column: &str) -> bool {
    let Some(first) = leading_identifier(def) else {
        return false;
    };
    let quoted = def.starts_with(['"', '`', '[']);
    if !quoted
        && CONSTRAINT_KEYWORDS
            .iter()
            .any(|k| first.eq_ignore_ascii_case(k))
    {
        return false;
    }
    first.eq_ignore_ascii_case(column)
}

fn leading_identifier(def: &str) -> Option<String> {
    let mut chars = def.chars();
    let first = chars.next()?;
    let close = match first {
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    };
    match close {
        Some(end) => {
            let rest: String = chars.take_while(|c| *c != end).collect();
            Some(rest)
        }
        None => Some(
            def.chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect(),
        ),
    }
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices().skip_while(|(i, _)| *i < open) {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '[' => quote = Some(']'),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(body: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in body.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '[' => {
                quote = Some(']');
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}
