//! Connection setup and catalog lookups.
//!
//! The catalog helpers read `sqlite_master` and `pragma_table_info`, which play the
//! role of the information schema for every existence check the engine makes.

use crate::core::error::MigrateError;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::time::Duration;

pub fn db_connect(db_path: &Path, busy_timeout_secs: u64) -> Result<Connection, MigrateError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))
        .map_err(MigrateError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(MigrateError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(MigrateError::RusqliteError)?;
    Ok(conn)
}

/// One row of `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub pk: i64,
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, MigrateError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(|source| MigrateError::CatalogError {
            table: table.to_string(),
            column: None,
            source,
        })?;
    Ok(count > 0)
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, MigrateError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE",
            params![table, column],
            |row| row.get(0),
        )
        .map_err(|source| MigrateError::CatalogError {
            table: table.to_string(),
            column: Some(column.to_string()),
            source,
        })?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, MigrateError> {
    let catalog_err = |source| MigrateError::CatalogError {
        table: table.to_string(),
        column: None,
        source,
    };
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(catalog_err)?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                pk: row.get(4)?,
            })
        })
        .map_err(catalog_err)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(catalog_err)?);
    }
    Ok(out)
}

/// Stored `CREATE TABLE` text for a table.
pub fn table_sql(conn: &Connection, table: &str) -> Result<Option<String>, MigrateError> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
    .map_err(|source| MigrateError::CatalogError {
        table: table.to_string(),
        column: None,
        source,
    })
}

/// A stored schema object from `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: String,
    pub name: String,
    pub sql: String,
}

/// Schema objects that have to be dropped and recreated around a table rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependentSchema {
    /// Views whose text mentions the table, in creation order.
    pub views: Vec<SchemaObject>,
    /// Triggers on other tables whose body mentions the table, and every trigger
    /// on a view listed above.
    pub foreign_triggers: Vec<SchemaObject>,
    /// Explicit indexes and triggers on the table itself.
    pub own: Vec<SchemaObject>,
}

impl DependentSchema {
    /// Everything to recreate after the rebuilt table is renamed, views first.
    pub fn recreate_order(&self) -> impl Iterator<Item = &SchemaObject> {
        self.views
            .iter()
            .chain(self.own.iter())
            .chain(self.foreign_triggers.iter())
    }
}

/// Collect the indexes, triggers and views a rebuild of `table` must carry over.
///
/// Views and foreign triggers are matched on their text, so an object that merely
/// mentions the name is included too; recreating it unchanged is harmless.
pub fn dependent_sql(conn: &Connection, table: &str) -> Result<DependentSchema, MigrateError> {
    let catalog_err = |source| MigrateError::CatalogError {
        table: table.to_string(),
        column: None,
        source,
    };
    let mut stmt = conn
        .prepare(
            "SELECT type, name, tbl_name, sql FROM sqlite_master
             WHERE sql IS NOT NULL
               AND type IN ('index', 'trigger', 'view')
               AND (
                   tbl_name = ?1
                   OR (type IN ('trigger', 'view') AND sql LIKE '%' || ?1 || '%')
                   OR (type = 'trigger' AND tbl_name IN (
                       SELECT name FROM sqlite_master
                       WHERE type = 'view' AND sql LIKE '%' || ?1 || '%'
                   ))
               )
             ORDER BY rowid",
        )
        .map_err(catalog_err)?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                SchemaObject {
                    kind: row.get(0)?,
                    name: row.get(1)?,
                    sql: row.get(3)?,
                },
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(catalog_err)?;

    let mut deps = DependentSchema::default();
    for row in rows {
        let (object, owner) = row.map_err(catalog_err)?;
        if object.kind == "view" {
            deps.views.push(object);
        } else if owner.eq_ignore_ascii_case(table) {
            deps.own.push(object);
        } else {
            deps.foreign_triggers.push(object);
        }
    }
    Ok(deps)
}

/// Descriptor statements are stored as written; rusqlite runs one statement per call.
pub fn statement_text(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

pub fn count(conn: &Connection, sql: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(statement_text(sql), [], |row| row.get(0))
}

/// Render an arbitrary SQLite value the way an operator would type it.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("x'{}'", b.iter().map(|x| format!("{:02x}", x)).collect::<String>()),
    }
}
