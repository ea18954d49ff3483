//! Pivot (mapping) table creation.
//!
//! The pivot table links each migrated target row to the source row it came from.
//! Creation is `IF NOT EXISTS`, so it runs on every forward run. Because an existing
//! table is accepted as-is by SQLite, the live definition is inspected afterwards and
//! any missing foreign-key column or uniqueness guarantee is reported as drift.

use crate::core::db;
use crate::core::descriptor::ColumnMap;
use crate::core::error::MigrateError;
use crate::core::output::Reporter;
use rusqlite::{Connection, params};

/// Deterministic constraint name for a set of foreign-key columns.
pub fn unique_key_name(columns: &ColumnMap) -> String {
    let names: Vec<&str> = columns.keys().map(|c| c.as_str()).collect();
    format!("unique_{}", names.join("_"))
}

pub fn create_table_sql(table: &str, columns: &ColumnMap) -> String {
    let names: Vec<&str> = columns.keys().map(|c| c.as_str()).collect();
    let mut defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    defs.extend(columns.iter().map(|(col, clause)| format!("{} {}", col, clause)));
    defs.push("created_at TEXT DEFAULT CURRENT_TIMESTAMP".to_string());
    defs.push("updated_at TEXT DEFAULT CURRENT_TIMESTAMP".to_string());
    defs.push(format!(
        "CONSTRAINT {} UNIQUE ({})",
        unique_key_name(columns),
        names.join(", ")
    ));
    defs.extend(names.iter().map(|col| format!("CHECK ({} > 0)", col)));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table,
        defs.join(",\n    ")
    )
}

fn touch_trigger_sql(table: &str) -> String {
    format!(
        "CREATE TRIGGER IF NOT EXISTS {table}_touch_updated_at
         AFTER UPDATE ON {table}
         FOR EACH ROW WHEN NEW.updated_at IS OLD.updated_at
         BEGIN
             UPDATE {table} SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
         END"
    )
}

pub fn create_pivot(
    conn: &Connection,
    table: &str,
    columns: &ColumnMap,
    reporter: &mut Reporter,
) -> Result<(), MigrateError> {
    reporter.phase(format!("Creating pivot table {}", table));
    let create_err = |source| MigrateError::PivotCreationError {
        table: table.to_string(),
        source,
    };
    conn.execute(&create_table_sql(table, columns), [])
        .map_err(create_err)?;
    check_drift(conn, table, columns)?;
    conn.execute_batch(&touch_trigger_sql(table))
        .map_err(create_err)?;

    let names: Vec<&str> = columns.keys().map(|c| c.as_str()).collect();
    reporter.ok(format!(
        "UNIQUE constraint on ({}), key name: {}",
        names.join(", "),
        unique_key_name(columns)
    ));
    reporter.ok(format!("Pivot table {} ready", table));
    reporter.blank();
    Ok(())
}

/// Compare a live pivot table with the requested definition.
pub fn check_drift(
    conn: &Connection,
    table: &str,
    columns: &ColumnMap,
) -> Result<(), MigrateError> {
    let live: Vec<String> = db::table_columns(conn, table)?
        .into_iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();

    let mut problems = Vec::new();
    let implicit = ["id", "created_at", "updated_at"];
    for required in implicit.into_iter().chain(columns.keys().map(|c| c.as_str())) {
        if !live.contains(&required.to_ascii_lowercase()) {
            problems.push(format!("missing column {}", required));
        }
    }
    if problems.is_empty() && !has_unique_index(conn, table, columns)? {
        let names: Vec<&str> = columns.keys().map(|c| c.as_str()).collect();
        problems.push(format!("no unique index over ({})", names.join(", ")));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::SchemaDrift {
            table: table.to_string(),
            detail: problems.join("; "),
        })
    }
}

fn has_unique_index(
    conn: &Connection,
    table: &str,
    columns: &ColumnMap,
) -> Result<bool, MigrateError> {
    let catalog_err = |source| MigrateError::CatalogError {
        table: table.to_string(),
        column: None,
        source,
    };
    let mut wanted: Vec<String> = columns.keys().map(|c| c.to_ascii_lowercase()).collect();
    wanted.sort();

    let mut stmt = conn
        .prepare("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")
        .map_err(catalog_err)?;
    let indexes: Vec<String> = stmt
        .query_map(params![table], |row| row.get(0))
        .map_err(catalog_err)?
        .collect::<Result<_, _>>()
        .map_err(catalog_err)?;

    let mut info = conn
        .prepare("SELECT name FROM pragma_index_info(?1)")
        .map_err(catalog_err)?;
    for index in indexes {
        let mut cols: Vec<String> = info
            .query_map(params![index], |row| row.get::<_, String>(0))
            .map_err(catalog_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(catalog_err)?
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        cols.sort();
        if cols == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}
