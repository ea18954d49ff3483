#![allow(dead_code)]

use rusqlite::Connection;
use tablemigrate::core::{db, descriptor::MigrationDescriptor};
use tempfile::TempDir;

pub const USERS: &str = r#"
name = "legacy_users to users"
source_table = "legacy_users"
target_table = "users"
pivot_table = "map_users_legacy"

[pivot_columns]
user_id = "INTEGER NOT NULL"
legacy_id = "INTEGER NOT NULL"

[new_target_columns]
is_migrated = "INTEGER DEFAULT 0"
legacy_id = "INTEGER"

[altered_target_columns]
email = "VARCHAR(255)"

[new_source_columns]
migration_done = "INTEGER DEFAULT 0"

[mapping]
target_key = "user_id"
target_link = "legacy_id"
pivot_source_column = "legacy_id"
pivot_target_column = "user_id"
fields = [
  { source = "email", target = "email", compare = "binary" },
  { source = "score", target = "score", compare = "round:2" },
  { source = "joined", target = "joined_ts", compare = "timestamp" },
]
"#;

pub fn users_descriptor() -> MigrationDescriptor {
    MigrationDescriptor::from_toml(USERS).expect("users descriptor")
}

pub fn open_db() -> (TempDir, Connection) {
    let tmp = TempDir::new().expect("tempdir");
    let conn = db::db_connect(&tmp.path().join("app.db"), 5).expect("connect");
    (tmp, conn)
}

pub fn seed_users(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE legacy_users (id INTEGER PRIMARY KEY, email TEXT, score REAL, joined TEXT);
         CREATE TABLE users (
             user_id INTEGER PRIMARY KEY AUTOINCREMENT,
             email VARCHAR(64) NOT NULL DEFAULT '',
             score REAL,
             joined_ts TEXT
         );
         CREATE INDEX idx_users_email ON users(email);
         INSERT INTO legacy_users (id, email, score, joined) VALUES
             (1, 'ada@example.com', 9.5, '2024-01-02 03:04:05'),
             (2, 'bob@example.com', 7.25, '2024-02-03 04:05:06'),
             (3, 'cy@example.com', NULL, '2024-03-04 05:06:07');",
    )
    .expect("seed users");
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0))
        .unwrap_or_else(|e| panic!("{sql}: {e}"))
}

/// Tables read by the built-in sets, shaped like the legacy schema they target.
pub fn seed_sites(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE sites (
             id INTEGER PRIMARY KEY,
             status TEXT,
             domain TEXT,
             name TEXT,
             created_at TEXT,
             updated_at TEXT,
             internal INTEGER,
             live INTEGER,
             postal_code TEXT,
             lat REAL,
             lng REAL
         );
         CREATE TABLE lk_domains_2 (
             domain_id INTEGER PRIMARY KEY AUTOINCREMENT,
             domain_status TEXT,
             domain_name TEXT,
             domain_cname TEXT,
             domain_alias TEXT,
             domain_sitename TEXT,
             domain_billing_type INTEGER,
             domain_live INTEGER,
             domain_postal VARCHAR(10),
             lat REAL,
             lng REAL
         );
         CREATE TABLE site_settings (
             id INTEGER PRIMARY KEY,
             site_id INTEGER NOT NULL,
             \"key\" TEXT NOT NULL,
             value TEXT
         );
         CREATE TABLE lk_domains_settings_2 (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             domain_id INTEGER,
             k VARCHAR(64),
             v TEXT
         );
         INSERT INTO sites VALUES
             (10, 'active', 'alpha.test', 'Alpha', '2023-05-01 10:00:00', '2023-06-01 10:00:00', 0, 1, '10115', 52.520008, 13.404954),
             (11, 'paused', 'beta.test', 'Beta', '2023-05-02 11:30:00', '2023-06-02 11:30:00', 1, 0, '80331', 48.137154, 11.576124);
         INSERT INTO site_settings VALUES
             (100, 10, 'theme', 'dark'),
             (101, 10, 'locale', 'de_DE'),
             (102, 11, 'theme', 'light');",
    )
    .expect("seed sites");
}
