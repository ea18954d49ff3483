//! Process configuration from `tablemigrate.toml`.
//!
//! A missing default config file is not an error; every setting has a default
//! except the database path, which may also come from `TABLEMIGRATE_DB` or `--db`.

use crate::core::error::MigrateError;
use crate::core::journal::DEFAULT_JOURNAL_FILE;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "tablemigrate.toml";
pub const DB_ENV_VAR: &str = "TABLEMIGRATE_DB";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

fn default_busy_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JournalConfig {
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
            enabled: true,
        }
    }
}

fn default_journal_path() -> PathBuf {
    PathBuf::from(DEFAULT_JOURNAL_FILE)
}

fn default_true() -> bool {
    true
}

/// Load config from an explicit path (must exist) or from `./tablemigrate.toml`.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, MigrateError> {
    let path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(MigrateError::ConfigError(format!(
                    "config file {} does not exist",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let p = PathBuf::from(CONFIG_FILE);
            if !p.exists() {
                return Ok(Config::default());
            }
            p
        }
    };
    let content = fs::read_to_string(&path).map_err(MigrateError::IoError)?;
    parse_config(&content)
        .map_err(|e| MigrateError::ConfigError(format!("{}: {}", path.display(), e)))
}

pub fn parse_config(text: &str) -> Result<Config, MigrateError> {
    toml::from_str(text).map_err(|e| MigrateError::ConfigError(e.to_string()))
}

impl Config {
    /// `--db` beats the environment, which beats the config file.
    pub fn database_path(
        &self,
        cli: Option<&Path>,
        env: Option<String>,
    ) -> Result<PathBuf, MigrateError> {
        if let Some(p) = cli {
            return Ok(p.to_path_buf());
        }
        if let Some(p) = env.filter(|v| !v.trim().is_empty()) {
            return Ok(PathBuf::from(p));
        }
        self.database.path.clone().ok_or_else(|| {
            MigrateError::ConfigError(format!(
                "no database configured: pass --db, set {} or add [database] path to {}",
                DB_ENV_VAR, CONFIG_FILE
            ))
        })
    }
}
