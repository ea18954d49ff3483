//! Append-only audit log of migration runs.
//!
//! One JSON object per line. Every phase of a forward run or rollback appends an
//! event carrying the run id and the descriptor fingerprint, so the history of a
//! table pair can be reconstructed after the fact.

use crate::core::descriptor::MigrationDescriptor;
use crate::core::error::MigrateError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_JOURNAL_FILE: &str = "migration.events.jsonl";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JournalEvent {
    pub ts: String,
    pub event_id: String,
    pub run_id: String,
    pub descriptor: String,
    pub fingerprint: String,
    pub op: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct Journal {
    path: Option<PathBuf>,
    run_id: String,
    descriptor: String,
    fingerprint: String,
}

impl Journal {
    pub fn open(path: &Path, descriptor: &MigrationDescriptor) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            run_id: time::new_id(),
            descriptor: descriptor.name.clone(),
            fingerprint: descriptor.fingerprint(),
        }
    }

    /// A journal that records nothing.
    pub fn disabled(descriptor: &MigrationDescriptor) -> Self {
        Self {
            path: None,
            run_id: time::new_id(),
            descriptor: descriptor.name.clone(),
            fingerprint: descriptor.fingerprint(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&self, op: &str, status: &str, detail: Option<String>) -> Result<(), MigrateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let ev = JournalEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_id(),
            run_id: self.run_id.clone(),
            descriptor: self.descriptor.clone(),
            fingerprint: self.fingerprint.clone(),
            op: op.to_string(),
            status: status.to_string(),
            detail,
        };
        let line = serde_json::to_string(&ev)
            .map_err(|e| MigrateError::IoError(std::io::Error::other(e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(MigrateError::IoError)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(MigrateError::IoError)?;
        writeln!(f, "{}", line).map_err(MigrateError::IoError)?;
        Ok(())
    }
}

pub fn read_events(path: &Path) -> Result<Vec<JournalEvent>, MigrateError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(MigrateError::IoError)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l).map_err(|e| {
                MigrateError::ConfigError(format!("corrupt journal line in {}: {}", path.display(), e))
            })
        })
        .collect()
}
