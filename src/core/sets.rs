//! Built-in descriptor sets.
//!
//! The `sets/` directory is compiled into the binary; a set is addressed by its
//! file stem. Descriptors outside the binary are loaded by path.

use crate::core::descriptor::MigrationDescriptor;
use crate::core::error::MigrateError;
use rust_embed::RustEmbed;
use std::fs;
use std::path::Path;

#[derive(RustEmbed)]
#[folder = "sets/"]
#[include = "*.toml"]
struct BuiltinSets;

pub fn list_sets() -> Vec<String> {
    let mut names: Vec<String> = BuiltinSets::iter()
        .filter_map(|f| f.strip_suffix(".toml").map(|s| s.to_string()))
        .collect();
    names.sort();
    names
}

pub fn builtin_source(name: &str) -> Option<String> {
    let file = BuiltinSets::get(&format!("{}.toml", name))?;
    Some(String::from_utf8_lossy(&file.data).into_owned())
}

pub fn load_set(name: &str) -> Result<MigrationDescriptor, MigrateError> {
    let text = builtin_source(name).ok_or_else(|| {
        MigrateError::NotFound(format!(
            "unknown migration set '{}' (available: {})",
            name,
            list_sets().join(", ")
        ))
    })?;
    MigrationDescriptor::from_toml(&text).map_err(|e| with_origin(e, &format!("set {}", name)))
}

pub fn load_file(path: &Path) -> Result<MigrationDescriptor, MigrateError> {
    let text = fs::read_to_string(path).map_err(MigrateError::IoError)?;
    MigrationDescriptor::from_toml(&text)
        .map_err(|e| with_origin(e, &path.display().to_string()))
}

fn with_origin(err: MigrateError, origin: &str) -> MigrateError {
    match err {
        MigrateError::DescriptorError(msg) => {
            MigrateError::DescriptorError(format!("{}: {}", origin, msg))
        }
        other => other,
    }
}
