//! CLI struct definitions for the tablemigrate command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "tablemigrate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Resumable one-way table migrations with pivot mapping, field-level validation and best-effort undo."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./tablemigrate.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// SQLite database file; overrides TABLEMIGRATE_DB and the config file.
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,
    /// Use a descriptor file instead of a built-in set.
    #[clap(long, global = true)]
    pub set_file: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RunArgs {
    /// Built-in migration set (see `tablemigrate list`).
    pub set: Option<String>,
    /// Answer yes to the confirmation prompt.
    #[clap(long, short = 'y')]
    pub yes: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InspectArgs {
    /// Built-in migration set (see `tablemigrate list`).
    pub set: Option<String>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Copy unmigrated rows from source to target, link them and validate the result
    #[clap(name = "do-migrate")]
    DoMigrate(RunArgs),

    /// Delete migrated rows, reset migration flags and clear the pivot table
    #[clap(name = "undo-migrate")]
    UndoMigrate(RunArgs),

    /// Run the consistency checks against the current data without changing it
    #[clap(name = "validate", visible_alias = "v")]
    Validate(InspectArgs),

    /// Show migrated/pending row counts
    #[clap(name = "status")]
    Status(InspectArgs),

    /// List built-in migration sets
    #[clap(name = "list")]
    List,

    /// Print a set's resolved schema changes and statements
    #[clap(name = "show")]
    Show {
        /// Built-in migration set (see `tablemigrate list`).
        set: Option<String>,
    },
}
