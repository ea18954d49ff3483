//! tablemigrate: resumable one-way table migrations.
//!
//! Moves rows from a source table into a target table exactly once, records the
//! old↔new identity mapping in a pivot table, verifies the copy field by field and
//! offers a best-effort undo.
//!
//! # Model
//!
//! - A [`MigrationDescriptor`](core::descriptor::MigrationDescriptor) names the
//!   tables, the column changes and the statements of one migration. Built-in
//!   descriptors live under `sets/` and are compiled into the binary.
//! - Progress is stored in the data: a flag column on each side and the pivot
//!   table. Re-running a migration only picks up rows not flagged yet.
//! - Schema changes are applied first and are never undone. The data move and its
//!   validation commit together or not at all.
//!
//! # Examples
//!
//! ```bash
//! tablemigrate --db app.db list
//! tablemigrate --db app.db show set_1
//! tablemigrate --db app.db do-migrate set_1
//! tablemigrate --db app.db status set_1
//! tablemigrate --db app.db undo-migrate set_1
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: descriptor model, schema evolver, pivot creator, data mover,
//!   validator, rollback executor and the engine that sequences them.

pub mod core;
mod cli;

use cli::{Cli, Command, InspectArgs, RunArgs};
use core::{
    config::{self, Config},
    db,
    descriptor::MigrationDescriptor,
    engine,
    journal::Journal,
    output::Reporter,
    sets, time,
};

use anyhow::{Context, bail};
use clap::Parser;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::ExitCode;

pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::List => {
            list_sets();
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { set } => {
            let d = load_descriptor(cli.set_file.as_deref(), set.as_deref())?;
            show_descriptor(&d);
            Ok(ExitCode::SUCCESS)
        }
        Command::DoMigrate(args) => {
            let d = load_descriptor(cli.set_file.as_deref(), args.set.as_deref())?;
            do_migrate(&cfg, cli.db.as_deref(), &d, &args)
        }
        Command::UndoMigrate(args) => {
            let d = load_descriptor(cli.set_file.as_deref(), args.set.as_deref())?;
            undo_migrate(&cfg, cli.db.as_deref(), &d, &args)
        }
        Command::Validate(args) => {
            let d = load_descriptor(cli.set_file.as_deref(), args.set.as_deref())?;
            validate_set(&cfg, cli.db.as_deref(), &d, &args)
        }
        Command::Status(args) => {
            let d = load_descriptor(cli.set_file.as_deref(), args.set.as_deref())?;
            show_status(&cfg, cli.db.as_deref(), &d, &args)
        }
    }
}

fn load_descriptor(
    set_file: Option<&Path>,
    set: Option<&str>,
) -> anyhow::Result<MigrationDescriptor> {
    match (set_file, set) {
        (Some(path), _) => Ok(sets::load_file(path)?),
        (None, Some(name)) => Ok(sets::load_set(name)?),
        (None, None) => bail!(
            "provide a migration set name (one of: {}) or --set-file <path>",
            sets::list_sets().join(", ")
        ),
    }
}

fn connect(cfg: &Config, db_override: Option<&Path>) -> anyhow::Result<rusqlite::Connection> {
    let path = cfg.database_path(db_override, std::env::var(config::DB_ENV_VAR).ok())?;
    let conn = db::db_connect(&path, cfg.database.busy_timeout_secs)
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(conn)
}

fn journal_for(cfg: &Config, d: &MigrationDescriptor) -> Journal {
    if cfg.journal.enabled {
        Journal::open(&cfg.journal.path, d)
    } else {
        Journal::disabled(d)
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} (y/N): ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    let answer = input.trim();
    Ok(answer == "y" || answer == "Y")
}

fn do_migrate(
    cfg: &Config,
    db_override: Option<&Path>,
    d: &MigrationDescriptor,
    args: &RunArgs,
) -> anyhow::Result<ExitCode> {
    println!("{} You are about to migrate data:", "⚠".bright_yellow());
    println!("   → FROM: {}", d.source_table);
    println!("   → TO:   {}", d.target_table);
    if let Some(pivot) = &d.pivot_table {
        println!("   → VIA:  {}", pivot);
    }
    if !args.yes && !confirm("Proceed with migration?")? {
        println!("{} Migration cancelled.", "✗".bright_red());
        return Ok(ExitCode::SUCCESS);
    }
    println!();

    let mut conn = connect(cfg, db_override)?;
    let journal = journal_for(cfg, d);
    let mut reporter = Reporter::stdout();
    match engine::run_forward(&mut conn, d, &mut reporter, &journal) {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(_) => Ok(ExitCode::FAILURE),
    }
}

fn undo_migrate(
    cfg: &Config,
    db_override: Option<&Path>,
    d: &MigrationDescriptor,
    args: &RunArgs,
) -> anyhow::Result<ExitCode> {
    let mut reporter = Reporter::stdout();
    reporter.warn("You are about to undo the migration with these statements:");
    reporter.blank();
    for step in &d.rollback_steps {
        reporter.line(format!("→ {} {}:", step.description, step.table));
        reporter.statement(db::statement_text(&step.query));
        reporter.blank();
    }
    if !args.yes && !confirm("Proceed with undo migration?")? {
        reporter.fail("Undo migration cancelled.");
        return Ok(ExitCode::SUCCESS);
    }
    reporter.blank();

    let conn = connect(cfg, db_override)?;
    let journal = journal_for(cfg, d);
    match engine::run_rollback(&conn, d, &mut reporter, &journal) {
        Ok(_) => {
            println!();
            println!("{} Undo migration completed successfully!", "✓".bright_green());
            Ok(ExitCode::SUCCESS)
        }
        Err(_) => {
            println!(
                "{} Rollback encountered an issue. See above for details.",
                "⚠".bright_yellow()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn validate_set(
    cfg: &Config,
    db_override: Option<&Path>,
    d: &MigrationDescriptor,
    args: &InspectArgs,
) -> anyhow::Result<ExitCode> {
    let mut conn = connect(cfg, db_override)?;
    let json = args.format == "json";
    let mut reporter = if json {
        Reporter::quiet()
    } else {
        Reporter::stdout()
    };
    let result = engine::validate_only(&mut conn, d, &mut reporter);
    let set_label = args.set.as_deref().unwrap_or(&d.name);

    match result {
        Ok(report) => {
            if json {
                let body = serde_json::to_value(&report)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&time::result_envelope(
                        "validate", set_label, "ok", body
                    ))?
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            if json {
                let body = serde_json::json!({ "error": e.to_string() });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&time::result_envelope(
                        "validate", set_label, "failed", body
                    ))?
                );
            } else {
                println!("{} {}", "✗".bright_red(), e);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show_status(
    cfg: &Config,
    db_override: Option<&Path>,
    d: &MigrationDescriptor,
    args: &InspectArgs,
) -> anyhow::Result<ExitCode> {
    let conn = connect(cfg, db_override)?;
    let status = engine::status(&conn, d)?;
    if args.format == "json" {
        let set_label = args.set.as_deref().unwrap_or(&d.name);
        let body = serde_json::to_value(&status)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&time::result_envelope("status", set_label, "ok", body))?
        );
        return Ok(ExitCode::SUCCESS);
    }

    let or_dash = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    println!("{}", d.name.bright_white().bold());
    println!(
        "  {} {}: {} rows, {} migrated, {} pending",
        "▸".bright_cyan(),
        d.source_table,
        status.source_rows,
        or_dash(status.source_migrated),
        or_dash(status.pending())
    );
    println!(
        "  {} {}: {} rows, {} migrated in",
        "▸".bright_cyan(),
        d.target_table,
        status.target_rows,
        or_dash(status.target_migrated)
    );
    if let Some(pivot) = &d.pivot_table {
        println!(
            "  {} {}: {} links",
            "▸".bright_cyan(),
            pivot,
            or_dash(status.pivot_rows)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn list_sets() {
    for name in sets::list_sets() {
        match sets::load_set(&name) {
            Ok(d) => println!("  {} {:<10} {}", "●".bright_cyan(), name, d.name),
            Err(e) => println!("  {} {:<10} {}", "✗".bright_red(), name, e),
        }
    }
}

fn show_descriptor(d: &MigrationDescriptor) {
    println!("{}", d.name.bright_white().bold());
    println!("  source: {}", d.source_table);
    println!("  target: {}", d.target_table);
    if let Some(pivot) = &d.pivot_table {
        println!("  pivot:  {}", pivot);
    }
    println!("  fingerprint: {}", d.fingerprint());

    let columns = [
        ("add to target", &d.new_target_columns),
        ("modify on target", &d.altered_target_columns),
        ("add to source", &d.new_source_columns),
        ("pivot columns", &d.pivot_columns),
    ];
    for (label, cols) in columns {
        if cols.is_empty() {
            continue;
        }
        println!();
        println!("{} {}", "▸".bright_cyan(), label);
        for (col, clause) in cols {
            println!("   {} {}", col, clause);
        }
    }

    let s = &d.statements;
    let mut statements: Vec<(&str, &str)> = vec![
        ("insert", s.insert.as_str()),
        ("mark migrated", s.mark_migrated.as_str()),
    ];
    if let Some(link) = &s.link_pivot {
        statements.push(("link pivot", link.as_str()));
    }
    if let Some(referential) = &s.referential_check {
        statements.push(("referential check", referential.as_str()));
    }
    statements.push(("field equality", s.field_equality.as_str()));
    for (label, sql) in statements {
        println!();
        println!("{} {}", "▸".bright_cyan(), label);
        for line in db::statement_text(sql).lines() {
            println!("   {}", line);
        }
    }

    println!();
    println!("{} rollback", "▸".bright_cyan());
    for (i, step) in d.rollback_steps.iter().enumerate() {
        println!("   {}. {} {}", i + 1, step.description, step.table);
        println!("      {}", db::statement_text(&step.query));
    }
}
