use colored::Colorize;
use std::process::ExitCode;

fn main() -> ExitCode {
    match tablemigrate::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗".bright_red(), e);
            ExitCode::FAILURE
        }
    }
}
