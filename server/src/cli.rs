//! Shared plumbing for the admin and batch binaries.

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use crate::config::{init_tracing, load_env, Config};

pub const EXIT_MISSING_ARGUMENT: u8 = 1;
pub const EXIT_USAGE: u8 = 2;
pub const EXIT_FAILURE: u8 = 3;

/// Parses arguments, mapping clap failures onto the utility exit codes.
pub fn parse_args<T: Parser>() -> Result<T, ExitCode> {
    T::try_parse().map_err(|e| {
        let code = match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            ErrorKind::MissingRequiredArgument => EXIT_MISSING_ARGUMENT,
            _ => EXIT_USAGE,
        };
        let _ = e.print();
        ExitCode::from(code)
    })
}

/// Loads `.env.<environment>`, starts logging and reads the configuration.
pub fn setup() -> Config {
    let environment = load_env();
    init_tracing(environment);
    Config::from_env()
}

/// Reports an operational failure and returns its exit code.
pub fn fail(err: anyhow::Error) -> ExitCode {
    tracing::error!(error = ?err, "Utility failed");
    eprintln!("error: {err:#}");
    ExitCode::from(EXIT_FAILURE)
}
