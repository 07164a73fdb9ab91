#![allow(dead_code)]

mod cli;
mod application;
mod domain;
mod data;
mod engine;
mod infra;

use clap::Parser;
use cli::Cli;
use domain::report::RunStatus;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Completed, but the report lists records that need a human
const EXIT_FLAGGED: u8 = 3;

fn main() -> ExitCode {
    // RUST_LOG wins when set; otherwise info for this crate only
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("question_taxonomy=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.run() {
        Ok(RunStatus::Success)          => ExitCode::SUCCESS,
        Ok(RunStatus::SuccessWithFlags) => ExitCode::from(EXIT_FLAGGED),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
