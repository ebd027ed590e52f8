//! Carriers Worker main executable

pub mod carriers;
pub mod combine;
pub mod common;
pub mod err;
pub mod extract;
pub mod harmonize;
pub mod matching;
pub mod store;
pub mod validate;
pub mod variants;

use std::process::{ExitCode, Termination};

use clap::{Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Variant carrier extraction across populations",
    long_about = "This tool finds carriers of variants of interest in genotyped \
                  sub-cohorts and combines the per-population results"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Match, harmonize and extract carriers for each population.
    Extract(extract::Args),
    /// Combine the per-population outputs of `extract`.
    Combine(combine::Args),
    /// Check a combined table against its per-population sources.
    Validate(validate::Args),
}

fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    match &cli.command {
        Commands::Extract(args) => extract::run(&cli.common, args)?,
        Commands::Combine(args) => combine::run(&cli.common, args)?,
        Commands::Validate(args) => validate::run(&cli.common, args)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || {
        let result = run(&cli);
        if let Err(e) = &result {
            tracing::error!("{:#}", e);
        }
        result
    });

    match result {
        Ok(()) => {
            // Failing to greet is not a failure of the run.
            let _ = term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")));
            ExitCode::SUCCESS
        }
        Err(e) => match e.downcast::<err::CarriersError>() {
            Ok(e) => e.report(),
            Err(_) => ExitCode::FAILURE,
        },
    }
}
