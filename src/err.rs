//! Typed failures of the carrier pipeline.
//!
//! Callers translate these into exit codes or log lines; partial success is
//! not an error and is reported through the combiner output instead.

use std::process::{ExitCode, Termination};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CarriersError {
    /// Nothing to work on, e.g., an empty reference list or no matches at all.
    #[error("no input data: {0}")]
    NoInputData(String),
    /// Input is structurally broken; raised before any matching starts.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// Proceeding would risk silently corrupting frequency or carrier data.
    #[error("unsafe to proceed: {0}")]
    Unsafe(String),
    /// A population lacks one of its expected extraction files.
    #[error("population {label} is missing {path}")]
    MissingPopulation { label: String, path: String },
}

impl Termination for CarriersError {
    fn report(self) -> ExitCode {
        match self {
            CarriersError::NoInputData(_) => ExitCode::from(2),
            CarriersError::MalformedInput(_) => ExitCode::from(3),
            CarriersError::Unsafe(_) => ExitCode::from(4),
            CarriersError::MissingPopulation { .. } => ExitCode::from(5),
        }
    }
}
