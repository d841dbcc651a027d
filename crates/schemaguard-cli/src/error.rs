//! CLI error types.

use std::path::PathBuf;

use schemaguard_core::MigrationError;
use thiserror::Error;

/// Exit code for usage, configuration and plan-file errors.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for failures talking to the database.
pub const EXIT_FAILURE: i32 = 1;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No database URL was given.
    #[error("DATABASE_URL is not set (pass --database-url or export DATABASE_URL='postgresql://...')")]
    MissingDatabaseUrl,

    /// The plan file could not be read.
    #[error("cannot read plan file {}: {source}", path.display())]
    PlanRead {
        /// Plan file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The plan file is not valid JSON for a plan.
    #[error("cannot parse plan file {}: {source}", path.display())]
    PlanParse {
        /// Plan file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A step's statement file could not be read.
    #[error("cannot read statement file {} for step {step_id}: {source}", path.display())]
    StatementFile {
        /// Step referencing the file.
        step_id: String,
        /// Resolved statement file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A step gives neither or both of `statement` and `statement_file`.
    #[error("step {step_id}: {message}")]
    StepDefinition {
        /// Offending step.
        step_id: String,
        /// What is wrong.
        message: String,
    },

    /// The plan failed validation.
    #[error(transparent)]
    Plan(#[from] MigrationError),

    /// The database could not be opened or queried.
    #[error(transparent)]
    Database(#[from] schemaguard_core::Error),
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Database(_) => EXIT_FAILURE,
            _ => EXIT_USAGE,
        }
    }
}
