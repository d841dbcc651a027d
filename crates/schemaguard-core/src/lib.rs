//! schemaguard core - validated, transactional schema migrations.
//!
//! This crate provides the migration engine and the database handle
//! abstraction it runs against.

pub mod database;
pub mod error;
pub mod migration;

pub use database::{
    open, Backend, ColumnInfo, ConstraintInfo, ConstraintKind, Database, IndexInfo,
    MigrationTransaction, Row, SqlValue, SqliteDatabase,
};
pub use error::Error;
pub use migration::{
    CheckOutcome, MigrationError, MigrationPlan, MigrationResult, MigrationRunner, MigrationStep,
    Postcondition, RuleKind, RunPhase, RunStatus, RunnerConfig, StepExecutor, StepKind,
    StepOutcome, StepStatus, StepTarget, ValidationOutcome, ValidationRule, Validator,
    VerificationReport, Verifier,
};

#[cfg(feature = "postgres")]
pub use database::PostgresDatabase;
