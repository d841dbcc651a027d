//! Migration-specific error types.

use serde::Serialize;
use thiserror::Error;

use super::rule::RuleKind;
use crate::error::Error;

/// Migration-specific errors.
///
/// Every variant carries owned, printable data so a failure can be stored
/// in a [`MigrationResult`](super::MigrationResult) and serialized.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationError {
    /// A step's precondition failed against existing data.
    #[error("precondition {rule_kind} failed for step {step_id} on {}: {offending_count} offending row(s), {detail}", target(.table, .column))]
    PreconditionFailed {
        /// The step whose precondition failed.
        step_id: String,
        /// Which rule failed.
        rule_kind: RuleKind,
        /// Table the rule inspected.
        table: String,
        /// Column the rule inspected, if any.
        column: Option<String>,
        /// Number of rows violating the rule.
        offending_count: u64,
        /// Human-readable reason, including a bounded sample.
        detail: String,
    },

    /// The database rejected a step's statement.
    #[error("step {step_id} failed: {cause}")]
    ExecutionError {
        /// The failing step.
        step_id: String,
        /// Underlying database error.
        cause: String,
    },

    /// The database handle is unusable.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the failure.
        message: String,
    },

    /// A postcondition did not hold after commit.
    #[error("verification mismatch for step {step_id}: expected {expected}, observed {observed}")]
    VerificationMismatch {
        /// The step whose postcondition failed.
        step_id: String,
        /// What the postcondition expected.
        expected: String,
        /// What the catalog or data showed.
        observed: String,
    },

    /// The plan is malformed or violates the run policy.
    #[error("invalid plan: {message}")]
    InvalidPlan {
        /// Description of the problem.
        message: String,
    },

    /// Rolling back after a failure did not succeed.
    #[error("rollback failed: {reason}")]
    RollbackFailed {
        /// The reason rollback failed.
        reason: String,
    },

    /// The run state machine was driven through an illegal transition.
    #[error("run state corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },
}

fn target(table: &str, column: &Option<String>) -> String {
    match column {
        Some(column) => format!("{}.{}", table, column),
        None => table.to_string(),
    }
}

impl MigrationError {
    /// Classify a database error raised while working on `step_id`.
    pub fn from_database(step_id: &str, err: Error) -> Self {
        if err.is_connection() {
            MigrationError::Connection {
                message: err.to_string(),
            }
        } else {
            MigrationError::ExecutionError {
                step_id: step_id.to_string(),
                cause: err.to_string(),
            }
        }
    }

    /// Create an invalid plan error.
    pub fn invalid_plan(message: impl Into<String>) -> Self {
        MigrationError::InvalidPlan {
            message: message.into(),
        }
    }

    /// The step this error is attributed to, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            MigrationError::PreconditionFailed { step_id, .. }
            | MigrationError::ExecutionError { step_id, .. }
            | MigrationError::VerificationMismatch { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}
