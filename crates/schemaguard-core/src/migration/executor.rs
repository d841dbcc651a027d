//! Step executor - applies one step inside the run's transaction.
//!
//! The executor checks the step's precondition, consults the existence
//! guard and runs the statement. It never commits or rolls back: the
//! transaction belongs to the runner.

use serde::Serialize;
use tracing::debug;

use super::error::MigrationError;
use super::plan::{MigrationStep, StepKind};
use super::postcondition::CheckOutcome;
use super::rule::ValidationOutcome;
use super::validator::Validator;
use crate::database::MigrationTransaction;
use crate::error::Error;

/// What happened to a step that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The statement ran.
    Applied,
    /// The existence guard found the change already in place.
    AlreadyApplied {
        /// What the guard found.
        reason: String,
    },
}

/// Applies migration steps.
pub struct StepExecutor;

impl StepExecutor {
    /// Check the step's precondition, if it has one.
    pub fn check_precondition(
        step: &MigrationStep,
        tx: &mut MigrationTransaction<'_>,
    ) -> Result<(), MigrationError> {
        let Some(rule) = &step.precondition else {
            return Ok(());
        };

        match Validator::evaluate(rule, tx.db())
            .map_err(|e| MigrationError::from_database(&step.id, e))?
        {
            ValidationOutcome::Pass => Ok(()),
            ValidationOutcome::Fail(violation) => Err(MigrationError::PreconditionFailed {
                step_id: step.id.clone(),
                rule_kind: violation.rule_kind,
                table: violation.table,
                column: violation.column,
                offending_count: violation.offending_count,
                detail: violation.reason,
            }),
        }
    }

    /// Run the step's statement unless the existence guard says it is
    /// already applied. Does not check the precondition.
    pub fn execute(
        step: &MigrationStep,
        tx: &mut MigrationTransaction<'_>,
    ) -> Result<StepOutcome, MigrationError> {
        if let Some(reason) = Self::already_applied(step, tx)? {
            debug!(step = %step.id, reason = %reason, "step already applied");
            return Ok(StepOutcome::AlreadyApplied { reason });
        }

        tx.db()
            .execute_batch(&step.statement)
            .map_err(|e| MigrationError::from_database(&step.id, e))?;

        debug!(step = %step.id, kind = %step.kind, target = %step.target, "step applied");
        Ok(StepOutcome::Applied)
    }

    /// Check the precondition, then execute.
    ///
    /// The precondition runs before the guard so a re-run still reports
    /// data problems.
    pub fn apply(
        step: &MigrationStep,
        tx: &mut MigrationTransaction<'_>,
    ) -> Result<StepOutcome, MigrationError> {
        Self::check_precondition(step, tx)?;
        Self::execute(step, tx)
    }

    fn already_applied(
        step: &MigrationStep,
        tx: &mut MigrationTransaction<'_>,
    ) -> Result<Option<String>, MigrationError> {
        let db_err = |e: Error| MigrationError::from_database(&step.id, e);
        let target = &step.target;

        match step.kind {
            StepKind::CreateTable => {
                if tx.db().table_exists(&target.table).map_err(db_err)? {
                    return Ok(Some(format!("table {} exists", target.table)));
                }
            }
            StepKind::AddColumn => {
                let column = target.column.as_deref().unwrap_or_default();
                if tx.db().column_exists(&target.table, column).map_err(db_err)? {
                    return Ok(Some(format!("column {}.{} exists", target.table, column)));
                }
            }
            StepKind::CreateIndex => {
                let index = target.object.as_deref().unwrap_or_default();
                let exists = tx
                    .db()
                    .indexes(&target.table)
                    .map_err(db_err)?
                    .iter()
                    .any(|i| i.name.eq_ignore_ascii_case(index));
                if exists {
                    return Ok(Some(format!("index {} exists", index)));
                }
            }
            StepKind::AlterColumnType | StepKind::AddConstraint => {
                if let Some(postcondition) = &step.postcondition {
                    let outcome = postcondition.evaluate(tx.db()).map_err(db_err)?;
                    if outcome == CheckOutcome::Passed {
                        return Ok(Some(format!("{} already holds", postcondition)));
                    }
                }
            }
            StepKind::RawSql => {}
        }

        Ok(None)
    }
}
