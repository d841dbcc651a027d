//! Post-commit verification.

use serde::Serialize;
use tracing::warn;

use super::error::MigrationError;
use super::plan::MigrationPlan;
use super::postcondition::CheckOutcome;
use crate::database::Database;

/// Result of checking one step's postcondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationEntry {
    /// Step the postcondition belongs to.
    pub step_id: String,
    /// The postcondition, rendered.
    pub postcondition: String,
    /// What the check found.
    pub outcome: CheckOutcome,
}

/// Per-step verification results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// One entry per step that declares a postcondition, in plan order.
    pub entries: Vec<VerificationEntry>,
}

impl VerificationReport {
    /// Check if every postcondition held.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_passed())
    }

    /// Number of postconditions checked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was verified.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failed postconditions as errors.
    pub fn mismatches(&self) -> Vec<MigrationError> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.outcome {
                CheckOutcome::Passed => None,
                CheckOutcome::Mismatch { expected, observed } => {
                    Some(MigrationError::VerificationMismatch {
                        step_id: entry.step_id.clone(),
                        expected: expected.clone(),
                        observed: observed.clone(),
                    })
                }
            })
            .collect()
    }
}

/// Re-checks postconditions after commit.
pub struct Verifier;

impl Verifier {
    /// Check every postcondition in `plan` against the committed state.
    ///
    /// A database error while checking a step is recorded as a mismatch
    /// for that step; verification never aborts.
    pub fn check(plan: &MigrationPlan, db: &mut dyn Database) -> VerificationReport {
        let mut report = VerificationReport::default();

        for step in plan.steps() {
            let Some(postcondition) = &step.postcondition else {
                continue;
            };

            let outcome = match postcondition.evaluate(db) {
                Ok(outcome) => outcome,
                Err(e) => CheckOutcome::Mismatch {
                    expected: postcondition.to_string(),
                    observed: format!("check failed: {}", e),
                },
            };

            if let CheckOutcome::Mismatch { expected, observed } = &outcome {
                warn!(
                    plan = plan.name(),
                    step = %step.id,
                    expected = %expected,
                    observed = %observed,
                    "postcondition mismatch"
                );
            }

            report.entries.push(VerificationEntry {
                step_id: step.id.clone(),
                postcondition: postcondition.to_string(),
                outcome,
            });
        }

        report
    }
}
