//! Migration runner - sequences a plan inside one transaction.
//!
//! A run walks `Idle -> Validating -> Applying -> ... -> Committing ->
//! Verifying -> Succeeded`. The first failing precondition or statement
//! rolls back the whole transaction and ends the run as `Aborted`, so the
//! schema is left exactly as it was. Verification happens after commit and
//! never rolls anything back.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::error::MigrationError;
use super::executor::{StepExecutor, StepOutcome};
use super::plan::MigrationPlan;
use super::state::{PhaseChange, RunPhase, RunState, StepProgress, StepStatus};
use super::verifier::{VerificationReport, Verifier};
use crate::database::{Database, MigrationTransaction};

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Refuse plans whose narrowing or constraint-adding steps have no precondition.
    pub require_preconditions: bool,
    /// Check postconditions after commit.
    pub verify: bool,
    /// Roll back instead of committing.
    pub dry_run: bool,
}

impl RunnerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self {
            require_preconditions: true,
            verify: true,
            dry_run: false,
        }
    }

    /// Set whether unvalidated risky steps are refused.
    pub fn with_require_preconditions(mut self, require: bool) -> Self {
        self.require_preconditions = require;
        self
    }

    /// Allow risky steps without a precondition.
    pub fn without_required_preconditions(self) -> Self {
        self.with_require_preconditions(false)
    }

    /// Skip post-commit verification.
    pub fn without_verification(mut self) -> Self {
        self.verify = false;
        self
    }

    /// Rehearse the plan and roll back.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Committed and every postcondition held.
    Success,
    /// Rolled back after a failure.
    Aborted,
    /// Committed, but some postconditions did not hold.
    PartiallyVerified,
    /// Dry run completed and rolled back.
    Rehearsed,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::PartiallyVerified | RunStatus::Rehearsed => 0,
            RunStatus::Aborted => 1,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::PartiallyVerified => write!(f, "partially verified"),
            RunStatus::Rehearsed => write!(f, "rehearsed"),
        }
    }
}

/// Report of one run. Produced exactly once per [`MigrationRunner::run`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Plan name.
    pub plan: String,
    /// Plan version label.
    pub version: String,
    /// Final status.
    pub status: RunStatus,
    /// Steps whose statement ran and was committed, in order.
    pub applied_steps: Vec<String>,
    /// Steps whose statement ran during a dry run.
    pub rehearsed_steps: Vec<String>,
    /// Steps the existence guard found already applied.
    pub skipped_steps: Vec<String>,
    /// Why the run aborted.
    pub failure_reason: Option<String>,
    /// The error that aborted the run.
    pub failure: Option<MigrationError>,
    /// Step that caused the abort, if a step did.
    pub failed_step: Option<String>,
    /// Error raised while rolling back, if any.
    pub rollback_error: Option<String>,
    /// Postcondition results; `None` when verification did not run.
    pub verification_report: Option<VerificationReport>,
    /// Per-step progress in plan order.
    pub steps: Vec<StepProgress>,
    /// Phases entered, in order.
    pub phases: Vec<PhaseChange>,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl MigrationResult {
    /// Check if the run committed (or rehearsed) without failing.
    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Aborted
    }

    /// Process exit code.
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    /// Postconditions that did not hold.
    pub fn mismatches(&self) -> Vec<MigrationError> {
        self.verification_report
            .as_ref()
            .map(|r| r.mismatches())
            .unwrap_or_default()
    }

    /// Phases entered, without timestamps.
    pub fn phase_sequence(&self) -> Vec<RunPhase> {
        self.phases.iter().map(|c| c.phase).collect()
    }
}

impl std::fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "migration {} ({}): {}", self.plan, self.version, self.status)?;

        let list = |ids: &[String]| {
            if ids.is_empty() {
                "(none)".to_string()
            } else {
                ids.join(", ")
            }
        };

        if self.status == RunStatus::Rehearsed {
            writeln!(f, "  rehearsed: {}", list(&self.rehearsed_steps))?;
        } else {
            writeln!(f, "  applied: {}", list(&self.applied_steps))?;
        }
        if !self.skipped_steps.is_empty() {
            writeln!(f, "  skipped: {}", list(&self.skipped_steps))?;
        }
        if let Some(step) = &self.failed_step {
            writeln!(f, "  failed step: {}", step)?;
        }
        if let Some(reason) = &self.failure_reason {
            writeln!(f, "  reason: {}", reason)?;
        }
        if let Some(rollback) = &self.rollback_error {
            writeln!(f, "  rollback error: {}", rollback)?;
        }
        for mismatch in self.mismatches() {
            writeln!(f, "  {}", mismatch)?;
        }
        write!(f, "  elapsed: {} ms", self.elapsed_ms)
    }
}

/// An aborted run: the error plus whatever went wrong rolling back.
struct Failure {
    error: MigrationError,
    rollback_error: Option<String>,
}

impl From<MigrationError> for Failure {
    fn from(error: MigrationError) -> Self {
        Self {
            error,
            rollback_error: None,
        }
    }
}

/// Steps touched so far.
#[derive(Default)]
struct Tally {
    executed: Vec<String>,
    skipped: Vec<String>,
    committed: bool,
}

/// Runs migration plans.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunner {
    config: RunnerConfig,
}

impl MigrationRunner {
    /// Create a runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `plan` against `db`.
    ///
    /// Always returns a result; failures are reported in it rather than
    /// as an `Err`. `db` must not have a transaction open.
    #[instrument(skip_all, fields(plan = %plan.name(), version = %plan.version()))]
    pub fn run(&self, plan: &MigrationPlan, db: &mut dyn Database) -> MigrationResult {
        let started = Instant::now();
        let mut state = RunState::new(plan.steps().iter().map(|s| s.id.as_str()));
        let mut tally = Tally::default();

        info!(
            steps = plan.step_count(),
            dry_run = self.config.dry_run,
            "starting migration run"
        );

        let outcome = self.drive(plan, db, &mut state, &mut tally);
        self.finish(plan, state, tally, outcome, started)
    }

    fn drive(
        &self,
        plan: &MigrationPlan,
        db: &mut dyn Database,
        state: &mut RunState,
        tally: &mut Tally,
    ) -> Result<Option<VerificationReport>, Failure> {
        if self.config.require_preconditions {
            let unguarded = plan.unguarded_risky_steps();
            if !unguarded.is_empty() {
                let ids: Vec<&str> = unguarded.iter().map(|s| s.id.as_str()).collect();
                return Err(MigrationError::invalid_plan(format!(
                    "steps change column types or add constraints without a precondition: {}",
                    ids.join(", ")
                ))
                .into());
            }
        }

        let mut tx = MigrationTransaction::begin(db).map_err(|e| MigrationError::Connection {
            message: format!("failed to open transaction: {}", e),
        })?;
        state.transition(RunPhase::Validating)?;

        if let Err(error) = Self::apply_steps(plan, &mut tx, state, tally) {
            let rollback_error = tx.rollback().err().map(|e| e.to_string());
            return Err(Failure {
                error,
                rollback_error,
            });
        }

        if self.config.dry_run {
            tx.rollback().map_err(|e| MigrationError::RollbackFailed {
                reason: e.to_string(),
            })?;
            state.transition(RunPhase::RolledBack)?;
            info!(rehearsed = tally.executed.len(), "dry run rolled back");
            return Ok(None);
        }

        state.transition(RunPhase::Committing)?;
        tx.commit()
            .map_err(|e| MigrationError::from_database("commit", e))?;
        tally.committed = true;
        info!(applied = tally.executed.len(), skipped = tally.skipped.len(), "migration committed");

        if !self.config.verify {
            state.transition(RunPhase::Succeeded)?;
            return Ok(None);
        }

        state.transition(RunPhase::Verifying)?;
        let report = Verifier::check(plan, db);
        state.transition(RunPhase::Succeeded)?;
        Ok(Some(report))
    }

    fn apply_steps(
        plan: &MigrationPlan,
        tx: &mut MigrationTransaction<'_>,
        state: &mut RunState,
        tally: &mut Tally,
    ) -> Result<(), MigrationError> {
        for (idx, step) in plan.steps().iter().enumerate() {
            if idx > 0 {
                state.transition(RunPhase::Validating)?;
            }
            if let Some(progress) = state.step_mut(&step.id) {
                progress.start();
            }
            debug!(step = %step.id, kind = %step.kind, "starting step");

            let result = StepExecutor::check_precondition(step, tx).and_then(|()| {
                state.transition(RunPhase::Applying)?;
                StepExecutor::execute(step, tx)
            });

            match result {
                Ok(StepOutcome::Applied) => {
                    if let Some(progress) = state.step_mut(&step.id) {
                        progress.apply();
                    }
                    tally.executed.push(step.id.clone());
                }
                Ok(StepOutcome::AlreadyApplied { reason }) => {
                    if let Some(progress) = state.step_mut(&step.id) {
                        progress.skip(reason);
                    }
                    tally.skipped.push(step.id.clone());
                }
                Err(e) => {
                    if let Some(progress) = state.step_mut(&step.id) {
                        progress.fail(e.to_string());
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn finish(
        &self,
        plan: &MigrationPlan,
        mut state: RunState,
        tally: Tally,
        outcome: Result<Option<VerificationReport>, Failure>,
        started: Instant,
    ) -> MigrationResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (status, verification_report, failure, rollback_error) = match outcome {
            Ok(report) => {
                let status = if self.config.dry_run {
                    RunStatus::Rehearsed
                } else if report.as_ref().map(|r| r.is_clean()).unwrap_or(true) {
                    RunStatus::Success
                } else {
                    RunStatus::PartiallyVerified
                };
                (status, report, None, None)
            }
            Err(Failure {
                error,
                rollback_error,
            }) => {
                state.abort();
                (RunStatus::Aborted, None, Some(error), rollback_error)
            }
        };

        let failed_step = state
            .steps()
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| s.step_id.clone());

        match (&failure, status) {
            (Some(error), _) => {
                error!(
                    step = failed_step.as_deref().unwrap_or("-"),
                    error = %error,
                    elapsed_ms,
                    "migration aborted"
                );
                if let Some(rollback) = &rollback_error {
                    warn!(error = %rollback, "rollback after failure did not complete");
                }
            }
            (None, RunStatus::PartiallyVerified) => {
                warn!(elapsed_ms, "migration committed with verification mismatches")
            }
            (None, _) => info!(status = %status, elapsed_ms, "migration finished"),
        }

        let (applied_steps, rehearsed_steps) = if tally.committed {
            (tally.executed, Vec::new())
        } else if status == RunStatus::Rehearsed {
            (Vec::new(), tally.executed)
        } else {
            (Vec::new(), Vec::new())
        };

        let (phases, steps) = state.into_parts();

        MigrationResult {
            plan: plan.name().to_string(),
            version: plan.version().to_string(),
            status,
            applied_steps,
            rehearsed_steps,
            skipped_steps: tally.skipped,
            failure_reason: failure.as_ref().map(|e| e.to_string()),
            failure,
            failed_step,
            rollback_error,
            verification_report,
            steps,
            phases,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;
    use crate::migration::plan::MigrationStep;
    use crate::migration::postcondition::Postcondition;
    use crate::migration::rule::ValidationRule;

    fn plan(steps: Vec<MigrationStep>) -> MigrationPlan {
        MigrationPlan::new("test", "1", steps).unwrap()
    }

    #[test]
    fn test_config_builders() {
        let config = RunnerConfig::default();
        assert!(config.require_preconditions && config.verify && !config.dry_run);

        let config = RunnerConfig::new()
            .without_required_preconditions()
            .without_verification()
            .with_dry_run(true);
        assert!(!config.require_preconditions && !config.verify && config.dry_run);
    }

    #[test]
    fn test_success_path_phases() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let plan = plan(vec![
            MigrationStep::create_table("t1", "a", "CREATE TABLE a (id INTEGER)")
                .with_postcondition(Postcondition::table_exists("a")),
            MigrationStep::create_table("t2", "b", "CREATE TABLE b (id INTEGER)"),
        ]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.applied_steps, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(
            result.phase_sequence(),
            vec![
                RunPhase::Idle,
                RunPhase::Validating,
                RunPhase::Applying,
                RunPhase::Validating,
                RunPhase::Applying,
                RunPhase::Committing,
                RunPhase::Verifying,
                RunPhase::Succeeded,
            ]
        );
        assert_eq!(result.verification_report.as_ref().map(|r| r.len()), Some(1));
        assert!(result.steps.iter().all(|s| s.status == StepStatus::Applied));
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn test_unvalidated_risky_step_rejected() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE a (id INTEGER, v TEXT)").unwrap();
        let plan = plan(vec![MigrationStep::alter_column_type(
            "retype",
            "a",
            "v",
            "CREATE TABLE marker (id INTEGER)",
        )]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Aborted);
        assert!(matches!(result.failure, Some(MigrationError::InvalidPlan { .. })));
        assert_eq!(result.phase_sequence(), vec![RunPhase::Idle, RunPhase::Aborted]);
        assert!(!db.table_exists("marker").unwrap());

        let runner = MigrationRunner::new(RunnerConfig::new().without_required_preconditions());
        let result = runner.run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Success);
        assert!(db.table_exists("marker").unwrap());
    }

    #[test]
    fn test_failure_reports_step_and_rolls_back() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let plan = plan(vec![
            MigrationStep::create_table("t1", "a", "CREATE TABLE a (id INTEGER)"),
            MigrationStep::raw_sql("boom", "INSERT INTO missing VALUES (1)"),
            MigrationStep::create_table("t3", "c", "CREATE TABLE c (id INTEGER)"),
        ]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Aborted);
        assert_eq!(result.failed_step.as_deref(), Some("boom"));
        assert!(result.applied_steps.is_empty());
        assert!(result.rollback_error.is_none());
        assert_eq!(result.steps[1].status, StepStatus::Failed);
        assert_eq!(result.steps[2].status, StepStatus::Pending);
        assert!(!db.table_exists("a").unwrap());
        assert_eq!(result.exit_code(), 1);
        assert!(result.to_string().contains("failed step: boom"));
    }

    #[test]
    fn test_dry_run_rolls_back() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let plan = plan(vec![MigrationStep::create_table(
            "t1",
            "a",
            "CREATE TABLE a (id INTEGER)",
        )
        .with_postcondition(Postcondition::table_exists("a"))]);

        let runner = MigrationRunner::new(RunnerConfig::new().with_dry_run(true));
        let result = runner.run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Rehearsed);
        assert!(result.applied_steps.is_empty());
        assert_eq!(result.rehearsed_steps, vec!["t1".to_string()]);
        assert!(result.verification_report.is_none());
        assert_eq!(result.phase_sequence().last(), Some(&RunPhase::RolledBack));
        assert!(!db.table_exists("a").unwrap());
    }

    #[test]
    fn test_verification_mismatch_is_partial() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        let plan = plan(vec![MigrationStep::create_table(
            "t1",
            "a",
            "CREATE TABLE a (id INTEGER)",
        )
        .with_postcondition(Postcondition::column_exists("a", "name"))]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::PartiallyVerified);
        assert!(result.is_success());
        assert_eq!(result.applied_steps, vec!["t1".to_string()]);
        assert_eq!(result.mismatches().len(), 1);
        assert!(db.table_exists("a").unwrap());

        let runner = MigrationRunner::new(RunnerConfig::new().without_verification());
        let mut fresh = SqliteDatabase::open_in_memory().unwrap();
        let result = runner.run(&plan, &mut fresh);
        assert_eq!(result.status, RunStatus::Success);
        assert!(result.verification_report.is_none());
    }

    #[test]
    fn test_open_transaction_is_connection_error() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.begin().unwrap();
        let plan = plan(vec![MigrationStep::raw_sql("noop", "SELECT 1")]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        assert_eq!(result.status, RunStatus::Aborted);
        assert!(matches!(result.failure, Some(MigrationError::Connection { .. })));
    }

    #[test]
    fn test_precondition_failure_result_serializes() {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE a (id INTEGER, v TEXT); INSERT INTO a VALUES (1, 'abcdef');")
            .unwrap();
        let plan = plan(vec![MigrationStep::alter_column_type("shrink", "a", "v", "SELECT 1")
            .with_precondition(ValidationRule::max_length("a", "v", 3))]);

        let result = MigrationRunner::default().run(&plan, &mut db);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "aborted");
        assert_eq!(json["failure"]["kind"], "precondition_failed");
        assert_eq!(json["failure"]["offending_count"], 1);
        assert_eq!(json["failed_step"], "shrink");
    }
}
