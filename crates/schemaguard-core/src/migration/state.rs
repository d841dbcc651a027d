//! Run state tracking.
//!
//! Tracks the phase of a run and the progress of every step for status
//! reporting. Nothing is persisted; a failed run is re-invoked wholesale.

use serde::Serialize;

use super::error::MigrationError;

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Phase of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Nothing has happened yet.
    Idle,
    /// Checking a step's precondition.
    Validating,
    /// Executing a step.
    Applying,
    /// Committing the transaction.
    Committing,
    /// Re-checking postconditions after commit.
    Verifying,
    /// The run committed.
    Succeeded,
    /// The run failed and was rolled back.
    Aborted,
    /// A rehearsal finished and was rolled back on purpose.
    RolledBack,
}

impl RunPhase {
    /// Check if this phase ends the run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Aborted | RunPhase::RolledBack
        )
    }

    /// Check if `next` may follow this phase.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;

        if next == Aborted {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Applying)
                | (Validating, Committing)
                | (Validating, RolledBack)
                | (Applying, Validating)
                | (Applying, Committing)
                | (Applying, RolledBack)
                | (Committing, Verifying)
                | (Committing, Succeeded)
                | (Verifying, Succeeded)
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Validating => write!(f, "validating"),
            RunPhase::Applying => write!(f, "applying"),
            RunPhase::Committing => write!(f, "committing"),
            RunPhase::Verifying => write!(f, "verifying"),
            RunPhase::Succeeded => write!(f, "succeeded"),
            RunPhase::Aborted => write!(f, "aborted"),
            RunPhase::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Status of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step not yet started.
    Pending,
    /// Step in progress.
    InProgress,
    /// Step executed.
    Applied,
    /// Step found already applied.
    Skipped,
    /// Step failed.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::InProgress => write!(f, "in_progress"),
            StepStatus::Applied => write!(f, "applied"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress {
    /// Step id.
    pub step_id: String,
    /// Current status.
    pub status: StepStatus,
    /// When the step started (microseconds since epoch).
    pub started_at: Option<u64>,
    /// When the step finished (microseconds since epoch).
    pub completed_at: Option<u64>,
    /// Why the step was skipped or how it failed.
    pub message: Option<String>,
}

impl StepProgress {
    /// Create a pending entry.
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            message: None,
        }
    }

    /// Mark the step as started.
    pub fn start(&mut self) {
        self.status = StepStatus::InProgress;
        self.started_at = Some(current_timestamp());
    }

    /// Mark the step as applied.
    pub fn apply(&mut self) {
        self.status = StepStatus::Applied;
        self.completed_at = Some(current_timestamp());
    }

    /// Mark the step as skipped.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(current_timestamp());
        self.message = Some(reason.into());
    }

    /// Mark the step as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.message = Some(error.into());
    }

    /// Duration in microseconds, once finished.
    pub fn duration_micros(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

/// A phase entered during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    /// Phase entered.
    pub phase: RunPhase,
    /// When it was entered (microseconds since epoch).
    pub at: u64,
}

/// State of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    phase: RunPhase,
    history: Vec<PhaseChange>,
    steps: Vec<StepProgress>,
    started_at: u64,
}

impl RunState {
    /// Create state for a run over the given step ids.
    pub fn new<'a>(step_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let now = current_timestamp();
        Self {
            phase: RunPhase::Idle,
            history: vec![PhaseChange {
                phase: RunPhase::Idle,
                at: now,
            }],
            steps: step_ids.into_iter().map(StepProgress::new).collect(),
            started_at: now,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every phase entered so far, in order.
    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    /// Phases entered so far, without timestamps.
    pub fn phases(&self) -> Vec<RunPhase> {
        self.history.iter().map(|c| c.phase).collect()
    }

    /// Per-step progress in plan order.
    pub fn steps(&self) -> &[StepProgress] {
        &self.steps
    }

    /// Progress entry for a step.
    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut StepProgress> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    /// When the run started (microseconds since epoch).
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Move to `next`, rejecting transitions outside the run graph.
    pub fn transition(&mut self, next: RunPhase) -> Result<(), MigrationError> {
        if !self.phase.can_transition_to(next) {
            return Err(MigrationError::StateCorrupted {
                message: format!("illegal transition {} -> {}", self.phase, next),
            });
        }
        self.phase = next;
        self.history.push(PhaseChange {
            phase: next,
            at: current_timestamp(),
        });
        Ok(())
    }

    /// Move to [`RunPhase::Aborted`] unless the run already ended.
    pub fn abort(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = RunPhase::Aborted;
            self.history.push(PhaseChange {
                phase: RunPhase::Aborted,
                at: current_timestamp(),
            });
        }
    }

    /// Consume the state, returning its history and step progress.
    pub fn into_parts(self) -> (Vec<PhaseChange>, Vec<StepProgress>) {
        (self.history, self.steps)
    }
}
