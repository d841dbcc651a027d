//! Migration engine.
//!
//! This module provides validated schema evolution with:
//! - Declarative pre-flight rules checked against live data
//! - Existence guards that make re-runs a no-op
//! - One transaction per run, rolled back on the first failure
//! - Post-commit verification of the expected end state
//!
//! # Step kinds
//!
//! | Kind | Existence guard | Needs a precondition |
//! |------|-----------------|----------------------|
//! | `create_table` | table exists | no |
//! | `add_column` | column exists | no |
//! | `create_index` | index `target.object` exists | no |
//! | `alter_column_type` | postcondition already holds | yes |
//! | `add_constraint` | postcondition already holds | yes |
//! | `raw_sql` | none | no |
//!
//! # Example
//!
//! ```ignore
//! use schemaguard_core::migration::{MigrationPlan, MigrationRunner, MigrationStep, ValidationRule};
//!
//! let plan = MigrationPlan::builder("job_analysis_fk")
//!     .step(
//!         MigrationStep::alter_column_type("widen", "job_analysis", "user_id", sql)
//!             .with_precondition(ValidationRule::max_length("job_analysis", "user_id", 255)),
//!     )
//!     .build()?;
//!
//! let result = MigrationRunner::default().run(&plan, &mut db);
//! println!("{}", result);
//! ```

pub mod error;
pub mod executor;
pub mod plan;
pub mod postcondition;
pub mod rule;
pub mod runner;
pub mod state;
pub mod validator;
pub mod verifier;

// Error types
pub use error::MigrationError;

// Plan types
pub use plan::{MigrationPlan, MigrationPlanBuilder, MigrationStep, StepKind, StepTarget};

// Rules and checks
pub use postcondition::{CheckOutcome, Postcondition};
pub use rule::{RuleKind, ValidationOutcome, ValidationRule, Violation};
pub use validator::Validator;
pub use verifier::{VerificationEntry, VerificationReport, Verifier};

// Execution
pub use executor::{StepExecutor, StepOutcome};
pub use runner::{MigrationResult, MigrationRunner, RunStatus, RunnerConfig};

// State types
pub use state::{PhaseChange, RunPhase, RunState, StepProgress, StepStatus};
