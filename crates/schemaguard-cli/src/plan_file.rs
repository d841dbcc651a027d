//! JSON plan files.
//!
//! ```json
//! {
//!   "name": "job_analysis_fk",
//!   "version": "2024.06.1",
//!   "steps": [
//!     {
//!       "id": "widen_user_id",
//!       "kind": "alter_column_type",
//!       "target": {"table": "job_analysis", "column": "user_id"},
//!       "statement_file": "sql/001_widen_user_id.sql",
//!       "precondition": {"rule": "max_length", "table": "job_analysis", "column": "user_id", "limit": 255},
//!       "postcondition": {"check": "column_type", "table": "job_analysis", "column": "user_id", "type": "VARCHAR(255)"}
//!     }
//!   ]
//! }
//! ```
//!
//! `statement_file` paths are relative to the plan file.

use std::path::{Path, PathBuf};

use schemaguard_core::{MigrationPlan, MigrationStep, Postcondition, StepKind, StepTarget, ValidationRule};
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    name: String,
    #[serde(default)]
    version: String,
    steps: Vec<StepEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepEntry {
    id: String,
    kind: StepKind,
    #[serde(default)]
    target: StepTarget,
    statement: Option<String>,
    statement_file: Option<PathBuf>,
    precondition: Option<ValidationRule>,
    postcondition: Option<Postcondition>,
}

impl StepEntry {
    fn into_step(self, base: &Path) -> Result<MigrationStep, Error> {
        let statement = match (self.statement, self.statement_file) {
            (Some(sql), None) => sql,
            (None, Some(file)) => {
                let path = base.join(file);
                std::fs::read_to_string(&path).map_err(|source| Error::StatementFile {
                    step_id: self.id.clone(),
                    path,
                    source,
                })?
            }
            (Some(_), Some(_)) => {
                return Err(Error::StepDefinition {
                    step_id: self.id,
                    message: "give either statement or statement_file, not both".into(),
                })
            }
            (None, None) => {
                return Err(Error::StepDefinition {
                    step_id: self.id,
                    message: "missing statement or statement_file".into(),
                })
            }
        };

        let mut step = MigrationStep::new(self.id, self.kind, self.target, statement);
        step.precondition = self.precondition;
        step.postcondition = self.postcondition;
        Ok(step)
    }
}

/// Load and validate a plan file.
pub fn load(path: &Path) -> Result<MigrationPlan, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::PlanRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, path)
}

/// Parse plan JSON; `origin` anchors relative statement files.
pub fn parse(text: &str, origin: &Path) -> Result<MigrationPlan, Error> {
    let file: PlanFile = serde_json::from_str(text).map_err(|source| Error::PlanParse {
        path: origin.to_path_buf(),
        source,
    })?;

    let base = origin.parent().unwrap_or_else(|| Path::new("."));
    let steps = file
        .steps
        .into_iter()
        .map(|entry| entry.into_step(base))
        .collect::<Result<Vec<_>, _>>()?;

    let plan = MigrationPlan::new(file.name, file.version, steps)?;
    debug!(
        plan = plan.name(),
        version = plan.version(),
        steps = plan.step_count(),
        "Loaded plan file"
    );
    Ok(plan)
}
