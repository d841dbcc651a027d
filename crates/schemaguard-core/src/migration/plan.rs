//! Migration plans.
//!
//! A plan is an ordered list of steps. Order carries the dependencies
//! ("drop old constraint" before "change column type" before "add new
//! constraint"), so it is fixed at construction and never changes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::error::MigrationError;
use super::postcondition::Postcondition;
use super::rule::ValidationRule;

/// Kind of schema change a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// CREATE TABLE.
    CreateTable,
    /// ALTER TABLE ... ADD COLUMN.
    AddColumn,
    /// Change a column's type.
    AlterColumnType,
    /// Add a constraint (foreign key, unique, check).
    AddConstraint,
    /// CREATE INDEX.
    CreateIndex,
    /// Free-form SQL; never guarded.
    RawSql,
}

impl StepKind {
    /// Whether the step can reject or corrupt existing data.
    pub fn is_risky(self) -> bool {
        matches!(self, StepKind::AlterColumnType | StepKind::AddConstraint)
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::CreateTable => write!(f, "create_table"),
            StepKind::AddColumn => write!(f, "add_column"),
            StepKind::AlterColumnType => write!(f, "alter_column_type"),
            StepKind::AddConstraint => write!(f, "add_constraint"),
            StepKind::CreateIndex => write!(f, "create_index"),
            StepKind::RawSql => write!(f, "raw_sql"),
        }
    }
}

/// What a step acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTarget {
    /// Table name (may be schema-qualified).
    #[serde(default)]
    pub table: String,
    /// Column, for column-level steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Index or constraint name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
}

impl StepTarget {
    /// Target a table.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: None,
            object: None,
        }
    }

    /// Target a column.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: Some(column.into()),
            object: None,
        }
    }
}

impl std::fmt::Display for StepTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.table)?;
        if let Some(column) = &self.column {
            write!(f, ".{}", column)?;
        }
        if let Some(object) = &self.object {
            write!(f, " ({})", object)?;
        }
        Ok(())
    }
}

/// A unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStep {
    /// Identifier, unique within the plan.
    pub id: String,
    /// Kind of change.
    pub kind: StepKind,
    /// What the step acts on.
    pub target: StepTarget,
    /// SQL to execute; may hold several `;`-separated statements.
    pub statement: String,
    /// Rule that must pass against existing data before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<ValidationRule>,
    /// Assertion checked after commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcondition: Option<Postcondition>,
}

impl MigrationStep {
    /// Create a step.
    pub fn new(
        id: impl Into<String>,
        kind: StepKind,
        target: StepTarget,
        statement: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            target,
            statement: statement.into(),
            precondition: None,
            postcondition: None,
        }
    }

    /// CREATE TABLE step; skipped when the table exists.
    pub fn create_table(
        id: impl Into<String>,
        table: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self::new(id, StepKind::CreateTable, StepTarget::table(table), statement)
    }

    /// ADD COLUMN step; skipped when the column exists.
    pub fn add_column(
        id: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self::new(id, StepKind::AddColumn, StepTarget::column(table, column), statement)
    }

    /// Column type change.
    pub fn alter_column_type(
        id: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            StepKind::AlterColumnType,
            StepTarget::column(table, column),
            statement,
        )
    }

    /// Constraint addition.
    pub fn add_constraint(
        id: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        let mut target = StepTarget::table(table);
        target.object = Some(name.into());
        Self::new(id, StepKind::AddConstraint, target, statement)
    }

    /// CREATE INDEX step; skipped when an index with this name exists.
    pub fn create_index(
        id: impl Into<String>,
        table: impl Into<String>,
        index: impl Into<String>,
        statement: impl Into<String>,
    ) -> Self {
        let mut target = StepTarget::table(table);
        target.object = Some(index.into());
        Self::new(id, StepKind::CreateIndex, target, statement)
    }

    /// Free-form SQL; always executed.
    pub fn raw_sql(id: impl Into<String>, statement: impl Into<String>) -> Self {
        Self::new(id, StepKind::RawSql, StepTarget::default(), statement)
    }

    /// Set the precondition.
    pub fn with_precondition(mut self, rule: ValidationRule) -> Self {
        self.precondition = Some(rule);
        self
    }

    /// Set the postcondition.
    pub fn with_postcondition(mut self, postcondition: Postcondition) -> Self {
        self.postcondition = Some(postcondition);
        self
    }

    fn validate(&self) -> Result<(), MigrationError> {
        let invalid = |what: &str| {
            MigrationError::invalid_plan(format!("step {} ({}): {}", self.id, self.kind, what))
        };

        if self.statement.trim().is_empty() {
            return Err(invalid("statement is empty"));
        }
        if self.kind != StepKind::RawSql && self.target.table.trim().is_empty() {
            return Err(invalid("target table is required"));
        }

        let has_column = self
            .target
            .column
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        let has_object = self
            .target
            .object
            .as_deref()
            .map(|o| !o.trim().is_empty())
            .unwrap_or(false);

        match self.kind {
            StepKind::AddColumn | StepKind::AlterColumnType if !has_column => {
                Err(invalid("target column is required"))
            }
            StepKind::CreateIndex if !has_object => Err(invalid("target index name is required")),
            _ => Ok(()),
        }
    }
}

/// An ordered, immutable list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    name: String,
    version: String,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Start building a plan.
    pub fn builder(name: impl Into<String>) -> MigrationPlanBuilder {
        MigrationPlanBuilder {
            name: name.into(),
            version: String::new(),
            steps: Vec::new(),
        }
    }

    /// Build a plan from its parts.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        steps: Vec<MigrationStep>,
    ) -> Result<Self, MigrationError> {
        Self::builder(name).version(version).steps(steps).build()
    }

    /// Plan name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version label.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Get the number of steps in the plan.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Check if this plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&MigrationStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Narrowing or constraint-adding steps that declare no precondition.
    pub fn unguarded_risky_steps(&self) -> Vec<&MigrationStep> {
        self.steps
            .iter()
            .filter(|s| s.kind.is_risky() && s.precondition.is_none())
            .collect()
    }
}

/// Builder for [`MigrationPlan`].
#[derive(Debug, Clone)]
pub struct MigrationPlanBuilder {
    name: String,
    version: String,
    steps: Vec<MigrationStep>,
}

impl MigrationPlanBuilder {
    /// Set the version label.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Append a step.
    pub fn step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = MigrationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Validate and build the plan.
    pub fn build(self) -> Result<MigrationPlan, MigrationError> {
        if self.name.trim().is_empty() {
            return Err(MigrationError::invalid_plan("plan name is empty"));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(MigrationError::invalid_plan("step id is empty"));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(MigrationError::invalid_plan(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
            step.validate()?;
        }

        Ok(MigrationPlan {
            name: self.name,
            version: self.version,
            steps: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widen() -> MigrationStep {
        MigrationStep::alter_column_type(
            "widen_user_id",
            "job_analysis",
            "user_id",
            "ALTER TABLE job_analysis ALTER COLUMN user_id TYPE VARCHAR(255)",
        )
        .with_precondition(ValidationRule::max_length("job_analysis", "user_id", 255))
    }

    fn add_fk() -> MigrationStep {
        MigrationStep::add_constraint(
            "fk_user_id",
            "job_analysis",
            "job_analysis_user_id_fkey",
            "ALTER TABLE job_analysis ADD CONSTRAINT job_analysis_user_id_fkey FOREIGN KEY (user_id) REFERENCES users_sync(id)",
        )
    }

    #[test]
    fn test_build_preserves_order() {
        let plan = MigrationPlan::builder("job_analysis_fk")
            .version("2024-01")
            .step(widen())
            .step(add_fk())
            .build()
            .unwrap();

        assert_eq!(plan.name(), "job_analysis_fk");
        assert_eq!(plan.version(), "2024-01");
        let ids: Vec<_> = plan.steps().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["widen_user_id", "fk_user_id"]);
        assert_eq!(plan.step("fk_user_id").map(|s| s.kind), Some(StepKind::AddConstraint));
        assert!(plan.step("nope").is_none());
    }

    #[test]
    fn test_unguarded_risky_steps() {
        let plan = MigrationPlan::new("p", "1", vec![widen(), add_fk()]).unwrap();
        let unguarded: Vec<_> = plan.unguarded_risky_steps().iter().map(|s| s.id.clone()).collect();
        assert_eq!(unguarded, vec!["fk_user_id".to_string()]);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = MigrationPlan::new("p", "1", vec![widen(), widen()]).unwrap_err();
        assert!(err.to_string().contains("duplicate step id: widen_user_id"));
    }

    #[test]
    fn test_rejects_malformed_steps() {
        assert!(MigrationPlan::new("", "1", vec![]).is_err());

        let empty_sql = MigrationStep::create_table("t", "cv_versions", "   ");
        assert!(MigrationPlan::new("p", "1", vec![empty_sql]).is_err());

        let mut no_column = widen();
        no_column.target.column = None;
        assert!(MigrationPlan::new("p", "1", vec![no_column]).is_err());

        let mut no_index = MigrationStep::create_index("i", "resumes", "idx", "CREATE INDEX idx ON resumes(id)");
        no_index.target.object = None;
        assert!(MigrationPlan::new("p", "1", vec![no_index]).is_err());

        let raw = MigrationStep::raw_sql("backfill", "UPDATE resumes SET title = '' WHERE title IS NULL");
        assert!(MigrationPlan::new("p", "1", vec![raw]).is_ok());
    }

    #[test]
    fn test_step_json_shape() {
        let step: MigrationStep = serde_json::from_str(
            r#"{
                "id": "add_source",
                "kind": "add_column",
                "target": {"table": "job_analysis", "column": "source"},
                "statement": "ALTER TABLE job_analysis ADD COLUMN source TEXT"
            }"#,
        )
        .unwrap();
        assert_eq!(step.kind, StepKind::AddColumn);
        assert_eq!(step.target.to_string(), "job_analysis.source");
        assert!(step.precondition.is_none());
    }
}
