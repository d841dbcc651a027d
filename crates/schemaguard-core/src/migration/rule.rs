//! Declarative validation rules.

use serde::{Deserialize, Serialize};

/// A check against existing data or structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// No existing value of `column` is longer than `limit` characters.
    MaxLength {
        /// Table to scan.
        table: String,
        /// Column to measure.
        column: String,
        /// Maximum allowed textual length.
        limit: u32,
    },
    /// Every non-null child value has a matching parent row.
    NoOrphans {
        /// Referencing table.
        child_table: String,
        /// Referencing column.
        child_column: String,
        /// Referenced table.
        parent_table: String,
        /// Referenced column.
        parent_column: String,
    },
    /// The table exists.
    TableExists {
        /// Table name.
        table: String,
    },
    /// The column exists on the table.
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
}

impl ValidationRule {
    /// Create a max length rule.
    pub fn max_length(table: impl Into<String>, column: impl Into<String>, limit: u32) -> Self {
        ValidationRule::MaxLength {
            table: table.into(),
            column: column.into(),
            limit,
        }
    }

    /// Create a no orphans rule.
    pub fn no_orphans(
        child_table: impl Into<String>,
        child_column: impl Into<String>,
        parent_table: impl Into<String>,
        parent_column: impl Into<String>,
    ) -> Self {
        ValidationRule::NoOrphans {
            child_table: child_table.into(),
            child_column: child_column.into(),
            parent_table: parent_table.into(),
            parent_column: parent_column.into(),
        }
    }

    /// Create a table exists rule.
    pub fn table_exists(table: impl Into<String>) -> Self {
        ValidationRule::TableExists {
            table: table.into(),
        }
    }

    /// Create a column exists rule.
    pub fn column_exists(table: impl Into<String>, column: impl Into<String>) -> Self {
        ValidationRule::ColumnExists {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Kind of this rule.
    pub fn kind(&self) -> RuleKind {
        match self {
            ValidationRule::MaxLength { .. } => RuleKind::MaxLength,
            ValidationRule::NoOrphans { .. } => RuleKind::NoOrphans,
            ValidationRule::TableExists { .. } => RuleKind::TableExists,
            ValidationRule::ColumnExists { .. } => RuleKind::ColumnExists,
        }
    }

    /// Table the rule inspects (the child table for orphan checks).
    pub fn table(&self) -> &str {
        match self {
            ValidationRule::MaxLength { table, .. }
            | ValidationRule::TableExists { table }
            | ValidationRule::ColumnExists { table, .. } => table,
            ValidationRule::NoOrphans { child_table, .. } => child_table,
        }
    }

    /// Column the rule inspects, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            ValidationRule::MaxLength { column, .. }
            | ValidationRule::ColumnExists { column, .. } => Some(column),
            ValidationRule::NoOrphans { child_column, .. } => Some(child_column),
            ValidationRule::TableExists { .. } => None,
        }
    }
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationRule::MaxLength {
                table,
                column,
                limit,
            } => write!(f, "max_length({}.{} <= {})", table, column, limit),
            ValidationRule::NoOrphans {
                child_table,
                child_column,
                parent_table,
                parent_column,
            } => write!(
                f,
                "no_orphans({}.{} -> {}.{})",
                child_table, child_column, parent_table, parent_column
            ),
            ValidationRule::TableExists { table } => write!(f, "table_exists({})", table),
            ValidationRule::ColumnExists { table, column } => {
                write!(f, "column_exists({}.{})", table, column)
            }
        }
    }
}

/// Kind of a validation rule, without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// [`ValidationRule::MaxLength`].
    MaxLength,
    /// [`ValidationRule::NoOrphans`].
    NoOrphans,
    /// [`ValidationRule::TableExists`].
    TableExists,
    /// [`ValidationRule::ColumnExists`].
    ColumnExists,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::MaxLength => write!(f, "max_length"),
            RuleKind::NoOrphans => write!(f, "no_orphans"),
            RuleKind::TableExists => write!(f, "table_exists"),
            RuleKind::ColumnExists => write!(f, "column_exists"),
        }
    }
}

/// Why a rule failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Which rule failed.
    pub rule_kind: RuleKind,
    /// Table the rule inspected.
    pub table: String,
    /// Column the rule inspected, if any.
    pub column: Option<String>,
    /// Human-readable reason.
    pub reason: String,
    /// Number of offending rows (0 for structural rules).
    pub offending_count: u64,
    /// One bounded sample: the longest length or one orphaned value.
    pub sample: Option<String>,
}

/// Result of evaluating a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// The rule holds.
    Pass,
    /// The rule does not hold.
    Fail(Violation),
}

impl ValidationOutcome {
    /// Check if the rule passed.
    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationOutcome::Pass)
    }

    /// The violation, if the rule failed.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            ValidationOutcome::Pass => None,
            ValidationOutcome::Fail(violation) => Some(violation),
        }
    }
}
