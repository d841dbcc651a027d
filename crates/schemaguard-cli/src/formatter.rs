//! Output formatters for run reports and table inspections.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use schemaguard_core::{CheckOutcome, MigrationResult, RunStatus, StepStatus};

use crate::commands::TableInspection;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the report of a migration run.
    fn format_result(&self, result: &MigrationResult) -> String;

    /// Format catalog information for some tables.
    fn format_inspection(&self, tables: &[TableInspection]) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_result(&self, result: &MigrationResult) -> String {
        let mut output = format!(
            "Migration {} ({}): {}\n",
            result.plan,
            display_version(&result.version),
            result.status
        );

        if !result.steps.is_empty() {
            let mut table = Table::new();
            table.set_header(vec!["Step", "Status", "Time (ms)", "Detail"]);
            for progress in &result.steps {
                let status = match (progress.status, result.status) {
                    (StepStatus::Applied, RunStatus::Rehearsed) => {
                        "rehearsed".to_string()
                    }
                    (StepStatus::Applied, RunStatus::Aborted) => {
                        "rolled back".to_string()
                    }
                    (status, _) => status.to_string(),
                };
                table.add_row(vec![
                    Cell::new(&progress.step_id),
                    Cell::new(status),
                    Cell::new(
                        progress
                            .duration_micros()
                            .map(|us| format!("{:.1}", us as f64 / 1000.0))
                            .unwrap_or_default(),
                    ),
                    Cell::new(progress.message.as_deref().unwrap_or("")),
                ]);
            }
            output.push_str(&table.to_string());
            output.push('\n');
        }

        if let Some(report) = &result.verification_report {
            if !report.is_empty() {
                let mut table = Table::new();
                table.set_header(vec!["Step", "Postcondition", "Result"]);
                for entry in &report.entries {
                    let verdict = match &entry.outcome {
                        CheckOutcome::Passed => "ok".to_string(),
                        CheckOutcome::Mismatch { observed, .. } => {
                            format!("MISMATCH: {}", observed)
                        }
                    };
                    table.add_row(vec![
                        Cell::new(&entry.step_id),
                        Cell::new(&entry.postcondition),
                        Cell::new(verdict),
                    ]);
                }
                output.push_str(&table.to_string());
                output.push('\n');
            }
        }

        if let Some(step) = &result.failed_step {
            output.push_str(&format!("Failed step: {}\n", step));
        }
        if let Some(reason) = &result.failure_reason {
            output.push_str(&format!("Reason: {}\n", reason));
        }
        if let Some(rollback) = &result.rollback_error {
            output.push_str(&format!("Rollback error: {}\n", rollback));
        }
        output.push_str(&format!("Elapsed: {} ms", result.elapsed_ms));
        output
    }

    fn format_inspection(&self, tables: &[TableInspection]) -> String {
        let mut sections = Vec::new();

        for inspection in tables {
            if !inspection.exists {
                sections.push(format!("Table {}: does not exist", inspection.table));
                continue;
            }

            let mut section = format!("Table {}\n", inspection.table);

            let mut columns = Table::new();
            columns.set_header(vec!["Column", "Type", "Nullable"]);
            for column in &inspection.columns {
                columns.add_row(vec![
                    Cell::new(&column.name),
                    Cell::new(column.display_type()),
                    Cell::new(if column.nullable { "yes" } else { "no" }),
                ]);
            }
            section.push_str(&columns.to_string());

            if !inspection.indexes.is_empty() {
                let mut indexes = Table::new();
                indexes.set_header(vec!["Index", "Unique", "Columns"]);
                for index in &inspection.indexes {
                    indexes.add_row(vec![
                        Cell::new(&index.name),
                        Cell::new(if index.unique { "yes" } else { "no" }),
                        Cell::new(index.columns.join(", ")),
                    ]);
                }
                section.push('\n');
                section.push_str(&indexes.to_string());
            }

            if !inspection.constraints.is_empty() {
                let mut constraints = Table::new();
                constraints.set_header(vec!["Constraint", "Kind", "Definition"]);
                for constraint in &inspection.constraints {
                    constraints.add_row(vec![
                        Cell::new(constraint.name.as_deref().unwrap_or("-")),
                        Cell::new(constraint.kind),
                        Cell::new(constraint.describe()),
                    ]);
                }
                section.push('\n');
                section.push_str(&constraints.to_string());
            }

            sections.push(section);
        }

        sections.join("\n\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_result(&self, result: &MigrationResult) -> String {
        serde_json::to_string_pretty(result).unwrap_or_else(|e| self.format_error(&e.to_string()))
    }

    fn format_inspection(&self, tables: &[TableInspection]) -> String {
        serde_json::to_string_pretty(tables).unwrap_or_else(|e| self.format_error(&e.to_string()))
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({ "error": error }).to_string()
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() {
        "unversioned"
    } else {
        version
    }
}
