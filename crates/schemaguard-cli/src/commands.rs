//! Subcommand implementations.

use std::path::Path;

use schemaguard_core::{ColumnInfo, ConstraintInfo, Database, IndexInfo, MigrationRunner};
use serde::Serialize;
use tracing::info;

use crate::config::{Action, Config};
use crate::error::Error;
use crate::formatter::create_formatter;
use crate::plan_file;

/// Catalog information for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInspection {
    /// Table name as requested.
    pub table: String,
    /// Whether the table exists.
    pub exists: bool,
    /// Columns in declaration order.
    pub columns: Vec<ColumnInfo>,
    /// Indexes.
    pub indexes: Vec<IndexInfo>,
    /// Constraints.
    pub constraints: Vec<ConstraintInfo>,
}

impl TableInspection {
    /// Inspection of a table that does not exist.
    pub fn missing(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            exists: false,
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
        }
    }

    /// Read a table's catalog entries.
    pub fn read(db: &mut dyn Database, table: &str) -> Result<Self, Error> {
        if !db.table_exists(table)? {
            return Ok(Self::missing(table));
        }
        Ok(Self {
            table: table.to_string(),
            exists: true,
            columns: db.columns(table)?,
            indexes: db.indexes(table)?,
            constraints: db.constraints(table)?,
        })
    }
}

/// Run the configured action and return the process exit code.
pub fn run(config: &Config) -> Result<i32, Error> {
    match &config.action {
        Action::Apply(plan) => apply(config, plan),
        Action::Inspect(tables) => inspect(config, tables),
    }
}

/// Load a plan file, run it, and print the report.
///
/// The plan file is validated before any connection is opened.
pub fn apply(config: &Config, plan_path: &Path) -> Result<i32, Error> {
    let plan = plan_file::load(plan_path)?;
    let mut db = schemaguard_core::open(&config.database_url)?;
    info!(backend = %db.backend(), plan = plan.name(), "Connected");

    let runner = MigrationRunner::new(config.runner.clone());
    let result = runner.run(&plan, db.as_mut());

    println!("{}", create_formatter(config.format).format_result(&result));
    Ok(result.exit_code())
}

/// Print catalog information for tables.
pub fn inspect(config: &Config, tables: &[String]) -> Result<i32, Error> {
    let mut db = schemaguard_core::open(&config.database_url)?;

    let inspections = tables
        .iter()
        .map(|table| TableInspection::read(db.as_mut(), table))
        .collect::<Result<Vec<_>, _>>()?;

    println!(
        "{}",
        create_formatter(config.format).format_inspection(&inspections)
    );
    Ok(0)
}
