//! Pre-flight validation of rules against live data.
//!
//! Every rule compiles to a single read-only query, or to a catalog lookup
//! for the structural rules. Failures report how many rows offend and one
//! bounded sample, never the offending rows themselves.

use tracing::debug;

use super::rule::{RuleKind, ValidationOutcome, ValidationRule, Violation};
use crate::database::{quote_ident, Database};
use crate::error::Error;

/// Evaluates [`ValidationRule`]s. Stateless and read-only.
pub struct Validator;

impl Validator {
    /// Evaluate a rule against the current contents of `db`.
    pub fn evaluate(rule: &ValidationRule, db: &mut dyn Database) -> Result<ValidationOutcome, Error> {
        let outcome = match rule {
            ValidationRule::MaxLength {
                table,
                column,
                limit,
            } => Self::max_length(db, table, column, *limit)?,
            ValidationRule::NoOrphans {
                child_table,
                child_column,
                parent_table,
                parent_column,
            } => Self::no_orphans(db, child_table, child_column, parent_table, parent_column)?,
            ValidationRule::TableExists { table } => {
                if db.table_exists(table)? {
                    ValidationOutcome::Pass
                } else {
                    structural_failure(rule, format!("table {} does not exist", table))
                }
            }
            ValidationRule::ColumnExists { table, column } => {
                if db.column_exists(table, column)? {
                    ValidationOutcome::Pass
                } else {
                    structural_failure(rule, format!("column {}.{} does not exist", table, column))
                }
            }
        };

        debug!(
            rule = %rule,
            passed = outcome.is_pass(),
            offending_count = outcome.violation().map(|v| v.offending_count).unwrap_or(0),
            "evaluated validation rule"
        );

        Ok(outcome)
    }

    fn max_length(
        db: &mut dyn Database,
        table: &str,
        column: &str,
        limit: u32,
    ) -> Result<ValidationOutcome, Error> {
        let length = format!("LENGTH(CAST({} AS TEXT))", quote_ident(column)?);
        let sql = format!(
            "SELECT COUNT(*), MAX({length}) FROM {table} WHERE {length} > {limit}",
            length = length,
            table = quote_ident(table)?,
            limit = limit,
        );

        let rows = db.query(&sql, &[])?;
        let row = rows
            .first()
            .ok_or_else(|| Error::UnexpectedResult(format!("no rows returned by: {}", sql)))?;
        let count = row.get_i64(0).unwrap_or(0).max(0) as u64;

        if count == 0 {
            return Ok(ValidationOutcome::Pass);
        }

        let longest = row.get_i64(1);
        let reason = match longest {
            Some(longest) => format!(
                "{} value(s) in {}.{} exceed {} characters (longest is {})",
                count, table, column, limit, longest
            ),
            None => format!(
                "{} value(s) in {}.{} exceed {} characters",
                count, table, column, limit
            ),
        };

        Ok(ValidationOutcome::Fail(Violation {
            rule_kind: RuleKind::MaxLength,
            table: table.to_string(),
            column: Some(column.to_string()),
            reason,
            offending_count: count,
            sample: longest.map(|l| l.to_string()),
        }))
    }

    fn no_orphans(
        db: &mut dyn Database,
        child_table: &str,
        child_column: &str,
        parent_table: &str,
        parent_column: &str,
    ) -> Result<ValidationOutcome, Error> {
        let child_col = format!("c.{}", quote_ident(child_column)?);
        let parent_col = format!("p.{}", quote_ident(parent_column)?);
        let sql = format!(
            "SELECT COUNT(*), MIN(CAST({child_col} AS TEXT)) \
             FROM {child} c LEFT JOIN {parent} p ON {child_col} = {parent_col} \
             WHERE {child_col} IS NOT NULL AND {parent_col} IS NULL",
            child_col = child_col,
            parent_col = parent_col,
            child = quote_ident(child_table)?,
            parent = quote_ident(parent_table)?,
        );

        let rows = db.query(&sql, &[])?;
        let row = rows
            .first()
            .ok_or_else(|| Error::UnexpectedResult(format!("no rows returned by: {}", sql)))?;
        let count = row.get_i64(0).unwrap_or(0).max(0) as u64;

        if count == 0 {
            return Ok(ValidationOutcome::Pass);
        }

        let sample = row.get_string(1);
        let reason = match &sample {
            Some(value) => format!(
                "{} row(s) in {}.{} have no matching {}.{} (e.g. {:?})",
                count, child_table, child_column, parent_table, parent_column, value
            ),
            None => format!(
                "{} row(s) in {}.{} have no matching {}.{}",
                count, child_table, child_column, parent_table, parent_column
            ),
        };

        Ok(ValidationOutcome::Fail(Violation {
            rule_kind: RuleKind::NoOrphans,
            table: child_table.to_string(),
            column: Some(child_column.to_string()),
            reason,
            offending_count: count,
            sample,
        }))
    }
}

fn structural_failure(rule: &ValidationRule, reason: String) -> ValidationOutcome {
    ValidationOutcome::Fail(Violation {
        rule_kind: rule.kind(),
        table: rule.table().to_string(),
        column: rule.column().map(str::to_string),
        reason,
        offending_count: 0,
        sample: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::SqliteDatabase;

    fn setup() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TABLE users_sync (id VARCHAR(255) PRIMARY KEY, email TEXT NOT NULL);
            CREATE TABLE job_analysis (
                id INTEGER PRIMARY KEY,
                user_id TEXT,
                job_title TEXT NOT NULL
            );
            INSERT INTO users_sync (id, email) VALUES ('u1', 'a@example.com'), ('u2', 'b@example.com');
            INSERT INTO job_analysis (user_id, job_title) VALUES ('u1', 'Engineer'), ('u2', 'Analyst'), (NULL, 'Draft');
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_max_length_pass() {
        let mut db = setup();
        let rule = ValidationRule::max_length("job_analysis", "user_id", 255);
        assert!(Validator::evaluate(&rule, &mut db).unwrap().is_pass());
    }

    #[test]
    fn test_max_length_fail_reports_count_and_longest() {
        let mut db = setup();
        let long = "x".repeat(300);
        db.execute(
            "INSERT INTO job_analysis (user_id, job_title) VALUES (?1, 'Too long')",
            &[long.into()],
        )
        .unwrap();

        let rule = ValidationRule::max_length("job_analysis", "user_id", 255);
        let outcome = Validator::evaluate(&rule, &mut db).unwrap();
        let violation = outcome.violation().unwrap();
        assert_eq!(violation.rule_kind, RuleKind::MaxLength);
        assert_eq!(violation.offending_count, 1);
        assert_eq!(violation.sample.as_deref(), Some("300"));
        assert!(violation.reason.contains("longest is 300"));
    }

    #[test]
    fn test_max_length_boundary() {
        let mut db = setup();
        db.execute(
            "INSERT INTO job_analysis (user_id, job_title) VALUES (?1, 'Exact')",
            &["y".repeat(255).into()],
        )
        .unwrap();
        let rule = ValidationRule::max_length("job_analysis", "user_id", 255);
        assert!(Validator::evaluate(&rule, &mut db).unwrap().is_pass());
    }

    #[test]
    fn test_no_orphans_ignores_nulls() {
        let mut db = setup();
        let rule = ValidationRule::no_orphans("job_analysis", "user_id", "users_sync", "id");
        assert!(Validator::evaluate(&rule, &mut db).unwrap().is_pass());
    }

    #[test]
    fn test_no_orphans_fail() {
        let mut db = setup();
        db.execute_batch(
            "INSERT INTO job_analysis (user_id, job_title) VALUES ('ghost', 'A'), ('ghost', 'B'), ('zombie', 'C')",
        )
        .unwrap();

        let rule = ValidationRule::no_orphans("job_analysis", "user_id", "users_sync", "id");
        let outcome = Validator::evaluate(&rule, &mut db).unwrap();
        let violation = outcome.violation().unwrap();
        assert_eq!(violation.offending_count, 3);
        assert_eq!(violation.sample.as_deref(), Some("ghost"));
        assert_eq!(violation.table, "job_analysis");
    }

    #[test]
    fn test_structural_rules() {
        let mut db = setup();
        assert!(Validator::evaluate(&ValidationRule::table_exists("users_sync"), &mut db)
            .unwrap()
            .is_pass());
        assert!(!Validator::evaluate(&ValidationRule::table_exists("cv_versions"), &mut db)
            .unwrap()
            .is_pass());
        assert!(
            Validator::evaluate(&ValidationRule::column_exists("job_analysis", "job_title"), &mut db)
                .unwrap()
                .is_pass()
        );
        let outcome =
            Validator::evaluate(&ValidationRule::column_exists("job_analysis", "salary"), &mut db)
                .unwrap();
        assert_eq!(outcome.violation().unwrap().column.as_deref(), Some("salary"));
    }

    #[test]
    fn test_missing_table_is_error() {
        let mut db = setup();
        let rule = ValidationRule::max_length("nope", "user_id", 10);
        assert!(Validator::evaluate(&rule, &mut db).is_err());
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let mut db = setup();
        let rule = ValidationRule::max_length("job_analysis", "", 10);
        assert!(matches!(
            Validator::evaluate(&rule, &mut db),
            Err(Error::InvalidIdentifier(_))
        ));
    }
}
