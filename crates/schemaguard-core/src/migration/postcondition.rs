//! Postconditions: assertions about the schema after a step.
//!
//! The verifier checks them after commit. The executor also uses them as
//! existence guards for steps that have no natural "already exists" test.

use serde::{Deserialize, Serialize};

use super::rule::{ValidationOutcome, ValidationRule};
use super::validator::Validator;
use crate::database::Database;
use crate::error::Error;

/// An assertion about the end state of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Postcondition {
    /// The table exists.
    TableExists {
        /// Table name.
        table: String,
    },
    /// The column exists.
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The column has the given type (dialect spellings compare equal).
    ColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Expected type, e.g. `VARCHAR(255)`.
        #[serde(rename = "type")]
        data_type: String,
    },
    /// An index with this name exists on the table.
    IndexExists {
        /// Table name.
        table: String,
        /// Index name.
        index: String,
    },
    /// A foreign key maps `column` to `references_table.references_column`.
    ForeignKey {
        /// Referencing table.
        table: String,
        /// Referencing column.
        column: String,
        /// Referenced table.
        references_table: String,
        /// Referenced column.
        references_column: String,
    },
    /// A constraint (or index backing one) with this name exists.
    ConstraintExists {
        /// Table name.
        table: String,
        /// Constraint name.
        name: String,
    },
    /// A data rule still holds after the step.
    Holds {
        /// Rule to evaluate.
        rule: ValidationRule,
    },
}

/// Result of checking a postcondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The assertion holds.
    Passed,
    /// The assertion does not hold.
    Mismatch {
        /// What was expected.
        expected: String,
        /// What was observed instead.
        observed: String,
    },
}

impl CheckOutcome {
    /// Check if the assertion held.
    pub fn is_passed(&self) -> bool {
        matches!(self, CheckOutcome::Passed)
    }
}

impl Postcondition {
    /// Create a column type postcondition.
    pub fn column_type(
        table: impl Into<String>,
        column: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Postcondition::ColumnType {
            table: table.into(),
            column: column.into(),
            data_type: data_type.into(),
        }
    }

    /// Create a foreign key postcondition.
    pub fn foreign_key(
        table: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Postcondition::ForeignKey {
            table: table.into(),
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
        }
    }

    /// Create an index postcondition.
    pub fn index_exists(table: impl Into<String>, index: impl Into<String>) -> Self {
        Postcondition::IndexExists {
            table: table.into(),
            index: index.into(),
        }
    }

    /// Create a table postcondition.
    pub fn table_exists(table: impl Into<String>) -> Self {
        Postcondition::TableExists {
            table: table.into(),
        }
    }

    /// Create a column postcondition.
    pub fn column_exists(table: impl Into<String>, column: impl Into<String>) -> Self {
        Postcondition::ColumnExists {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Evaluate against the current catalog and data.
    pub fn evaluate(&self, db: &mut dyn Database) -> Result<CheckOutcome, Error> {
        match self {
            Postcondition::TableExists { table } => Ok(expect(
                db.table_exists(table)?,
                format!("table {}", table),
                "no such table",
            )),

            Postcondition::ColumnExists { table, column } => Ok(expect(
                db.column_exists(table, column)?,
                format!("column {}.{}", table, column),
                "no such column",
            )),

            Postcondition::ColumnType {
                table,
                column,
                data_type,
            } => {
                let expected = format!("{}.{} {}", table, column, data_type);
                Ok(match db.column(table, column)? {
                    Some(info) if info.type_matches(data_type) => CheckOutcome::Passed,
                    Some(info) => CheckOutcome::Mismatch {
                        expected,
                        observed: format!("{}.{} {}", table, column, info.display_type()),
                    },
                    None => CheckOutcome::Mismatch {
                        expected,
                        observed: "no such column".to_string(),
                    },
                })
            }

            Postcondition::IndexExists { table, index } => {
                let indexes = db.indexes(table)?;
                if indexes.iter().any(|i| i.name.eq_ignore_ascii_case(index)) {
                    return Ok(CheckOutcome::Passed);
                }
                Ok(CheckOutcome::Mismatch {
                    expected: format!("index {} on {}", index, table),
                    observed: listing(
                        "indexes",
                        indexes.iter().map(|i| i.name.clone()).collect(),
                    ),
                })
            }

            Postcondition::ForeignKey {
                table,
                column,
                references_table,
                references_column,
            } => {
                let constraints = db.constraints(table)?;
                if constraints
                    .iter()
                    .any(|c| c.references(column, references_table, references_column))
                {
                    return Ok(CheckOutcome::Passed);
                }
                Ok(CheckOutcome::Mismatch {
                    expected: format!(
                        "foreign key {}.{} -> {}.{}",
                        table, column, references_table, references_column
                    ),
                    observed: listing(
                        "foreign keys",
                        constraints
                            .iter()
                            .filter(|c| c.referenced_table.is_some())
                            .map(|c| c.describe())
                            .collect(),
                    ),
                })
            }

            Postcondition::ConstraintExists { table, name } => {
                let constraints = db.constraints(table)?;
                let mut names: Vec<String> =
                    constraints.iter().filter_map(|c| c.name.clone()).collect();
                // SQLite keeps no constraint names; unique and primary keys
                // surface as named indexes instead.
                names.extend(db.indexes(table)?.into_iter().map(|i| i.name));

                if names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                    return Ok(CheckOutcome::Passed);
                }
                Ok(CheckOutcome::Mismatch {
                    expected: format!("constraint {} on {}", name, table),
                    observed: listing("constraints", names),
                })
            }

            Postcondition::Holds { rule } => Ok(match Validator::evaluate(rule, db)? {
                ValidationOutcome::Pass => CheckOutcome::Passed,
                ValidationOutcome::Fail(violation) => CheckOutcome::Mismatch {
                    expected: rule.to_string(),
                    observed: violation.reason,
                },
            }),
        }
    }
}

impl std::fmt::Display for Postcondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Postcondition::TableExists { table } => write!(f, "table {} exists", table),
            Postcondition::ColumnExists { table, column } => {
                write!(f, "column {}.{} exists", table, column)
            }
            Postcondition::ColumnType {
                table,
                column,
                data_type,
            } => write!(f, "{}.{} is {}", table, column, data_type),
            Postcondition::IndexExists { table, index } => {
                write!(f, "index {} exists on {}", index, table)
            }
            Postcondition::ForeignKey {
                table,
                column,
                references_table,
                references_column,
            } => write!(
                f,
                "{}.{} references {}.{}",
                table, column, references_table, references_column
            ),
            Postcondition::ConstraintExists { table, name } => {
                write!(f, "constraint {} exists on {}", name, table)
            }
            Postcondition::Holds { rule } => write!(f, "{} holds", rule),
        }
    }
}

fn expect(holds: bool, expected: String, observed: &str) -> CheckOutcome {
    if holds {
        CheckOutcome::Passed
    } else {
        CheckOutcome::Mismatch {
            expected,
            observed: observed.to_string(),
        }
    }
}

fn listing(what: &str, names: Vec<String>) -> String {
    if names.is_empty() {
        format!("no {}", what)
    } else {
        format!("{}: {}", what, names.join(", "))
    }
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
            CREATE TABLE resumes (
                id INTEGER PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL REFERENCES users_sync(id),
                title TEXT,
                CONSTRAINT uq_resumes_title UNIQUE (title)
            );
            CREATE INDEX idx_resumes_user_id ON resumes(user_id);
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_column_type() {
        let mut db = setup();
        let check = Postcondition::column_type("resumes", "user_id", "character varying(255)");
        assert!(check.evaluate(&mut db).unwrap().is_passed());

        let check = Postcondition::column_type("resumes", "title", "VARCHAR(255)");
        match check.evaluate(&mut db).unwrap() {
            CheckOutcome::Mismatch { observed, .. } => assert_eq!(observed, "resumes.title TEXT"),
            CheckOutcome::Passed => panic!("TEXT must not match VARCHAR(255)"),
        }

        let check = Postcondition::column_type("resumes", "missing", "TEXT");
        assert!(!check.evaluate(&mut db).unwrap().is_passed());
    }

    #[test]
    fn test_foreign_key() {
        let mut db = setup();
        let check = Postcondition::foreign_key("resumes", "user_id", "users_sync", "id");
        assert!(check.evaluate(&mut db).unwrap().is_passed());

        let check = Postcondition::foreign_key("users_sync", "id", "resumes", "user_id");
        match check.evaluate(&mut db).unwrap() {
            CheckOutcome::Mismatch { observed, .. } => assert_eq!(observed, "no foreign keys"),
            CheckOutcome::Passed => panic!("users_sync has no foreign keys"),
        }
    }

    #[test]
    fn test_index_and_constraint() {
        let mut db = setup();
        assert!(Postcondition::index_exists("resumes", "idx_resumes_user_id")
            .evaluate(&mut db)
            .unwrap()
            .is_passed());
        assert!(!Postcondition::index_exists("resumes", "idx_resumes_title")
            .evaluate(&mut db)
            .unwrap()
            .is_passed());

        // Named UNIQUE constraints surface through their backing index.
        let check = Postcondition::ConstraintExists {
            table: "resumes".into(),
            name: "sqlite_autoindex_resumes_1".into(),
        };
        assert!(check.evaluate(&mut db).unwrap().is_passed());
    }

    #[test]
    fn test_structural_and_holds() {
        let mut db = setup();
        assert!(Postcondition::table_exists("resumes").evaluate(&mut db).unwrap().is_passed());
        assert!(!Postcondition::column_exists("resumes", "kind")
            .evaluate(&mut db)
            .unwrap()
            .is_passed());

        db.execute_batch(
            "PRAGMA foreign_keys = OFF; INSERT INTO resumes (user_id, title) VALUES ('nobody', 'cv');",
        )
        .unwrap();
        let check = Postcondition::Holds {
            rule: ValidationRule::no_orphans("resumes", "user_id", "users_sync", "id"),
        };
        assert!(!check.evaluate(&mut db).unwrap().is_passed());
    }

    #[test]
    fn test_json_shape() {
        let check: Postcondition = serde_json::from_str(
            r#"{"check": "column_type", "table": "job_analysis", "column": "user_id", "type": "VARCHAR(255)"}"#,
        )
        .unwrap();
        assert_eq!(check, Postcondition::column_type("job_analysis", "user_id", "VARCHAR(255)"));
        assert_eq!(check.to_string(), "job_analysis.user_id is VARCHAR(255)");
    }
}
