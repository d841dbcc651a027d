//! Database handle abstraction.
//!
//! The migration engine never talks to a driver directly. It runs against a
//! [`Database`], which executes SQL, controls the transaction and exposes the
//! catalog views the validator and verifier need. Catalog queries are
//! dialect-specific and live in each backend.
//!
//! | Backend | Driver | Catalog source |
//! |---------|--------|----------------|
//! | [`SqliteDatabase`] | rusqlite | `sqlite_master`, `pragma_*` table functions |
//! | `PostgresDatabase` | sqlx (feature `postgres`) | `information_schema`, `pg_indexes`, `pg_constraint` |

pub mod catalog;
pub mod sqlite;
pub mod transaction;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use catalog::{normalize_type, ColumnInfo, ConstraintInfo, ConstraintKind, IndexInfo};
pub use sqlite::SqliteDatabase;
pub use transaction::MigrationTransaction;

#[cfg(feature = "postgres")]
pub use postgres::PostgresDatabase;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// SQL dialect behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// SQLite.
    Sqlite,
    /// PostgreSQL.
    Postgres,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Sqlite => write!(f, "sqlite"),
            Backend::Postgres => write!(f, "postgres"),
        }
    }
}

/// A single SQL value, used for parameters and result cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer column.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// Text.
    Text(String),
}

impl SqlValue {
    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Bool(v) => Some(*v as i64),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    /// Text view of the value, if it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view of the value, if it has one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v != 0),
            SqlValue::Text(v) => match v.as_str() {
                "t" | "true" | "YES" | "yes" => Some(true),
                "f" | "false" | "NO" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Check if the value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

/// One result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from its cells.
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell at `idx`, or NULL when out of range.
    pub fn get(&self, idx: usize) -> &SqlValue {
        static NULL: SqlValue = SqlValue::Null;
        self.values.get(idx).unwrap_or(&NULL)
    }

    /// Integer cell; NULL reads as `None`.
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        self.get(idx).as_i64()
    }

    /// Text cell; NULL reads as `None`.
    pub fn get_string(&self, idx: usize) -> Option<String> {
        match self.get(idx) {
            SqlValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// All cells.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }
}

/// A database handle the migration engine runs against.
///
/// Implementations hold exactly one session: `begin`, every statement and
/// `commit`/`rollback` must reach the same underlying connection.
pub trait Database {
    /// Dialect of this handle.
    fn backend(&self) -> Backend;

    /// Execute one statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error>;

    /// Execute a batch of `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<(), Error>;

    /// Run a query and collect every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, Error>;

    /// Open a transaction.
    fn begin(&mut self) -> Result<(), Error>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), Error>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), Error>;

    /// Check whether a table exists.
    fn table_exists(&mut self, table: &str) -> Result<bool, Error>;

    /// Columns of a table in ordinal order. Empty if the table does not exist.
    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, Error>;

    /// Indexes defined on a table.
    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, Error>;

    /// Constraints defined on a table.
    fn constraints(&mut self, table: &str) -> Result<Vec<ConstraintInfo>, Error>;

    /// Look up a single column.
    fn column(&mut self, table: &str, column: &str) -> Result<Option<ColumnInfo>, Error> {
        Ok(self
            .columns(table)?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(column)))
    }

    /// Check whether a column exists.
    fn column_exists(&mut self, table: &str, column: &str) -> Result<bool, Error> {
        Ok(self.column(table, column)?.is_some())
    }

    /// Run a query expected to return one integer in the first cell.
    fn query_scalar_i64(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<i64>, Error> {
        let rows = self.query(sql, params)?;
        let row = rows
            .first()
            .ok_or_else(|| Error::UnexpectedResult(format!("no rows returned by: {}", sql)))?;
        Ok(row.get_i64(0))
    }
}

/// Quote an identifier for use in generated SQL.
///
/// `schema.table` is quoted part by part. Embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> Result<String, Error> {
    if name.trim().is_empty() || name.contains('\0') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }

    let mut quoted = Vec::new();
    for part in name.split('.') {
        if part.is_empty() {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }
        quoted.push(format!("\"{}\"", part.replace('"', "\"\"")));
    }

    Ok(quoted.join("."))
}

/// Open a database handle from a URL.
///
/// `postgres://` and `postgresql://` open PostgreSQL (feature `postgres`).
/// `sqlite://path`, `sqlite:path`, `:memory:` and bare paths open SQLite.
pub fn open(url: &str) -> Result<Box<dyn Database>, Error> {
    let url = url.trim();

    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            return Ok(Box::new(PostgresDatabase::connect(url)?));
        }
        #[cfg(not(feature = "postgres"))]
        {
            return Err(Error::UnsupportedUrl(format!(
                "{} (built without the `postgres` feature)",
                scheme_of(url)
            )));
        }
    }

    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    if path.contains("://") {
        return Err(Error::UnsupportedUrl(scheme_of(path).to_string()));
    }

    if path.is_empty() || path == ":memory:" {
        return Ok(Box::new(SqliteDatabase::open_in_memory()?));
    }

    Ok(Box::new(SqliteDatabase::open(path)?))
}

fn scheme_of(url: &str) -> &str {
    url.split("://").next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("public.users").unwrap(), "\"public\".\"users\"");
        assert_eq!(quote_ident("we\"ird").unwrap(), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_ident_rejects_bad_names() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("   ").is_err());
        assert!(quote_ident("a\0b").is_err());
        assert!(quote_ident("schema.").is_err());
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::new(vec![
            SqlValue::Integer(3),
            SqlValue::Text("42".into()),
            SqlValue::Null,
        ]);
        assert_eq!(row.get_i64(0), Some(3));
        assert_eq!(row.get_i64(1), Some(42));
        assert_eq!(row.get_i64(2), None);
        assert_eq!(row.get_string(1).as_deref(), Some("42"));
        assert_eq!(row.get_string(2), None);
        assert!(row.get(7).is_null());
    }

    #[test]
    fn test_sql_value_bool() {
        assert_eq!(SqlValue::Text("YES".into()).as_bool(), Some(true));
        assert_eq!(SqlValue::Integer(0).as_bool(), Some(false));
        assert_eq!(SqlValue::Real(1.0).as_bool(), None);
    }

    #[test]
    fn test_open_sqlite_urls() {
        let db = open(":memory:").unwrap();
        assert_eq!(db.backend(), Backend::Sqlite);

        let db = open("sqlite::memory:").unwrap();
        assert_eq!(db.backend(), Backend::Sqlite);
    }

    #[test]
    fn test_open_unknown_scheme() {
        let err = open("mysql://localhost/app").err().unwrap();
        assert!(matches!(err, Error::UnsupportedUrl(_)));
    }

    #[cfg(not(feature = "postgres"))]
    #[test]
    fn test_open_postgres_without_feature() {
        let err = open("postgres://localhost/app").err().unwrap();
        assert!(matches!(err, Error::UnsupportedUrl(_)));
    }
}
