//! SQLite database handle.

use std::path::Path;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};

use super::catalog::{ColumnInfo, ConstraintInfo, ConstraintKind, IndexInfo};
use super::{quote_ident, Backend, Database, Row, SqlValue};
use crate::error::Error;

/// SQLite handle over a single rusqlite connection.
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::Connection(format!(
                "failed to open sqlite database {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Connection(format!("failed to open in-memory sqlite: {}", e)))?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(v) => Value::Integer(*v as i64),
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Real(v) => Value::Real(*v),
        SqlValue::Text(v) => Value::Text(v.clone()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Text(format!("<blob {} bytes>", v.len())),
    }
}

impl Database for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite_value)))?;
        Ok(affected as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), Error> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite_value)))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(from_sqlite_value(row.get_ref(idx)?));
            }
            out.push(Row::new(values));
        }

        Ok(out)
    }

    fn begin(&mut self) -> Result<(), Error> {
        if !self.conn.is_autocommit() {
            return Err(Error::Transaction("a transaction is already open".into()));
        }
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        if self.conn.is_autocommit() {
            return Err(Error::Transaction("commit without an open transaction".into()));
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        // SQLite may already have rolled back on its own (e.g. after SQLITE_FULL).
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, Error> {
        let (schema, name) = split_qualified(table);
        let master = match schema {
            Some(schema) => format!("{}.sqlite_master", quote_ident(schema)?),
            None => "sqlite_master".to_string(),
        };
        let count = self.query_scalar_i64(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                master
            ),
            &[SqlValue::from(name)],
        )?;
        Ok(count.unwrap_or(0) > 0)
    }

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>, Error> {
        let (source, params) = pragma("table_info", table);
        let rows = self.query(
            &format!("SELECT name, type, \"notnull\" FROM {} ORDER BY cid", source),
            &params,
        )?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = row.get_string(0).unwrap_or_default();
                let data_type = row.get_string(1).unwrap_or_default();
                let not_null = row.get_i64(2).unwrap_or(0) != 0;
                ColumnInfo::new(name, data_type, !not_null)
            })
            .collect())
    }

    fn indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>, Error> {
        let (source, params) = pragma("index_list", table);
        let rows = self.query(
            &format!("SELECT name, \"unique\" FROM {} ORDER BY name", source),
            &params,
        )?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.get_string(0).unwrap_or_default();
            let unique = row.get_i64(1).unwrap_or(0) != 0;
            let columns = self.index_columns(table, &name)?;
            indexes.push(IndexInfo {
                name,
                unique,
                columns,
            });
        }

        Ok(indexes)
    }

    fn constraints(&mut self, table: &str) -> Result<Vec<ConstraintInfo>, Error> {
        let mut constraints = Vec::new();

        let primary_key = self.primary_key(table)?;
        if !primary_key.is_empty() {
            constraints.push(ConstraintInfo::new(None, ConstraintKind::PrimaryKey, primary_key));
        }

        // Unique constraints surface as automatic indexes with origin 'u'.
        let (source, params) = pragma("index_list", table);
        let unique_indexes: Vec<String> = self
            .query(
                &format!("SELECT name FROM {} WHERE origin = 'u' ORDER BY name", source),
                &params,
            )?
            .iter()
            .filter_map(|r| r.get_string(0))
            .collect();
        for index in unique_indexes {
            let columns = self.index_columns(table, &index)?;
            constraints.push(ConstraintInfo::new(None, ConstraintKind::Unique, columns));
        }

        let (source, params) = pragma("foreign_key_list", table);
        let fk_rows = self.query(
            &format!(
                "SELECT id, \"table\", \"from\", \"to\" FROM {} ORDER BY id, seq",
                source
            ),
            &params,
        )?;

        // (id, parent table, child columns, parent columns); a NULL parent
        // column means the parent's primary key.
        let mut keys: Vec<(i64, String, Vec<String>, Vec<Option<String>>)> = Vec::new();
        for row in fk_rows {
            let id = row.get_i64(0).unwrap_or(0);
            let from = row.get_string(2).unwrap_or_default();
            let to = row.get_string(3);
            match keys.last_mut() {
                Some(last) if last.0 == id => {
                    last.2.push(from);
                    last.3.push(to);
                }
                _ => keys.push((id, row.get_string(1).unwrap_or_default(), vec![from], vec![to])),
            }
        }

        for (_, parent, columns, referenced) in keys {
            let referenced_columns = if referenced.iter().any(Option::is_none) {
                let (schema, _) = split_qualified(table);
                let parent_table = match schema {
                    Some(schema) => format!("{}.{}", schema, parent),
                    None => parent.clone(),
                };
                self.primary_key(&parent_table)?
            } else {
                referenced.into_iter().flatten().collect()
            };
            constraints.push(ConstraintInfo::foreign_key(
                None,
                columns,
                parent,
                referenced_columns,
            ));
        }

        Ok(constraints)
    }
}

impl SqliteDatabase {
    fn primary_key(&mut self, table: &str) -> Result<Vec<String>, Error> {
        let (source, params) = pragma("table_info", table);
        Ok(self
            .query(
                &format!("SELECT name FROM {} WHERE pk > 0 ORDER BY pk", source),
                &params,
            )?
            .iter()
            .filter_map(|r| r.get_string(0))
            .collect())
    }

    fn index_columns(&mut self, table: &str, index: &str) -> Result<Vec<String>, Error> {
        let (schema, _) = split_qualified(table);
        let (source, params) = pragma_in("index_info", index, schema);
        Ok(self
            .query(&format!("SELECT name FROM {} ORDER BY seqno", source), &params)?
            .iter()
            .filter_map(|r| r.get_string(0))
            .collect())
    }
}

fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

/// Table-valued pragma call for a possibly schema-qualified table.
fn pragma(name: &str, table: &str) -> (String, Vec<SqlValue>) {
    let (schema, table) = split_qualified(table);
    pragma_in(name, table, schema)
}

fn pragma_in(name: &str, arg: &str, schema: Option<&str>) -> (String, Vec<SqlValue>) {
    match schema {
        Some(schema) => (
            format!("pragma_{}(?1, ?2)", name),
            vec![SqlValue::from(arg), SqlValue::from(schema)],
        ),
        None => (format!("pragma_{}(?1)", name), vec![SqlValue::from(arg)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.execute_batch(
            r#"
            CREATE TABLE users_sync (
                id VARCHAR(255) PRIMARY KEY,
                email TEXT NOT NULL UNIQUE
            );
            CREATE TABLE resumes (
                id INTEGER PRIMARY KEY,
                user_id VARCHAR(255) NOT NULL REFERENCES users_sync(id),
                title TEXT
            );
            CREATE INDEX idx_resumes_user_id ON resumes(user_id);
            "#,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_query_and_execute() {
        let mut db = setup();
        let affected = db
            .execute(
                "INSERT INTO users_sync (id, email) VALUES (?1, ?2)",
                &["u1".into(), "a@example.com".into()],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = db.query("SELECT id, email FROM users_sync", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_string(0).as_deref(), Some("u1"));
    }

    #[test]
    fn test_table_exists() {
        let mut db = setup();
        assert!(db.table_exists("users_sync").unwrap());
        assert!(db.table_exists("USERS_SYNC").unwrap());
        assert!(!db.table_exists("cv_versions").unwrap());
    }

    #[test]
    fn test_columns() {
        let mut db = setup();
        let columns = db.columns("resumes").unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "user_id", "title"]);
        assert!(columns[1].type_matches("varchar(255)"));
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);

        assert!(db.column_exists("resumes", "title").unwrap());
        assert!(!db.column_exists("resumes", "kind").unwrap());
        assert!(db.columns("missing").unwrap().is_empty());
    }

    #[test]
    fn test_indexes() {
        let mut db = setup();
        let indexes = db.indexes("resumes").unwrap();
        let idx = indexes
            .iter()
            .find(|i| i.name == "idx_resumes_user_id")
            .unwrap();
        assert!(!idx.unique);
        assert_eq!(idx.columns, vec!["user_id".to_string()]);
    }

    #[test]
    fn test_constraints() {
        let mut db = setup();

        let constraints = db.constraints("resumes").unwrap();
        assert!(constraints
            .iter()
            .any(|c| c.references("user_id", "users_sync", "id")));

        let constraints = db.constraints("users_sync").unwrap();
        assert!(constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey && c.columns == vec!["id".to_string()]));
        assert!(constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Unique && c.columns == vec!["email".to_string()]));
    }

    #[test]
    fn test_schema_qualified_catalog() {
        let mut db = setup();
        assert!(db.table_exists("main.resumes").unwrap());
        assert!(!db.table_exists("main.cv_versions").unwrap());
        assert!(!db.table_exists("temp.resumes").unwrap());

        let columns = db.columns("main.resumes").unwrap();
        assert_eq!(columns.len(), 3);
        assert!(db.column_exists("main.resumes", "user_id").unwrap());

        let indexes = db.indexes("main.resumes").unwrap();
        let idx = indexes
            .iter()
            .find(|i| i.name == "idx_resumes_user_id")
            .unwrap();
        assert_eq!(idx.columns, vec!["user_id".to_string()]);

        assert!(db
            .constraints("main.resumes")
            .unwrap()
            .iter()
            .any(|c| c.references("user_id", "users_sync", "id")));
    }

    #[test]
    fn test_foreign_key_to_implicit_primary_key() {
        let mut db = setup();
        db.execute_batch(
            "CREATE TABLE cv_versions (
                 id INTEGER PRIMARY KEY,
                 user_id VARCHAR(255) REFERENCES users_sync
             );",
        )
        .unwrap();

        let constraints = db.constraints("cv_versions").unwrap();
        let fk = constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::ForeignKey)
            .unwrap();
        assert_eq!(fk.referenced_columns, vec!["id".to_string()]);
        assert!(fk.references("user_id", "users_sync", "id"));
    }

    #[test]
    fn test_transaction_control() {
        let mut db = setup();
        assert!(db.commit().is_err());

        db.begin().unwrap();
        assert!(db.begin().is_err());
        db.execute_batch("CREATE TABLE scratch (id INTEGER)").unwrap();
        db.rollback().unwrap();
        assert!(!db.table_exists("scratch").unwrap());

        db.begin().unwrap();
        db.execute_batch("CREATE TABLE scratch (id INTEGER)").unwrap();
        db.commit().unwrap();
        assert!(db.table_exists("scratch").unwrap());
    }
}
