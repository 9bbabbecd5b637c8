//! SQLite database access
//!
//! `Database` owns the pool. The free functions take a plain `&Connection`
//! so they work the same on a pooled connection and inside a transaction.

use super::pool::ConnectionPool;
use crate::query::Statement;
use crate::query::value::column_value;
use crate::Result;
use rusqlite::{Connection, Transaction};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

/// One result row keyed by column name
pub type Record = Map<String, Value>;

/// A live column as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Pooled SQLite database
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path, pool_size: usize, busy_timeout: Duration) -> Result<Self> {
        let pool = ConnectionPool::open(path, pool_size, busy_timeout)?;
        tracing::debug!("Opened {} with a pool of {}", path.display(), pool.size());
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::in_memory()?,
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` on one checked-out connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Run `f` in a transaction: committed on `Ok`, rolled back on `Err`
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    pub fn execute(&self, stmt: &Statement) -> Result<usize> {
        self.with_connection(|conn| execute(conn, stmt))
    }

    pub fn query(&self, stmt: &Statement) -> Result<Vec<Record>> {
        self.with_connection(|conn| query(conn, stmt))
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.with_connection(table_names)
    }

    pub fn describe_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.with_connection(|conn| describe_table(conn, table))
    }
}

/// Execute a statement, returning the number of changed rows
pub fn execute(conn: &Connection, stmt: &Statement) -> Result<usize> {
    tracing::debug!("SQL: {}", stmt.inline());
    Ok(conn.execute(&stmt.sql, stmt.bind())?)
}

/// Run a query and collect every row as a column-name map
pub fn query(conn: &Connection, stmt: &Statement) -> Result<Vec<Record>> {
    tracing::debug!("SQL: {}", stmt.inline());
    let mut prepared = conn.prepare(&stmt.sql)?;
    let columns: Vec<String> = prepared.column_names().into_iter().map(String::from).collect();

    let rows = prepared
        .query_map(stmt.bind(), |row| {
            let mut record = Record::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), column_value(row.get_ref(i)?));
            }
            Ok(record)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// User tables, sorted
pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Live columns of a table in declaration order. Empty if the table does not exist.
pub fn describe_table(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    // Callers pass validated identifiers only
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlValue;
    use crate::Error;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.execute(&Statement::new(
            "CREATE TABLE Movies (id VARCHAR(16) PRIMARY KEY UNIQUE NOT NULL, title TINYTEXT)",
        ))
        .unwrap();
        db
    }

    fn insert(conn: &Connection, id: &str, title: &str) -> Result<usize> {
        let mut stmt = Statement::new("INSERT INTO Movies (id, title) VALUES (");
        stmt.push_param(id.into());
        stmt.push_sql(", ");
        stmt.push_param(title.into());
        stmt.push_sql(")");
        execute(conn, &stmt)
    }

    #[test]
    fn test_query_returns_named_columns() {
        let db = db();
        db.with_connection(|conn| insert(conn, "m1", "O'Brien's Day")).unwrap();

        let mut select = Statement::new("SELECT id, title FROM Movies WHERE id = ");
        select.push_param(SqlValue::from("m1"));
        let rows = db.query(&select).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], Value::String("O'Brien's Day".into()));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = db();
        let result: Result<()> = db.with_transaction(|tx| {
            insert(tx, "m1", "Heat")?;
            Err(Error::Parse("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.with_connection(|c| count_rows(c, "Movies")).unwrap(), 0);

        db.with_transaction(|tx| insert(tx, "m2", "Ronin")).unwrap();
        assert_eq!(db.with_connection(|c| count_rows(c, "Movies")).unwrap(), 1);
    }

    #[test]
    fn test_describe_table() {
        let db = db();
        let columns = db.describe_table("Movies").unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].declared_type, "VARCHAR(16)");
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].declared_type, "TINYTEXT");

        assert!(db.describe_table("Nope").unwrap().is_empty());
        assert_eq!(db.table_names().unwrap(), vec!["Movies"]);
        assert!(db.with_connection(|c| table_exists(c, "Movies")).unwrap());
    }

    #[test]
    fn test_file_database_is_shared_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propdb.sqlite");
        let db = Database::open(&path, 2, Duration::from_millis(500)).unwrap();
        db.execute(&Statement::new("CREATE TABLE t (x INT)")).unwrap();

        let conn_a = db.pool().get().unwrap();
        let conn_b = db.pool().get().unwrap();
        assert!(table_exists(&conn_a, "t").unwrap());
        assert!(table_exists(&conn_b, "t").unwrap());
    }
}
