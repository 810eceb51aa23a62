use std::path::Path;

use quarry_core::{DriverError, Value};
use quarry_types::Dialect;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqliteValue;

use super::{Connection, Record, StatementResult};

/// [`Connection`] backed by a `rusqlite` database.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
        rusqlite::Connection::open(path).map(Self::new)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        rusqlite::Connection::open_in_memory().map(Self::new)
    }

    /// Opens `:memory:` or a file path.
    pub fn open_path(path: &str) -> rusqlite::Result<Self> {
        if path == ":memory:" {
            Self::open_in_memory()
        } else {
            Self::open(path)
        }
    }

    /// Gets a reference to the underlying connection
    #[inline]
    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult, DriverError> {
        quarry_core::quarry_profile_scope!("sqlite.rusqlite", "execute");
        let mut stmt = self.conn.prepare(sql)?;
        let bound = params.iter().map(to_sqlite);

        if stmt.column_count() == 0 {
            let affected = stmt.execute(params_from_iter(bound))?;
            return Ok(StatementResult {
                rows: Vec::new(),
                affected: affected as u64,
            });
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(bound))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (i, name) in names.iter().enumerate() {
                let value: SqliteValue = row.get(i)?;
                record.insert(name.clone(), from_sqlite(value));
            }
            records.push(record);
        }
        Ok(StatementResult {
            affected: records.len() as u64,
            rows: records,
        })
    }

    fn last_insert_id(&mut self) -> Result<Value, DriverError> {
        Ok(Value::Int(self.conn.last_insert_rowid()))
    }

    fn exec(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value.to_bindable() {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(b)),
        Value::Int(i) => SqliteValue::Integer(i),
        Value::Float(f) => SqliteValue::Real(f),
        Value::Text(s) => SqliteValue::Text(s),
        Value::Bytes(b) => SqliteValue::Blob(b),
        other => SqliteValue::Text(other.to_string()),
    }
}

fn from_sqlite(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::Int(i),
        SqliteValue::Real(f) => Value::Float(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Bytes(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_reads_and_writes() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, flag INTEGER)")
            .unwrap();
        let result = conn
            .execute(
                "INSERT INTO `t` (`name`, `flag`) VALUES (?, ?)",
                &[Value::from("a"), Value::Bool(true)],
            )
            .unwrap();
        assert_eq!(result.affected, 1);
        assert_eq!(conn.last_insert_id().unwrap(), Value::Int(1));

        let result = conn.execute("SELECT * FROM `t`", &[]).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], Value::from("a"));
        assert_eq!(result.rows[0]["flag"], Value::Int(1));
    }

    #[test]
    fn test_driver_error_surfaces() {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        assert!(conn.execute("SELECT * FROM missing", &[]).is_err());
    }
}
