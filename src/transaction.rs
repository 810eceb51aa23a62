//! Nested transactions on the shared connection.
//!
//! Depth 0 to 1 starts a real transaction; deeper levels are savepoints named
//! `trans{level}`. Only the outermost commit or rollback reaches the real
//! transaction.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use quarry_core::{QuarryError, Result};

use crate::database::Database;

fn savepoint_name(level: u32) -> String {
    format!("trans{level}")
}

impl Database {
    /// Number of open transaction levels.
    pub fn transaction_level(&self) -> u32 {
        self.inner.transaction_depth.load(Ordering::SeqCst)
    }

    fn set_transaction_level(&self, level: u32) {
        self.inner.transaction_depth.store(level, Ordering::SeqCst);
    }

    pub fn begin_transaction(&self) -> Result<()> {
        let level = self.transaction_level();
        if level == 0 {
            self.with_connection("BEGIN", |conn| conn.begin_transaction())?;
            quarry_core::quarry_trace_tx!("begin", 1);
        } else {
            let sql = self.dialect().savepoint(&savepoint_name(level + 1));
            self.with_connection(&sql, |conn| conn.exec(&sql))?;
            quarry_core::quarry_trace_tx!("savepoint", level + 1);
        }
        self.set_transaction_level(level + 1);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let level = self.transaction_level();
        match level {
            0 => return Err(QuarryError::Transaction("no active transaction to commit".into())),
            1 => {
                self.with_connection("COMMIT", |conn| conn.commit())?;
                quarry_core::quarry_trace_tx!("commit", 0);
            }
            _ => {
                let sql = self.dialect().release_savepoint(&savepoint_name(level));
                self.with_connection(&sql, |conn| conn.exec(&sql))?;
                quarry_core::quarry_trace_tx!("release", level - 1);
            }
        }
        self.set_transaction_level(level - 1);
        Ok(())
    }

    /// Rolls back the innermost level. The level is closed even if the
    /// rollback statement fails.
    pub fn roll_back(&self) -> Result<()> {
        let level = self.transaction_level();
        let result = match level {
            0 => return Err(QuarryError::Transaction("no active transaction to roll back".into())),
            1 => {
                quarry_core::quarry_trace_tx!("rollback", 0);
                self.with_connection("ROLLBACK", |conn| conn.roll_back())
            }
            _ => {
                quarry_core::quarry_trace_tx!("rollback_to_savepoint", level - 1);
                let sql = self.dialect().rollback_to_savepoint(&savepoint_name(level));
                self.with_connection(&sql, |conn| conn.exec(&sql))
            }
        };
        self.set_transaction_level(level - 1);
        result
    }

    /// Runs `f` in a transaction level, committing on `Ok` and rolling back on
    /// `Err` or panic.
    ///
    /// ```
    /// # fn main() -> quarry::Result<()> {
    /// let db = quarry::Database::in_memory()?;
    /// db.execute_raw("CREATE TABLE logs (id INTEGER PRIMARY KEY, line TEXT)")?;
    ///
    /// let failed: quarry::Result<()> = db.transaction(|db| {
    ///     db.execute_raw("INSERT INTO logs (line) VALUES ('kept?')")?;
    ///     Err(quarry::QuarryError::Transaction("abort".into()))
    /// });
    /// assert!(failed.is_err());
    /// let rows = db.select(&quarry::Statement::raw("SELECT COUNT(*) AS n FROM logs"))?;
    /// assert_eq!(rows[0]["n"], quarry::Value::Int(0));
    /// assert_eq!(db.transaction_level(), 0);
    /// # Ok(()) }
    /// ```
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T>,
    {
        self.begin_transaction()?;
        match panic::catch_unwind(AssertUnwindSafe(|| f(self))) {
            Ok(Ok(value)) => match self.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = self.roll_back();
                    Err(e)
                }
            },
            Ok(Err(e)) => {
                if let Err(_rollback) = self.roll_back() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_rollback, "quarry.transaction.rollback_failed");
                }
                Err(e)
            }
            Err(payload) => {
                let _ = self.roll_back();
                panic::resume_unwind(payload)
            }
        }
    }
}
