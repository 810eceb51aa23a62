//! The storage collaborator consumed by the entity layer.

use std::collections::BTreeMap;

use quarry_core::{DriverError, Value};
use quarry_types::Dialect;

#[cfg(feature = "rusqlite")]
mod rusqlite;
#[cfg(feature = "rusqlite")]
pub use self::rusqlite::SqliteConnection;

/// One fetched row, column name to value.
pub type Record = BTreeMap<String, Value>;

/// Result of running one statement.
///
/// Drivers materialize the rows of a statement before returning; callers that
/// need bounded memory page through results instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub rows: Vec<Record>,
    /// Rows changed by a write, or rows returned by a read
    pub affected: u64,
}

/// A single storage connection.
///
/// Transaction control has default implementations in terms of [`Connection::exec`].
pub trait Connection: Send {
    fn dialect(&self) -> Dialect;

    /// Runs `sql` with positional `params`.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult, DriverError>;

    /// Key generated by the most recent insert.
    fn last_insert_id(&mut self) -> Result<Value, DriverError>;

    /// Runs a statement with no parameters and no result rows.
    fn exec(&mut self, sql: &str) -> Result<(), DriverError>;

    fn begin_transaction(&mut self) -> Result<(), DriverError> {
        self.exec("BEGIN")
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.exec("COMMIT")
    }

    fn roll_back(&mut self) -> Result<(), DriverError> {
        self.exec("ROLLBACK")
    }
}
