pub mod error;
pub mod profiling;
pub mod query;
pub mod sql;
#[macro_use]
mod trace;
pub mod value;

// Re-export key types
pub use error::{DriverError, ErrorBag, QuarryError, Result, StatementKind};
pub use query::{Aggregate, Assignment, Direction, Grammar, Operator, Query, Row, Statement};
pub use quarry_types::Dialect;
pub use sql::{Sql, SqlChunk};
pub use value::{ModelKey, STORAGE_DATE_FORMAT, Value};
