use std::fmt;

use quarry_types::Dialect;

use crate::sql::Sql;
use crate::value::Value;

/// A compiled statement: SQL text plus the positional parameters, in the order
/// their placeholders appear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Renders a fragment for `dialect`.
    pub fn render(sql: &Sql, dialect: Dialect) -> Self {
        let (sql, params) = sql.build(dialect);
        Self { sql, params }
    }

    /// Statement with no parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}
