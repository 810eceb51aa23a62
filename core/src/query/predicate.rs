use std::fmt;
use std::str::FromStr;

use crate::error::{QuarryError, Result};
use crate::value::Value;

/// Connector placed before a predicate that is not the first in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Boolean::And => " AND ",
            Boolean::Or => " OR ",
        }
    }
}

/// Comparison operators accepted by basic and column predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
}

impl Operator {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }

    /// Parses a textual operator, rejecting anything outside the supported set.
    ///
    /// ```
    /// use quarry_core::query::Operator;
    ///
    /// assert_eq!(Operator::parse("<>").unwrap(), Operator::NotEq);
    /// assert_eq!(Operator::parse("like").unwrap(), Operator::Like);
    /// assert!(Operator::parse("=>").is_err());
    /// ```
    pub fn parse(op: &str) -> Result<Self> {
        let op = op.trim();
        Ok(match op {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::NotEq,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            _ if op.eq_ignore_ascii_case("like") => Operator::Like,
            _ if op.eq_ignore_ascii_case("not like") => Operator::NotLike,
            _ => {
                return Err(QuarryError::InvalidPredicate(format!(
                    "unsupported operator `{op}`"
                )));
            }
        })
    }
}

impl FromStr for Operator {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::parse(s)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One node of the predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column op ?`
    Basic {
        column: String,
        operator: Operator,
        value: Value,
    },
    /// `first op second`, both identifiers
    Column {
        first: String,
        operator: Operator,
        second: String,
    },
    /// `column [NOT] IN (?, ...)`
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// `column IS [NOT] NULL`
    Null { column: String, negated: bool },
    /// `column [NOT] BETWEEN ? AND ?`
    Between {
        column: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    /// Caller-supplied SQL with `?` bindings
    Raw { sql: String, bindings: Vec<Value> },
    /// Parenthesized sub-expression
    Nested(Vec<Clause>),
}

impl Predicate {
    /// Column this predicate filters on, when it has exactly one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Predicate::Basic { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Null { column, .. }
            | Predicate::Between { column, .. } => Some(column),
            _ => None,
        }
    }
}

/// A predicate tagged with the connector that joins it to its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub boolean: Boolean,
    pub predicate: Predicate,
}

impl Clause {
    pub fn and(predicate: Predicate) -> Self {
        Self {
            boolean: Boolean::And,
            predicate,
        }
    }

    pub fn or(predicate: Predicate) -> Self {
        Self {
            boolean: Boolean::Or,
            predicate,
        }
    }
}

/// Checks a between-predicate's bounds and splits them into `(low, high)`.
pub(crate) fn between_bounds<I, V>(bounds: I) -> Result<(Value, Value)>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    let mut bounds: Vec<Value> = bounds.into_iter().map(Into::into).collect();
    if bounds.len() != 2 {
        return Err(QuarryError::InvalidPredicate(format!(
            "between expects exactly two bounds, got {}",
            bounds.len()
        )));
    }
    let high = bounds.pop().unwrap_or_default();
    let low = bounds.pop().unwrap_or_default();
    Ok((low, high))
}
