//! The immutable query descriptor and its chainable builder methods.
//!
//! Every builder method consumes the descriptor and returns a new one; nothing
//! inside is reference counted, so a `clone()` taken before branching never
//! shares predicate storage with the branch.

use crate::error::Result;
use crate::value::Value;

use super::predicate::{Boolean, Clause, Operator, Predicate, between_bounds};

/// Largest LIMIT or OFFSET a descriptor carries; every dialect accepts a
/// signed 64-bit row count.
pub const MAX_ROWS: u64 = i64::MAX as u64;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Column { column: String, direction: Direction },
    Raw { sql: String, bindings: Vec<Value> },
}

/// A projected column.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Quoted identifier, `table.column` and `x as y` supported
    Name(String),
    /// Emitted verbatim
    Raw(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

/// Accumulated state of a not-yet-executed query.
///
/// # Example
///
/// ```
/// use quarry_core::query::{Grammar, Query};
/// use quarry_core::Dialect;
///
/// let q = Query::new("users")
///     .where_eq("status", "active")
///     .where_in("role", ["admin", "editor"])
///     .order_by_desc("id")
///     .limit(10);
/// let stmt = Grammar::new(Dialect::MySQL).compile_select(&q);
/// assert_eq!(
///     stmt.sql,
///     "SELECT * FROM `users` WHERE `status` = ? AND `role` IN (?, ?) ORDER BY `id` DESC LIMIT 10"
/// );
/// assert_eq!(stmt.params.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub(crate) table: String,
    pub(crate) columns: Vec<Column>,
    pub(crate) distinct: bool,
    pub(crate) joins: Vec<Join>,
    pub(crate) wheres: Vec<Clause>,
    pub(crate) groups: Vec<String>,
    pub(crate) havings: Vec<Clause>,
    pub(crate) orders: Vec<Order>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl Query {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn wheres(&self) -> &[Clause] {
        &self.wheres
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn get_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn get_offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// `true` if any top-level predicate is joined with OR.
    pub fn has_or_wheres(&self) -> bool {
        self.wheres.iter().any(|c| c.boolean == Boolean::Or)
    }

    // -------------------------------------------------------------------------
    // Projection
    // -------------------------------------------------------------------------

    /// Replaces the projection.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(|c| Column::Name(c.into())).collect();
        self
    }

    pub fn add_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns
            .extend(columns.into_iter().map(|c| Column::Name(c.into())));
        self
    }

    pub fn select_raw(mut self, expression: impl Into<String>) -> Self {
        self.columns.push(Column::Raw(expression.into()));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    // -------------------------------------------------------------------------
    // Joins
    // -------------------------------------------------------------------------

    pub fn join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.join_kind(JoinKind::Inner, table, first, operator, second)
    }

    pub fn left_join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.join_kind(JoinKind::Left, table, first, operator, second)
    }

    pub fn right_join(
        self,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.join_kind(JoinKind::Right, table, first, operator, second)
    }

    fn join_kind(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            kind,
            table: table.into(),
            first: first.into(),
            operator,
            second: second.into(),
        });
        self
    }

    // -------------------------------------------------------------------------
    // Predicates
    // -------------------------------------------------------------------------

    /// Appends an already-built predicate.
    pub fn push_where(mut self, boolean: Boolean, predicate: Predicate) -> Self {
        self.wheres.push(Clause { boolean, predicate });
        self
    }

    pub fn where_op(self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        let predicate = basic(column.into(), operator, value.into());
        self.push_where(Boolean::And, predicate)
    }

    pub fn or_where_op(
        self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let predicate = basic(column.into(), operator, value.into());
        self.push_where(Boolean::Or, predicate)
    }

    /// Like [`Query::where_op`] with a textual operator; unknown operators fail here.
    pub fn where_cmp(self, column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Result<Self> {
        let operator = Operator::parse(operator)?;
        Ok(self.where_op(column, operator, value))
    }

    pub fn or_where_cmp(
        self,
        column: impl Into<String>,
        operator: &str,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let operator = Operator::parse(operator)?;
        Ok(self.or_where_op(column, operator, value))
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    pub fn or_where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.or_where_op(column, Operator::Eq, value)
    }

    pub fn where_column(
        self,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.push_where(
            Boolean::And,
            Predicate::Column {
                first: first.into(),
                operator,
                second: second.into(),
            },
        )
    }

    pub fn or_where_column(
        self,
        first: impl Into<String>,
        operator: Operator,
        second: impl Into<String>,
    ) -> Self {
        self.push_where(
            Boolean::Or,
            Predicate::Column {
                first: first.into(),
                operator,
                second: second.into(),
            },
        )
    }

    pub fn where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_where(Boolean::And, in_predicate(column.into(), values, false))
    }

    pub fn or_where_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_where(Boolean::Or, in_predicate(column.into(), values, false))
    }

    pub fn where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_where(Boolean::And, in_predicate(column.into(), values, true))
    }

    pub fn or_where_not_in<I, V>(self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_where(Boolean::Or, in_predicate(column.into(), values, true))
    }

    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Boolean::And,
            Predicate::Null {
                column: column.into(),
                negated: false,
            },
        )
    }

    pub fn or_where_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Boolean::Or,
            Predicate::Null {
                column: column.into(),
                negated: false,
            },
        )
    }

    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Boolean::And,
            Predicate::Null {
                column: column.into(),
                negated: true,
            },
        )
    }

    pub fn or_where_not_null(self, column: impl Into<String>) -> Self {
        self.push_where(
            Boolean::Or,
            Predicate::Null {
                column: column.into(),
                negated: true,
            },
        )
    }

    /// `column BETWEEN low AND high`. Anything other than two bounds is rejected
    /// before the query is ever compiled.
    pub fn where_between<I, V>(self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.between(Boolean::And, column.into(), bounds, false)
    }

    pub fn or_where_between<I, V>(self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.between(Boolean::Or, column.into(), bounds, false)
    }

    pub fn where_not_between<I, V>(self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.between(Boolean::And, column.into(), bounds, true)
    }

    fn between<I, V>(self, boolean: Boolean, column: String, bounds: I, negated: bool) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let (low, high) = between_bounds(bounds)?;
        Ok(self.push_where(
            boolean,
            Predicate::Between {
                column,
                low,
                high,
                negated,
            },
        ))
    }

    pub fn where_raw(self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.push_where(
            Boolean::And,
            Predicate::Raw {
                sql: sql.into(),
                bindings,
            },
        )
    }

    pub fn or_where_raw(self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.push_where(
            Boolean::Or,
            Predicate::Raw {
                sql: sql.into(),
                bindings,
            },
        )
    }

    /// Adds a parenthesized group built by `f` on a fresh descriptor for the
    /// same table. An empty group adds nothing.
    pub fn where_group<F>(self, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.group(Boolean::And, f)
    }

    pub fn or_where_group<F>(self, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.group(Boolean::Or, f)
    }

    fn group<F>(self, boolean: Boolean, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        let nested = f(Query::new(self.table.clone()));
        if nested.wheres.is_empty() {
            return self;
        }
        self.push_where(boolean, Predicate::Nested(nested.wheres))
    }

    /// Moves every current predicate into one nested group so a following AND
    /// constrains the whole filter rather than its last OR branch.
    pub fn wrap_wheres(mut self) -> Self {
        if self.wheres.is_empty() {
            return self;
        }
        let wheres = std::mem::take(&mut self.wheres);
        self.wheres.push(Clause::and(Predicate::Nested(wheres)));
        self
    }

    // -------------------------------------------------------------------------
    // Grouping
    // -------------------------------------------------------------------------

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn having(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.havings
            .push(Clause::and(basic(column.into(), operator, value.into())));
        self
    }

    pub fn or_having(
        mut self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.havings
            .push(Clause::or(basic(column.into(), operator, value.into())));
        self
    }

    pub fn having_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.havings.push(Clause::and(Predicate::Raw {
            sql: sql.into(),
            bindings,
        }));
        self
    }

    // -------------------------------------------------------------------------
    // Ordering and bounds
    // -------------------------------------------------------------------------

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order::Column {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn order_by_desc(self, column: impl Into<String>) -> Self {
        self.order_by(column, Direction::Desc)
    }

    pub fn order_by_raw(mut self, sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        self.orders.push(Order::Raw {
            sql: sql.into(),
            bindings,
        });
        self
    }

    pub fn latest(self, column: impl Into<String>) -> Self {
        self.order_by(column, Direction::Desc)
    }

    pub fn oldest(self, column: impl Into<String>) -> Self {
        self.order_by(column, Direction::Asc)
    }

    /// Drops every ORDER BY term.
    pub fn reorder(mut self) -> Self {
        self.orders.clear();
        self
    }

    /// Capped at [`MAX_ROWS`].
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit.min(MAX_ROWS));
        self
    }

    /// Capped at [`MAX_ROWS`].
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset.min(MAX_ROWS));
        self
    }

    /// Limit/offset for a 1-based page number. Pages past the end of the row
    /// space saturate instead of overflowing.
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        self.offset((page - 1).saturating_mul(per_page)).limit(per_page)
    }

    /// Drops limit and offset.
    pub fn unbounded(mut self) -> Self {
        self.limit = None;
        self.offset = None;
        self
    }
}

fn basic(column: String, operator: Operator, value: Value) -> Predicate {
    match (operator, value.is_null()) {
        (Operator::Eq, true) => Predicate::Null {
            column,
            negated: false,
        },
        (Operator::NotEq, true) => Predicate::Null {
            column,
            negated: true,
        },
        _ => Predicate::Basic {
            column,
            operator,
            value,
        },
    }
}

fn in_predicate<I, V>(column: String, values: I, negated: bool) -> Predicate
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Predicate::In {
        column,
        values: values.into_iter().map(Into::into).collect(),
        negated,
    }
}
