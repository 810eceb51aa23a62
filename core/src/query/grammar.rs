//! Compiles [`Query`] descriptors into dialect-specific [`Statement`]s.

use quarry_types::{Dialect, UpsertStyle};

use crate::error::{QuarryError, Result};
use crate::sql::Sql;
use crate::value::Value;

use super::descriptor::{Column, Order, Query};
use super::predicate::{Clause, Predicate};
use super::statement::Statement;

/// Aggregate functions understood by [`Grammar::compile_aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Count,
    Max,
    Min,
    Sum,
    Avg,
}

impl Aggregate {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Max => "MAX",
            Aggregate::Min => "MIN",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
        }
    }
}

/// Right-hand side of a `SET` assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Value(Value),
    /// Raw expression, e.g. `` `views` + ? ``
    Raw(Sql),
}

impl From<Value> for Assignment {
    fn from(value: Value) -> Self {
        Assignment::Value(value)
    }
}

impl From<Sql> for Assignment {
    fn from(expression: Sql) -> Self {
        Assignment::Raw(expression)
    }
}

/// One row for an insert, as `(column, value)` pairs.
pub type Row = Vec<(String, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grammar {
    dialect: Dialect,
}

impl Grammar {
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub const fn dialect(&self) -> Dialect {
        self.dialect
    }

    // -------------------------------------------------------------------------
    // SELECT
    // -------------------------------------------------------------------------

    pub fn compile_select(&self, query: &Query) -> Statement {
        crate::quarry_profile_function!();
        Statement::render(&self.select_sql(query), self.dialect)
    }

    fn select_sql(&self, query: &Query) -> Sql {
        let mut sql = Sql::raw(if query.distinct {
            "SELECT DISTINCT "
        } else {
            "SELECT "
        });
        sql.push_sql(self.columns(&query.columns));
        sql.push_raw(" FROM ").push_ident(&query.table);
        sql.push_sql(self.joins(query));
        sql.push_sql(self.wheres_clause(&query.wheres));
        if !query.groups.is_empty() {
            sql.push_raw(" GROUP BY ");
            sql.push_sql(Sql::join(query.groups.iter().map(Sql::ident), ", "));
        }
        if !query.havings.is_empty() {
            sql.push_raw(" HAVING ");
            sql.push_sql(self.clauses(&query.havings));
        }
        if !query.orders.is_empty() {
            sql.push_raw(" ORDER BY ");
            sql.push_sql(self.orders(&query.orders));
        }
        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                sql.push_raw(format!(" LIMIT {limit}"));
                if let Some(offset) = offset {
                    sql.push_raw(format!(" OFFSET {offset}"));
                }
            }
            (None, Some(offset)) => {
                sql.push_raw(format!(
                    " LIMIT {} OFFSET {offset}",
                    self.dialect.unbounded_limit()
                ));
            }
            (None, None) => {}
        }
        sql
    }

    fn columns(&self, columns: &[Column]) -> Sql {
        if columns.is_empty() {
            return Sql::raw("*");
        }
        Sql::join(
            columns.iter().map(|column| match column {
                Column::Name(name) => Sql::ident(name),
                Column::Raw(expression) => Sql::raw(expression),
            }),
            ", ",
        )
    }

    fn joins(&self, query: &Query) -> Sql {
        let mut sql = Sql::empty();
        for join in &query.joins {
            sql.push_raw(" ")
                .push_raw(join.kind.as_sql())
                .push_raw(" ")
                .push_ident(&join.table)
                .push_raw(" ON ")
                .push_ident(&join.first)
                .push_raw(format!(" {} ", join.operator.as_sql()))
                .push_ident(&join.second);
        }
        sql
    }

    fn orders(&self, orders: &[Order]) -> Sql {
        Sql::join(
            orders.iter().map(|order| match order {
                Order::Column { column, direction } => {
                    Sql::ident(column).append_raw(format!(" {}", direction.as_sql()))
                }
                Order::Raw { sql, bindings } => Sql::raw_with_bindings(sql, bindings),
            }),
            ", ",
        )
    }

    /// ` WHERE ...`, or nothing for an empty predicate list.
    pub fn wheres_clause(&self, wheres: &[Clause]) -> Sql {
        if wheres.is_empty() {
            return Sql::empty();
        }
        Sql::raw(" WHERE ").append(self.clauses(wheres))
    }

    /// Predicate list joined by each clause's own connector.
    pub fn clauses(&self, clauses: &[Clause]) -> Sql {
        let mut sql = Sql::empty();
        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                sql.push_raw(clause.boolean.as_sql());
            }
            sql.push_sql(self.predicate(&clause.predicate));
        }
        sql
    }

    fn predicate(&self, predicate: &Predicate) -> Sql {
        match predicate {
            Predicate::Basic {
                column,
                operator,
                value,
            } => {
                let mut sql = Sql::ident(column);
                sql.push_raw(format!(" {} ", operator.as_sql()))
                    .push_param(value.clone());
                sql
            }
            Predicate::Column {
                first,
                operator,
                second,
            } => {
                let mut sql = Sql::ident(first);
                sql.push_raw(format!(" {} ", operator.as_sql()))
                    .push_ident(second);
                sql
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                // An empty list can never match (or always matches when negated).
                if values.is_empty() {
                    return Sql::raw(if *negated { "1 = 1" } else { "0 = 1" });
                }
                let mut sql = Sql::ident(column);
                sql.push_raw(if *negated { " NOT IN " } else { " IN " })
                    .push_group(Sql::params(values.iter().cloned()));
                sql
            }
            Predicate::Null { column, negated } => Sql::ident(column).append_raw(if *negated {
                " IS NOT NULL"
            } else {
                " IS NULL"
            }),
            Predicate::Between {
                column,
                low,
                high,
                negated,
            } => {
                let mut sql = Sql::ident(column);
                sql.push_raw(if *negated {
                    " NOT BETWEEN "
                } else {
                    " BETWEEN "
                })
                .push_param(low.clone())
                .push_raw(" AND ")
                .push_param(high.clone());
                sql
            }
            Predicate::Raw { sql, bindings } => Sql::raw_with_bindings(sql, bindings),
            Predicate::Nested(clauses) => {
                if clauses.is_empty() {
                    return Sql::raw("1 = 1");
                }
                let mut sql = Sql::empty();
                sql.push_group(self.clauses(clauses));
                sql
            }
        }
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    /// `SELECT FN(column) AS aggregate ...`. Ordering, limit and offset are
    /// dropped; grouped or distinct queries are counted through a derived table.
    pub fn compile_aggregate(&self, query: &Query, function: Aggregate, column: &str) -> Statement {
        let base = query.clone().reorder().unbounded();
        let target = if column == "*" {
            Sql::raw("*")
        } else {
            Sql::ident(column)
        };

        let mut sql = Sql::raw(format!("SELECT {}(", function.as_sql()));
        if !base.groups.is_empty() || base.distinct {
            sql.push_raw("*) AS ")
                .push_ident("aggregate")
                .push_raw(" FROM ")
                .push_group(self.select_sql(&base))
                .push_raw(" AS ")
                .push_ident("temp_table");
            return Statement::render(&sql, self.dialect);
        }

        sql.push_sql(target)
            .push_raw(") AS ")
            .push_ident("aggregate")
            .push_raw(" FROM ")
            .push_ident(&base.table);
        sql.push_sql(self.joins(&base));
        sql.push_sql(self.wheres_clause(&base.wheres));
        Statement::render(&sql, self.dialect)
    }

    pub fn compile_exists(&self, query: &Query) -> Statement {
        let mut sql = Sql::raw("SELECT EXISTS");
        sql.push_group(self.select_sql(query))
            .push_raw(" AS ")
            .push_ident("exists");
        Statement::render(&sql, self.dialect)
    }

    // -------------------------------------------------------------------------
    // INSERT
    // -------------------------------------------------------------------------

    /// Single or batch insert. Every row must carry the same column set.
    pub fn compile_insert(&self, table: &str, rows: &[Row]) -> Result<Statement> {
        let sql = self.insert_sql("INSERT INTO ", table, rows)?;
        Ok(Statement::render(&sql, self.dialect))
    }

    /// Insert that silently skips rows colliding with a unique key.
    pub fn compile_insert_or_ignore(&self, table: &str, rows: &[Row]) -> Result<Statement> {
        let sql = match self.dialect {
            Dialect::MySQL => self.insert_sql("INSERT IGNORE INTO ", table, rows)?,
            Dialect::SQLite => self.insert_sql("INSERT OR IGNORE INTO ", table, rows)?,
        };
        Ok(Statement::render(&sql, self.dialect))
    }

    /// Insert-or-update keyed on `unique_by`. An empty `update` list turns the
    /// statement into an insert-or-ignore.
    pub fn compile_upsert(
        &self,
        table: &str,
        rows: &[Row],
        unique_by: &[&str],
        update: &[&str],
    ) -> Result<Statement> {
        if update.is_empty() {
            return self.compile_insert_or_ignore(table, rows);
        }
        let mut sql = self.insert_sql("INSERT INTO ", table, rows)?;
        match self.dialect.upsert_style() {
            UpsertStyle::OnDuplicateKey => {
                sql.push_raw(" ON DUPLICATE KEY UPDATE ");
                sql.push_sql(Sql::join(
                    update.iter().map(|column| {
                        let mut s = Sql::ident(column);
                        s.push_raw(" = VALUES(").push_ident(column).push_raw(")");
                        s
                    }),
                    ", ",
                ));
            }
            UpsertStyle::OnConflict => {
                if unique_by.is_empty() {
                    return Err(QuarryError::InvalidStatement(
                        "upsert needs at least one unique-by column".into(),
                    ));
                }
                sql.push_raw(" ON CONFLICT ");
                sql.push_group(Sql::join(unique_by.iter().map(Sql::ident), ", "));
                sql.push_raw(" DO UPDATE SET ");
                sql.push_sql(Sql::join(
                    update.iter().map(|column| {
                        let mut s = Sql::ident(column);
                        s.push_raw(" = excluded.").push_ident(column);
                        s
                    }),
                    ", ",
                ));
            }
        }
        Ok(Statement::render(&sql, self.dialect))
    }

    fn insert_sql(&self, verb: &str, table: &str, rows: &[Row]) -> Result<Sql> {
        let Some(first) = rows.first() else {
            return Err(QuarryError::InvalidStatement(format!(
                "insert into `{table}` without rows"
            )));
        };

        let mut sql = Sql::raw(verb);
        sql.push_ident(table);

        if first.is_empty() {
            if rows.len() > 1 {
                return Err(QuarryError::InvalidStatement(
                    "batch insert of empty rows".into(),
                ));
            }
            sql.push_raw(" ").push_raw(self.dialect.empty_insert_values());
            return Ok(sql);
        }

        let columns: Vec<&str> = first.iter().map(|(c, _)| c.as_str()).collect();
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(mismatched_rows(table));
            }
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = row
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| mismatched_rows(table))?;
                values.push(value);
            }
            let mut tuple = Sql::empty();
            tuple.push_group(Sql::params(values));
            tuples.push(tuple);
        }

        sql.push_raw(" ");
        sql.push_group(Sql::join(columns.iter().map(Sql::ident), ", "));
        sql.push_raw(" VALUES ");
        sql.push_sql(Sql::join(tuples, ", "));
        Ok(sql)
    }

    // -------------------------------------------------------------------------
    // UPDATE / DELETE
    // -------------------------------------------------------------------------

    /// `UPDATE table SET ... WHERE ...` over the descriptor's predicates.
    pub fn compile_update(&self, query: &Query, assignments: &[(String, Assignment)]) -> Result<Statement> {
        if assignments.is_empty() {
            return Err(QuarryError::InvalidStatement(format!(
                "update of `{}` without assignments",
                query.table
            )));
        }
        let mut sql = Sql::raw("UPDATE ");
        sql.push_ident(&query.table).push_raw(" SET ");
        sql.push_sql(Sql::join(
            assignments.iter().map(|(column, assignment)| {
                let mut s = Sql::ident(column);
                s.push_raw(" = ");
                match assignment {
                    Assignment::Value(value) => s.push_param(value.clone()),
                    Assignment::Raw(expression) => s.push_sql(expression.clone()),
                };
                s
            }),
            ", ",
        ));
        sql.push_sql(self.wheres_clause(&query.wheres));
        Ok(Statement::render(&sql, self.dialect))
    }

    pub fn compile_delete(&self, query: &Query) -> Statement {
        let mut sql = Sql::raw("DELETE FROM ");
        sql.push_ident(&query.table);
        sql.push_sql(self.wheres_clause(&query.wheres));
        Statement::render(&sql, self.dialect)
    }
}

fn mismatched_rows(table: &str) -> QuarryError {
    QuarryError::InvalidStatement(format!(
        "batch insert into `{table}` mixes column sets"
    ))
}
