//! Queries bound to a registered model.
//!
//! [`ModelQuery`] pairs a [`Query`] descriptor with the model's metadata: it
//! applies the soft-delete scope, hydrates rows into entities and runs the
//! requested eager loads. Like the descriptor it is a value; every builder
//! method returns a new query.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use quarry_core::{
    Aggregate, Assignment, Direction, Operator, QuarryError, Query, Result, Row, Sql, Statement, Value,
};

use crate::collection::Collection;
use crate::database::Database;
use crate::eager::{self, EagerLoad};
use crate::entity::Entity;
use crate::model::ModelMeta;
use crate::pagination::{LengthAwarePaginator, Paginator};
use crate::persist::fresh_timestamp;

/// Which soft-deleted rows a query sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrashedScope {
    #[default]
    Without,
    With,
    Only,
}

#[derive(Clone)]
pub struct ModelQuery {
    db: Database,
    meta: Arc<ModelMeta>,
    query: Query,
    eager: Vec<EagerLoad>,
    trashed: TrashedScope,
}

macro_rules! delegate {
    ($($(#[$attr:meta])* fn $name:ident($($arg:ident: $ty:ty),*);)*) => {
        $(
            $(#[$attr])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.query = self.query.$name($($arg),*);
                self
            }
        )*
    };
}

impl ModelQuery {
    pub fn new(db: Database, meta: Arc<ModelMeta>) -> Self {
        Self {
            query: Query::new(meta.table()),
            db,
            meta,
            eager: Vec::new(),
            trashed: TrashedScope::default(),
        }
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// The caller's descriptor, without the soft-delete scope.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Transforms the underlying descriptor.
    pub fn apply(mut self, f: impl FnOnce(Query) -> Query) -> Self {
        self.query = f(self.query);
        self
    }

    delegate! {
        fn distinct();
        fn select_raw(expression: impl Into<String>);
        fn join(table: impl Into<String>, first: impl Into<String>, operator: Operator, second: impl Into<String>);
        fn left_join(table: impl Into<String>, first: impl Into<String>, operator: Operator, second: impl Into<String>);
        fn right_join(table: impl Into<String>, first: impl Into<String>, operator: Operator, second: impl Into<String>);
        fn where_op(column: impl Into<String>, operator: Operator, value: impl Into<Value>);
        fn or_where_op(column: impl Into<String>, operator: Operator, value: impl Into<Value>);
        fn where_eq(column: impl Into<String>, value: impl Into<Value>);
        fn or_where_eq(column: impl Into<String>, value: impl Into<Value>);
        fn where_column(first: impl Into<String>, operator: Operator, second: impl Into<String>);
        fn or_where_column(first: impl Into<String>, operator: Operator, second: impl Into<String>);
        fn where_null(column: impl Into<String>);
        fn or_where_null(column: impl Into<String>);
        fn where_not_null(column: impl Into<String>);
        fn or_where_not_null(column: impl Into<String>);
        fn where_raw(sql: impl Into<String>, bindings: Vec<Value>);
        fn or_where_raw(sql: impl Into<String>, bindings: Vec<Value>);
        fn having(column: impl Into<String>, operator: Operator, value: impl Into<Value>);
        fn or_having(column: impl Into<String>, operator: Operator, value: impl Into<Value>);
        fn having_raw(sql: impl Into<String>, bindings: Vec<Value>);
        fn order_by(column: impl Into<String>, direction: Direction);
        fn order_by_desc(column: impl Into<String>);
        fn order_by_raw(sql: impl Into<String>, bindings: Vec<Value>);
        fn latest(column: impl Into<String>);
        fn oldest(column: impl Into<String>);
        fn reorder();
        fn limit(limit: u64);
        fn offset(offset: u64);
        fn for_page(page: u64, per_page: u64);
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.select(columns);
        self
    }

    pub fn add_select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.add_select(columns);
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query = self.query.group_by(columns);
        self
    }

    /// Textual-operator comparison; unknown operators are rejected here.
    pub fn where_cmp(mut self, column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.query = self.query.where_cmp(column, operator, value)?;
        Ok(self)
    }

    pub fn or_where_cmp(mut self, column: impl Into<String>, operator: &str, value: impl Into<Value>) -> Result<Self> {
        self.query = self.query.or_where_cmp(column, operator, value)?;
        Ok(self)
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.where_in(column, values);
        self
    }

    pub fn or_where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.or_where_in(column, values);
        self
    }

    pub fn where_not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.where_not_in(column, values);
        self
    }

    pub fn or_where_not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.or_where_not_in(column, values);
        self
    }

    pub fn where_between<I, V>(mut self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.where_between(column, bounds)?;
        Ok(self)
    }

    pub fn or_where_between<I, V>(mut self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.or_where_between(column, bounds)?;
        Ok(self)
    }

    pub fn where_not_between<I, V>(mut self, column: impl Into<String>, bounds: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.query = self.query.where_not_between(column, bounds)?;
        Ok(self)
    }

    pub fn where_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.query = self.query.where_group(f);
        self
    }

    pub fn or_where_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.query = self.query.or_where_group(f);
        self
    }

    // -------------------------------------------------------------------------
    // Eager loads and scopes
    // -------------------------------------------------------------------------

    /// Relations to eager load; dotted paths load nested relations.
    pub fn with<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in relations {
            eager::add_path(&mut self.eager, path.as_ref(), None);
        }
        self
    }

    /// Eager loads `path`, constraining the query of its last segment.
    pub fn with_constraint<F>(mut self, path: &str, constraint: F) -> Self
    where
        F: Fn(ModelQuery) -> ModelQuery + Send + Sync + 'static,
    {
        eager::add_path(&mut self.eager, path, Some(Arc::new(constraint)));
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.trashed = TrashedScope::With;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = TrashedScope::Only;
        self
    }

    pub fn without_trashed(mut self) -> Self {
        self.trashed = TrashedScope::Without;
        self
    }

    /// The descriptor that is actually executed.
    pub fn scoped(&self) -> Query {
        let mut query = self.query.clone();
        let Some(column) = self.meta.soft_delete_column() else {
            return query;
        };
        if self.trashed == TrashedScope::With {
            return query;
        }
        if query.has_or_wheres() {
            query = query.wrap_wheres();
        }
        let column = self.meta.qualify(column);
        match self.trashed {
            TrashedScope::Only => query.where_not_null(column),
            _ => query.where_null(column),
        }
    }

    pub fn to_statement(&self) -> Statement {
        self.db.grammar().compile_select(&self.scoped())
    }

    // -------------------------------------------------------------------------
    // Fetching
    // -------------------------------------------------------------------------

    pub fn get(&self) -> Result<Collection> {
        quarry_core::quarry_profile_function!();
        let mut entities = self.fetch(&self.scoped())?;
        self.eager_load(&mut entities)?;
        Ok(Collection::new(entities))
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Entity>> {
        let rows = self.db.select(&self.db.grammar().compile_select(query))?;
        Ok(rows
            .into_iter()
            .map(|row| Entity::hydrate(self.db.clone(), Arc::clone(&self.meta), row))
            .collect())
    }

    fn eager_load(&self, entities: &mut [Entity]) -> Result<()> {
        if entities.is_empty() || self.eager.is_empty() {
            return Ok(());
        }
        eager::load(&self.db, &self.meta, entities, &self.eager)
    }

    pub fn first(&self) -> Result<Option<Entity>> {
        Ok(self.clone().limit(1).get()?.into_iter().next())
    }

    pub fn first_or_fail(&self) -> Result<Entity> {
        self.first()?.ok_or_else(|| QuarryError::NotFound {
            model: self.meta.name().to_string(),
            key: Value::Null,
        })
    }

    pub fn find(&self, key: impl Into<Value>) -> Result<Option<Entity>> {
        self.clone().where_eq(self.meta.qualified_key(), key).first()
    }

    pub fn find_or_fail(&self, key: impl Into<Value>) -> Result<Entity> {
        let key = key.into();
        self.find(key.clone())?.ok_or_else(|| QuarryError::NotFound {
            model: self.meta.name().to_string(),
            key,
        })
    }

    pub fn find_many<I, V>(&self, keys: I) -> Result<Collection>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clone().where_in(self.meta.qualified_key(), keys).get()
    }

    // -------------------------------------------------------------------------
    // Aggregates
    // -------------------------------------------------------------------------

    fn aggregate(&self, function: Aggregate, column: &str) -> Result<Value> {
        let stmt = self.db.grammar().compile_aggregate(&self.scoped(), function, column);
        let rows = self.db.select(&stmt)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("aggregate"))
            .unwrap_or_default())
    }

    pub fn count(&self) -> Result<u64> {
        let count = self.aggregate(Aggregate::Count, "*")?;
        Ok(count.as_i64().unwrap_or(0).max(0) as u64)
    }

    pub fn exists(&self) -> Result<bool> {
        let stmt = self.db.grammar().compile_exists(&self.scoped());
        let rows = self.db.select(&stmt)?;
        Ok(rows
            .first()
            .and_then(|row| row.get("exists"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    pub fn doesnt_exist(&self) -> Result<bool> {
        Ok(!self.exists()?)
    }

    pub fn max(&self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Max, column)
    }

    pub fn min(&self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Min, column)
    }

    /// Sum of `column`; zero when no rows match.
    pub fn sum(&self, column: &str) -> Result<Value> {
        let sum = self.aggregate(Aggregate::Sum, column)?;
        Ok(if sum.is_null() { Value::Int(0) } else { sum })
    }

    pub fn avg(&self, column: &str) -> Result<Value> {
        self.aggregate(Aggregate::Avg, column)
    }

    /// Values of one column.
    pub fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        let query = self.scoped().select([column]);
        let key = column.rsplit('.').next().unwrap_or(column);
        let rows = self.db.select(&self.db.grammar().compile_select(&query))?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(key).unwrap_or_default())
            .collect())
    }

    /// `column` of the first matching row.
    pub fn value(&self, column: &str) -> Result<Option<Value>> {
        Ok(self.clone().limit(1).pluck(column)?.into_iter().next())
    }

    // -------------------------------------------------------------------------
    // Paging
    // -------------------------------------------------------------------------

    fn per_page(&self, per_page: u64) -> u64 {
        if per_page == 0 { self.meta.per_page } else { per_page }
    }

    /// Page `page` (1-based) with the total row count. `per_page` of zero uses
    /// the model's default.
    pub fn paginate(&self, per_page: u64, page: u64) -> Result<LengthAwarePaginator> {
        let per_page = self.per_page(per_page);
        let page = page.max(1);
        let total = self.count()?;
        let items = if total == 0 {
            Collection::default()
        } else {
            self.clone().for_page(page, per_page).get()?
        };
        Ok(LengthAwarePaginator::new(items, total, per_page, page))
    }

    /// Page `page` without counting; fetches one extra row to detect a next page.
    pub fn simple_paginate(&self, per_page: u64, page: u64) -> Result<Paginator> {
        let per_page = self.per_page(per_page);
        let page = page.max(1);
        let query = self
            .scoped()
            .offset((page - 1).saturating_mul(per_page))
            .limit(per_page.saturating_add(1));
        let mut entities = self.fetch(&query)?;
        let has_more = entities.len() as u64 > per_page;
        entities.truncate(per_page as usize);
        self.eager_load(&mut entities)?;
        Ok(Paginator {
            items: Collection::new(entities),
            per_page,
            current_page: page,
            has_more,
        })
    }

    /// Feeds the results to `f` in pages of `size` by offset. Returns `false`
    /// if `f` stopped early.
    pub fn chunk<F>(&self, size: u64, mut f: F) -> Result<bool>
    where
        F: FnMut(Collection) -> Result<ControlFlow<()>>,
    {
        check_chunk_size(size)?;
        let base = if self.query.orders().is_empty() {
            self.clone().order_by(self.meta.qualified_key(), Direction::Asc)
        } else {
            self.clone()
        };
        let mut page = 1;
        loop {
            let results = base.clone().for_page(page, size).get()?;
            let count = results.len() as u64;
            if count == 0 {
                break;
            }
            if f(results)?.is_break() {
                return Ok(false);
            }
            if count < size {
                break;
            }
            page += 1;
        }
        Ok(true)
    }

    /// Like [`ModelQuery::chunk`], paging by primary key instead of offset so
    /// rows written between pages are neither skipped nor repeated.
    pub fn chunk_by_id<F>(&self, size: u64, mut f: F) -> Result<bool>
    where
        F: FnMut(Collection) -> Result<ControlFlow<()>>,
    {
        check_chunk_size(size)?;
        let mut after = None;
        loop {
            let results = self.key_page(size, after.take())?;
            let count = results.len() as u64;
            if count == 0 {
                break;
            }
            after = Some(self.last_key(&results)?);
            if f(results)?.is_break() {
                return Ok(false);
            }
            if count < size {
                break;
            }
        }
        Ok(true)
    }

    fn key_page(&self, size: u64, after: Option<Value>) -> Result<Collection> {
        let key = self.meta.qualified_key();
        let mut page = self.clone().reorder().order_by(key.clone(), Direction::Asc);
        page.query = page.query.unbounded().limit(size);
        if let Some(after) = after {
            page = page.where_op(key, Operator::Gt, after);
        }
        page.get()
    }

    fn last_key(&self, page: &Collection) -> Result<Value> {
        page.last()
            .map(Entity::key)
            .filter(|key| !key.is_null())
            .ok_or_else(|| {
                QuarryError::InvalidStatement(format!(
                    "paging by `{}` needs the key in the result columns",
                    self.meta.primary_key()
                ))
            })
    }

    /// Lazily iterates every matching entity in primary-key order, holding one
    /// page of `chunk_size` rows at a time.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            query: self.clone(),
            size: self.db.config().chunk_size.max(1),
            after: None,
            buffer: Vec::new().into_iter(),
            done: false,
        }
    }

    // -------------------------------------------------------------------------
    // Mass writes
    // -------------------------------------------------------------------------

    fn ensure_mutable(&self, operation: &'static str) -> Result<()> {
        if self.meta.is_immutable() {
            return Err(QuarryError::ImmutableEntity {
                model: self.meta.name().to_string(),
                operation,
            });
        }
        Ok(())
    }

    fn run_update(&self, query: &Query, mut assignments: Vec<(String, Assignment)>) -> Result<u64> {
        if let Some(timestamps) = self.meta.timestamps() {
            if !assignments.iter().any(|(c, _)| *c == timestamps.updated_at) {
                assignments.push((timestamps.updated_at.clone(), Assignment::Value(fresh_timestamp())));
            }
        }
        let stmt = self.db.grammar().compile_update(query, &assignments)?;
        self.db.statement(&stmt)
    }

    /// Updates every matching row; returns the number of affected rows.
    pub fn update<I, K, V>(&self, values: I) -> Result<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.ensure_mutable("updated")?;
        let assignments = values
            .into_iter()
            .map(|(column, value)| (column.into(), Assignment::Value(value.into())))
            .collect();
        self.run_update(&self.scoped(), assignments)
    }

    /// Deletes every matching row; soft-deletable models are stamped instead.
    pub fn delete(&self) -> Result<u64> {
        self.ensure_mutable("deleted")?;
        match self.meta.soft_delete_column() {
            Some(column) => self.run_update(
                &self.scoped(),
                vec![(column.to_string(), Assignment::Value(fresh_timestamp()))],
            ),
            None => self.db.statement(&self.db.grammar().compile_delete(&self.scoped())),
        }
    }

    /// Physically deletes every matching row.
    pub fn force_delete(&self) -> Result<u64> {
        self.ensure_mutable("deleted")?;
        self.db.statement(&self.db.grammar().compile_delete(&self.scoped()))
    }

    /// Clears the deletion column of every matching trashed row.
    pub fn restore(&self) -> Result<u64> {
        let Some(column) = self.meta.soft_delete_column() else {
            return Err(QuarryError::Configuration(format!(
                "{} does not use soft deletes",
                self.meta.name()
            )));
        };
        let query = self.clone().only_trashed().scoped();
        self.run_update(&query, vec![(column.to_string(), Assignment::Value(Value::Null))])
    }

    /// Batch insert of raw rows; every row must carry the same columns.
    pub fn insert(&self, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let stmt = self.db.grammar().compile_insert(self.meta.table(), rows)?;
        self.db.statement(&stmt)
    }

    /// Inserts `rows`, updating `update` columns of rows that collide on
    /// `unique_by`. Managed timestamps are added to every row.
    pub fn upsert(&self, rows: &[Row], unique_by: &[&str], update: &[&str]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut rows = rows.to_vec();
        let mut update: Vec<&str> = update.to_vec();
        if let Some(timestamps) = self.meta.timestamps() {
            let now = fresh_timestamp();
            for row in &mut rows {
                for column in [&timestamps.created_at, &timestamps.updated_at] {
                    if !row.iter().any(|(c, _)| c == column) {
                        row.push((column.clone(), now.clone()));
                    }
                }
            }
            if !update.is_empty() && !update.contains(&timestamps.updated_at.as_str()) {
                update.push(&timestamps.updated_at);
            }
        }
        let stmt = self
            .db
            .grammar()
            .compile_upsert(self.meta.table(), &rows, unique_by, &update)?;
        self.db.statement(&stmt)
    }

    /// `column = column + amount` on every matching row.
    pub fn increment(&self, column: &str, amount: impl Into<Value>) -> Result<u64> {
        self.adjust(column, amount.into(), '+')
    }

    pub fn decrement(&self, column: &str, amount: impl Into<Value>) -> Result<u64> {
        self.adjust(column, amount.into(), '-')
    }

    fn adjust(&self, column: &str, amount: Value, op: char) -> Result<u64> {
        self.ensure_mutable("updated")?;
        let mut expression = Sql::ident(column);
        expression.push_raw(format!(" {op} ")).push_param(amount);
        self.run_update(&self.scoped(), vec![(column.to_string(), Assignment::Raw(expression))])
    }
}

fn check_chunk_size(size: u64) -> Result<()> {
    if size == 0 {
        return Err(QuarryError::InvalidStatement("chunk size must be positive".into()));
    }
    Ok(())
}

impl fmt::Debug for ModelQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelQuery")
            .field("model", &self.meta.name())
            .field("query", &self.query)
            .field("eager", &self.eager)
            .field("trashed", &self.trashed)
            .finish()
    }
}

/// Iterator returned by [`ModelQuery::cursor`].
pub struct Cursor {
    query: ModelQuery,
    size: u64,
    after: Option<Value>,
    buffer: std::vec::IntoIter<Entity>,
    done: bool,
}

impl Cursor {
    fn fetch_page(&mut self) -> Result<()> {
        let page = self.query.key_page(self.size, self.after.take())?;
        if (page.len() as u64) < self.size {
            self.done = true;
        }
        if !page.is_empty() {
            self.after = Some(self.query.last_key(&page)?);
        }
        self.buffer = page.into_vec().into_iter();
        Ok(())
    }
}

impl Iterator for Cursor {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.buffer.next() {
                return Some(Ok(entity));
            }
            if self.done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("query", &self.query)
            .field("size", &self.size)
            .field("after", &self.after)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
