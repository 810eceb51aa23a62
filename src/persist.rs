//! Persistence of single entities: insert, update, delete, soft delete and the
//! relation writes that go with them.

use chrono::{SubsecRound, Utc};
use quarry_core::{Assignment, QuarryError, Query, Result, Row, Sql, Value};

use crate::entity::{Entity, RelationValue};
use crate::events::ModelEvent;
use crate::model_query::ModelQuery;
use crate::relation::RelationKind;

/// Current time, truncated to whole seconds.
pub(crate) fn fresh_timestamp() -> Value {
    Value::DateTime(Utc::now().naive_utc().trunc_subsecs(0))
}

impl Entity {
    /// Inserts or updates the row.
    ///
    /// Returns `Ok(false)` when validation fails (see [`Entity::errors`]) or a
    /// listener halts the save. An existing entity with no changes is a no-op
    /// that still returns `Ok(true)`.
    pub fn save(&mut self) -> Result<bool> {
        quarry_core::quarry_profile_function!();
        if self.exists && self.meta.is_immutable() && self.is_dirty() {
            return Err(self.immutable("updated"));
        }
        if !self.validate() {
            return Ok(false);
        }
        if !self.fire(ModelEvent::Saving) {
            return Ok(false);
        }
        let saved = if self.exists {
            self.perform_update()?
        } else {
            self.perform_insert()?
        };
        if saved {
            self.fire(ModelEvent::Saved);
            self.sync_original();
        }
        Ok(saved)
    }

    /// Like [`Entity::save`] inside a transaction, with validation failures
    /// raised as [`QuarryError::ValidationFailed`].
    pub fn save_or_fail(&mut self) -> Result<bool> {
        let db = self.db.clone();
        let saved = db.transaction(|_| self.save())?;
        if !saved && !self.errors.is_empty() {
            return Err(QuarryError::ValidationFailed(self.errors.clone()));
        }
        Ok(saved)
    }

    /// Fills `attributes` and saves.
    pub fn update<I, K, V>(&mut self, attributes: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        if !self.exists {
            return Ok(false);
        }
        self.fill(attributes)?;
        self.save()
    }

    /// Runs the model's validators. The error bag is replaced on every run.
    pub fn validate(&mut self) -> bool {
        let meta = std::sync::Arc::clone(&self.meta);
        let mut errors = quarry_core::ErrorBag::new();
        for validator in &meta.validators {
            validator(self, &mut errors);
        }
        self.errors = errors;
        self.errors.is_empty()
    }

    fn perform_insert(&mut self) -> Result<bool> {
        if !self.fire(ModelEvent::Creating) {
            return Ok(false);
        }
        self.update_timestamps();
        if let Some(column) = self.meta.version_column() {
            if self.get_raw(column).is_null() {
                self.attributes.insert(column.to_string(), Value::Int(1));
            }
        }

        let pk = self.meta.primary_key().to_string();
        let row: Row = self
            .attributes
            .iter()
            .filter(|(column, value)| !(**column == pk && value.is_null()))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        let stmt = self.db.grammar().compile_insert(self.meta.table(), &[row])?;

        if self.meta.incrementing && self.key().is_null() {
            let id = self.db.insert_get_id(&stmt)?;
            self.attributes.insert(pk, id);
        } else {
            self.db.statement(&stmt)?;
        }

        self.exists = true;
        self.was_recently_created = true;
        self.fire(ModelEvent::Created);
        Ok(true)
    }

    fn perform_update(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(true);
        }
        self.check_transitions()?;
        if !self.fire(ModelEvent::Updating) {
            return Ok(false);
        }
        self.update_timestamps();

        let dirty = self.get_dirty();
        if dirty.is_empty() {
            return Ok(true);
        }
        let mut query = self.key_query()?;
        let mut assignments: Vec<(String, Assignment)> = dirty
            .into_iter()
            .map(|(column, value)| (column, Assignment::Value(value)))
            .collect();

        let mut expected = None;
        if let Some(column) = self.meta.version_column().map(str::to_string) {
            let current = self.get_raw_original(&column);
            let next = Value::Int(current.as_i64().unwrap_or(0) + 1);
            query = query.where_eq(column.as_str(), current.clone());
            assignments.retain(|(c, _)| *c != column);
            assignments.push((column.clone(), Assignment::Value(next.clone())));
            self.attributes.insert(column.clone(), next);
            expected = Some((column, current));
        }

        let stmt = self.db.grammar().compile_update(&query, &assignments)?;
        let affected = self.db.statement(&stmt)?;
        if let Some((column, version)) = expected {
            if affected == 0 {
                self.attributes.insert(column, version.clone());
                return Err(QuarryError::ConcurrencyConflict {
                    model: self.meta.name().to_string(),
                    key: self.key(),
                    version,
                });
            }
        }

        self.sync_changes();
        self.fire(ModelEvent::Updated);
        Ok(true)
    }

    fn check_transitions(&self) -> Result<()> {
        for (attribute, rules) in &self.meta.transitions {
            if !self.is_dirty_attribute(attribute) {
                continue;
            }
            let from = self.get_original(attribute)?;
            let to = self.cast_from_storage(attribute, &self.get_raw(attribute))?;
            if !rules.allows(&from, &to) {
                return Err(QuarryError::IllegalStateTransition {
                    attribute: attribute.clone(),
                    from,
                    to,
                });
            }
        }
        Ok(())
    }

    fn update_timestamps(&mut self) {
        let Some(timestamps) = self.meta.timestamps().cloned() else {
            return;
        };
        let now = fresh_timestamp();
        if !self.is_dirty_attribute(&timestamps.updated_at) {
            self.attributes.insert(timestamps.updated_at, now.clone());
        }
        if !self.exists && !self.is_dirty_attribute(&timestamps.created_at) {
            self.attributes.insert(timestamps.created_at, now);
        }
    }

    /// `WHERE pk = ?` for this entity's stored row.
    pub(crate) fn key_query(&self) -> Result<Query> {
        let pk = self.meta.primary_key();
        let key = match self.original.get(pk) {
            Some(value) if !value.is_null() => value.clone(),
            _ => self.key(),
        };
        if key.is_null() {
            return Err(QuarryError::InvalidStatement(format!(
                "{} has no primary key value",
                self.meta.name()
            )));
        }
        Ok(Query::new(self.meta.table()).where_eq(pk, key))
    }

    fn immutable(&self, operation: &'static str) -> QuarryError {
        QuarryError::ImmutableEntity {
            model: self.meta.name().to_string(),
            operation,
        }
    }

    // -------------------------------------------------------------------------
    // Delete / restore
    // -------------------------------------------------------------------------

    /// Deletes the row, or stamps its deletion column for soft-deletable models.
    pub fn delete(&mut self) -> Result<bool> {
        if self.meta.is_immutable() {
            return Err(self.immutable("deleted"));
        }
        if !self.exists {
            return Ok(false);
        }
        if !self.fire(ModelEvent::Deleting) {
            return Ok(false);
        }
        match self.meta.soft_delete_column().map(str::to_string) {
            Some(column) => self.run_soft_delete(&column)?,
            None => self.perform_delete()?,
        }
        self.fire(ModelEvent::Deleted);
        Ok(true)
    }

    /// Removes the row even for soft-deletable models.
    pub fn force_delete(&mut self) -> Result<bool> {
        if self.meta.is_immutable() {
            return Err(self.immutable("deleted"));
        }
        if !self.exists {
            return Ok(false);
        }
        if !self.fire(ModelEvent::Deleting) {
            return Ok(false);
        }
        self.perform_delete()?;
        self.fire(ModelEvent::Deleted);
        Ok(true)
    }

    fn perform_delete(&mut self) -> Result<()> {
        let stmt = self.db.grammar().compile_delete(&self.key_query()?);
        self.db.statement(&stmt)?;
        self.exists = false;
        Ok(())
    }

    fn run_soft_delete(&mut self, column: &str) -> Result<()> {
        let now = fresh_timestamp();
        let mut columns = vec![column.to_string()];
        if let Some(timestamps) = self.meta.timestamps() {
            columns.push(timestamps.updated_at.clone());
        }
        let assignments: Vec<(String, Assignment)> = columns
            .iter()
            .map(|c| (c.clone(), Assignment::Value(now.clone())))
            .collect();
        let stmt = self.db.grammar().compile_update(&self.key_query()?, &assignments)?;
        self.db.statement(&stmt)?;
        for c in &columns {
            self.attributes.insert(c.clone(), now.clone());
            self.sync_original_attribute(c);
        }
        Ok(())
    }

    /// Clears the deletion column of a soft-deleted entity and saves it.
    pub fn restore(&mut self) -> Result<bool> {
        let Some(column) = self.meta.soft_delete_column().map(str::to_string) else {
            return Err(QuarryError::Configuration(format!(
                "{} does not use soft deletes",
                self.meta.name()
            )));
        };
        if !self.fire(ModelEvent::Restoring) {
            return Ok(false);
        }
        self.attributes.insert(column, Value::Null);
        self.exists = true;
        let saved = self.save()?;
        if saved {
            self.fire(ModelEvent::Restored);
        }
        Ok(saved)
    }

    /// `true` when the deletion column is set.
    pub fn trashed(&self) -> bool {
        self.meta
            .soft_delete_column()
            .is_some_and(|column| !self.get_raw(column).is_null())
    }

    /// Bumps `updated_at` and saves.
    pub fn touch(&mut self) -> Result<bool> {
        let Some(updated_at) = self.meta.timestamps().map(|t| t.updated_at.clone()) else {
            return Ok(false);
        };
        self.attributes.insert(updated_at, fresh_timestamp());
        self.save()
    }

    // -------------------------------------------------------------------------
    // Reloading
    // -------------------------------------------------------------------------

    /// Reloads attributes from the store, along with any loaded relations.
    pub fn refresh(&mut self) -> Result<()> {
        if !self.exists {
            return Ok(());
        }
        let fresh = self.fetch_fresh()?.ok_or_else(|| QuarryError::NotFound {
            model: self.meta.name().to_string(),
            key: self.key(),
        })?;
        self.attributes = fresh.attributes;
        self.sync_original();
        let relations: Vec<String> = self.relations.keys().cloned().collect();
        self.relations.clear();
        if !relations.is_empty() {
            self.load(relations)?;
        }
        Ok(())
    }

    /// A newly fetched copy of this entity, with the same relations loaded.
    pub fn fresh(&self) -> Result<Option<Entity>> {
        if !self.exists {
            return Ok(None);
        }
        let Some(mut fresh) = self.fetch_fresh()? else {
            return Ok(None);
        };
        let relations: Vec<String> = self.relations.keys().cloned().collect();
        if !relations.is_empty() {
            fresh.load(relations)?;
        }
        Ok(Some(fresh))
    }

    fn fetch_fresh(&self) -> Result<Option<Entity>> {
        ModelQuery::new(self.db.clone(), std::sync::Arc::clone(&self.meta))
            .with_trashed()
            .where_eq(self.meta.primary_key(), self.key())
            .first()
    }

    /// Unsaved copy without the key, managed timestamps or `except` columns.
    pub fn replicate(&self, except: &[&str]) -> Entity {
        let mut skip: Vec<&str> = vec![self.meta.primary_key()];
        if let Some(timestamps) = self.meta.timestamps() {
            skip.push(&timestamps.created_at);
            skip.push(&timestamps.updated_at);
        }
        skip.extend_from_slice(except);
        let mut copy = Entity::new(self.db.clone(), std::sync::Arc::clone(&self.meta));
        copy.attributes = self
            .attributes
            .iter()
            .filter(|(column, _)| !skip.contains(&column.as_str()))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        copy.relations = self.relations.clone();
        copy
    }

    // -------------------------------------------------------------------------
    // Atomic counters
    // -------------------------------------------------------------------------

    /// `column = column + amount` in the store, mirrored locally.
    pub fn increment(&mut self, column: &str, amount: impl Into<Value>) -> Result<bool> {
        self.adjust(column, amount.into(), '+')
    }

    pub fn decrement(&mut self, column: &str, amount: impl Into<Value>) -> Result<bool> {
        self.adjust(column, amount.into(), '-')
    }

    fn adjust(&mut self, column: &str, amount: Value, op: char) -> Result<bool> {
        let current = self.get_raw(column);
        let next = apply_delta(&current, &amount, op)?;
        if !self.exists {
            self.attributes.insert(column.to_string(), next);
            return Ok(true);
        }
        if self.meta.is_immutable() {
            return Err(self.immutable("updated"));
        }
        if !self.fire(ModelEvent::Updating) {
            return Ok(false);
        }

        let mut expression = Sql::ident(column);
        expression.push_raw(format!(" {op} ")).push_param(amount);
        let mut assignments = vec![(column.to_string(), Assignment::Raw(expression))];
        let mut touched = vec![column.to_string()];
        self.attributes.insert(column.to_string(), next);
        if let Some(timestamps) = self.meta.timestamps() {
            let now = fresh_timestamp();
            assignments.push((timestamps.updated_at.clone(), Assignment::Value(now.clone())));
            self.attributes.insert(timestamps.updated_at.clone(), now);
            touched.push(timestamps.updated_at.clone());
        }

        let stmt = self.db.grammar().compile_update(&self.key_query()?, &assignments)?;
        self.db.statement(&stmt)?;
        for c in &touched {
            self.sync_original_attribute(c);
        }
        self.fire(ModelEvent::Updated);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Relation writes
    // -------------------------------------------------------------------------

    /// Points an owned-by relation at `owner` and caches it.
    pub fn associate(&mut self, relation: &str, owner: &Entity) -> Result<&mut Self> {
        let relation = self.meta.relation(relation)?.clone();
        match &relation.kind {
            RelationKind::OwnedBy {
                foreign_key,
                owner_key,
            } => {
                let value = owner.get_raw(owner_key);
                self.attributes.insert(foreign_key.clone(), value);
            }
            RelationKind::PolymorphicOwnedBy {
                type_column,
                id_column,
            } => {
                let morph_type = self.db.morph_type_of(&owner.meta);
                self.attributes.insert(type_column.clone(), Value::Text(morph_type));
                self.attributes.insert(id_column.clone(), owner.key());
            }
            other => return Err(not_owned_by(&relation.name, other)),
        }
        self.set_relation(relation.name, RelationValue::One(Some(Box::new(owner.clone()))));
        Ok(self)
    }

    /// Clears the keys of an owned-by relation.
    pub fn dissociate(&mut self, relation: &str) -> Result<&mut Self> {
        let relation = self.meta.relation(relation)?.clone();
        match &relation.kind {
            RelationKind::OwnedBy { foreign_key, .. } => {
                self.attributes.insert(foreign_key.clone(), Value::Null);
            }
            RelationKind::PolymorphicOwnedBy {
                type_column,
                id_column,
            } => {
                self.attributes.insert(type_column.clone(), Value::Null);
                self.attributes.insert(id_column.clone(), Value::Null);
            }
            other => return Err(not_owned_by(&relation.name, other)),
        }
        self.set_relation(relation.name, RelationValue::One(None));
        Ok(self)
    }

    /// Inserts pivot rows linking this entity to `ids`.
    pub fn attach<I, V>(&mut self, relation: &str, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let rows = ids.into_iter().map(|id| (id.into(), Vec::new())).collect();
        self.insert_pivot_rows(relation, rows)
    }

    /// Inserts one pivot row carrying extra pivot columns.
    pub fn attach_with<V: Into<Value>>(
        &mut self,
        relation: &str,
        id: V,
        pivot: Vec<(String, Value)>,
    ) -> Result<u64> {
        self.insert_pivot_rows(relation, vec![(id.into(), pivot)])
    }

    fn insert_pivot_rows(&mut self, relation: &str, ids: Vec<(Value, Row)>) -> Result<u64> {
        let relation = self.meta.relation(relation)?.clone();
        let RelationKind::ManyToMany {
            pivot_table,
            foreign_pivot_key,
            related_pivot_key,
            parent_key,
            ..
        } = &relation.kind
        else {
            return Err(not_many_to_many(&relation.name));
        };
        if ids.is_empty() {
            return Ok(0);
        }
        let parent = self.get_raw(parent_key);
        let rows: Vec<Row> = ids
            .into_iter()
            .map(|(id, extra)| {
                let mut row = vec![
                    (foreign_pivot_key.clone(), parent.clone()),
                    (related_pivot_key.clone(), id),
                ];
                row.extend(extra);
                row
            })
            .collect();
        // Mixed extra columns are inserted row by row.
        let uniform = rows.windows(2).all(|w| w[0].len() == w[1].len());
        let grammar = self.db.grammar();
        let mut inserted = 0;
        if uniform {
            inserted += self.db.statement(&grammar.compile_insert(pivot_table, &rows)?)?;
        } else {
            for row in rows {
                inserted += self.db.statement(&grammar.compile_insert(pivot_table, &[row])?)?;
            }
        }
        self.unset_relation(&relation.name);
        Ok(inserted)
    }

    /// Deletes the pivot rows linking this entity to `ids`.
    pub fn detach<I, V>(&mut self, relation: &str, ids: I) -> Result<u64>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        self.delete_pivot_rows(relation, Some(ids))
    }

    /// Deletes every pivot row of this entity.
    pub fn detach_all(&mut self, relation: &str) -> Result<u64> {
        self.delete_pivot_rows(relation, None)
    }

    fn delete_pivot_rows(&mut self, relation: &str, ids: Option<Vec<Value>>) -> Result<u64> {
        let relation = self.meta.relation(relation)?.clone();
        let RelationKind::ManyToMany {
            pivot_table,
            foreign_pivot_key,
            related_pivot_key,
            parent_key,
            ..
        } = &relation.kind
        else {
            return Err(not_many_to_many(&relation.name));
        };
        let mut query =
            Query::new(pivot_table.as_str()).where_eq(foreign_pivot_key.as_str(), self.get_raw(parent_key));
        if let Some(ids) = ids {
            query = query.where_in(related_pivot_key.as_str(), ids);
        }
        let affected = self.db.statement(&self.db.grammar().compile_delete(&query))?;
        self.unset_relation(&relation.name);
        Ok(affected)
    }
}

fn not_owned_by(name: &str, kind: &RelationKind) -> QuarryError {
    QuarryError::InvalidStatement(format!(
        "relation `{name}` is {}, expected an owned-by relation",
        kind.as_str()
    ))
}

fn not_many_to_many(name: &str) -> QuarryError {
    QuarryError::InvalidStatement(format!("relation `{name}` is not many-to-many"))
}

fn apply_delta(current: &Value, amount: &Value, op: char) -> Result<Value> {
    let sign: i64 = if op == '-' { -1 } else { 1 };
    if let (Value::Int(_) | Value::Null, Value::Int(delta)) = (current, amount) {
        let base = current.as_i64().unwrap_or(0);
        return delta
            .checked_mul(sign)
            .and_then(|delta| base.checked_add(delta))
            .map(Value::Int)
            .ok_or_else(|| {
                QuarryError::InvalidStatement(format!("{current} {op} {amount} overflows a 64-bit integer"))
            });
    }
    match (current.as_f64().or(current.is_null().then_some(0.0)), amount.as_f64()) {
        (Some(base), Some(delta)) => Ok(Value::Float(base + sign as f64 * delta)),
        _ => Err(QuarryError::InvalidStatement(format!(
            "cannot add {amount} to non-numeric value {current}"
        ))),
    }
}
