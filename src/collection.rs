//! Ordered sequences of entities.

use std::ops::Index;

use hashbrown::HashMap;
use quarry_core::{ModelKey, Result, Value};

use crate::entity::Entity;

/// An ordered list of entities with the keyed and grouped views the eager
/// loader needs.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    items: Vec<Entity>,
}

impl Collection {
    pub fn new(items: Vec<Entity>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Entity> {
        self.items.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&Entity> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Entity> {
        self.items.last()
    }

    pub fn push(&mut self, entity: Entity) {
        self.items.push(entity);
    }

    pub fn as_slice(&self) -> &[Entity] {
        &self.items
    }

    pub(crate) fn as_mut_vec(&mut self) -> &mut Vec<Entity> {
        &mut self.items
    }

    pub fn into_vec(self) -> Vec<Entity> {
        self.items
    }

    /// First entity whose primary key equals `key`.
    pub fn find(&self, key: impl Into<Value>) -> Option<&Entity> {
        let key = key.into().to_key()?;
        self.items
            .iter()
            .find(|entity| entity.key().to_key().as_ref() == Some(&key))
    }

    /// Primary keys, skipping entities without one.
    pub fn model_keys(&self) -> Vec<Value> {
        self.items
            .iter()
            .map(Entity::key)
            .filter(|key| !key.is_null())
            .collect()
    }

    /// Raw values of `column`, one per entity.
    pub fn pluck(&self, column: &str) -> Vec<Value> {
        self.items.iter().map(|entity| entity.get_raw(column)).collect()
    }

    /// Distinct non-null values of `column`, in first-seen order.
    pub fn unique_keys(&self, column: &str) -> Vec<Value> {
        unique_keys(self.items.iter(), column)
    }

    /// Entities by `column` value; later entities win on duplicate keys.
    pub fn key_by(&self, column: &str) -> HashMap<ModelKey, Entity> {
        self.items
            .iter()
            .filter_map(|entity| Some((entity.get_raw(column).to_key()?, entity.clone())))
            .collect()
    }

    /// Entities grouped by `column` value, preserving order inside each group.
    pub fn group_by(&self, column: &str) -> HashMap<ModelKey, Collection> {
        let mut groups: HashMap<ModelKey, Collection> = HashMap::new();
        for entity in &self.items {
            if let Some(key) = entity.get_raw(column).to_key() {
                groups.entry(key).or_default().push(entity.clone());
            }
        }
        groups
    }

    /// Entities satisfying `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Entity) -> bool) -> Collection {
        self.items.iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Eager loads `relations` onto every entity with one query per relation.
    pub fn load<I, S>(&mut self, relations: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(first) = self.items.first() else {
            return Ok(());
        };
        let db = first.db().clone();
        let meta = std::sync::Arc::clone(first.meta_arc());
        let loads = crate::eager::parse(relations);
        crate::eager::load(&db, &meta, &mut self.items, &loads)
    }
}

pub(crate) fn unique_keys<'a>(entities: impl Iterator<Item = &'a Entity>, column: &str) -> Vec<Value> {
    let mut seen = hashbrown::HashSet::new();
    let mut keys = Vec::new();
    for entity in entities {
        let value = entity.get_raw(column);
        if let Some(key) = value.to_key() {
            if seen.insert(key) {
                keys.push(value);
            }
        }
    }
    keys
}

impl Index<usize> for Collection {
    type Output = Entity;

    fn index(&self, index: usize) -> &Entity {
        &self.items[index]
    }
}

impl IntoIterator for Collection {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Entity> for Collection {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<Entity>> for Collection {
    fn from(items: Vec<Entity>) -> Self {
        Self { items }
    }
}
