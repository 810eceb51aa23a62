//! Entities: one row of a model, with its attribute store and loaded relations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use quarry_core::{ErrorBag, QuarryError, Result, Value};

use crate::collection::Collection;
use crate::connection::Record;
use crate::database::Database;
use crate::model::ModelMeta;

/// Attribute map, column name to storage value.
pub type Attributes = BTreeMap<String, Value>;

/// Loaded value of one relation.
#[derive(Debug, Clone)]
pub enum RelationValue {
    One(Option<Box<Entity>>),
    Many(Collection),
}

impl RelationValue {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            RelationValue::One(entity) => entity.as_deref(),
            RelationValue::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&Collection> {
        match self {
            RelationValue::Many(collection) => Some(collection),
            RelationValue::One(_) => None,
        }
    }

    /// Empty value for a relation of the given arity.
    pub(crate) fn empty(singular: bool) -> Self {
        if singular {
            RelationValue::One(None)
        } else {
            RelationValue::Many(Collection::default())
        }
    }
}

/// An addressable record of a registered model.
#[derive(Clone)]
pub struct Entity {
    pub(crate) db: Database,
    pub(crate) meta: Arc<ModelMeta>,
    pub(crate) attributes: Attributes,
    pub(crate) original: Attributes,
    pub(crate) changes: Attributes,
    pub(crate) relations: BTreeMap<String, RelationValue>,
    pub(crate) pivot: Option<Attributes>,
    pub(crate) exists: bool,
    pub(crate) was_recently_created: bool,
    pub(crate) errors: ErrorBag,
}

impl Entity {
    /// A new entity, not yet stored, holding the model's defaults.
    pub fn new(db: Database, meta: Arc<ModelMeta>) -> Self {
        let attributes = meta.defaults.clone();
        Self {
            db,
            meta,
            attributes,
            original: Attributes::new(),
            changes: Attributes::new(),
            relations: BTreeMap::new(),
            pivot: None,
            exists: false,
            was_recently_created: false,
            errors: ErrorBag::new(),
        }
    }

    /// An entity for a fetched row.
    pub fn hydrate(db: Database, meta: Arc<ModelMeta>, row: Record) -> Self {
        Self {
            db,
            meta,
            original: row.clone(),
            attributes: row,
            changes: Attributes::new(),
            relations: BTreeMap::new(),
            pivot: None,
            exists: true,
            was_recently_created: false,
            errors: ErrorBag::new(),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub(crate) fn meta_arc(&self) -> &Arc<ModelMeta> {
        &self.meta
    }

    pub fn model_name(&self) -> &str {
        self.meta.name()
    }

    /// `true` once the entity has a stored row.
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// `true` if this instance inserted its row.
    pub fn was_recently_created(&self) -> bool {
        self.was_recently_created
    }

    /// Primary key in storage form.
    pub fn key(&self) -> Value {
        self.get_raw(self.meta.primary_key())
    }

    /// Errors left by the last validation run.
    pub fn errors(&self) -> &ErrorBag {
        &self.errors
    }

    /// Pivot row of a many-to-many load.
    pub fn pivot(&self) -> Option<&Attributes> {
        self.pivot.as_ref()
    }

    /// Moves `pivot_*` columns out of the attribute store.
    pub(crate) fn take_pivot(&mut self, prefix: &str) {
        let columns: Vec<String> = self
            .attributes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        if columns.is_empty() {
            return;
        }
        let mut pivot = Attributes::new();
        for column in columns {
            if let Some(value) = self.attributes.remove(&column) {
                pivot.insert(column[prefix.len()..].to_string(), value);
            }
            self.original.remove(&column);
        }
        self.pivot = Some(pivot);
    }

    // -------------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------------

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    /// Loaded singular relation; `None` when not loaded or empty.
    pub fn one(&self, name: &str) -> Option<&Entity> {
        self.relations.get(name).and_then(RelationValue::as_one)
    }

    /// Loaded plural relation.
    pub fn many(&self, name: &str) -> Option<&Collection> {
        self.relations.get(name).and_then(RelationValue::as_many)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), value);
    }

    pub fn unset_relation(&mut self, name: &str) -> Option<RelationValue> {
        self.relations.remove(name)
    }

    pub fn loaded_relations(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Eager loads `relations` onto this entity alone.
    pub fn load<I, S>(&mut self, relations: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let loads = crate::eager::parse(relations);
        let db = self.db.clone();
        let meta = Arc::clone(&self.meta);
        crate::eager::load(&db, &meta, std::slice::from_mut(self), &loads)
    }

    /// Like [`Entity::load`], skipping relations that are already loaded.
    pub fn load_missing<I, S>(&mut self, relations: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let missing: Vec<String> = relations
            .into_iter()
            .map(|r| r.as_ref().to_string())
            .filter(|path| {
                let head = path.split('.').next().unwrap_or_default();
                !self.relation_loaded(head)
            })
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.load(missing)
    }

    /// Fetches a relation for this entity, loading it first if needed.
    pub fn related(&mut self, name: &str) -> Result<&RelationValue> {
        if !self.relation_loaded(name) {
            self.load([name])?;
        }
        self.relations
            .get(name)
            .ok_or_else(|| QuarryError::UnknownRelation {
                model: self.meta.name().to_string(),
                relation: name.to_string(),
            })
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("model", &self.meta.name())
            .field("exists", &self.exists)
            .field("attributes", &self.attributes)
            .field("relations", &self.relations)
            .field("pivot", &self.pivot)
            .finish_non_exhaustive()
    }
}
