//! Model declarations and their resolved metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use quarry_core::{ErrorBag, QuarryError, Result, Value};

use crate::cast::Cast;
use crate::collection::Collection;
use crate::database::Database;
use crate::entity::{Attributes, Entity};
use crate::model_query::ModelQuery;
use crate::naming;
use crate::relation::{Owner, Relation, RelationDef};

/// Computes a read value from the entity and the attribute's cast value.
pub type Accessor = Arc<dyn Fn(&Entity, Value) -> Result<Value> + Send + Sync>;
/// Rewrites a value before it is cast and stored.
pub type Mutator = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;
/// Adds messages to the error bag for invalid state.
pub type Validator = Arc<dyn Fn(&Entity, &mut ErrorBag) + Send + Sync>;

const DEFAULT_PER_PAGE: u64 = 15;

/// A persisted entity type.
///
/// Implementors are usually unit structs; all behavior is declared in
/// [`Model::define`] and registered once with [`Database::register`].
///
/// ```
/// use quarry::{Cast, Model, ModelBuilder};
///
/// struct Comment;
/// impl Model for Comment {
///     const NAME: &'static str = "Comment";
/// }
///
/// struct Post;
/// impl Model for Post {
///     const NAME: &'static str = "Post";
///
///     fn define(model: ModelBuilder) -> ModelBuilder {
///         model
///             .fillable(["title", "body", "published"])
///             .cast("published", Cast::Boolean)
///             .soft_deletes()
///             .has_many::<Comment>("comments")
///     }
/// }
/// ```
pub trait Model {
    const NAME: &'static str;

    fn define(model: ModelBuilder) -> ModelBuilder {
        model
    }

    fn query(db: &Database) -> Result<ModelQuery> {
        db.query(Self::NAME)
    }

    /// New, unsaved entity filled through the mass-assignment policy.
    fn make<I, K, V>(db: &Database, attributes: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        db.make(Self::NAME, attributes)
    }

    fn create<I, K, V>(db: &Database, attributes: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entity = Self::make(db, attributes)?;
        entity.save()?;
        Ok(entity)
    }

    fn find(db: &Database, key: impl Into<Value>) -> Result<Option<Entity>> {
        Self::query(db)?.find(key)
    }

    fn find_or_fail(db: &Database, key: impl Into<Value>) -> Result<Entity> {
        Self::query(db)?.find_or_fail(key)
    }

    fn all(db: &Database) -> Result<Collection> {
        Self::query(db)?.get()
    }

    /// Query with relations to eager load.
    fn with<I, S>(db: &Database, relations: I) -> Result<ModelQuery>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::query(db)?.with(relations))
    }
}

/// Managed timestamp column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamps {
    pub created_at: String,
    pub updated_at: String,
}

impl Default for Timestamps {
    fn default() -> Self {
        Self {
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
        }
    }
}

/// Allowed moves of one guarded attribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transitions {
    rules: Vec<(Value, Vec<Value>)>,
}

impl Transitions {
    /// `true` if moving from `from` to `to` is declared. Leaving an unset (null)
    /// value is always allowed; a state with no rule is terminal.
    pub fn allows(&self, from: &Value, to: &Value) -> bool {
        if from.is_null() || from == to {
            return true;
        }
        self.rules
            .iter()
            .find(|(state, _)| same_state(state, from))
            .is_some_and(|(_, targets)| targets.iter().any(|t| same_state(t, to)))
    }
}

fn same_state(a: &Value, b: &Value) -> bool {
    a == b || matches!((a.to_key(), b.to_key()), (Some(x), Some(y)) if x == y)
}

/// Fluent declaration of a model, consumed by [`Database::register`].
pub struct ModelBuilder {
    name: String,
    table: Option<String>,
    primary_key: String,
    incrementing: bool,
    timestamps: Option<Timestamps>,
    soft_delete: Option<String>,
    version_column: Option<String>,
    immutable: bool,
    fillable: Vec<String>,
    guarded: Vec<String>,
    hidden: Vec<String>,
    visible: Vec<String>,
    appends: Vec<String>,
    casts: BTreeMap<String, Cast>,
    accessors: HashMap<String, Accessor>,
    mutators: HashMap<String, Mutator>,
    transitions: HashMap<String, Transitions>,
    validators: Vec<Validator>,
    morph_alias: Option<String>,
    date_format: Option<String>,
    defaults: Attributes,
    per_page: u64,
    relations: Vec<RelationDef>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            primary_key: "id".to_string(),
            incrementing: true,
            timestamps: Some(Timestamps::default()),
            soft_delete: None,
            version_column: None,
            immutable: false,
            fillable: Vec::new(),
            guarded: vec!["*".to_string()],
            hidden: Vec::new(),
            visible: Vec::new(),
            appends: Vec::new(),
            casts: BTreeMap::new(),
            accessors: HashMap::new(),
            mutators: HashMap::new(),
            transitions: HashMap::new(),
            validators: Vec::new(),
            morph_alias: None,
            date_format: None,
            defaults: Attributes::new(),
            per_page: DEFAULT_PER_PAGE,
            relations: Vec::new(),
        }
    }

    pub(crate) fn primary_key_name(&self) -> &str {
        &self.primary_key
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Keys are assigned by the caller rather than generated on insert.
    pub fn non_incrementing(mut self) -> Self {
        self.incrementing = false;
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = None;
        self
    }

    pub fn timestamp_columns(mut self, created_at: impl Into<String>, updated_at: impl Into<String>) -> Self {
        self.timestamps = Some(Timestamps {
            created_at: created_at.into(),
            updated_at: updated_at.into(),
        });
        self
    }

    /// Soft deletes through `deleted_at`.
    pub fn soft_deletes(self) -> Self {
        self.soft_deletes_column("deleted_at")
    }

    pub fn soft_deletes_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    /// Optimistic locking through an integer version column.
    pub fn versioned(mut self, column: impl Into<String>) -> Self {
        self.version_column = Some(column.into());
        self
    }

    /// Rows may be created but never updated or deleted.
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn fillable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fillable = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Deny-list; `"*"` guards everything not in the fillable list.
    pub fn guarded<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.guarded = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Everything is mass assignable.
    pub fn unguarded(mut self) -> Self {
        self.guarded.clear();
        self
    }

    pub fn hidden<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn visible<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.visible = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Computed attributes added on serialization; each needs an accessor.
    pub fn appends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.appends = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn cast(mut self, attribute: impl Into<String>, cast: Cast) -> Self {
        self.casts.insert(attribute.into(), cast);
        self
    }

    pub fn accessor<F>(mut self, attribute: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Entity, Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.accessors.insert(attribute.into(), Arc::new(f));
        self
    }

    pub fn mutator<F>(mut self, attribute: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.mutators.insert(attribute.into(), Arc::new(f));
        self
    }

    /// Declares which values `attribute` may move to from each state.
    ///
    /// ```
    /// use quarry::ModelBuilder;
    ///
    /// let model = ModelBuilder::new("Order").transitions(
    ///     "status",
    ///     [("pending", vec!["paid", "cancelled"]), ("paid", vec!["shipped"])],
    /// );
    /// ```
    pub fn transitions<I, F, T, V>(mut self, attribute: impl Into<String>, rules: I) -> Self
    where
        I: IntoIterator<Item = (F, T)>,
        F: Into<Value>,
        T: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let rules: Vec<(Value, Vec<Value>)> = rules
            .into_iter()
            .map(|(from, to)| (from.into(), to.into_iter().map(Into::into).collect()))
            .collect();
        self.transitions.insert(attribute.into(), Transitions { rules });
        self
    }

    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Entity, &mut ErrorBag) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(f));
        self
    }

    /// Value stored in polymorphic type columns; defaults to the model name.
    pub fn morph_alias(mut self, alias: impl Into<String>) -> Self {
        self.morph_alias = Some(alias.into());
        self
    }

    /// Serialization format for date-time attributes.
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    /// Attribute values a new entity starts with.
    pub fn default_value(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(attribute.into(), value.into());
        self
    }

    pub fn per_page(mut self, per_page: u64) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn has_one<M: Model>(self, name: impl Into<String>) -> Self {
        self.relation(RelationDef::has_one::<M>(name))
    }

    pub fn has_many<M: Model>(self, name: impl Into<String>) -> Self {
        self.relation(RelationDef::has_many::<M>(name))
    }

    pub fn belongs_to<M: Model>(self, name: impl Into<String>) -> Self {
        self.relation(RelationDef::belongs_to::<M>(name))
    }

    pub fn belongs_to_many<M: Model>(self, name: impl Into<String>) -> Self {
        self.relation(RelationDef::belongs_to_many::<M>(name))
    }

    pub fn morph_to(self, name: impl Into<String>) -> Self {
        self.relation(RelationDef::morph_to(name))
    }

    pub fn morph_many<M: Model>(self, name: impl Into<String>, morph_name: impl Into<String>) -> Self {
        self.relation(RelationDef::morph_many::<M>(name, morph_name))
    }

    /// Resolves conventions and relation keys.
    pub(crate) fn build(self) -> Result<ModelMeta> {
        let morph_alias = self.morph_alias.unwrap_or_else(|| self.name.clone());
        for append in &self.appends {
            if !self.accessors.contains_key(append) {
                return Err(QuarryError::Configuration(format!(
                    "{}: appended attribute `{append}` has no accessor",
                    self.name
                )));
            }
        }

        let owner = Owner {
            name: &self.name,
            primary_key: &self.primary_key,
        };
        let mut relations = BTreeMap::new();
        for def in self.relations {
            if relations.contains_key(def.name()) {
                return Err(QuarryError::Configuration(format!(
                    "{}: relation `{}` declared twice",
                    self.name,
                    def.name()
                )));
            }
            let relation = def.resolve(&owner);
            relations.insert(relation.name.clone(), relation);
        }

        Ok(ModelMeta {
            table: self.table.unwrap_or_else(|| naming::table_name(&self.name)),
            name: self.name,
            primary_key: self.primary_key,
            incrementing: self.incrementing,
            timestamps: self.timestamps,
            soft_delete: self.soft_delete,
            version_column: self.version_column,
            immutable: self.immutable,
            fillable: self.fillable,
            guarded: self.guarded,
            hidden: self.hidden,
            visible: self.visible,
            appends: self.appends,
            casts: self.casts,
            accessors: self.accessors,
            mutators: self.mutators,
            transitions: self.transitions,
            validators: self.validators,
            morph_alias,
            date_format: self.date_format,
            defaults: self.defaults,
            per_page: self.per_page,
            relations,
        })
    }
}

/// Resolved, immutable metadata of a registered model.
pub struct ModelMeta {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) primary_key: String,
    pub(crate) incrementing: bool,
    pub(crate) timestamps: Option<Timestamps>,
    pub(crate) soft_delete: Option<String>,
    pub(crate) version_column: Option<String>,
    pub(crate) immutable: bool,
    pub(crate) fillable: Vec<String>,
    pub(crate) guarded: Vec<String>,
    pub(crate) hidden: Vec<String>,
    pub(crate) visible: Vec<String>,
    pub(crate) appends: Vec<String>,
    pub(crate) casts: BTreeMap<String, Cast>,
    pub(crate) accessors: HashMap<String, Accessor>,
    pub(crate) mutators: HashMap<String, Mutator>,
    pub(crate) transitions: HashMap<String, Transitions>,
    pub(crate) validators: Vec<Validator>,
    pub(crate) morph_alias: String,
    pub(crate) date_format: Option<String>,
    pub(crate) defaults: Attributes,
    pub(crate) per_page: u64,
    pub(crate) relations: BTreeMap<String, Relation>,
}

impl ModelMeta {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// `table.primary_key`
    pub fn qualified_key(&self) -> String {
        self.qualify(&self.primary_key)
    }

    pub fn qualify(&self, column: &str) -> String {
        if column.contains('.') {
            column.to_string()
        } else {
            format!("{}.{column}", self.table)
        }
    }

    pub fn timestamps(&self) -> Option<&Timestamps> {
        self.timestamps.as_ref()
    }

    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    pub fn version_column(&self) -> Option<&str> {
        self.version_column.as_deref()
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn morph_alias(&self) -> &str {
        &self.morph_alias
    }

    pub fn cast(&self, attribute: &str) -> Option<Cast> {
        self.casts.get(attribute).copied()
    }

    /// Looks a relation up by name.
    pub fn relation(&self, name: &str) -> Result<&Relation> {
        self.relations
            .get(name)
            .ok_or_else(|| QuarryError::UnknownRelation {
                model: self.name.clone(),
                relation: name.to_string(),
            })
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Mass-assignment policy for one attribute.
    pub fn is_fillable(&self, key: &str) -> bool {
        if self.fillable.iter().any(|f| f == key) {
            return true;
        }
        if self.is_guarded(key) {
            return false;
        }
        self.fillable.is_empty() && !key.contains('.') && !key.starts_with('_')
    }

    pub fn is_guarded(&self, key: &str) -> bool {
        if self.guarded.is_empty() {
            return false;
        }
        self.guarded.iter().any(|g| g == "*" || g == key)
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("primary_key", &self.primary_key)
            .field("relations", &self.relations.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Author;
    impl Model for Author {
        const NAME: &'static str = "Author";
    }

    struct Book;
    impl Model for Book {
        const NAME: &'static str = "Book";
        fn define(model: ModelBuilder) -> ModelBuilder {
            model
                .primary_key("isbn")
                .non_incrementing()
                .belongs_to::<Author>("author")
                .belongs_to_many::<Genre>("genres")
                .morph_many::<Note>("notes", "notable")
        }
    }

    struct Genre;
    impl Model for Genre {
        const NAME: &'static str = "Genre";
    }

    struct Note;
    impl Model for Note {
        const NAME: &'static str = "Note";
        fn define(model: ModelBuilder) -> ModelBuilder {
            model.morph_to("notable")
        }
    }

    #[test]
    fn test_conventions() {
        let meta = Book::define(ModelBuilder::new(Book::NAME)).build().unwrap();
        assert_eq!(meta.table(), "books");
        assert_eq!(meta.qualified_key(), "books.isbn");

        let author = meta.relation("author").unwrap();
        assert_eq!(
            author.kind,
            crate::RelationKind::OwnedBy {
                foreign_key: "author_id".into(),
                owner_key: "id".into()
            }
        );

        let genres = meta.relation("genres").unwrap();
        assert_eq!(
            genres.kind,
            crate::RelationKind::ManyToMany {
                pivot_table: "book_genre".into(),
                foreign_pivot_key: "book_isbn".into(),
                related_pivot_key: "genre_id".into(),
                parent_key: "isbn".into(),
                related_key: "id".into(),
                pivot_columns: vec![],
            }
        );

        let notes = meta.relation("notes").unwrap();
        assert_eq!(
            notes.kind,
            crate::RelationKind::PolymorphicToMany {
                type_column: "notable_type".into(),
                id_column: "notable_id".into(),
                local_key: "isbn".into(),
            }
        );
        assert!(!notes.is_singular());
    }

    #[test]
    fn test_unknown_relation() {
        let meta = Note::define(ModelBuilder::new(Note::NAME)).build().unwrap();
        assert!(meta.relation("notable").unwrap().is_singular());
        let err = meta.relation("author").unwrap_err();
        assert!(matches!(err, QuarryError::UnknownRelation { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_fillable_policy() {
        let meta = ModelBuilder::new("Thing").fillable(["title"]).build().unwrap();
        assert!(meta.is_fillable("title"));
        assert!(!meta.is_fillable("is_admin"));

        let meta = ModelBuilder::new("Thing").guarded(["is_admin"]).build().unwrap();
        assert!(meta.is_fillable("title"));
        assert!(!meta.is_fillable("is_admin"));

        let meta = ModelBuilder::new("Thing").build().unwrap();
        assert!(!meta.is_fillable("title"));

        let meta = ModelBuilder::new("Thing").unguarded().build().unwrap();
        assert!(meta.is_fillable("anything"));
        assert!(!meta.is_fillable("_token"));
    }

    #[test]
    fn test_transitions() {
        let rules = Transitions {
            rules: vec![(Value::from("draft"), vec![Value::from("review")])],
        };
        assert!(rules.allows(&Value::from("draft"), &Value::from("review")));
        assert!(!rules.allows(&Value::from("draft"), &Value::from("published")));
        assert!(!rules.allows(&Value::from("review"), &Value::from("draft")));
        assert!(rules.allows(&Value::Null, &Value::from("published")));
    }

    #[test]
    fn test_append_requires_accessor() {
        let err = ModelBuilder::new("Thing").appends(["label"]).build().unwrap_err();
        assert!(err.is_configuration());
    }
}
