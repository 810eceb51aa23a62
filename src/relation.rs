//! Relation descriptors
//!
//! A model declares its relations once, in [`Model::define`](crate::Model::define),
//! as [`RelationDef`]s. Registration resolves every omitted key from naming
//! conventions and stores the result as an inspectable [`Relation`]; the eager
//! loader only ever looks relations up by name.

use crate::model::{Model, ModelBuilder};
use crate::naming;

/// Resolved key mapping of one relation, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Parent `local_key` referenced by target `foreign_key`; at most one target
    ToOne {
        foreign_key: String,
        local_key: String,
    },
    /// Parent `local_key` referenced by target `foreign_key`
    ToMany {
        foreign_key: String,
        local_key: String,
    },
    /// Parent `foreign_key` references target `owner_key`
    OwnedBy {
        foreign_key: String,
        owner_key: String,
    },
    /// Linked through `pivot_table`
    ManyToMany {
        pivot_table: String,
        /// Pivot column pointing at the parent
        foreign_pivot_key: String,
        /// Pivot column pointing at the target
        related_pivot_key: String,
        parent_key: String,
        related_key: String,
        /// Extra pivot columns loaded alongside the keys
        pivot_columns: Vec<String>,
    },
    /// Parent stores the target's morph alias in `type_column` and its key in `id_column`
    PolymorphicOwnedBy {
        type_column: String,
        id_column: String,
    },
    /// Targets store the parent's morph alias and `local_key`
    PolymorphicToMany {
        type_column: String,
        id_column: String,
        local_key: String,
    },
}

impl RelationKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationKind::ToOne { .. } => "to_one",
            RelationKind::ToMany { .. } => "to_many",
            RelationKind::OwnedBy { .. } => "owned_by",
            RelationKind::ManyToMany { .. } => "many_to_many",
            RelationKind::PolymorphicOwnedBy { .. } => "polymorphic_owned_by",
            RelationKind::PolymorphicToMany { .. } => "polymorphic_to_many",
        }
    }
}

/// A resolved relation on one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    /// Target model name; `None` when the target varies per row
    pub target: Option<String>,
    pub kind: RelationKind,
}

impl Relation {
    /// `true` when the relation holds at most one entity.
    pub fn is_singular(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::ToOne { .. } | RelationKind::OwnedBy { .. } | RelationKind::PolymorphicOwnedBy { .. }
        )
    }
}

/// Static handle to a target model type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TargetRef {
    pub(crate) name: &'static str,
    define: fn(ModelBuilder) -> ModelBuilder,
}

impl TargetRef {
    pub(crate) fn of<M: Model>() -> Self {
        Self {
            name: M::NAME,
            define: M::define,
        }
    }

    /// The target's declarations, without resolving its own relations.
    pub(crate) fn primary_key(&self) -> String {
        (self.define)(ModelBuilder::new(self.name)).primary_key_name().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    HasOne,
    HasMany,
    BelongsTo,
    BelongsToMany,
    MorphTo,
    MorphMany,
}

/// Declaration of a relation; omitted keys follow naming conventions.
///
/// ```
/// use quarry::{Model, ModelBuilder, RelationDef};
///
/// struct Tag;
/// impl Model for Tag {
///     const NAME: &'static str = "Tag";
/// }
///
/// struct Post;
/// impl Model for Post {
///     const NAME: &'static str = "Post";
///     fn define(model: ModelBuilder) -> ModelBuilder {
///         model.relation(
///             RelationDef::belongs_to_many::<Tag>("tags")
///                 .pivot_table("post_tag")
///                 .with_pivot(["position"]),
///         )
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RelationDef {
    name: String,
    shape: Shape,
    target: Option<TargetRef>,
    foreign_key: Option<String>,
    local_key: Option<String>,
    owner_key: Option<String>,
    pivot_table: Option<String>,
    foreign_pivot_key: Option<String>,
    related_pivot_key: Option<String>,
    related_key: Option<String>,
    pivot_columns: Vec<String>,
    morph_name: Option<String>,
}

/// What a relation needs to know about the model declaring it.
pub(crate) struct Owner<'a> {
    pub(crate) name: &'a str,
    pub(crate) primary_key: &'a str,
}

impl RelationDef {
    fn new(name: impl Into<String>, shape: Shape, target: Option<TargetRef>) -> Self {
        Self {
            name: name.into(),
            shape,
            target,
            foreign_key: None,
            local_key: None,
            owner_key: None,
            pivot_table: None,
            foreign_pivot_key: None,
            related_pivot_key: None,
            related_key: None,
            pivot_columns: Vec::new(),
            morph_name: None,
        }
    }

    pub fn has_one<M: Model>(name: impl Into<String>) -> Self {
        Self::new(name, Shape::HasOne, Some(TargetRef::of::<M>()))
    }

    pub fn has_many<M: Model>(name: impl Into<String>) -> Self {
        Self::new(name, Shape::HasMany, Some(TargetRef::of::<M>()))
    }

    pub fn belongs_to<M: Model>(name: impl Into<String>) -> Self {
        Self::new(name, Shape::BelongsTo, Some(TargetRef::of::<M>()))
    }

    pub fn belongs_to_many<M: Model>(name: impl Into<String>) -> Self {
        Self::new(name, Shape::BelongsToMany, Some(TargetRef::of::<M>()))
    }

    /// Polymorphic owner stored in `{name}_type` / `{name}_id`.
    pub fn morph_to(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut def = Self::new(name.clone(), Shape::MorphTo, None);
        def.morph_name = Some(name);
        def
    }

    /// Targets pointing back through `{morph_name}_type` / `{morph_name}_id`.
    pub fn morph_many<M: Model>(name: impl Into<String>, morph_name: impl Into<String>) -> Self {
        let mut def = Self::new(name, Shape::MorphMany, Some(TargetRef::of::<M>()));
        def.morph_name = Some(morph_name.into());
        def
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Parent-side key for has-one, has-many, morph-many and many-to-many.
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    /// Target-side key for belongs-to.
    pub fn owner_key(mut self, column: impl Into<String>) -> Self {
        self.owner_key = Some(column.into());
        self
    }

    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot_table = Some(table.into());
        self
    }

    /// Pivot columns pointing at the parent and at the target.
    pub fn pivot_keys(mut self, foreign_pivot_key: impl Into<String>, related_pivot_key: impl Into<String>) -> Self {
        self.foreign_pivot_key = Some(foreign_pivot_key.into());
        self.related_pivot_key = Some(related_pivot_key.into());
        self
    }

    pub fn related_key(mut self, column: impl Into<String>) -> Self {
        self.related_key = Some(column.into());
        self
    }

    /// Extra pivot columns to load onto each related entity.
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pivot_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    pub(crate) fn resolve(self, owner: &Owner<'_>) -> Relation {
        let target_name = self.target.map(|t| t.name.to_string());
        let target_key = || {
            self.target
                .map(|t| t.primary_key())
                .unwrap_or_else(|| "id".to_string())
        };
        let kind = match self.shape {
            Shape::HasOne | Shape::HasMany => {
                let foreign_key = self
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| naming::foreign_key(owner.name, owner.primary_key));
                let local_key = self
                    .local_key
                    .clone()
                    .unwrap_or_else(|| owner.primary_key.to_string());
                if self.shape == Shape::HasOne {
                    RelationKind::ToOne { foreign_key, local_key }
                } else {
                    RelationKind::ToMany { foreign_key, local_key }
                }
            }
            Shape::BelongsTo => {
                let owner_key = self.owner_key.clone().unwrap_or_else(target_key);
                RelationKind::OwnedBy {
                    foreign_key: self
                        .foreign_key
                        .clone()
                        .unwrap_or_else(|| format!("{}_{owner_key}", naming::snake(&self.name))),
                    owner_key,
                }
            }
            Shape::BelongsToMany => {
                let target = target_name.as_deref().unwrap_or_default();
                RelationKind::ManyToMany {
                    pivot_table: self
                        .pivot_table
                        .clone()
                        .unwrap_or_else(|| naming::pivot_table(owner.name, target)),
                    foreign_pivot_key: self
                        .foreign_pivot_key
                        .clone()
                        .unwrap_or_else(|| naming::foreign_key(owner.name, owner.primary_key)),
                    related_pivot_key: self
                        .related_pivot_key
                        .clone()
                        .unwrap_or_else(|| naming::foreign_key(target, &target_key())),
                    parent_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| owner.primary_key.to_string()),
                    related_key: self.related_key.clone().unwrap_or_else(target_key),
                    pivot_columns: self.pivot_columns.clone(),
                }
            }
            Shape::MorphTo => {
                let morph = self.morph_name.clone().unwrap_or_else(|| self.name.clone());
                RelationKind::PolymorphicOwnedBy {
                    type_column: format!("{morph}_type"),
                    id_column: self.foreign_key.clone().unwrap_or_else(|| format!("{morph}_id")),
                }
            }
            Shape::MorphMany => {
                let morph = self.morph_name.clone().unwrap_or_else(|| self.name.clone());
                RelationKind::PolymorphicToMany {
                    type_column: format!("{morph}_type"),
                    id_column: self.foreign_key.clone().unwrap_or_else(|| format!("{morph}_id")),
                    local_key: self
                        .local_key
                        .clone()
                        .unwrap_or_else(|| owner.primary_key.to_string()),
                }
            }
        };
        Relation {
            name: self.name,
            target: target_name,
            kind,
        }
    }
}
