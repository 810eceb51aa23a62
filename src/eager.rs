//! Eager loading
//!
//! Loads requested relations for a whole batch of parents with one query per
//! relation (one per concrete type for polymorphic owners), then assigns the
//! results back onto each parent. Nested paths recurse on the flat set of
//! loaded children, so each path segment costs one query regardless of how
//! many parents there are.
//!
//! Each relation moves through the phases `pending`, `resolved`, `batched`,
//! `loaded` and `assigned`; a relation whose parent key set is empty is
//! `skipped` and its parents get the empty value without a query.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use quarry_core::{ModelKey, Operator, QuarryError, Result, Value};

use crate::collection::{Collection, unique_keys};
use crate::database::Database;
use crate::entity::{Entity, RelationValue};
use crate::model::ModelMeta;
use crate::model_query::ModelQuery;
use crate::relation::{Relation, RelationKind};

/// Extra filtering applied to the query of one eager-loaded relation.
pub type Constraint = Arc<dyn Fn(ModelQuery) -> ModelQuery + Send + Sync>;

const PIVOT_PREFIX: &str = "pivot_";

/// One requested relation and the relations to load beneath it.
#[derive(Clone)]
pub struct EagerLoad {
    pub(crate) name: String,
    pub(crate) constraint: Option<Constraint>,
    pub(crate) nested: Vec<EagerLoad>,
}

impl EagerLoad {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constraint: None,
            nested: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nested(&self) -> &[EagerLoad] {
        &self.nested
    }
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("name", &self.name)
            .field("constrained", &self.constraint.is_some())
            .field("nested", &self.nested)
            .finish()
    }
}

/// Merges a dotted `path` into the load tree. Shared prefixes are loaded once;
/// a constraint attaches to the last segment.
pub(crate) fn add_path(loads: &mut Vec<EagerLoad>, path: &str, constraint: Option<Constraint>) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head.trim(), Some(rest)),
        None => (path.trim(), None),
    };
    if head.is_empty() {
        return;
    }
    let index = match loads.iter().position(|load| load.name == head) {
        Some(index) => index,
        None => {
            loads.push(EagerLoad::new(head));
            loads.len() - 1
        }
    };
    let load = &mut loads[index];
    match rest {
        Some(rest) => add_path(&mut load.nested, rest, constraint),
        None => {
            if constraint.is_some() {
                load.constraint = constraint;
            }
        }
    }
}

pub(crate) fn parse<I, S>(relations: I) -> Vec<EagerLoad>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut loads = Vec::new();
    for path in relations {
        add_path(&mut loads, path.as_ref(), None);
    }
    loads
}

/// Loads `loads` onto `parents`, all of which belong to `meta`.
pub(crate) fn load(
    db: &Database,
    meta: &Arc<ModelMeta>,
    parents: &mut [Entity],
    loads: &[EagerLoad],
) -> Result<()> {
    quarry_core::quarry_profile_function!();
    for load in loads {
        quarry_core::quarry_trace_load!("pending", load.name, parents.len());
        let relation = meta.relation(&load.name)?.clone();
        quarry_core::quarry_trace_load!("resolved", load.name, parents.len());
        match &relation.kind {
            RelationKind::ToOne {
                foreign_key,
                local_key,
            }
            | RelationKind::ToMany {
                foreign_key,
                local_key,
            } => {
                let keys = unique_keys(parents.iter(), local_key);
                if skip_empty(&relation, parents, &keys) {
                    continue;
                }
                let target = target_meta(db, meta, &relation)?;
                let query = constrained(db, &target, load).where_in(target.qualify(foreign_key), keys);
                let children = load_children(db, &target, query, load)?;
                if relation.is_singular() {
                    assign_one(&relation, parents, local_key, &children.key_by(foreign_key));
                } else {
                    assign_many(&relation, parents, local_key, children.group_by(foreign_key));
                }
            }
            RelationKind::OwnedBy {
                foreign_key,
                owner_key,
            } => {
                let keys = unique_keys(parents.iter(), foreign_key);
                if skip_empty(&relation, parents, &keys) {
                    continue;
                }
                let target = target_meta(db, meta, &relation)?;
                let query = constrained(db, &target, load).where_in(target.qualify(owner_key), keys);
                let children = load_children(db, &target, query, load)?;
                assign_one(&relation, parents, foreign_key, &children.key_by(owner_key));
            }
            RelationKind::ManyToMany {
                pivot_table,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
                pivot_columns,
            } => {
                let keys = unique_keys(parents.iter(), parent_key);
                if skip_empty(&relation, parents, &keys) {
                    continue;
                }
                let target = target_meta(db, meta, &relation)?;
                let mut query = constrained(db, &target, load);
                let mut columns = Vec::new();
                if query.query().columns().is_empty() {
                    columns.push(format!("{}.*", target.table()));
                }
                for column in [foreign_pivot_key, related_pivot_key].into_iter().chain(pivot_columns) {
                    columns.push(format!("{pivot_table}.{column} as {PIVOT_PREFIX}{column}"));
                }
                query = query
                    .add_select(columns)
                    .join(
                        pivot_table.as_str(),
                        format!("{pivot_table}.{related_pivot_key}"),
                        Operator::Eq,
                        target.qualify(related_key),
                    )
                    .where_in(format!("{pivot_table}.{foreign_pivot_key}"), keys);

                let mut children = query.get()?;
                for child in children.iter_mut() {
                    child.take_pivot(PIVOT_PREFIX);
                }
                if !load.nested.is_empty() {
                    self::load(db, &target, children.as_mut_vec(), &load.nested)?;
                }
                quarry_core::quarry_trace_load!("loaded", load.name, children.len());

                let mut groups: HashMap<ModelKey, Collection> = HashMap::new();
                for child in children {
                    let key = child
                        .pivot()
                        .and_then(|pivot| pivot.get(foreign_pivot_key.as_str()))
                        .and_then(Value::to_key);
                    if let Some(key) = key {
                        groups.entry(key).or_default().push(child);
                    }
                }
                assign_many(&relation, parents, parent_key, groups);
            }
            RelationKind::PolymorphicOwnedBy {
                type_column,
                id_column,
            } => {
                let batches = partition_by_type(parents, type_column, id_column);
                if batches.is_empty() {
                    skip_empty(&relation, parents, &[]);
                    continue;
                }
                let mut owners: HashMap<(String, ModelKey), Entity> = HashMap::new();
                for (alias, ids) in batches {
                    let target = db.resolve_morph(&alias)?;
                    quarry_core::quarry_trace_load!("batched", load.name, ids.len());
                    let query = constrained(db, &target, load).where_in(target.qualified_key(), ids);
                    for child in load_children(db, &target, query, load)? {
                        if let Some(key) = child.key().to_key() {
                            owners.insert((alias.clone(), key), child);
                        }
                    }
                }
                for parent in parents.iter_mut() {
                    let owner = morph_type(&parent.get_raw(type_column))
                        .zip(parent.get_raw(id_column).to_key())
                        .and_then(|key| owners.get(&key))
                        .cloned();
                    parent.set_relation(relation.name.clone(), RelationValue::One(owner.map(Box::new)));
                }
                quarry_core::quarry_trace_load!("assigned", load.name, parents.len());
            }
            RelationKind::PolymorphicToMany {
                type_column,
                id_column,
                local_key,
            } => {
                let keys = unique_keys(parents.iter(), local_key);
                if skip_empty(&relation, parents, &keys) {
                    continue;
                }
                let target = target_meta(db, meta, &relation)?;
                let query = constrained(db, &target, load)
                    .where_in(target.qualify(type_column), db.morph_types_of(meta))
                    .where_in(target.qualify(id_column), keys);
                let children = load_children(db, &target, query, load)?;
                assign_many(&relation, parents, local_key, children.group_by(id_column));
            }
        }
    }
    Ok(())
}

/// Gives every parent the empty value when `keys` is empty. Returns whether
/// the relation was skipped.
fn skip_empty(relation: &Relation, parents: &mut [Entity], keys: &[Value]) -> bool {
    if !keys.is_empty() {
        quarry_core::quarry_trace_load!("batched", relation.name, keys.len());
        return false;
    }
    for parent in parents.iter_mut() {
        parent.set_relation(relation.name.clone(), RelationValue::empty(relation.is_singular()));
    }
    quarry_core::quarry_trace_load!("skipped", relation.name, parents.len());
    true
}

fn target_meta(db: &Database, owner: &ModelMeta, relation: &Relation) -> Result<Arc<ModelMeta>> {
    let target = relation.target.as_deref().ok_or_else(|| {
        QuarryError::Configuration(format!(
            "relation `{}` on {} has no target model",
            relation.name,
            owner.name()
        ))
    })?;
    db.meta(target)
}

fn constrained(db: &Database, target: &Arc<ModelMeta>, load: &EagerLoad) -> ModelQuery {
    let query = ModelQuery::new(db.clone(), Arc::clone(target));
    match &load.constraint {
        Some(constraint) => constraint(query),
        None => query,
    }
}

/// Runs the batched query and loads nested relations on its results.
fn load_children(
    db: &Database,
    target: &Arc<ModelMeta>,
    query: ModelQuery,
    load: &EagerLoad,
) -> Result<Collection> {
    let mut children = query.get()?;
    quarry_core::quarry_trace_load!("loaded", load.name, children.len());
    if !load.nested.is_empty() {
        self::load(db, target, children.as_mut_vec(), &load.nested)?;
    }
    Ok(children)
}

fn assign_one(relation: &Relation, parents: &mut [Entity], parent_column: &str, dictionary: &HashMap<ModelKey, Entity>) {
    for parent in parents.iter_mut() {
        let related = parent
            .get_raw(parent_column)
            .to_key()
            .and_then(|key| dictionary.get(&key))
            .cloned();
        parent.set_relation(relation.name.clone(), RelationValue::One(related.map(Box::new)));
    }
    quarry_core::quarry_trace_load!("assigned", relation.name, parents.len());
}

fn assign_many(
    relation: &Relation,
    parents: &mut [Entity],
    parent_column: &str,
    groups: HashMap<ModelKey, Collection>,
) {
    for parent in parents.iter_mut() {
        let related = parent
            .get_raw(parent_column)
            .to_key()
            .and_then(|key| groups.get(&key))
            .cloned()
            .unwrap_or_default();
        parent.set_relation(relation.name.clone(), RelationValue::Many(related));
    }
    quarry_core::quarry_trace_load!("assigned", relation.name, parents.len());
}

fn morph_type(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(alias) => Some(alias.clone()),
        other => Some(other.to_string()),
    }
}

/// Distinct owner ids per morph type, in type order.
fn partition_by_type(parents: &[Entity], type_column: &str, id_column: &str) -> BTreeMap<String, Vec<Value>> {
    let mut batches: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    let mut seen = hashbrown::HashSet::new();
    for parent in parents {
        let Some(alias) = morph_type(&parent.get_raw(type_column)) else {
            continue;
        };
        let id = parent.get_raw(id_column);
        let Some(key) = id.to_key() else {
            continue;
        };
        if seen.insert((alias.clone(), key)) {
            batches.entry(alias).or_default().push(id);
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_merges_shared_prefixes() {
        let loads = parse(["posts.comments", "posts.tags", "country"]);
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].name(), "posts");
        let nested: Vec<&str> = loads[0].nested().iter().map(EagerLoad::name).collect();
        assert_eq!(nested, ["comments", "tags"]);
        assert!(loads[1].nested().is_empty());
    }

    #[test]
    fn test_constraint_attaches_to_last_segment() {
        let mut loads = parse(["posts"]);
        add_path(&mut loads, "posts.comments", Some(Arc::new(|q: ModelQuery| q.limit(1))));
        assert!(loads[0].constraint.is_none());
        assert!(loads[0].nested[0].constraint.is_some());
    }

    #[test]
    fn test_blank_segments_are_ignored() {
        let loads = parse(["", " comments "]);
        assert_eq!(loads.len(), 1);
        assert_eq!(loads[0].name(), "comments");
    }
}
