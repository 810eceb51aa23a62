//! JSON views of entities and collections.

use serde::ser::{Error as _, Serialize, Serializer};
use serde_json::{Map, Value as Json};

use quarry_core::Result;

use crate::collection::Collection;
use crate::entity::{Entity, RelationValue};
use crate::model::ModelMeta;

fn is_visible(meta: &ModelMeta, key: &str) -> bool {
    if !meta.visible.is_empty() && !meta.visible.iter().any(|k| k == key) {
        return false;
    }
    !meta.hidden.iter().any(|k| k == key)
}

impl Entity {
    /// Attributes, appended values, loaded relations and the pivot row as a
    /// JSON object. Values go through accessors and casts; date-times use the
    /// model's display format, falling back to the configured one.
    pub fn to_array(&self) -> Result<Json> {
        let meta = self.meta();
        let format = meta
            .date_format
            .as_deref()
            .unwrap_or(&self.db().config().date_format);

        let mut map = Map::new();
        for key in self.attributes.keys().filter(|key| is_visible(meta, key)) {
            map.insert(key.clone(), self.get(key)?.to_json_with(format));
        }
        for name in meta.appends.iter().filter(|name| is_visible(meta, name)) {
            map.insert(name.clone(), self.get(name)?.to_json_with(format));
        }
        for (name, relation) in self.relations.iter().filter(|(name, _)| is_visible(meta, name)) {
            let value = match relation {
                RelationValue::One(Some(entity)) => entity.to_array()?,
                RelationValue::One(None) => Json::Null,
                RelationValue::Many(collection) => collection.to_array()?,
            };
            map.insert(name.clone(), value);
        }
        if let Some(pivot) = self.pivot.as_ref().filter(|_| is_visible(meta, "pivot")) {
            let pivot = pivot
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json_with(format)))
                .collect();
            map.insert("pivot".to_string(), Json::Object(pivot));
        }
        Ok(Json::Object(map))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(self.to_array()?.to_string())
    }
}

impl Collection {
    pub fn to_array(&self) -> Result<Json> {
        self.iter()
            .map(Entity::to_array)
            .collect::<Result<Vec<_>>>()
            .map(Json::Array)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(self.to_array()?.to_string())
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_array().map_err(S::Error::custom)?.serialize(serializer)
    }
}

impl Serialize for Collection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_array().map_err(S::Error::custom)?.serialize(serializer)
    }
}
