//! Registered models and the polymorphic type alias table.

use std::sync::Arc;

use hashbrown::HashMap;
use quarry_core::{QuarryError, Result};

use crate::model::ModelMeta;

/// Bidirectional morph alias table: the string stored in a type column on one
/// side, the registered model name on the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MorphMap {
    by_alias: HashMap<String, String>,
    by_model: HashMap<String, String>,
}

impl MorphMap {
    /// Maps `alias` to `model` and makes it the alias written for `model`.
    /// Earlier aliases of `model` keep resolving, so rows stored under them
    /// still load.
    pub fn insert(&mut self, alias: impl Into<String>, model: impl Into<String>) {
        let (alias, model) = (alias.into(), model.into());
        if let Some(old_model) = self.by_alias.insert(alias.clone(), model.clone()) {
            if old_model != model && self.by_model.get(&old_model) == Some(&alias) {
                let remaining = self.aliases_for(&old_model).last().map(|a| a.to_string());
                match remaining {
                    Some(remaining) => self.by_model.insert(old_model, remaining),
                    None => self.by_model.remove(&old_model),
                };
            }
        }
        self.by_model.insert(model, alias);
    }

    pub fn model_for(&self, alias: &str) -> Option<&str> {
        self.by_alias.get(alias).map(String::as_str)
    }

    /// The alias written to type columns for `model`.
    pub fn alias_for(&self, model: &str) -> Option<&str> {
        self.by_model.get(model).map(String::as_str)
    }

    /// Every alias resolving to `model`, sorted.
    pub fn aliases_for(&self, model: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .by_alias
            .iter()
            .filter(|(_, m)| m.as_str() == model)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    models: HashMap<String, Arc<ModelMeta>>,
    morphs: MorphMap,
}

impl Registry {
    pub(crate) fn insert(&mut self, meta: ModelMeta) -> Arc<ModelMeta> {
        self.morphs.insert(meta.morph_alias.clone(), meta.name.clone());
        let meta = Arc::new(meta);
        self.models.insert(meta.name.clone(), Arc::clone(&meta));
        meta
    }

    pub(crate) fn get(&self, model: &str) -> Result<Arc<ModelMeta>> {
        self.models
            .get(model)
            .cloned()
            .ok_or_else(|| QuarryError::UnknownModel(model.to_string()))
    }

    pub(crate) fn morphs(&self) -> &MorphMap {
        &self.morphs
    }

    pub(crate) fn morphs_mut(&mut self) -> &mut MorphMap {
        &mut self.morphs
    }

    /// Model stored under a polymorphic type value.
    pub(crate) fn resolve_morph(&self, alias: &str) -> Result<Arc<ModelMeta>> {
        let model = self
            .morphs
            .model_for(alias)
            .ok_or_else(|| QuarryError::UnknownMorphType(alias.to_string()))?;
        self.get(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_morph_map_is_bidirectional() {
        let mut map = MorphMap::default();
        map.insert("post", "Post");
        map.insert("video", "Video");
        assert_eq!(map.model_for("post"), Some("Post"));
        assert_eq!(map.alias_for("Video"), Some("video"));
        assert_eq!(map.model_for("Post"), None);

        map.insert("article", "Post");
        assert_eq!(map.alias_for("Post"), Some("article"));
        assert_eq!(map.model_for("post"), Some("Post"));
        assert_eq!(map.aliases_for("Post"), ["article", "post"]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_morph_alias_moved_to_another_model() {
        let mut map = MorphMap::default();
        map.insert("entry", "Post");
        map.insert("entry", "Video");
        assert_eq!(map.model_for("entry"), Some("Video"));
        assert_eq!(map.alias_for("Video"), Some("entry"));
        assert_eq!(map.alias_for("Post"), None);
        assert!(map.aliases_for("Post").is_empty());

        map.insert("post", "Post");
        map.insert("story", "Post");
        map.insert("story", "Video");
        assert_eq!(map.alias_for("Post"), Some("post"));
        assert_eq!(map.aliases_for("Video"), ["entry", "story"]);
    }
}
