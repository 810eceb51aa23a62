//! Attribute store: casts, accessors and mutators, mass assignment and change
//! tracking.

use quarry_core::{Result, Value};

use crate::cast::Cast;
use crate::entity::{Attributes, Entity};

impl Entity {
    /// Reads an attribute through its accessor and cast.
    pub fn get(&self, key: &str) -> Result<Value> {
        let raw = self.get_raw(key);
        let value = self.cast_from_storage(key, &raw)?;
        match self.meta.accessors.get(key) {
            Some(accessor) => accessor(self, value),
            None => Ok(value),
        }
    }

    /// Storage value, bypassing casts and accessors.
    pub fn get_raw(&self, key: &str) -> Value {
        self.attributes.get(key).cloned().unwrap_or_default()
    }

    /// Value at the last sync, cast.
    pub fn get_original(&self, key: &str) -> Result<Value> {
        let raw = self.get_raw_original(key);
        self.cast_from_storage(key, &raw)
    }

    pub fn get_raw_original(&self, key: &str) -> Value {
        self.original.get(key).cloned().unwrap_or_default()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// All attributes in storage form.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn original(&self) -> &Attributes {
        &self.original
    }

    /// Assigns an attribute through its mutator and cast.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        let mut value = value.into();
        if let Some(mutator) = self.meta.mutators.get(&key) {
            value = mutator(value)?;
        }
        if let Some(cast) = self.meta.cast(&key) {
            value = cast.to_storage(&key, value, self.db.encrypter())?;
        }
        self.attributes.insert(key, value);
        Ok(self)
    }

    /// Stores a value as-is.
    pub fn set_raw(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole attribute map; `sync` also makes it the original.
    pub fn set_raw_attributes(&mut self, attributes: Attributes, sync: bool) -> &mut Self {
        self.attributes = attributes;
        if sync {
            self.sync_original();
        }
        self
    }

    /// Assigns the attributes the mass-assignment policy lets through.
    pub fn fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            let key = key.into();
            if self.meta.is_fillable(&key) {
                self.set(key, value)?;
            } else {
                #[cfg(feature = "tracing")]
                tracing::debug!(model = %self.meta.name(), attribute = %key, "quarry.fill.rejected");
            }
        }
        Ok(self)
    }

    /// Assigns every attribute, ignoring the mass-assignment policy.
    pub fn force_fill<I, K, V>(&mut self, attributes: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in attributes {
            self.set(key, value)?;
        }
        Ok(self)
    }

    /// Cast values of the given attributes.
    pub fn only<I, S>(&self, keys: I) -> Result<Attributes>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| {
                let key = key.as_ref();
                Ok((key.to_string(), self.get(key)?))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Change tracking
    // -------------------------------------------------------------------------

    /// Attributes whose value differs from the original snapshot.
    pub fn get_dirty(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, _)| !self.original_is_equivalent(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.attributes.keys().any(|key| !self.original_is_equivalent(key))
    }

    pub fn is_dirty_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key) && !self.original_is_equivalent(key)
    }

    pub fn is_clean(&self) -> bool {
        !self.is_dirty()
    }

    /// Attributes written by the last successful update.
    pub fn get_changes(&self) -> &Attributes {
        &self.changes
    }

    pub fn was_changed(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn was_attribute_changed(&self, key: &str) -> bool {
        self.changes.contains_key(key)
    }

    /// Replaces the original snapshot with the current attributes.
    pub fn sync_original(&mut self) -> &mut Self {
        self.original = self.attributes.clone();
        self
    }

    pub(crate) fn sync_original_attribute(&mut self, key: &str) {
        match self.attributes.get(key) {
            Some(value) => self.original.insert(key.to_string(), value.clone()),
            None => self.original.remove(key),
        };
    }

    pub(crate) fn sync_changes(&mut self) {
        self.changes = self.get_dirty();
    }

    /// `true` when the current value of `key` is the same as the original one,
    /// comparing cast values and numbers by magnitude.
    pub(crate) fn original_is_equivalent(&self, key: &str) -> bool {
        let Some(original) = self.original.get(key) else {
            return false;
        };
        let current = self.get_raw(key);
        if current == *original {
            return true;
        }
        if current.is_null() || original.is_null() {
            return false;
        }
        if let Some(cast) = self.meta.cast(key) {
            let encrypter = self.db.encrypter();
            return match (
                cast.from_storage(key, &current, encrypter),
                cast.from_storage(key, original, encrypter),
            ) {
                (Ok(a), Ok(b)) => {
                    a == b || (matches!(cast, Cast::Integer | Cast::Float) && numerically_equal(&a, &b))
                }
                _ => false,
            };
        }
        numerically_equal(&current, original) || same_storage_text(&current, original)
    }

    pub(crate) fn cast_from_storage(&self, key: &str, raw: &Value) -> Result<Value> {
        match self.meta.cast(key) {
            Some(cast) => cast.from_storage(key, raw, self.db.encrypter()),
            None => Ok(raw.clone()),
        }
    }
}

/// `Int` and `Float` holding the same number. Text is never numeric here:
/// `"007"` and `"7"` are different values.
fn numerically_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

/// A timestamp and the text it is stored as.
fn same_storage_text(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::DateTime(_), Value::Text(_)) | (Value::Text(_), Value::DateTime(_)) => a.to_string() == b.to_string(),
        _ => false,
    }
}
