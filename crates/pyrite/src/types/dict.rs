use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::{Equivalent, IndexMap};
use parking_lot::RwLock;

use crate::{
    exception::{ExcType, RunResult},
    py_hash::{hash_str, hash_value},
    value::Value,
};

pub type DictRef = Arc<RwLock<Dict>>;

/// Key wrapper caching the Python hash of the key.
///
/// Equality is the builtin structural equality; objects without value semantics compare by
/// identity. User-defined `__eq__`/`__hash__` are not consulted for keys.
#[derive(Debug, Clone)]
pub(crate) struct DictKey {
    hash: u64,
    value: Value,
}

impl DictKey {
    pub(crate) fn new(value: Value) -> RunResult<Self> {
        Ok(Self {
            hash: hash_value(&value)?,
            value,
        })
    }

    pub(crate) fn value(&self) -> &Value {
        &self.value
    }

    fn from_str(key: &str) -> Self {
        Self {
            hash: hash_str(key),
            value: Value::str(key),
        }
    }
}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.value == other.value
    }
}

impl Eq for DictKey {}

/// Borrowed string key for allocation-free lookups of names.
struct StrKey<'a> {
    hash: u64,
    key: &'a str,
}

impl<'a> StrKey<'a> {
    fn new(key: &'a str) -> Self {
        Self { hash: hash_str(key), key }
    }
}

impl Hash for StrKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl Equivalent<DictKey> for StrKey<'_> {
    fn equivalent(&self, key: &DictKey) -> bool {
        self.hash == key.hash && key.value.as_str() == Some(self.key)
    }
}

/// Insertion-ordered Python dict.
///
/// Every mutation bumps `version`, which attribute caches use to notice changes made through
/// a class's `__dict__`.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<DictKey, Value, ahash::RandomState>,
    version: u64,
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_ref() -> DictRef {
        Arc::new(RwLock::new(Self::new()))
    }

    #[must_use]
    pub fn into_ref(self) -> DictRef {
        Arc::new(RwLock::new(self))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> RunResult<Self> {
        let mut dict = Self::new();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
        Ok(dict)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        if let Value::Str(s) = key {
            return Ok(self.get_str(s));
        }
        let key = DictKey::new(key.clone())?;
        Ok(self.entries.get(&key).cloned())
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<Value> {
        self.entries.get(&StrKey::new(key)).cloned()
    }

    #[must_use]
    pub fn contains_str(&self, key: &str) -> bool {
        self.entries.contains_key(&StrKey::new(key))
    }

    pub fn contains(&self, key: &Value) -> RunResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn insert(&mut self, key: Value, value: Value) -> RunResult<Option<Value>> {
        let key = DictKey::new(key)?;
        self.version += 1;
        Ok(self.entries.insert(key, value))
    }

    pub fn set_str(&mut self, key: &str, value: Value) -> Option<Value> {
        self.version += 1;
        match self.entries.get_mut(&StrKey::new(key)) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => self.entries.insert(DictKey::from_str(key), value),
        }
    }

    pub fn remove(&mut self, key: &Value) -> RunResult<Option<Value>> {
        if let Value::Str(s) = key {
            return Ok(self.remove_str(s));
        }
        let key = DictKey::new(key.clone())?;
        let removed = self.entries.shift_remove(&key);
        if removed.is_some() {
            self.version += 1;
        }
        Ok(removed)
    }

    pub fn remove_str(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.shift_remove(&StrKey::new(key));
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.version += 1;
        self.entries.clear();
    }

    /// Copies every entry of `other` into `self`.
    pub fn update(&mut self, other: &Self) {
        self.version += 1;
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.entries.keys().map(|k| k.value.clone()).collect()
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.entries.values().cloned().collect()
    }

    #[must_use]
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.iter().map(|(k, v)| (k.value.clone(), v.clone())).collect()
    }

    /// Builtin equality of two mappings whose values sit at nesting `depth`.
    pub(crate) fn eq_within(&self, other: &Self, depth: usize) -> Option<bool> {
        if self.len() != other.len() {
            return Some(false);
        }
        for (k, v) in &self.entries {
            let Some(theirs) = other.entries.get(k) else {
                return Some(false);
            };
            if !v.eq_within(theirs, depth)? {
                return Some(false);
            }
        }
        Some(true)
    }

    /// Looks up a key, raising `KeyError` when missing.
    pub fn get_item(&self, key: &Value) -> RunResult<Value> {
        self.get(key)?.ok_or_else(|| ExcType::key_error(key))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn preserves_insertion_order() {
        let mut dict = Dict::new();
        dict.set_str("b", Value::Int(2));
        dict.set_str("a", Value::Int(1));
        dict.insert(Value::Int(7), Value::None).unwrap();
        assert_eq!(dict.keys(), vec![Value::str("b"), Value::str("a"), Value::Int(7)]);
    }

    #[test]
    fn numeric_keys_unify() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::str("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::str("float")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Bool(true)).unwrap(), Some(Value::str("float")));
    }

    #[test]
    fn version_tracks_mutation() {
        let mut dict = Dict::new();
        let v0 = dict.version();
        dict.set_str("x", Value::None);
        assert!(dict.version() > v0);
        let v1 = dict.version();
        assert!(dict.remove_str("missing").is_none());
        assert_eq!(dict.version(), v1);
        dict.remove_str("x");
        assert!(dict.version() > v1);
    }

    #[test]
    fn str_lookup_matches_value_lookup() {
        let mut dict = Dict::new();
        dict.insert(Value::str("name"), Value::Int(3)).unwrap();
        assert_eq!(dict.get_str("name"), Some(Value::Int(3)));
        assert!(dict.contains_str("name"));
        assert!(!dict.contains_str("other"));
    }

    #[test]
    fn unhashable_key_is_rejected() {
        let mut dict = Dict::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert!(err.matches_type(ExcType::TypeError));
    }
}
