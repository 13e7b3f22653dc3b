use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;

use super::dict::DictKey;
use crate::{exception::RunResult, value::Value};

pub type SetRef = Arc<RwLock<Set>>;

/// Insertion-ordered Python set sharing the dict's key semantics.
#[derive(Debug, Clone, Default)]
pub struct Set {
    items: IndexSet<DictKey, ahash::RandomState>,
}

impl Set {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> RunResult<Self> {
        let mut set = Self::new();
        for v in values {
            set.add(v)?;
        }
        Ok(set)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns true if the value was newly inserted.
    pub fn add(&mut self, value: Value) -> RunResult<bool> {
        Ok(self.items.insert(DictKey::new(value)?))
    }

    pub fn contains(&self, value: &Value) -> RunResult<bool> {
        Ok(self.items.contains(&DictKey::new(value.clone())?))
    }

    pub fn discard(&mut self, value: &Value) -> RunResult<bool> {
        Ok(self.items.shift_remove(&DictKey::new(value.clone())?))
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(DictKey::value).cloned().collect()
    }

    pub(crate) fn builtin_eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.items.iter().all(|k| other.items.contains(k))
    }
}
