//! The capability shared by classic classes and new-style types.
//!
//! Attribute resolution, subclass tests and special-method lookup go through [`ClassLike`]
//! so call sites never need to know which lineage an object derives from. A new-style type
//! may list classic classes among its bases; they then appear in its MRO as
//! `ClassLike::Classic` entries.

use std::sync::Arc;

use super::{ClassRef, SpecialMethod, TypeRef, mro::classic_mro};
use crate::value::{Str, Value};

#[derive(Debug, Clone)]
pub enum ClassLike {
    Classic(ClassRef),
    Type(TypeRef),
}

impl ClassLike {
    /// Extracts the class from a class-valued `Value`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Class(cls) => Some(Self::Classic(cls.clone())),
            Value::Type(t) => Some(Self::Type(t.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Classic(cls) => Value::Class(cls.clone()),
            Self::Type(t) => Value::Type(t.clone()),
        }
    }

    #[must_use]
    pub fn name(&self) -> Str {
        match self {
            Self::Classic(cls) => cls.name(),
            Self::Type(t) => t.name(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Classic(a), Self::Classic(b)) => Arc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Value stored directly in this class's own dict, ignoring ancestors.
    #[must_use]
    pub fn own_get(&self, name: &str) -> Option<Value> {
        match self {
            Self::Classic(cls) => cls.dict().read().get_str(name),
            Self::Type(t) => t.dict().read().get_str(name),
        }
    }

    /// Resolves `name` along the class chain: depth-first for classic classes, the MRO for
    /// types.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.lookup_where(name).map(|(value, _)| value)
    }

    /// Like [`ClassLike::lookup`], also returning the class that defines the attribute.
    #[must_use]
    pub fn lookup_where(&self, name: &str) -> Option<(Value, Self)> {
        match self {
            Self::Classic(cls) => cls.lookup_where(name).map(|(v, c)| (v, Self::Classic(c))),
            Self::Type(t) => t.lookup_where(name),
        }
    }

    /// The full lookup order, starting with the class itself.
    #[must_use]
    pub fn linearization(&self) -> Vec<Self> {
        match self {
            Self::Classic(cls) => classic_mro(cls),
            Self::Type(t) => t.mro(),
        }
    }

    /// Returns true if `self` is `other` or derives from it.
    #[must_use]
    pub fn is_subclass(&self, other: &Self) -> bool {
        match self {
            Self::Classic(cls) => match other {
                Self::Classic(target) => cls.is_subclass(target),
                Self::Type(_) => false,
            },
            Self::Type(t) => t.mro_contains(other),
        }
    }

    /// Monotonic stamp that changes whenever the class dict or bases change.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Classic(cls) => cls.epoch(),
            Self::Type(t) => t.epoch(),
        }
    }

    /// Cached special-method lookup.
    #[must_use]
    pub fn slot(&self, method: SpecialMethod) -> Option<Value> {
        match self {
            Self::Classic(cls) => cls.slot(method),
            Self::Type(t) => t.slot(method),
        }
    }
}

impl PartialEq for ClassLike {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ClassLike {}

impl From<TypeRef> for ClassLike {
    fn from(t: TypeRef) -> Self {
        Self::Type(t)
    }
}

impl From<ClassRef> for ClassLike {
    fn from(cls: ClassRef) -> Self {
        Self::Classic(cls)
    }
}
