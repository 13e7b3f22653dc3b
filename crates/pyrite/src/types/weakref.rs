//! Weak references.
//!
//! A weak reference holds a `Weak` pointer to its referent and registers itself in the
//! referent's auxiliary attributes, which is how `getweakrefcount` finds it. Callbacks are
//! not supported.

use std::sync::{Arc, Weak};

use super::{ClassicClass, ClassicInstance, PyType, TypeInstance};
use crate::{
    aux_attrs::AuxAttrs,
    exception::{ExcType, RunResult},
    interop::ForeignObject,
    value::Value,
};

#[derive(Debug)]
enum WeakTarget {
    Object(Weak<TypeInstance>),
    Instance(Weak<ClassicInstance>),
    Class(Weak<ClassicClass>),
    Type(Weak<PyType>),
    Foreign(Weak<ForeignObject>),
}

#[derive(Debug)]
pub struct WeakRefObject {
    target: WeakTarget,
}

impl WeakRefObject {
    /// Creates a weak reference to `value` and registers it with the referent.
    pub fn new(value: &Value) -> RunResult<Arc<Self>> {
        let target = match value {
            Value::Object(o) => WeakTarget::Object(Arc::downgrade(o)),
            Value::Instance(i) => WeakTarget::Instance(Arc::downgrade(i)),
            Value::Class(c) => WeakTarget::Class(Arc::downgrade(c)),
            Value::Type(t) => WeakTarget::Type(Arc::downgrade(t)),
            Value::Foreign(f) => WeakTarget::Foreign(Arc::downgrade(f)),
            other => {
                return Err(ExcType::type_error(format!(
                    "cannot create weak reference to '{}' object",
                    other.type_name()
                )));
            }
        };
        let weakref = Arc::new(Self { target });
        if let Some(aux) = aux_of(value) {
            aux.add_weakref(&weakref);
        }
        Ok(weakref)
    }

    /// The referent, or `None` once it has been dropped.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        match &self.target {
            WeakTarget::Object(w) => w.upgrade().map(Value::Object),
            WeakTarget::Instance(w) => w.upgrade().map(Value::Instance),
            WeakTarget::Class(w) => w.upgrade().map(Value::Class),
            WeakTarget::Type(w) => w.upgrade().map(Value::Type),
            WeakTarget::Foreign(w) => w.upgrade().map(Value::Foreign),
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.get().is_some()
    }
}

/// Auxiliary attributes of objects that carry them.
#[must_use]
pub fn aux_of(value: &Value) -> Option<&AuxAttrs> {
    match value {
        Value::Object(o) => Some(o.aux()),
        Value::Instance(i) => Some(i.aux()),
        Value::Class(c) => Some(c.aux()),
        Value::Type(t) => Some(t.aux()),
        Value::Foreign(f) => Some(f.aux()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin_types;

    #[test]
    fn referent_drop_clears_reference() {
        let obj = Value::Object(TypeInstance::new(builtin_types().object.clone()));
        let weak = WeakRefObject::new(&obj).unwrap();
        assert!(weak.get().is_some_and(|v| v.is(&obj)));
        assert_eq!(aux_of(&obj).map(AuxAttrs::weakref_count), Some(1));
        drop(obj);
        assert!(!weak.is_alive());
    }

    #[test]
    fn scalars_cannot_be_weakly_referenced() {
        let err = WeakRefObject::new(&Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: cannot create weak reference to 'int' object");
    }
}
