//! Classic (old-style) classes and their instances.
//!
//! A classic class is a name, a namespace dict and a tuple of classic bases. Attribute
//! lookup walks the bases depth-first and left to right, the first match wins. Unlike
//! new-style types there is no linearization, so a diamond resolves through the first path
//! that reaches the shared ancestor.
//!
//! Everything about a classic class is rebindable at runtime: `__name__`, `__bases__` (with
//! the acyclicity check repeated) and even `__dict__`. Instances can likewise swap their
//! `__class__` and `__dict__`.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;

use super::{ClassLike, Dict, DictRef, SpecialMethod, mro::classic_mro, slots::SlotTable};
use crate::{
    aux_attrs::AuxAttrs,
    exception::{ExcType, RunResult},
    value::{Str, Value},
};

pub type ClassRef = Arc<ClassicClass>;
pub type InstanceRef = Arc<ClassicInstance>;

#[derive(Debug)]
pub struct ClassicClass {
    name: RwLock<Str>,
    bases: RwLock<Arc<[ClassRef]>>,
    /// The namespace. Rebinding `__dict__` swaps the whole dict.
    dict: RwLock<DictRef>,
    /// Bumped on `__bases__`/`__dict__` rebinding; combined with the dict version it forms
    /// the epoch checked by slot caches.
    epoch: AtomicU64,
    slots: SlotTable,
    aux: AuxAttrs,
}

impl ClassicClass {
    #[must_use]
    pub fn new(name: &str, bases: Vec<ClassRef>, dict: DictRef) -> ClassRef {
        Arc::new(Self {
            name: RwLock::new(Arc::from(name)),
            bases: RwLock::new(Arc::from(bases)),
            dict: RwLock::new(dict),
            epoch: AtomicU64::new(0),
            slots: SlotTable::new(),
            aux: AuxAttrs::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> Str {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Str) {
        *self.name.write() = name;
    }

    #[must_use]
    pub fn bases(&self) -> Arc<[ClassRef]> {
        self.bases.read().clone()
    }

    /// Rebinds `__bases__`.
    ///
    /// Fails with `ValueError` when one of the new bases is this class or derives from it.
    pub fn set_bases(self: &Arc<Self>, bases: Vec<ClassRef>) -> RunResult<()> {
        if bases.iter().any(|base| base.is_subclass(self)) {
            return Err(ExcType::value_error("a __bases__ item causes an inheritance cycle"));
        }
        tracing::debug!(
            class = %self.name(),
            bases = ?bases.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "rebinding classic __bases__"
        );
        *self.bases.write() = Arc::from(bases);
        self.epoch.fetch_add(1, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn dict(&self) -> DictRef {
        self.dict.read().clone()
    }

    /// Rebinds `__dict__`.
    ///
    /// The epoch jumps past the old dict's version so that `epoch()` keeps increasing even
    /// though the new dict starts counting from its own version.
    pub fn set_dict(&self, dict: DictRef) {
        let mut slot = self.dict.write();
        let old_version = slot.read().version();
        self.epoch.fetch_add(old_version + 1, Ordering::Release);
        *slot = dict;
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        let dict = self.dict.read();
        self.epoch.load(Ordering::Acquire) + dict.read().version()
    }

    #[must_use]
    pub fn aux(&self) -> &AuxAttrs {
        &self.aux
    }

    /// Depth-first lookup, returning the value and the class whose dict holds it.
    #[must_use]
    pub fn lookup_where(self: &Arc<Self>, name: &str) -> Option<(Value, ClassRef)> {
        if let Some(value) = self.dict().read().get_str(name) {
            return Some((value, self.clone()));
        }
        self.bases().iter().find_map(|base| base.lookup_where(name))
    }

    #[must_use]
    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<Value> {
        self.lookup_where(name).map(|(value, _)| value)
    }

    /// Returns true if `other` is this class or one of its ancestors.
    #[must_use]
    pub fn is_subclass(self: &Arc<Self>, other: &ClassRef) -> bool {
        Arc::ptr_eq(self, other) || self.bases().iter().any(|base| base.is_subclass(other))
    }

    /// Cached special-method lookup along the depth-first order.
    #[must_use]
    pub fn slot(self: &Arc<Self>, method: SpecialMethod) -> Option<Value> {
        let own_epoch = self.epoch();
        let dict = self.dict();
        self.slots.lookup(method, own_epoch, &dict, || {
            let mut order = classic_mro(self);
            order.remove(0);
            order
        })
    }

    /// Lookup order as `ClassLike` entries, starting with this class.
    #[must_use]
    pub fn mro(self: &Arc<Self>) -> Vec<ClassLike> {
        classic_mro(self)
    }
}

/// An instance of a classic class.
#[derive(Debug)]
pub struct ClassicInstance {
    class: RwLock<ClassRef>,
    dict: RwLock<DictRef>,
    aux: AuxAttrs,
}

impl ClassicInstance {
    #[must_use]
    pub fn new(class: ClassRef) -> InstanceRef {
        Arc::new(Self {
            class: RwLock::new(class),
            dict: RwLock::new(Dict::new_ref()),
            aux: AuxAttrs::new(),
        })
    }

    #[must_use]
    pub fn class(&self) -> ClassRef {
        self.class.read().clone()
    }

    pub fn set_class(&self, class: ClassRef) {
        *self.class.write() = class;
    }

    #[must_use]
    pub fn dict(&self) -> DictRef {
        self.dict.read().clone()
    }

    pub fn set_dict(&self, dict: DictRef) {
        *self.dict.write() = dict;
    }

    #[must_use]
    pub fn aux(&self) -> &AuxAttrs {
        &self.aux
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_with(name: &str, bases: Vec<ClassRef>, attr: Option<(&str, i64)>) -> ClassRef {
        let mut dict = Dict::new();
        if let Some((key, value)) = attr {
            dict.set_str(key, Value::Int(value));
        }
        ClassicClass::new(name, bases, dict.into_ref())
    }

    #[test]
    fn lookup_is_depth_first() {
        // A defines x; B(A) does not; C defines x; D(B, C) must find A.x before C.x.
        let a = class_with("A", vec![], Some(("x", 1)));
        let b = class_with("B", vec![a.clone()], None);
        let c = class_with("C", vec![a], Some(("x", 3)));
        let d = class_with("D", vec![b, c], None);
        assert_eq!(d.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn rebinding_bases_rejects_cycles() {
        let a = class_with("A", vec![], None);
        let b = class_with("B", vec![a.clone()], None);
        let err = a.set_bases(vec![b.clone()]).unwrap_err();
        assert!(err.matches_type(ExcType::ValueError));
        let err = a.set_bases(vec![a.clone()]).unwrap_err();
        assert!(err.matches_type(ExcType::ValueError));
        assert!(b.is_subclass(&a));
    }

    #[test]
    fn epoch_moves_on_every_mutation() {
        let a = class_with("A", vec![], None);
        let start = a.epoch();
        a.dict().write().set_str("y", Value::Int(2));
        let after_set = a.epoch();
        assert!(after_set > start);
        a.set_dict(Dict::new_ref());
        assert!(a.epoch() > after_set);
    }
}
