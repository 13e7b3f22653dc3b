//! New-style types and their instances.
//!
//! A [`PyType`] owns its namespace dict, its bases and its cached MRO. The MRO is stored
//! without the type itself (`mro_tail`), which keeps a type from holding a strong reference
//! to itself. Special methods are resolved through a per-type [`SlotTable`] validated by
//! epochs, so mutating any class in the MRO invalidates dependent caches without visiting
//! subclasses. Subclasses are still tracked weakly so that rebinding `__bases__` can
//! recompute their MROs.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};

use super::{
    ClassLike, Dict, DictRef, SpecialMethod, builtin_types,
    mro::compute_mro,
    slots::SlotTable,
};
use crate::{
    aux_attrs::AuxAttrs,
    descriptor::{NativeDescriptor, StaticMethod},
    exception::{ExcType, RunResult},
    interop::HostClass,
    value::{Str, Value},
};

pub type TypeRef = Arc<PyType>;
pub type ObjectRef = Arc<TypeInstance>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// Created by the runtime; attributes cannot be set or deleted.
        const BUILTIN = 0x01;
        /// May be used as a base class.
        const BASETYPE = 0x02;
        /// Instances carry a `__dict__`.
        const HAS_DICT = 0x04;
    }
}

pub struct PyType {
    name: RwLock<Str>,
    /// `None` stands for the builtin `type`, which avoids `type` referencing itself.
    metatype: Option<TypeRef>,
    bases: RwLock<Arc<[ClassLike]>>,
    /// MRO without the type itself.
    mro_tail: RwLock<Arc<[ClassLike]>>,
    dict: DictRef,
    epoch: AtomicU64,
    slots: SlotTable,
    subclasses: Mutex<Vec<Weak<PyType>>>,
    flags: TypeFlags,
    /// Builtin exception class this type is or derives from.
    exc_type: Option<ExcType>,
    /// Number of `__slots__` storage cells in instances, inherited ones included.
    slot_count: usize,
    host: Option<Arc<dyn HostClass>>,
    aux: AuxAttrs,
}

impl PyType {
    /// Creates a builtin type with at most one base.
    pub(crate) fn new_builtin(
        name: &str,
        base: Option<&TypeRef>,
        flags: TypeFlags,
        exc_type: Option<ExcType>,
    ) -> TypeRef {
        let (bases, mro_tail): (Vec<ClassLike>, Vec<ClassLike>) = match base {
            Some(base) => (vec![ClassLike::Type(base.clone())], base.mro()),
            None => (Vec::new(), Vec::new()),
        };
        let t = Arc::new(Self {
            name: RwLock::new(Arc::from(name)),
            metatype: None,
            bases: RwLock::new(Arc::from(bases)),
            mro_tail: RwLock::new(Arc::from(mro_tail)),
            dict: Dict::new_ref(),
            epoch: AtomicU64::new(0),
            slots: SlotTable::new(),
            subclasses: Mutex::new(Vec::new()),
            flags: flags | TypeFlags::BUILTIN,
            exc_type,
            slot_count: 0,
            host: None,
            aux: AuxAttrs::new(),
        });
        if let Some(base) = base {
            base.register_subclass(&t);
        }
        t
    }

    /// Creates the type reflecting a host class.
    pub(crate) fn new_host(name: &str, base: &TypeRef, dict: Dict, host: Arc<dyn HostClass>) -> TypeRef {
        let t = Arc::new(Self {
            name: RwLock::new(Arc::from(name)),
            metatype: None,
            bases: RwLock::new(Arc::from(vec![ClassLike::Type(base.clone())])),
            mro_tail: RwLock::new(Arc::from(base.mro())),
            dict: dict.into_ref(),
            epoch: AtomicU64::new(0),
            slots: SlotTable::new(),
            subclasses: Mutex::new(Vec::new()),
            flags: TypeFlags::BUILTIN,
            exc_type: None,
            slot_count: 0,
            host: Some(host),
            aux: AuxAttrs::new(),
        });
        base.register_subclass(&t);
        t
    }

    /// Creates a type from a class statement or a `type(name, bases, dict)` call.
    ///
    /// Validates the bases, resolves the most derived metatype, computes the C3 MRO, lays
    /// out `__slots__` storage and wraps a plain `__new__` function in a staticmethod.
    pub fn create_type(name: &str, bases: Vec<ClassLike>, mut dict: Dict, metatype: TypeRef) -> RunResult<TypeRef> {
        let types = builtin_types();
        let bases = if bases.is_empty() {
            vec![ClassLike::Type(types.object.clone())]
        } else {
            bases
        };
        check_bases(&bases)?;
        let metatype = resolve_metatype(metatype, &bases)?;

        let mut mro_tail = compute_mro(&bases)?;
        if !mro_tail.iter().any(|c| matches!(c, ClassLike::Type(_))) {
            mro_tail.push(ClassLike::Type(types.object.clone()));
        }

        let base_slots = solid_slot_count(&bases)?;
        let inherits_dict = bases.iter().any(|base| match base {
            ClassLike::Classic(_) => true,
            ClassLike::Type(t) => t.has_dict(),
        });
        let declared = match dict.get_str("__slots__") {
            Some(slots) => Some(parse_slots(&slots)?),
            None => None,
        };
        let mut has_dict = inherits_dict || declared.is_none();
        let mut own_slots: Vec<Str> = Vec::new();
        for slot in declared.into_iter().flatten() {
            match &*slot {
                "__dict__" => {
                    if inherits_dict {
                        return Err(ExcType::type_error("__dict__ slot disallowed: we already got one"));
                    }
                    has_dict = true;
                }
                "__weakref__" => {}
                _ => own_slots.push(slot),
            }
        }
        for (i, slot) in own_slots.iter().enumerate() {
            if dict.contains_str(slot) {
                return Err(ExcType::value_error(format!(
                    "'{slot}' in __slots__ conflicts with class variable"
                )));
            }
            dict.set_str(slot, NativeDescriptor::member(name, slot, base_slots + i));
        }
        if let Some(new @ Value::Function(_)) = dict.get_str("__new__") {
            dict.set_str("__new__", StaticMethod::new(new));
        }

        let exc_type = mro_tail.iter().find_map(|cls| match cls {
            ClassLike::Type(t) => t.exc_type,
            ClassLike::Classic(_) => None,
        });
        let mut flags = TypeFlags::BASETYPE;
        if has_dict {
            flags |= TypeFlags::HAS_DICT;
        }
        let metatype = (!Arc::ptr_eq(&metatype, &types.type_)).then_some(metatype);

        let t = Arc::new(Self {
            name: RwLock::new(Arc::from(name)),
            metatype,
            bases: RwLock::new(Arc::from(bases.clone())),
            mro_tail: RwLock::new(Arc::from(mro_tail)),
            dict: dict.into_ref(),
            epoch: AtomicU64::new(0),
            slots: SlotTable::new(),
            subclasses: Mutex::new(Vec::new()),
            flags,
            exc_type,
            slot_count: base_slots + own_slots.len(),
            host: None,
            aux: AuxAttrs::new(),
        });
        for base in &bases {
            if let ClassLike::Type(base) = base {
                base.register_subclass(&t);
            }
        }
        tracing::debug!(
            name,
            mro = ?t.mro().iter().map(ClassLike::name).collect::<Vec<_>>(),
            slots = t.slot_count,
            "created type"
        );
        Ok(t)
    }

    #[must_use]
    pub fn name(&self) -> Str {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: Str) -> RunResult<()> {
        self.check_mutable()?;
        *self.name.write() = name;
        Ok(())
    }

    /// The type of this type object.
    #[must_use]
    pub fn metatype(&self) -> TypeRef {
        match &self.metatype {
            Some(meta) => meta.clone(),
            None => builtin_types().type_.clone(),
        }
    }

    #[must_use]
    pub fn bases(&self) -> Arc<[ClassLike]> {
        self.bases.read().clone()
    }

    /// The method resolution order, starting with the type itself.
    #[must_use]
    pub fn mro(self: &Arc<Self>) -> Vec<ClassLike> {
        let tail = self.mro_tail.read().clone();
        let mut mro = Vec::with_capacity(tail.len() + 1);
        mro.push(ClassLike::Type(self.clone()));
        mro.extend(tail.iter().cloned());
        mro
    }

    #[must_use]
    pub fn mro_tail(&self) -> Arc<[ClassLike]> {
        self.mro_tail.read().clone()
    }

    /// Returns true if `cls` is this type or appears in its MRO.
    #[must_use]
    pub fn mro_contains(self: &Arc<Self>, cls: &ClassLike) -> bool {
        if let ClassLike::Type(t) = cls
            && Arc::ptr_eq(self, t)
        {
            return true;
        }
        self.mro_tail.read().iter().any(|entry| entry == cls)
    }

    #[must_use]
    pub fn is_subtype(self: &Arc<Self>, other: &TypeRef) -> bool {
        self.mro_contains(&ClassLike::Type(other.clone()))
    }

    #[must_use]
    pub fn dict(&self) -> &DictRef {
        &self.dict
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire) + self.dict.read().version()
    }

    #[must_use]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.flags.contains(TypeFlags::BUILTIN)
    }

    #[must_use]
    pub fn has_dict(&self) -> bool {
        self.flags.contains(TypeFlags::HAS_DICT)
    }

    #[must_use]
    pub fn exc_type(&self) -> Option<ExcType> {
        self.exc_type
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[must_use]
    pub fn host(&self) -> Option<&Arc<dyn HostClass>> {
        self.host.as_ref()
    }

    #[must_use]
    pub fn aux(&self) -> &AuxAttrs {
        &self.aux
    }

    /// Resolves `name` along the MRO.
    #[must_use]
    pub fn lookup(self: &Arc<Self>, name: &str) -> Option<Value> {
        self.lookup_where(name).map(|(value, _)| value)
    }

    #[must_use]
    pub fn lookup_where(self: &Arc<Self>, name: &str) -> Option<(Value, ClassLike)> {
        if let Some(value) = self.dict.read().get_str(name) {
            return Some((value, ClassLike::Type(self.clone())));
        }
        let tail = self.mro_tail.read().clone();
        tail.iter()
            .find_map(|cls| cls.own_get(name).map(|value| (value, cls.clone())))
    }

    /// Cached special-method lookup.
    #[must_use]
    pub fn slot(&self, method: SpecialMethod) -> Option<Value> {
        self.slots
            .lookup(method, self.epoch(), &self.dict, || self.mro_tail().to_vec())
    }

    fn check_mutable(&self) -> RunResult<()> {
        if self.is_builtin() {
            Err(ExcType::type_error(format!(
                "can't set attributes of built-in/extension type '{}'",
                self.name()
            )))
        } else {
            Ok(())
        }
    }

    /// Stores a class attribute. The dict version bump invalidates dependent slot caches.
    pub fn set_attr(&self, name: &str, value: Value) -> RunResult<()> {
        self.check_mutable()?;
        self.dict.write().set_str(name, value);
        Ok(())
    }

    pub fn del_attr(&self, name: &str) -> RunResult<()> {
        self.check_mutable()?;
        match self.dict.write().remove_str(name) {
            Some(_) => Ok(()),
            None => Err(ExcType::AttributeError.error(format!(
                "type object '{}' has no attribute '{name}'",
                self.name()
            ))),
        }
    }

    /// Live direct subclasses.
    #[must_use]
    pub fn subclasses(&self) -> Vec<TypeRef> {
        let mut subs = self.subclasses.lock();
        subs.retain(|weak| weak.strong_count() > 0);
        subs.iter().filter_map(Weak::upgrade).collect()
    }

    fn register_subclass(&self, sub: &TypeRef) {
        let mut subs = self.subclasses.lock();
        subs.retain(|weak| weak.strong_count() > 0);
        subs.push(Arc::downgrade(sub));
    }

    fn unregister_subclass(&self, sub: &TypeRef) {
        self.subclasses
            .lock()
            .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(sub)));
    }

    /// Rebinds `__bases__`, recomputing the MRO of this type and of every subclass.
    ///
    /// On failure every MRO is restored to its previous value.
    pub fn set_bases(self: &Arc<Self>, bases: Vec<ClassLike>) -> RunResult<()> {
        self.check_mutable()?;
        if bases.is_empty() {
            return Err(ExcType::type_error(format!(
                "can only assign non-empty tuple to {}.__bases__, not ()",
                self.name()
            )));
        }
        let me = ClassLike::Type(self.clone());
        if bases.iter().any(|base| base.is_subclass(&me)) {
            return Err(ExcType::value_error("a __bases__ item causes an inheritance cycle"));
        }
        check_bases(&bases)?;
        let inherits_dict = bases.iter().any(|base| match base {
            ClassLike::Classic(_) => true,
            ClassLike::Type(t) => t.has_dict(),
        });
        let own_slots = self.slot_count - solid_slot_count(&self.bases())?;
        if solid_slot_count(&bases)? + own_slots != self.slot_count
            || (inherits_dict && !self.has_dict())
        {
            return Err(ExcType::type_error(format!(
                "__bases__ assignment: '{}' object layout differs from '{}'",
                bases[0].name(),
                self.name()
            )));
        }

        let mut tail = compute_mro(&bases)?;
        if !tail.iter().any(|c| matches!(c, ClassLike::Type(_))) {
            tail.push(ClassLike::Type(builtin_types().object.clone()));
        }
        let old_bases = std::mem::replace(&mut *self.bases.write(), Arc::from(bases.clone()));
        let old_tail = std::mem::replace(&mut *self.mro_tail.write(), Arc::from(tail));
        self.epoch.fetch_add(1, Ordering::Release);
        if let Err(err) = self.recompute_subclass_mros() {
            *self.bases.write() = old_bases;
            *self.mro_tail.write() = old_tail;
            self.epoch.fetch_add(1, Ordering::Release);
            // The previous hierarchy was consistent, so recomputing it cannot fail.
            let _ = self.recompute_subclass_mros();
            return Err(err);
        }
        for base in old_bases.iter() {
            if let ClassLike::Type(base) = base {
                base.unregister_subclass(self);
            }
        }
        for base in &bases {
            if let ClassLike::Type(base) = base {
                base.register_subclass(self);
            }
        }
        tracing::debug!(
            name = %self.name(),
            mro = ?self.mro().iter().map(ClassLike::name).collect::<Vec<_>>(),
            "rebound __bases__"
        );
        Ok(())
    }

    fn recompute_subclass_mros(&self) -> RunResult<()> {
        for sub in self.subclasses() {
            let mut tail = compute_mro(&sub.bases())?;
            if !tail.iter().any(|c| matches!(c, ClassLike::Type(_))) {
                tail.push(ClassLike::Type(builtin_types().object.clone()));
            }
            *sub.mro_tail.write() = Arc::from(tail);
            sub.epoch.fetch_add(1, Ordering::Release);
            sub.recompute_subclass_mros()?;
        }
        Ok(())
    }
}

impl fmt::Debug for PyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PyType")
            .field("name", &self.name())
            .field("flags", &self.flags)
            .field("slot_count", &self.slot_count)
            .finish_non_exhaustive()
    }
}

/// Rejects duplicate bases and builtin types that cannot be subclassed.
fn check_bases(bases: &[ClassLike]) -> RunResult<()> {
    for (i, base) in bases.iter().enumerate() {
        if bases[..i].contains(base) {
            return Err(ExcType::type_error(format!("duplicate base class {}", base.name())));
        }
        if let ClassLike::Type(t) = base
            && !t.flags.contains(TypeFlags::BASETYPE)
        {
            return Err(ExcType::type_error(format!(
                "type '{}' is not an acceptable base type",
                t.name()
            )));
        }
    }
    let exc = bases
        .iter()
        .any(|b| matches!(b, ClassLike::Type(t) if t.exc_type.is_some()));
    let meta = bases
        .iter()
        .any(|b| matches!(b, ClassLike::Type(t) if t.is_subtype(&builtin_types().type_)));
    if exc && meta {
        return Err(ExcType::type_error("multiple bases have instance lay-out conflict"));
    }
    Ok(())
}

/// Picks the most derived metatype among `given` and the metatypes of the bases.
fn resolve_metatype(given: TypeRef, bases: &[ClassLike]) -> RunResult<TypeRef> {
    let mut winner = given;
    for base in bases {
        let ClassLike::Type(t) = base else { continue };
        let meta = t.metatype();
        if winner.is_subtype(&meta) {
            continue;
        }
        if meta.is_subtype(&winner) {
            winner = meta;
            continue;
        }
        return Err(ExcType::type_error(
            "metaclass conflict: the metaclass of a derived class must be a (non-strict) subclass of the \
             metaclasses of all its bases",
        ));
    }
    Ok(winner)
}

/// Slot storage inherited from the bases; two unrelated bases with slots cannot be combined.
fn solid_slot_count(bases: &[ClassLike]) -> RunResult<usize> {
    let mut solid: Option<&TypeRef> = None;
    for base in bases {
        let ClassLike::Type(t) = base else { continue };
        if t.slot_count == 0 {
            continue;
        }
        solid = match solid {
            None => Some(t),
            Some(current) if current.is_subtype(t) => Some(current),
            Some(current) if t.is_subtype(current) => Some(t),
            Some(_) => return Err(ExcType::type_error("multiple bases have instance lay-out conflict")),
        };
    }
    Ok(solid.map_or(0, |t| t.slot_count))
}

/// Reads `__slots__`: a single string or a sequence of identifier strings.
fn parse_slots(slots: &Value) -> RunResult<Vec<Str>> {
    let items: Vec<Value> = match slots {
        Value::Str(_) => vec![slots.clone()],
        Value::Tuple(items) => items.to_vec(),
        Value::List(items) => items.read().clone(),
        other => {
            return Err(ExcType::type_error(format!(
                "__slots__ must be a string or a sequence of strings, not '{}'",
                other.type_name()
            )));
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Str(name) if is_identifier(&name) => Ok(name),
            Value::Str(_) => Err(ExcType::type_error("__slots__ must be identifiers")),
            other => Err(ExcType::type_error(format!(
                "__slots__ items must be strings, not '{}'",
                other.type_name()
            ))),
        })
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// An instance of a user-defined new-style type.
#[derive(Debug)]
pub struct TypeInstance {
    class: TypeRef,
    dict: Option<DictRef>,
    /// Storage behind the `__slots__` member descriptors.
    slots: RwLock<Box<[Option<Value>]>>,
    aux: AuxAttrs,
}

impl TypeInstance {
    #[must_use]
    pub fn new(class: TypeRef) -> ObjectRef {
        let dict = class.has_dict().then(Dict::new_ref);
        let slots = vec![None; class.slot_count()].into_boxed_slice();
        Arc::new(Self {
            class,
            dict,
            slots: RwLock::new(slots),
            aux: AuxAttrs::new(),
        })
    }

    #[must_use]
    pub fn class(&self) -> &TypeRef {
        &self.class
    }

    #[must_use]
    pub fn dict(&self) -> Option<&DictRef> {
        self.dict.as_ref()
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<Value> {
        self.slots.read().get(index).cloned().flatten()
    }

    /// Replaces slot `index`, returning the previous value.
    pub fn set_slot(&self, index: usize, value: Option<Value>) -> Option<Value> {
        let mut slots = self.slots.write();
        slots
            .get_mut(index)
            .and_then(|slot| std::mem::replace(slot, value))
    }

    #[must_use]
    pub fn aux(&self) -> &AuxAttrs {
        &self.aux
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn user_type(name: &str, bases: &[&TypeRef]) -> TypeRef {
        let bases = bases.iter().map(|b| ClassLike::Type((*b).clone())).collect();
        PyType::create_type(name, bases, Dict::new(), builtin_types().type_.clone()).unwrap()
    }

    fn names(t: &TypeRef) -> Vec<String> {
        t.mro().iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn implicit_object_base() {
        let a = user_type("A", &[]);
        assert_eq!(names(&a), vec!["A", "object"]);
        assert!(a.has_dict());
        assert!(Arc::ptr_eq(&a.metatype(), &builtin_types().type_));
    }

    #[test]
    fn diamond_mro() {
        let a = user_type("A", &[]);
        let b = user_type("B", &[&a]);
        let c = user_type("C", &[&a]);
        let d = user_type("D", &[&b, &c]);
        assert_eq!(names(&d), vec!["D", "B", "C", "A", "object"]);
    }

    #[test]
    fn inconsistent_hierarchy_is_type_error() {
        let a = user_type("A", &[]);
        let b = user_type("B", &[&a]);
        let err = PyType::create_type(
            "X",
            vec![ClassLike::Type(a), ClassLike::Type(b)],
            Dict::new(),
            builtin_types().type_.clone(),
        )
        .unwrap_err();
        assert!(err.matches_type(ExcType::TypeError));
        assert!(err.to_string().contains("consistent method resolution"));
    }

    #[test]
    fn duplicate_and_unacceptable_bases() {
        let a = user_type("A", &[]);
        let err = PyType::create_type(
            "X",
            vec![ClassLike::Type(a.clone()), ClassLike::Type(a)],
            Dict::new(),
            builtin_types().type_.clone(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: duplicate base class A");

        let err = PyType::create_type(
            "X",
            vec![ClassLike::Type(builtin_types().int.clone())],
            Dict::new(),
            builtin_types().type_.clone(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: type 'int' is not an acceptable base type");
    }

    #[test]
    fn slots_allocate_storage_and_drop_dict() {
        let mut dict = Dict::new();
        dict.set_str("__slots__", Value::tuple(vec![Value::str("x"), Value::str("y")]));
        let p = PyType::create_type("P", vec![], dict, builtin_types().type_.clone()).unwrap();
        assert_eq!(p.slot_count(), 2);
        assert!(!p.has_dict());
        let obj = TypeInstance::new(p);
        assert!(obj.dict().is_none());
        assert_eq!(obj.set_slot(1, Some(Value::Int(5))), None);
        assert_eq!(obj.slot(1), Some(Value::Int(5)));
    }

    #[test]
    fn rebinding_bases_updates_subclasses() {
        let a = user_type("A", &[]);
        let b = user_type("B", &[]);
        let c = user_type("C", &[&a]);
        let d = user_type("D", &[&c]);
        c.set_bases(vec![ClassLike::Type(b.clone())]).unwrap();
        assert_eq!(names(&d), vec!["D", "C", "B", "object"]);
        assert!(a.subclasses().is_empty());
        assert_eq!(b.subclasses().len(), 1);

        let err = b.set_bases(vec![ClassLike::Type(d)]).unwrap_err();
        assert!(err.matches_type(ExcType::ValueError));
    }

    #[test]
    fn builtin_types_are_immutable() {
        let err = builtin_types().int.set_attr("x", Value::None).unwrap_err();
        assert!(err.matches_type(ExcType::TypeError));
    }
}
