//! Descriptor objects and attribute access.
//!
//! Attribute lookup on new-style objects follows the descriptor protocol:
//!
//! 1. a data descriptor (one defining `__set__` or `__delete__`) found on the type wins;
//! 2. then the instance `__dict__`;
//! 3. then a non-data descriptor or plain class attribute, bound through `__get__`;
//! 4. then the type's `__getattr__` hook.
//!
//! Classic instances look in their own dict first, then in the class chain, and classic
//! classes never consult data descriptors when storing attributes. Both lineages share
//! [`descr_get`], so a `property` or `classmethod` behaves the same on either.

use std::{fmt, sync::Arc};

use crate::{
    bytecode::Vm,
    exception::{ExcType, RunError, RunResult},
    function::BoundMethod,
    types::{ClassLike, ClassRef, DictRef, InstanceRef, SpecialMethod, TypeRef, builtin_types},
    value::{Str, Value},
};

/// Wraps a function so that it is never bound to an instance.
#[derive(Debug)]
pub struct StaticMethod {
    func: Value,
}

impl StaticMethod {
    #[must_use]
    pub fn new(func: Value) -> Value {
        Value::StaticMethod(Arc::new(Self { func }))
    }

    #[must_use]
    pub fn func(&self) -> &Value {
        &self.func
    }
}

/// Wraps a function so that it is bound to the class it is retrieved through.
#[derive(Debug)]
pub struct ClassMethod {
    func: Value,
}

impl ClassMethod {
    #[must_use]
    pub fn new(func: Value) -> Value {
        Value::ClassMethod(Arc::new(Self { func }))
    }

    #[must_use]
    pub fn func(&self) -> &Value {
        &self.func
    }
}

/// `property(fget, fset, fdel, doc)`. Absent accessors are `None`.
#[derive(Debug)]
pub struct Property {
    fget: Value,
    fset: Value,
    fdel: Value,
    doc: Value,
}

impl Property {
    #[must_use]
    pub fn new(fget: Value, fset: Value, fdel: Value, doc: Value) -> Value {
        Value::Property(Arc::new(Self { fget, fset, fdel, doc }))
    }

    #[must_use]
    pub fn fget(&self) -> &Value {
        &self.fget
    }

    #[must_use]
    pub fn fset(&self) -> &Value {
        &self.fset
    }

    #[must_use]
    pub fn fdel(&self) -> &Value {
        &self.fdel
    }

    #[must_use]
    pub fn doc(&self) -> &Value {
        &self.doc
    }

    /// Copy with the getter replaced, as `@prop.getter` produces.
    #[must_use]
    pub fn with_getter(&self, fget: Value) -> Value {
        Self::new(fget, self.fset.clone(), self.fdel.clone(), self.doc.clone())
    }

    #[must_use]
    pub fn with_setter(&self, fset: Value) -> Value {
        Self::new(self.fget.clone(), fset, self.fdel.clone(), self.doc.clone())
    }

    #[must_use]
    pub fn with_deleter(&self, fdel: Value) -> Value {
        Self::new(self.fget.clone(), self.fset.clone(), fdel, self.doc.clone())
    }

    fn get(&self, vm: &mut Vm, obj: &Value) -> RunResult<Value> {
        if self.fget.is_none() {
            return Err(ExcType::AttributeError.error("unreadable attribute"));
        }
        vm.call_args(&self.fget, vec![obj.clone()])
    }

    fn set(&self, vm: &mut Vm, obj: &Value, value: Option<Value>) -> RunResult<()> {
        match value {
            Some(_) if self.fset.is_none() => Err(ExcType::AttributeError.error("can't set attribute")),
            Some(value) => vm.call_args(&self.fset, vec![obj.clone(), value]).map(drop),
            None if self.fdel.is_none() => Err(ExcType::AttributeError.error("can't delete attribute")),
            None => vm.call_args(&self.fdel, vec![obj.clone()]).map(drop),
        }
    }
}

pub type Getter = Arc<dyn Fn(&mut Vm, &Value) -> RunResult<Value> + Send + Sync>;
/// Receives `None` for deletion.
pub type Setter = Arc<dyn Fn(&mut Vm, &Value, Option<Value>) -> RunResult<()> + Send + Sync>;

enum NativeKind {
    /// `__slots__` storage cell of a [`TypeInstance`](crate::types::TypeInstance).
    Member(usize),
    GetSet { get: Getter, set: Option<Setter> },
}

/// A data descriptor implemented natively: a `__slots__` member or a computed attribute
/// such as `type.__name__` or a reflected host bean property.
pub struct NativeDescriptor {
    owner: Str,
    name: Str,
    kind: NativeKind,
}

impl NativeDescriptor {
    /// Descriptor for the `index`-th slot of instances.
    #[must_use]
    pub fn member(owner: &str, name: &str, index: usize) -> Value {
        Self::wrap(owner, name, NativeKind::Member(index))
    }

    /// Read-only computed attribute.
    pub fn getset(
        owner: &str,
        name: &str,
        get: impl Fn(&mut Vm, &Value) -> RunResult<Value> + Send + Sync + 'static,
    ) -> Value {
        Self::wrap(owner, name, NativeKind::GetSet {
            get: Arc::new(get),
            set: None,
        })
    }

    /// Computed attribute with a setter, which also handles deletion.
    pub fn getset_mut(
        owner: &str,
        name: &str,
        get: impl Fn(&mut Vm, &Value) -> RunResult<Value> + Send + Sync + 'static,
        set: impl Fn(&mut Vm, &Value, Option<Value>) -> RunResult<()> + Send + Sync + 'static,
    ) -> Value {
        Self::wrap(owner, name, NativeKind::GetSet {
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        })
    }

    /// Descriptor from shared accessors, used by host reflection.
    #[must_use]
    pub fn from_accessors(owner: &str, name: &str, get: Getter, set: Option<Setter>) -> Value {
        Self::wrap(owner, name, NativeKind::GetSet { get, set })
    }

    fn wrap(owner: &str, name: &str, kind: NativeKind) -> Value {
        Value::Descriptor(Arc::new(Self {
            owner: Arc::from(owner),
            name: Arc::from(name),
            kind,
        }))
    }

    #[must_use]
    pub fn name(&self) -> &Str {
        &self.name
    }

    #[must_use]
    pub fn owner(&self) -> &Str {
        &self.owner
    }

    #[must_use]
    pub fn is_writable(&self) -> bool {
        match &self.kind {
            NativeKind::Member(_) => true,
            NativeKind::GetSet { set, .. } => set.is_some(),
        }
    }

    fn get(&self, vm: &mut Vm, obj: &Value) -> RunResult<Value> {
        match &self.kind {
            NativeKind::Member(index) => {
                let Value::Object(o) = obj else {
                    return Err(self.wrong_receiver(obj));
                };
                o.slot(*index)
                    .ok_or_else(|| ExcType::AttributeError.error(&*self.name))
            }
            NativeKind::GetSet { get, .. } => get(vm, obj),
        }
    }

    fn set(&self, vm: &mut Vm, obj: &Value, value: Option<Value>) -> RunResult<()> {
        match &self.kind {
            NativeKind::Member(index) => {
                let Value::Object(o) = obj else {
                    return Err(self.wrong_receiver(obj));
                };
                let deleting = value.is_none();
                if o.set_slot(*index, value).is_none() && deleting {
                    return Err(ExcType::AttributeError.error(&*self.name));
                }
                Ok(())
            }
            NativeKind::GetSet { set: Some(set), .. } => set(vm, obj, value),
            NativeKind::GetSet { set: None, .. } => Err(ExcType::AttributeError.error(if value.is_some() {
                "can't set attribute"
            } else {
                "can't delete attribute"
            })),
        }
    }

    fn wrong_receiver(&self, obj: &Value) -> RunError {
        ExcType::type_error(format!(
            "descriptor '{}' for '{}' objects doesn't apply to '{}' object",
            self.name,
            self.owner,
            obj.type_name()
        ))
    }
}

impl fmt::Debug for NativeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDescriptor")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish()
    }
}

/// `super(type, obj)`: attribute lookup that starts after `start` in the MRO of `obj`'s
/// type.
#[derive(Debug)]
pub struct Super {
    start: ClassLike,
    obj: Value,
    /// `None` for an unbound `super(type)`.
    obj_type: Option<ClassLike>,
}

impl Super {
    /// Validates that `obj` is an instance or subtype of `start`.
    pub fn new(start: ClassLike, obj: Value) -> RunResult<Value> {
        let obj_type = if obj.is_none() {
            None
        } else if let Some(cls) = ClassLike::from_value(&obj)
            && cls.is_subclass(&start)
        {
            Some(cls)
        } else if obj.class_of().is_subclass(&start) {
            Some(obj.class_of())
        } else {
            return Err(ExcType::type_error(
                "super(type, obj): obj must be an instance or subtype of type",
            ));
        };
        Ok(Value::Super(Arc::new(Self { start, obj, obj_type })))
    }

    #[must_use]
    pub fn start(&self) -> &ClassLike {
        &self.start
    }

    #[must_use]
    pub fn obj(&self) -> &Value {
        &self.obj
    }

    #[must_use]
    pub fn obj_type(&self) -> Option<&ClassLike> {
        self.obj_type.as_ref()
    }

    fn lookup(&self, vm: &mut Vm, name: &str) -> RunResult<Option<Value>> {
        let Some(obj_type) = &self.obj_type else {
            return Ok(None);
        };
        let mro = obj_type.linearization();
        let after = mro.iter().position(|cls| *cls == self.start).map_or(mro.len(), |i| i + 1);
        let Some(attr) = mro[after..].iter().find_map(|cls| cls.own_get(name)) else {
            return Ok(None);
        };
        // Class-level super binds like an attribute fetched from the class.
        let class_level = ClassLike::from_value(&self.obj).is_some_and(|cls| cls == *obj_type);
        let instance = (!class_level).then_some(&self.obj);
        descr_get(vm, &attr, instance, obj_type).map(Some)
    }
}

/// Applies the `__get__` half of the descriptor protocol to a class attribute.
///
/// `instance` is `None` when the attribute is fetched through the class itself. Functions
/// fetched through a class come back unbound.
pub fn descr_get(vm: &mut Vm, attr: &Value, instance: Option<&Value>, owner: &ClassLike) -> RunResult<Value> {
    match attr {
        Value::Function(_) => Ok(match instance {
            Some(obj) => BoundMethod::new(attr.clone(), obj.clone()),
            None => attr.clone(),
        }),
        Value::Builtin(builtin) if builtin.binds_self() => Ok(match instance {
            Some(obj) => BoundMethod::new(attr.clone(), obj.clone()),
            None => attr.clone(),
        }),
        Value::StaticMethod(sm) => Ok(sm.func().clone()),
        Value::ClassMethod(cm) => Ok(BoundMethod::new(cm.func().clone(), owner.to_value())),
        Value::Property(prop) => match instance {
            Some(obj) => prop.get(vm, obj),
            None => Ok(attr.clone()),
        },
        Value::Descriptor(descr) => match instance {
            Some(obj) => descr.get(vm, obj),
            None => Ok(attr.clone()),
        },
        Value::Object(_) => {
            let receiver = instance.cloned().unwrap_or(Value::None);
            let bound = vm.call_special(attr, SpecialMethod::Get, vec![receiver, owner.to_value()])?;
            Ok(bound.unwrap_or_else(|| attr.clone()))
        }
        _ => Ok(attr.clone()),
    }
}

/// Returns true for descriptors that take precedence over the instance dict.
#[must_use]
pub fn is_data_descriptor(attr: &Value) -> bool {
    match attr {
        Value::Property(_) | Value::Descriptor(_) => true,
        Value::Object(_) => {
            let cls = attr.class_of();
            cls.slot(SpecialMethod::Set).is_some() || cls.slot(SpecialMethod::Delete).is_some()
        }
        _ => false,
    }
}

/// Applies `__set__` (or `__delete__` when `value` is `None`) of a data descriptor.
fn descr_set(vm: &mut Vm, attr: &Value, obj: &Value, value: Option<Value>) -> RunResult<()> {
    match attr {
        Value::Property(prop) => prop.set(vm, obj, value),
        Value::Descriptor(descr) => descr.set(vm, obj, value),
        _ => {
            let deleting = value.is_none();
            let outcome = match value {
                Some(value) => vm.call_special(attr, SpecialMethod::Set, vec![obj.clone(), value])?,
                None => vm.call_special(attr, SpecialMethod::Delete, vec![obj.clone()])?,
            };
            match outcome {
                Some(_) => Ok(()),
                None if deleting => Err(ExcType::AttributeError.error("__delete__")),
                None => Err(ExcType::AttributeError.error("__set__")),
            }
        }
    }
}

/// `getattr(obj, name)` for every kind of object.
pub fn get_attribute(vm: &mut Vm, obj: &Value, name: &str) -> RunResult<Value> {
    match obj {
        Value::Object(o) => {
            let cls = ClassLike::Type(o.class().clone());
            let custom = cls
                .slot(SpecialMethod::GetAttribute)
                .filter(|hook| !hook.is(&builtin_types().object_getattribute));
            let result = match custom {
                Some(_) => match vm.call_special(obj, SpecialMethod::GetAttribute, vec![Value::str(name)])? {
                    Some(value) => Ok(value),
                    None => object_get_attribute(vm, obj, name),
                },
                None => object_get_attribute(vm, obj, name),
            };
            match result {
                Err(err) if err.matches_type(ExcType::AttributeError) && cls.slot(SpecialMethod::GetAttr).is_some() => {
                    vm.call_special(obj, SpecialMethod::GetAttr, vec![Value::str(name)])?
                        .ok_or(err)
                }
                other => other,
            }
        }
        Value::Instance(inst) => instance_get_attr(vm, inst, obj, name),
        Value::Class(cls) => class_get_attr(vm, cls, name),
        Value::Type(t) => type_get_attr(vm, t, obj, name),
        Value::Super(sup) => {
            if name != "__class__"
                && let Some(value) = sup.lookup(vm, name)?
            {
                return Ok(value);
            }
            generic_get_attr(vm, obj, name, &obj.class_of(), None)?
                .ok_or_else(|| ExcType::attribute_error("super", name))
        }
        other => {
            let dict = instance_dict(other);
            generic_get_attr(vm, other, name, &other.class_of(), dict.as_ref())?
                .ok_or_else(|| ExcType::attribute_error(other.type_name(), name))
        }
    }
}

/// `object.__getattribute__`: the generic lookup without the `__getattr__` fallback.
pub(crate) fn object_get_attribute(vm: &mut Vm, obj: &Value, name: &str) -> RunResult<Value> {
    let dict = instance_dict(obj);
    generic_get_attr(vm, obj, name, &obj.class_of(), dict.as_ref())?
        .ok_or_else(|| ExcType::attribute_error(obj.type_name(), name))
}

/// Data descriptor, then the instance dict, then any other class attribute.
fn generic_get_attr(
    vm: &mut Vm,
    obj: &Value,
    name: &str,
    cls: &ClassLike,
    dict: Option<&DictRef>,
) -> RunResult<Option<Value>> {
    let found = cls.lookup(name);
    if let Some(attr) = &found
        && is_data_descriptor(attr)
    {
        return descr_get(vm, attr, Some(obj), cls).map(Some);
    }
    if let Some(dict) = dict {
        let own = dict.read().get_str(name);
        if own.is_some() {
            return Ok(own);
        }
    }
    match found {
        Some(attr) => descr_get(vm, &attr, Some(obj), cls).map(Some),
        None => Ok(None),
    }
}

/// The `__dict__` of objects that have one.
pub(crate) fn instance_dict(obj: &Value) -> Option<DictRef> {
    match obj {
        Value::Object(o) => o.dict().cloned(),
        Value::Instance(inst) => Some(inst.dict()),
        Value::Exception(exc) => Some(exc.dict().clone()),
        Value::Function(func) => Some(func.dict().clone()),
        _ => None,
    }
}

fn instance_get_attr(vm: &mut Vm, inst: &InstanceRef, obj: &Value, name: &str) -> RunResult<Value> {
    match name {
        "__dict__" => return Ok(Value::Dict(inst.dict())),
        "__class__" => return Ok(Value::Class(inst.class())),
        _ => {}
    }
    let own = inst.dict().read().get_str(name);
    if let Some(value) = own {
        return Ok(value);
    }
    let cls = inst.class();
    let owner = ClassLike::Classic(cls.clone());
    if let Some(attr) = cls.lookup(name) {
        return descr_get(vm, &attr, Some(obj), &owner);
    }
    if let Some(hook) = cls.lookup("__getattr__") {
        let hook = descr_get(vm, &hook, Some(obj), &owner)?;
        return vm.call_args(&hook, vec![Value::str(name)]);
    }
    Err(ExcType::AttributeError.error(format!(
        "{} instance has no attribute '{name}'",
        cls.name()
    )))
}

fn class_get_attr(vm: &mut Vm, cls: &ClassRef, name: &str) -> RunResult<Value> {
    match name {
        "__dict__" => return Ok(Value::Dict(cls.dict())),
        "__bases__" => return Ok(Value::tuple(cls.bases().iter().cloned().map(Value::Class).collect())),
        "__name__" => return Ok(Value::Str(cls.name())),
        _ => {}
    }
    match cls.lookup_where(name) {
        Some((attr, _)) => descr_get(vm, &attr, None, &ClassLike::Classic(cls.clone())),
        None => Err(ExcType::AttributeError.error(format!(
            "class {} has no attribute '{name}'",
            cls.name()
        ))),
    }
}

/// Metatype data descriptors, then the type's own MRO, then other metatype attributes.
fn type_get_attr(vm: &mut Vm, t: &TypeRef, obj: &Value, name: &str) -> RunResult<Value> {
    let meta = ClassLike::Type(t.metatype());
    let meta_attr = meta.lookup(name);
    if let Some(attr) = &meta_attr
        && is_data_descriptor(attr)
    {
        return descr_get(vm, attr, Some(obj), &meta);
    }
    if let Some(attr) = t.lookup(name) {
        return descr_get(vm, &attr, None, &ClassLike::Type(t.clone()));
    }
    if let Some(attr) = meta_attr {
        return descr_get(vm, &attr, Some(obj), &meta);
    }
    Err(ExcType::AttributeError.error(format!(
        "type object '{}' has no attribute '{name}'",
        t.name()
    )))
}

/// `setattr(obj, name, value)`, or `delattr(obj, name)` when `value` is `None`.
pub fn set_attribute(vm: &mut Vm, obj: &Value, name: &str, value: Option<Value>) -> RunResult<()> {
    match obj {
        Value::Object(o) => {
            let types = builtin_types();
            let (method, native) = match value {
                Some(_) => (SpecialMethod::SetAttr, &types.object_setattr),
                None => (SpecialMethod::DelAttr, &types.object_delattr),
            };
            let custom = o.class().slot(method).filter(|hook| !hook.is(native));
            if custom.is_some() {
                let mut args = vec![Value::str(name)];
                args.extend(value);
                vm.call_special(obj, method, args)?;
                return Ok(());
            }
            object_set_attribute(vm, obj, name, value)
        }
        Value::Instance(inst) => instance_set_attr(vm, inst, obj, name, value),
        Value::Class(cls) => class_set_attr(cls, name, value),
        Value::Type(t) => type_set_attr(vm, t, obj, name, value),
        other => object_set_attribute(vm, other, name, value),
    }
}

/// `delattr(obj, name)`
pub fn delete_attribute(vm: &mut Vm, obj: &Value, name: &str) -> RunResult<()> {
    set_attribute(vm, obj, name, None)
}

/// `object.__setattr__` / `object.__delattr__`: data descriptor, then the instance dict.
pub(crate) fn object_set_attribute(vm: &mut Vm, obj: &Value, name: &str, value: Option<Value>) -> RunResult<()> {
    let cls = obj.class_of();
    if let Some(attr) = cls.lookup(name)
        && is_data_descriptor(&attr)
    {
        return descr_set(vm, &attr, obj, value);
    }
    let Some(dict) = instance_dict(obj) else {
        return Err(ExcType::attribute_error(obj.type_name(), name));
    };
    store(&dict, name, value).ok_or_else(|| ExcType::attribute_error(obj.type_name(), name))
}

/// Writes or removes `name`; `None` when removing a missing entry.
fn store(dict: &DictRef, name: &str, value: Option<Value>) -> Option<()> {
    let mut dict = dict.write();
    match value {
        Some(value) => {
            dict.set_str(name, value);
            Some(())
        }
        None => dict.remove_str(name).map(drop),
    }
}

fn instance_set_attr(vm: &mut Vm, inst: &InstanceRef, obj: &Value, name: &str, value: Option<Value>) -> RunResult<()> {
    match (name, &value) {
        ("__dict__", Some(Value::Dict(dict))) => {
            inst.set_dict(dict.clone());
            return Ok(());
        }
        ("__dict__", _) => return Err(ExcType::type_error("__dict__ must be set to a dictionary")),
        ("__class__", Some(Value::Class(cls))) => {
            inst.set_class(cls.clone());
            return Ok(());
        }
        ("__class__", _) => return Err(ExcType::type_error("__class__ must be set to a class")),
        _ => {}
    }
    let cls = inst.class();
    let hook_name = if value.is_some() { "__setattr__" } else { "__delattr__" };
    if let Some(hook) = cls.lookup(hook_name) {
        let hook = descr_get(vm, &hook, Some(obj), &ClassLike::Classic(cls))?;
        let mut args = vec![Value::str(name)];
        args.extend(value);
        return vm.call_args(&hook, args).map(drop);
    }
    store(&inst.dict(), name, value).ok_or_else(|| {
        ExcType::AttributeError.error(format!("{} instance has no attribute '{name}'", cls.name()))
    })
}

fn class_set_attr(cls: &ClassRef, name: &str, value: Option<Value>) -> RunResult<()> {
    match name {
        "__dict__" => match value {
            Some(Value::Dict(dict)) => {
                cls.set_dict(dict);
                Ok(())
            }
            _ => Err(ExcType::type_error("__dict__ must be a dictionary object")),
        },
        "__bases__" => {
            let Some(Value::Tuple(items)) = value else {
                return Err(ExcType::type_error("__bases__ must be a tuple object"));
            };
            let bases = items
                .iter()
                .map(|item| match item {
                    Value::Class(base) => Ok(base.clone()),
                    _ => Err(ExcType::type_error("__bases__ items must be classes")),
                })
                .collect::<RunResult<Vec<_>>>()?;
            cls.set_bases(bases)
        }
        "__name__" => match value {
            Some(Value::Str(new_name)) if !new_name.contains('\0') => {
                cls.set_name(new_name);
                Ok(())
            }
            Some(Value::Str(_)) => Err(ExcType::type_error("__name__ must not contain null bytes")),
            _ => Err(ExcType::type_error("__name__ must be a string object")),
        },
        _ => store(&cls.dict(), name, value).ok_or_else(|| {
            ExcType::AttributeError.error(format!("class {} has no attribute '{name}'", cls.name()))
        }),
    }
}

fn type_set_attr(vm: &mut Vm, t: &TypeRef, obj: &Value, name: &str, value: Option<Value>) -> RunResult<()> {
    if t.is_builtin() {
        return Err(ExcType::type_error(format!(
            "can't set attributes of built-in/extension type '{}'",
            t.name()
        )));
    }
    let meta = ClassLike::Type(t.metatype());
    if let Some(attr) = meta.lookup(name)
        && is_data_descriptor(&attr)
    {
        return descr_set(vm, &attr, obj, value);
    }
    match value {
        Some(value) => t.set_attr(name, value),
        None => t.del_attr(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_descriptor_classification() {
        let prop = Property::new(Value::None, Value::None, Value::None, Value::None);
        assert!(is_data_descriptor(&prop));
        assert!(is_data_descriptor(&NativeDescriptor::member("T", "x", 0)));
        assert!(!is_data_descriptor(&StaticMethod::new(Value::None)));
        assert!(!is_data_descriptor(&Value::Int(1)));
    }

    #[test]
    fn getset_without_setter_is_read_only() {
        let Value::Descriptor(descr) = NativeDescriptor::getset("T", "x", |_, _| Ok(Value::Int(1))) else {
            panic!("expected descriptor");
        };
        assert!(!descr.is_writable());
        assert_eq!(&**descr.name(), "x");
    }
}
