//! The process-wide registry of builtin types.
//!
//! Builtin types are created once, on first use, and shared by every interpreter. The
//! registry is built without calling back into itself: constructing a type or filling its
//! method table must not call [`builtin_types`] or [`ExcType::type_ref`]. The native methods
//! installed here only reach the registry when they run.

use std::sync::{Arc, LazyLock};

use strum::{EnumCount, IntoEnumIterator};

use super::{ClassLike, ClassicClass, PyType, TypeFlags, TypeInstance, TypeRef, native};
use crate::{
    args::ArgValues,
    bytecode::Vm,
    descriptor::{self, NativeDescriptor, StaticMethod},
    exception::{ExcType, ExceptionObject, ExceptionRef, RunResult},
    function::BuiltinFunction,
    value::Value,
};

static BUILTIN_TYPES: LazyLock<BuiltinTypes> = LazyLock::new(BuiltinTypes::create);

/// The builtin type registry.
#[must_use]
pub fn builtin_types() -> &'static BuiltinTypes {
    &BUILTIN_TYPES
}

#[derive(Debug)]
pub struct BuiltinTypes {
    pub object: TypeRef,
    pub type_: TypeRef,
    pub none: TypeRef,
    pub not_implemented: TypeRef,
    pub bool: TypeRef,
    pub int: TypeRef,
    pub long: TypeRef,
    pub float: TypeRef,
    pub str: TypeRef,
    pub bytes: TypeRef,
    pub tuple: TypeRef,
    pub list: TypeRef,
    pub dict: TypeRef,
    pub set: TypeRef,
    pub function: TypeRef,
    pub method: TypeRef,
    pub builtin_function: TypeRef,
    pub staticmethod: TypeRef,
    pub classmethod: TypeRef,
    pub property: TypeRef,
    pub getset_descriptor: TypeRef,
    pub super_: TypeRef,
    /// The type of classic classes.
    pub classobj: TypeRef,
    /// The type of classic instances.
    pub instance: TypeRef,
    pub code: TypeRef,
    pub frame: TypeRef,
    pub traceback: TypeRef,
    pub cell: TypeRef,
    pub generator: TypeRef,
    pub iterator: TypeRef,
    pub weakref: TypeRef,
    /// Indexed by `ExcType` discriminant.
    exceptions: Vec<TypeRef>,
    /// `object.__getattribute__`, compared by identity to detect overrides.
    pub object_getattribute: Value,
    pub object_setattr: Value,
    pub object_delattr: Value,
    /// The function wrapped by `object.__new__`'s staticmethod.
    pub object_new: Value,
    pub object_init: Value,
}

impl BuiltinTypes {
    fn create() -> Self {
        let object = PyType::new_builtin("object", None, TypeFlags::BASETYPE, None);
        let plain = |name: &str| PyType::new_builtin(name, Some(&object), TypeFlags::empty(), None);
        let int = plain("int");

        // Declaration order puts every exception after its base.
        let mut exceptions: Vec<TypeRef> = Vec::with_capacity(ExcType::COUNT);
        for exc in ExcType::iter() {
            let base = match exc.base() {
                Some(base) => exceptions[base as usize].clone(),
                None => object.clone(),
            };
            let name: &'static str = exc.into();
            exceptions.push(PyType::new_builtin(
                name,
                Some(&base),
                TypeFlags::BASETYPE | TypeFlags::HAS_DICT,
                Some(exc),
            ));
        }

        let types = Self {
            type_: PyType::new_builtin("type", Some(&object), TypeFlags::BASETYPE, None),
            none: plain("NoneType"),
            not_implemented: plain("NotImplementedType"),
            bool: PyType::new_builtin("bool", Some(&int), TypeFlags::empty(), None),
            long: plain("long"),
            float: plain("float"),
            str: plain("str"),
            bytes: plain("bytes"),
            tuple: plain("tuple"),
            list: plain("list"),
            dict: plain("dict"),
            set: plain("set"),
            function: plain("function"),
            method: plain("instancemethod"),
            builtin_function: plain("builtin_function_or_method"),
            staticmethod: plain("staticmethod"),
            classmethod: plain("classmethod"),
            property: plain("property"),
            getset_descriptor: plain("getset_descriptor"),
            super_: plain("super"),
            classobj: plain("classobj"),
            instance: plain("instance"),
            code: plain("code"),
            frame: plain("frame"),
            traceback: plain("traceback"),
            cell: plain("cell"),
            generator: plain("generator"),
            iterator: plain("iterator"),
            weakref: plain("weakref"),
            object_getattribute: BuiltinFunction::method("__getattribute__", object_getattribute),
            object_setattr: BuiltinFunction::method("__setattr__", object_setattr),
            object_delattr: BuiltinFunction::method("__delattr__", object_delattr),
            object_new: BuiltinFunction::function("__new__", object_new),
            object_init: BuiltinFunction::method("__init__", object_init),
            int,
            exceptions,
            object,
        };
        types.install_object();
        types.install_type();
        types.install_classobj();
        types.install_exceptions();
        native::install(&types);
        tracing::debug!(exceptions = types.exceptions.len(), "builtin types initialized");
        types
    }

    /// The type object of a builtin exception class.
    #[must_use]
    pub fn exception(&self, exc: ExcType) -> TypeRef {
        self.exceptions[exc as usize].clone()
    }

    /// Every builtin type exposed by name in the builtins namespace.
    #[must_use]
    pub fn named(&self) -> Vec<&TypeRef> {
        vec![
            &self.object,
            &self.type_,
            &self.bool,
            &self.int,
            &self.long,
            &self.float,
            &self.str,
            &self.tuple,
            &self.list,
            &self.dict,
            &self.set,
            &self.staticmethod,
            &self.classmethod,
            &self.property,
            &self.super_,
            &self.weakref,
        ]
    }

    fn install_object(&self) {
        let t = &self.object;
        {
            let mut dict = t.dict().write();
            dict.set_str("__getattribute__", self.object_getattribute.clone());
            dict.set_str("__setattr__", self.object_setattr.clone());
            dict.set_str("__delattr__", self.object_delattr.clone());
            dict.set_str("__new__", StaticMethod::new(self.object_new.clone()));
            dict.set_str("__init__", self.object_init.clone());
        }
        add_method(t, "__repr__", |_, args| {
            let obj = args.get_one_arg("__repr__")?;
            Ok(Value::str(&obj.repr_builtin()))
        });
        add_method(t, "__str__", |vm, args| {
            let obj = args.get_one_arg("__str__")?;
            Ok(Value::str(&vm.repr(&obj)?))
        });
        add_method(t, "__hash__", |_, args| {
            let obj = args.get_one_arg("__hash__")?;
            let hash = crate::py_hash::hash_identity(obj.addr());
            Ok(Value::Int(i64::from_ne_bytes(hash.to_ne_bytes())))
        });
        add_getset(t, "__class__", |_, obj| Ok(Value::Type(obj.type_of())));
        add_getset(t, "__dict__", |_, obj| match descriptor::instance_dict(obj) {
            Some(dict) => Ok(Value::Dict(dict)),
            None => Err(ExcType::attribute_error(obj.type_name(), "__dict__")),
        });
    }

    fn install_type(&self) {
        let t = &self.type_;
        add_static(t, "__new__", type_new);
        add_method(t, "__init__", |_, _| Ok(Value::None));
        add_method(t, "__call__", |vm, args| {
            let (receiver, rest) = args.split_self("type.__call__")?;
            let t = expect_type(&receiver, "__call__")?;
            vm.call_type(t, rest)
        });
        add_method(t, "__repr__", |_, args| {
            let t = args.get_one_arg("__repr__")?;
            Ok(Value::str(&t.repr_builtin()))
        });
        add_method(t, "mro", |_, args| {
            let t = args.get_one_arg("mro")?;
            let t = expect_type(&t, "mro")?;
            Ok(Value::list(t.mro().iter().map(ClassLike::to_value).collect()))
        });
        add_method(t, "__subclasses__", |_, args| {
            let t = args.get_one_arg("__subclasses__")?;
            let t = expect_type(&t, "__subclasses__")?;
            Ok(Value::list(t.subclasses().into_iter().map(Value::Type).collect()))
        });
        add_getset_mut(
            t,
            "__name__",
            |_, t| Ok(Value::Str(expect_type(t, "__name__")?.name())),
            |_, t, value| {
                let t = expect_type(t, "__name__")?;
                match value {
                    Some(Value::Str(name)) => t.set_name(name),
                    Some(other) => Err(ExcType::type_error(format!(
                        "can only assign string to {}.__name__, not '{}'",
                        t.name(),
                        other.type_name()
                    ))),
                    None => Err(ExcType::type_error(format!("can't delete {}.__name__", t.name()))),
                }
            },
        );
        add_getset_mut(
            t,
            "__bases__",
            |_, t| {
                let bases = expect_type(t, "__bases__")?.bases();
                Ok(Value::tuple(bases.iter().map(ClassLike::to_value).collect()))
            },
            |_, t, value| {
                let t = expect_type(t, "__bases__")?;
                let Some(Value::Tuple(items)) = value else {
                    return Err(ExcType::type_error(format!(
                        "can only assign tuple to {}.__bases__",
                        t.name()
                    )));
                };
                let bases = items
                    .iter()
                    .map(|item| {
                        ClassLike::from_value(item).ok_or_else(|| {
                            ExcType::type_error(format!(
                                "{}.__bases__ must be tuple of old- or new-style classes, not '{}'",
                                t.name(),
                                item.type_name()
                            ))
                        })
                    })
                    .collect::<RunResult<Vec<_>>>()?;
                t.set_bases(bases)
            },
        );
        add_getset(t, "__mro__", |_, t| {
            let t = expect_type(t, "__mro__")?;
            Ok(Value::tuple(t.mro().iter().map(ClassLike::to_value).collect()))
        });
        add_getset(t, "__dict__", |_, t| Ok(Value::Dict(expect_type(t, "__dict__")?.dict().clone())));
        add_getset_mut(
            t,
            "__module__",
            |_, t| {
                let t = expect_type(t, "__module__")?;
                let module = t.dict().read().get_str("__module__");
                Ok(module.unwrap_or_else(|| Value::str("__builtin__")))
            },
            |_, t, value| {
                let t = expect_type(t, "__module__")?;
                match value {
                    Some(value) => t.set_attr("__module__", value),
                    None => t.del_attr("__module__"),
                }
            },
        );
    }

    fn install_classobj(&self) {
        add_static(&self.classobj, "__new__", |vm, args| {
            let (_, rest) = args.split_self("classobj.__new__")?;
            let (name, bases, dict) = rest.get_three_args("classobj")?;
            let Value::Tuple(base_items) = &bases else {
                return Err(ExcType::type_error("PyClass_New: bases must be a tuple"));
            };
            // A new-style base turns the class statement into a new-style type.
            if let Some(new_style) = base_items.iter().find(|base| matches!(base, Value::Type(_))) {
                let meta = Value::Type(new_style.type_of());
                return vm.call_args(&meta, vec![name, bases.clone(), dict]);
            }
            let Value::Str(name) = &name else {
                return Err(ExcType::type_error("PyClass_New: name must be a string"));
            };
            let Value::Dict(dict) = dict else {
                return Err(ExcType::type_error("PyClass_New: dict must be a dictionary"));
            };
            let bases = base_items
                .iter()
                .map(|base| match base {
                    Value::Class(cls) => Ok(cls.clone()),
                    _ => Err(ExcType::type_error("PyClass_New: base must be a class")),
                })
                .collect::<RunResult<Vec<_>>>()?;
            let cls = ClassicClass::new(name, bases, dict);
            tracing::debug!(name = %name, bases = cls.bases().len(), "created classic class");
            Ok(Value::Class(cls))
        });
    }

    fn install_exceptions(&self) {
        let t = &self.exceptions[ExcType::BaseException as usize];
        add_static(t, "__new__", |_, args| {
            let (cls, rest) = args.split_self("BaseException.__new__")?;
            let Value::Type(cls) = cls else {
                return Err(ExcType::type_error(format!(
                    "BaseException.__new__(X): X is not a type object ({})",
                    cls.type_name()
                )));
            };
            if cls.exc_type().is_none() {
                return Err(ExcType::type_error(format!(
                    "BaseException.__new__({}): {} is not a subtype of BaseException",
                    cls.name(),
                    cls.name()
                )));
            }
            Ok(Value::Exception(ExceptionObject::new(cls, rest.args)))
        });
        add_method(t, "__init__", |_, args| {
            let (receiver, rest) = args.split_self("__init__")?;
            let exc = expect_exception(&receiver, "__init__")?;
            if !rest.kwargs.is_empty() {
                return Err(ExcType::type_error(format!(
                    "{} does not take keyword arguments",
                    exc.class().name()
                )));
            }
            exc.set_args(rest.args);
            Ok(Value::None)
        });
        add_method(t, "__str__", |vm, args| {
            let receiver = args.get_one_arg("__str__")?;
            let exc = expect_exception(&receiver, "__str__")?;
            let text = match &*exc.args() {
                [] => String::new(),
                [single] => vm.to_str(single)?,
                many => vm.repr(&Value::tuple(many.to_vec()))?,
            };
            Ok(Value::str(&text))
        });
        add_method(t, "__repr__", |vm, args| {
            let receiver = args.get_one_arg("__repr__")?;
            let exc = expect_exception(&receiver, "__repr__")?;
            let args = vm.repr(&Value::Tuple(exc.args()))?;
            Ok(Value::str(&format!("{}{args}", exc.class().name())))
        });
        add_getset_mut(
            t,
            "args",
            |_, obj| Ok(Value::Tuple(expect_exception(obj, "args")?.args())),
            |vm, obj, value| {
                let exc = expect_exception(obj, "args")?;
                let Some(value) = value else {
                    return Err(ExcType::type_error("args may not be deleted"));
                };
                let items = vm.iterate(&value)?;
                exc.set_args(items);
                Ok(())
            },
        );
        add_getset_mut(
            t,
            "message",
            |vm, obj| {
                let exc = expect_exception(obj, "message")?;
                let stored = exc.dict().read().get_str("message");
                if let Some(message) = stored {
                    return Ok(message);
                }
                vm.warn(
                    ExcType::DeprecationWarning,
                    "BaseException.message has been deprecated as of Python 2.6",
                )?;
                Ok(match &*exc.args() {
                    [single] => single.clone(),
                    _ => Value::str(""),
                })
            },
            |_, obj, value| {
                let exc = expect_exception(obj, "message")?;
                let mut dict = exc.dict().write();
                match value {
                    Some(value) => {
                        dict.set_str("message", value);
                        Ok(())
                    }
                    None => dict
                        .remove_str("message")
                        .map(drop)
                        .ok_or_else(|| ExcType::AttributeError.error("message attribute was deleted")),
                }
            },
        );
    }
}

pub(super) fn add_method(
    t: &TypeRef,
    name: &str,
    func: impl Fn(&mut Vm, ArgValues) -> RunResult<Value> + Send + Sync + 'static,
) {
    t.dict().write().set_str(name, BuiltinFunction::method(name, func));
}

/// Installs a `staticmethod`-wrapped builtin, the form `__new__` takes.
pub(super) fn add_static(
    t: &TypeRef,
    name: &str,
    func: impl Fn(&mut Vm, ArgValues) -> RunResult<Value> + Send + Sync + 'static,
) {
    t.dict()
        .write()
        .set_str(name, StaticMethod::new(BuiltinFunction::function(name, func)));
}

pub(super) fn add_getset(
    t: &TypeRef,
    name: &str,
    get: impl Fn(&mut Vm, &Value) -> RunResult<Value> + Send + Sync + 'static,
) {
    let descr = NativeDescriptor::getset(&t.name(), name, get);
    t.dict().write().set_str(name, descr);
}

pub(super) fn add_getset_mut(
    t: &TypeRef,
    name: &str,
    get: impl Fn(&mut Vm, &Value) -> RunResult<Value> + Send + Sync + 'static,
    set: impl Fn(&mut Vm, &Value, Option<Value>) -> RunResult<()> + Send + Sync + 'static,
) {
    let descr = NativeDescriptor::getset_mut(&t.name(), name, get, set);
    t.dict().write().set_str(name, descr);
}

fn expect_type<'a>(value: &'a Value, attr: &str) -> RunResult<&'a TypeRef> {
    match value {
        Value::Type(t) => Ok(t),
        other => Err(ExcType::type_error(format!(
            "descriptor '{attr}' for 'type' objects doesn't apply to '{}' object",
            other.type_name()
        ))),
    }
}

fn expect_exception<'a>(value: &'a Value, attr: &str) -> RunResult<&'a ExceptionRef> {
    match value {
        Value::Exception(exc) => Ok(exc),
        other => Err(ExcType::type_error(format!(
            "descriptor '{attr}' requires a 'BaseException' object but received a '{}'",
            other.type_name()
        ))),
    }
}

fn is_object_new(new: &Value, types: &BuiltinTypes) -> bool {
    matches!(new, Value::StaticMethod(sm) if sm.func().is(&types.object_new))
}

/// `object.__new__(cls, *args)`
///
/// Extra arguments are an error unless the class overrides `__init__`; a class that
/// overrides `__new__` and still passes them up gets a deprecation warning.
fn object_new(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let types = builtin_types();
    let (cls, rest) = args.split_self("object.__new__")?;
    let Value::Type(cls) = cls else {
        return Err(ExcType::type_error(format!(
            "object.__new__(X): X is not a type object ({})",
            cls.type_name()
        )));
    };
    if cls.is_builtin() && !Arc::ptr_eq(&cls, &types.object) {
        let name = cls.name();
        return Err(ExcType::type_error(format!(
            "object.__new__({name}) is not safe, use {name}.__new__()"
        )));
    }
    if rest.count() > 0 {
        let init_overridden = !cls.lookup("__init__").is_some_and(|init| init.is(&types.object_init));
        if !init_overridden {
            return Err(ExcType::type_error("object() takes no parameters"));
        }
        let new_overridden = !cls.lookup("__new__").is_some_and(|new| is_object_new(&new, types));
        if new_overridden {
            vm.warn(ExcType::DeprecationWarning, "object() takes no parameters")?;
        }
    }
    Ok(Value::Object(TypeInstance::new(cls)))
}

/// `object.__init__(self, *args)`, the mirror image of [`object_new`].
fn object_init(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let types = builtin_types();
    let (obj, rest) = args.split_self("object.__init__")?;
    if rest.count() > 0 {
        let cls = obj.class_of();
        if cls.lookup("__new__").is_some_and(|new| is_object_new(&new, types)) {
            return Err(ExcType::type_error("object.__init__() takes no parameters"));
        }
        if !cls.lookup("__init__").is_some_and(|init| init.is(&types.object_init)) {
            vm.warn(ExcType::DeprecationWarning, "object.__init__() takes no parameters")?;
        }
    }
    Ok(Value::None)
}

fn attr_name(name: &Value) -> RunResult<&str> {
    name.as_str().ok_or_else(|| {
        ExcType::type_error(format!(
            "attribute name must be string, not '{}'",
            name.type_name()
        ))
    })
}

fn object_getattribute(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("__getattribute__")?;
    descriptor::object_get_attribute(vm, &obj, attr_name(&name)?)
}

fn object_setattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name, value) = args.get_three_args("__setattr__")?;
    descriptor::object_set_attribute(vm, &obj, attr_name(&name)?, Some(value))?;
    Ok(Value::None)
}

fn object_delattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("__delattr__")?;
    descriptor::object_set_attribute(vm, &obj, attr_name(&name)?, None)?;
    Ok(Value::None)
}

/// `type(obj)` or `type(name, bases, dict)`, and `Meta.__new__` for metaclasses.
fn type_new(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let types = builtin_types();
    let (meta, rest) = args.split_self("type.__new__")?;
    let Value::Type(meta) = meta else {
        return Err(ExcType::type_error(format!(
            "type.__new__(X): X is not a type object ({})",
            meta.type_name()
        )));
    };
    if !meta.is_subtype(&types.type_) {
        return Err(ExcType::type_error(format!(
            "type.__new__({}): {} is not a subtype of type",
            meta.name(),
            meta.name()
        )));
    }
    if rest.args.len() == 1 && rest.kwargs.is_empty() && Arc::ptr_eq(&meta, &types.type_) {
        return Ok(Value::Type(rest.args[0].type_of()));
    }
    if rest.args.len() != 3 {
        return Err(ExcType::type_error("type() takes 1 or 3 arguments"));
    }
    let (name, bases, dict) = rest.get_three_args("type")?;
    let Value::Str(name) = name else {
        return Err(ExcType::type_error(format!(
            "type() argument 1 must be string, not {}",
            name.type_name()
        )));
    };
    let Value::Tuple(bases) = bases else {
        return Err(ExcType::type_error(format!(
            "type() argument 2 must be tuple, not {}",
            bases.type_name()
        )));
    };
    let Value::Dict(dict) = dict else {
        return Err(ExcType::type_error(format!(
            "type() argument 3 must be dict, not {}",
            dict.type_name()
        )));
    };
    let bases = bases
        .iter()
        .map(|base| ClassLike::from_value(base).ok_or_else(|| ExcType::type_error("bases must be types")))
        .collect::<RunResult<Vec<_>>>()?;
    let namespace = dict.read().clone();
    PyType::create_type(&name, bases, namespace, meta).map(Value::Type)
}
