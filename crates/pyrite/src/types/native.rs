//! Native method tables for the builtin types other than `object`, `type`, classic classes
//! and exceptions.

use std::{str::FromStr, sync::Arc};

use num_bigint::BigInt;
use num_traits::FromPrimitive;
use parking_lot::RwLock;

use super::{
    ClassLike, Dict, Set, SpecialMethod, TypeRef, WeakRefObject,
    builtin_types::{BuiltinTypes, add_getset, add_getset_mut, add_method, add_static},
};
use crate::{
    args::{ArgValues, coerce_index, float_to_int},
    bytecode::Vm,
    descriptor::{self, ClassMethod, Property, StaticMethod, Super},
    exception::{ExcType, PyException, RunError, RunResult},
    value::{Str, Value},
};

pub(super) fn install(types: &BuiltinTypes) {
    install_function(types);
    install_frames(types);
    install_generators(types);
    install_descriptors(types);
    install_constructors(types);
    install_list(&types.list);
    install_tuple(&types.tuple);
    install_dict(&types.dict);
    install_str(&types.str);
    install_set(&types.set);
}

fn wrong_receiver(owner: &str, attr: &str, got: &Value) -> RunError {
    ExcType::type_error(format!(
        "descriptor '{attr}' requires a '{owner}' object but received a '{}'",
        got.type_name()
    ))
}

/// Extracts the receiver's payload or fails with the usual descriptor error.
macro_rules! receiver {
    ($value:expr, $variant:ident, $owner:literal, $attr:expr) => {
        match $value {
            Value::$variant(inner) => inner,
            other => return Err(wrong_receiver($owner, $attr, other)),
        }
    };
}

fn names_tuple(names: &[String]) -> Value {
    Value::tuple(names.iter().map(|n| Value::str(n)).collect())
}

fn install_function(types: &BuiltinTypes) {
    let t = &types.function;
    for name in ["__name__", "func_name"] {
        add_getset_mut(
            t,
            name,
            |_, f| Ok(Value::Str(receiver!(f, Function, "function", "__name__").name())),
            |_, f, value| {
                let func = receiver!(f, Function, "function", "__name__");
                match value {
                    Some(Value::Str(name)) => {
                        func.set_name(name);
                        Ok(())
                    }
                    _ => Err(ExcType::type_error("__name__ must be set to a string object")),
                }
            },
        );
    }
    for name in ["__doc__", "func_doc"] {
        add_getset_mut(
            t,
            name,
            |_, f| Ok(receiver!(f, Function, "function", "__doc__").doc()),
            |_, f, value| {
                receiver!(f, Function, "function", "__doc__").set_doc(value.unwrap_or(Value::None));
                Ok(())
            },
        );
    }
    for name in ["__defaults__", "func_defaults"] {
        add_getset_mut(
            t,
            name,
            |_, f| {
                let defaults = receiver!(f, Function, "function", "__defaults__").defaults();
                Ok(if defaults.is_empty() { Value::None } else { Value::Tuple(defaults) })
            },
            |_, f, value| {
                let func = receiver!(f, Function, "function", "__defaults__");
                match value {
                    None | Some(Value::None) => func.set_defaults(Vec::new()),
                    Some(Value::Tuple(items)) => func.set_defaults(items.to_vec()),
                    Some(_) => return Err(ExcType::type_error("__defaults__ must be set to a tuple object")),
                }
                Ok(())
            },
        );
    }
    for name in ["__code__", "func_code"] {
        add_getset(t, name, |_, f| {
            Ok(Value::Code(receiver!(f, Function, "function", "__code__").code().clone()))
        });
    }
    for name in ["__globals__", "func_globals"] {
        add_getset(t, name, |_, f| {
            Ok(Value::Dict(receiver!(f, Function, "function", "__globals__").globals().clone()))
        });
    }
    for name in ["__closure__", "func_closure"] {
        add_getset(t, name, |_, f| {
            let closure = receiver!(f, Function, "function", "__closure__").closure();
            Ok(if closure.is_empty() {
                Value::None
            } else {
                Value::tuple(closure.iter().cloned().map(Value::Cell).collect())
            })
        });
    }

    let m = &types.method;
    for name in ["__func__", "im_func"] {
        add_getset(m, name, |_, b| {
            Ok(receiver!(b, BoundMethod, "instancemethod", "__func__").func().clone())
        });
    }
    for name in ["__self__", "im_self"] {
        add_getset(m, name, |_, b| {
            Ok(receiver!(b, BoundMethod, "instancemethod", "__self__").receiver().clone())
        });
    }
    add_getset(m, "__name__", |_, b| {
        Ok(Value::Str(receiver!(b, BoundMethod, "instancemethod", "__name__").name()))
    });

    add_getset(&types.builtin_function, "__name__", |_, b| {
        Ok(Value::Str(
            receiver!(b, Builtin, "builtin_function_or_method", "__name__").name().clone(),
        ))
    });
}

fn install_frames(types: &BuiltinTypes) {
    let c = &types.code;
    add_getset(c, "co_name", |_, v| Ok(Value::str(receiver!(v, Code, "code", "co_name").name())));
    add_getset(c, "co_filename", |_, v| {
        Ok(Value::str(receiver!(v, Code, "code", "co_filename").filename()))
    });
    add_getset(c, "co_firstlineno", |_, v| {
        Ok(Value::Int(i64::from(receiver!(v, Code, "code", "co_firstlineno").first_line())))
    });
    add_getset(c, "co_argcount", |_, v| {
        let argcount = receiver!(v, Code, "code", "co_argcount").argcount();
        Ok(Value::Int(i64::try_from(argcount).unwrap_or(i64::MAX)))
    });
    add_getset(c, "co_flags", |_, v| {
        Ok(Value::Int(i64::from(receiver!(v, Code, "code", "co_flags").flags().bits())))
    });
    add_getset(c, "co_varnames", |_, v| Ok(names_tuple(receiver!(v, Code, "code", "co_varnames").varnames())));
    add_getset(c, "co_cellvars", |_, v| Ok(names_tuple(receiver!(v, Code, "code", "co_cellvars").cellvars())));
    add_getset(c, "co_freevars", |_, v| Ok(names_tuple(receiver!(v, Code, "code", "co_freevars").freevars())));
    add_getset(c, "co_names", |_, v| Ok(names_tuple(receiver!(v, Code, "code", "co_names").names())));

    let f = &types.frame;
    add_getset(f, "f_back", |_, v| {
        Ok(receiver!(v, Frame, "frame", "f_back").back().map_or(Value::None, Value::Frame))
    });
    add_getset(f, "f_code", |_, v| Ok(Value::Code(receiver!(v, Frame, "frame", "f_code").code().clone())));
    add_getset(f, "f_globals", |_, v| {
        Ok(Value::Dict(receiver!(v, Frame, "frame", "f_globals").globals().clone()))
    });
    add_getset(f, "f_builtins", |_, v| {
        Ok(Value::Dict(receiver!(v, Frame, "frame", "f_builtins").builtins().clone()))
    });
    add_getset(f, "f_locals", |_, v| {
        let frame = receiver!(v, Frame, "frame", "f_locals");
        if let Some(locals) = frame.locals() {
            return Ok(Value::Dict(locals.clone()));
        }
        // Optimized frames keep locals in fast slots; expose a snapshot.
        let mut snapshot = Dict::new();
        for name in frame.code().varnames() {
            if let Some(value) = frame.local(name) {
                snapshot.set_str(name, value);
            }
        }
        Ok(Value::Dict(snapshot.into_ref()))
    });
    add_getset(f, "f_lineno", |_, v| Ok(Value::Int(i64::from(receiver!(v, Frame, "frame", "f_lineno").line()))));
    add_getset(f, "f_lasti", |_, v| {
        let lasti = receiver!(v, Frame, "frame", "f_lasti").lasti();
        Ok(Value::Int(i64::try_from(lasti).unwrap_or(i64::MAX)))
    });

    let tb = &types.traceback;
    add_getset(tb, "tb_frame", |_, v| {
        Ok(Value::Frame(receiver!(v, Traceback, "traceback", "tb_frame").frame().clone()))
    });
    add_getset(tb, "tb_lineno", |_, v| {
        Ok(Value::Int(i64::from(receiver!(v, Traceback, "traceback", "tb_lineno").line())))
    });
    add_getset(tb, "tb_lasti", |_, v| {
        let lasti = receiver!(v, Traceback, "traceback", "tb_lasti").lasti();
        Ok(Value::Int(i64::try_from(lasti).unwrap_or(i64::MAX)))
    });
    add_getset(tb, "tb_next", |_, v| {
        let next = receiver!(v, Traceback, "traceback", "tb_next").next();
        Ok(next.map_or(Value::None, |next| Value::Traceback(next.clone())))
    });

    add_getset(&types.cell, "cell_contents", |_, v| {
        receiver!(v, Cell, "cell", "cell_contents")
            .get()
            .ok_or_else(|| ExcType::value_error("Cell is empty"))
    });
}

fn install_generators(types: &BuiltinTypes) {
    let g = &types.generator;
    add_method(g, "next", |vm, args| {
        let receiver = args.get_one_arg("next")?;
        receiver!(&receiver, Generator, "generator", "next").next(vm)
    });
    add_method(g, "send", |vm, args| {
        let (receiver, value) = args.get_two_args("send")?;
        receiver!(&receiver, Generator, "generator", "send").send(vm, value)
    });
    add_method(g, "throw", |vm, args| {
        let (receiver, rest) = args.split_self("throw")?;
        let generator = receiver!(&receiver, Generator, "generator", "throw").clone();
        let bound = rest.bind_named("throw", &["type", "value", "traceback"], 1)?;
        let mut bound = bound.into_iter().map(|v| v.unwrap_or(Value::None));
        let typ = bound.next().unwrap_or(Value::None);
        let value = bound.next().unwrap_or(Value::None);
        let traceback = bound.next().unwrap_or(Value::None);
        let exc = PyException::do_raise(vm, typ, value, traceback)?;
        generator.throw(vm, exc)
    });
    add_method(g, "close", |vm, args| {
        let receiver = args.get_one_arg("close")?;
        receiver!(&receiver, Generator, "generator", "close").close(vm)?;
        Ok(Value::None)
    });
    add_method(g, "__iter__", |_, args| args.get_one_arg("__iter__"));
    add_getset(g, "gi_frame", |_, v| {
        Ok(Value::Frame(receiver!(v, Generator, "generator", "gi_frame").frame().clone()))
    });
    add_getset(g, "gi_running", |_, v| {
        let state = receiver!(v, Generator, "generator", "gi_running").state();
        Ok(Value::Bool(state == super::GeneratorState::Running))
    });
    add_getset(g, "__name__", |_, v| Ok(Value::str(receiver!(v, Generator, "generator", "__name__").name())));

    let i = &types.iterator;
    add_method(i, "next", |vm, args| {
        let receiver = args.get_one_arg("next")?;
        match receiver!(&receiver, Iterator, "iterator", "next").next(vm)? {
            Some(item) => Ok(item),
            None => Err(PyException::stop_iteration(Value::None).into()),
        }
    });
    add_method(i, "__iter__", |_, args| args.get_one_arg("__iter__"));

    let w = &types.weakref;
    add_static(w, "__new__", |_, args| {
        let (_, rest) = args.split_self("weakref.__new__")?;
        let (target, callback) = rest.get_one_two_args("weakref")?;
        if callback.is_some_and(|cb| !cb.is_none()) {
            return Err(ExcType::type_error("weakref callbacks are not supported"));
        }
        Ok(Value::WeakRef(WeakRefObject::new(&target)?))
    });
    add_method(w, "__call__", |_, args| {
        let receiver = args.get_one_arg("__call__")?;
        Ok(receiver!(&receiver, WeakRef, "weakref", "__call__").get().unwrap_or(Value::None))
    });
}

fn install_descriptors(types: &BuiltinTypes) {
    let p = &types.property;
    add_static(p, "__new__", |_, args| {
        let (_, rest) = args.split_self("property.__new__")?;
        let mut bound = rest
            .bind_named("property", &["fget", "fset", "fdel", "doc"], 0)?
            .into_iter()
            .map(|v| v.unwrap_or(Value::None));
        let fget = bound.next().unwrap_or(Value::None);
        let fset = bound.next().unwrap_or(Value::None);
        let fdel = bound.next().unwrap_or(Value::None);
        let doc = bound.next().unwrap_or(Value::None);
        Ok(Property::new(fget, fset, fdel, doc))
    });
    add_method(p, "__init__", |_, _| Ok(Value::None));
    add_getset(p, "fget", |_, v| Ok(receiver!(v, Property, "property", "fget").fget().clone()));
    add_getset(p, "fset", |_, v| Ok(receiver!(v, Property, "property", "fset").fset().clone()));
    add_getset(p, "fdel", |_, v| Ok(receiver!(v, Property, "property", "fdel").fdel().clone()));
    add_getset(p, "__doc__", |_, v| Ok(receiver!(v, Property, "property", "__doc__").doc().clone()));
    add_method(p, "getter", |_, args| {
        let (receiver, func) = args.get_two_args("getter")?;
        Ok(receiver!(&receiver, Property, "property", "getter").with_getter(func))
    });
    add_method(p, "setter", |_, args| {
        let (receiver, func) = args.get_two_args("setter")?;
        Ok(receiver!(&receiver, Property, "property", "setter").with_setter(func))
    });
    add_method(p, "deleter", |_, args| {
        let (receiver, func) = args.get_two_args("deleter")?;
        Ok(receiver!(&receiver, Property, "property", "deleter").with_deleter(func))
    });
    add_method(p, "__get__", descriptor_get);

    add_static(&types.staticmethod, "__new__", |_, args| {
        let (_, rest) = args.split_self("staticmethod.__new__")?;
        Ok(StaticMethod::new(rest.get_one_arg("staticmethod")?))
    });
    add_method(&types.staticmethod, "__init__", |_, _| Ok(Value::None));
    add_getset(&types.staticmethod, "__func__", |_, v| {
        Ok(receiver!(v, StaticMethod, "staticmethod", "__func__").func().clone())
    });
    add_method(&types.staticmethod, "__get__", descriptor_get);

    add_static(&types.classmethod, "__new__", |_, args| {
        let (_, rest) = args.split_self("classmethod.__new__")?;
        Ok(ClassMethod::new(rest.get_one_arg("classmethod")?))
    });
    add_method(&types.classmethod, "__init__", |_, _| Ok(Value::None));
    add_getset(&types.classmethod, "__func__", |_, v| {
        Ok(receiver!(v, ClassMethod, "classmethod", "__func__").func().clone())
    });
    add_method(&types.classmethod, "__get__", descriptor_get);

    let s = &types.super_;
    add_static(s, "__new__", |_, args| {
        let (_, rest) = args.split_self("super.__new__")?;
        let (start, obj) = rest.get_two_args("super")?;
        let start = match &start {
            Value::Type(t) => ClassLike::Type(t.clone()),
            other => {
                return Err(ExcType::type_error(format!(
                    "super() argument 1 must be type, not {}",
                    other.type_name()
                )));
            }
        };
        Super::new(start, obj)
    });
    add_method(s, "__init__", |_, _| Ok(Value::None));
    add_getset(s, "__thisclass__", |_, v| Ok(receiver!(v, Super, "super", "__thisclass__").start().to_value()));
    add_getset(s, "__self__", |_, v| Ok(receiver!(v, Super, "super", "__self__").obj().clone()));
    add_getset(s, "__self_class__", |_, v| {
        let obj_type = receiver!(v, Super, "super", "__self_class__").obj_type();
        Ok(obj_type.map_or(Value::None, ClassLike::to_value))
    });
}

/// `descr.__get__(obj, type=None)`, exposed so Python code can drive builtin descriptors.
fn descriptor_get(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (descr, rest) = args.split_self("__get__")?;
    let (obj, owner) = rest.get_one_two_args("__get__")?;
    let owner = match owner.as_ref().and_then(ClassLike::from_value) {
        Some(owner) => owner,
        None => obj.class_of(),
    };
    let instance = if obj.is_none() { None } else { Some(&obj) };
    descriptor::descr_get(vm, &descr, instance, &owner)
}

/// Splits `T.__new__(cls, *args)`, rejecting keyword arguments like the builtin constructors.
fn constructor_args(args: ArgValues, name: &str) -> RunResult<Option<Value>> {
    let (_, rest) = args.split_self(name)?;
    rest.get_zero_one_arg(name)
}

fn install_constructors(types: &BuiltinTypes) {
    add_static(&types.int, "__new__", |vm, args| match constructor_args(args, "int")? {
        None => Ok(Value::Int(0)),
        Some(value) => to_int(vm, &value),
    });
    add_static(&types.long, "__new__", |vm, args| match constructor_args(args, "long")? {
        None => Ok(Value::Int(0)),
        Some(value) => to_int(vm, &value),
    });
    add_static(&types.float, "__new__", |vm, args| match constructor_args(args, "float")? {
        None => Ok(Value::Float(0.0)),
        Some(value) => to_float(vm, &value).map(Value::Float),
    });
    add_static(&types.bool, "__new__", |vm, args| match constructor_args(args, "bool")? {
        None => Ok(Value::Bool(false)),
        Some(value) => vm.truthy(&value).map(Value::Bool),
    });
    add_static(&types.str, "__new__", |vm, args| match constructor_args(args, "str")? {
        None => Ok(Value::str("")),
        Some(value) => Ok(Value::str(&vm.to_str(&value)?)),
    });
    add_static(&types.tuple, "__new__", |vm, args| match constructor_args(args, "tuple")? {
        None => Ok(Value::tuple(Vec::new())),
        Some(Value::Tuple(items)) => Ok(Value::Tuple(items)),
        Some(value) => Ok(Value::tuple(vm.iterate(&value)?)),
    });
    add_static(&types.list, "__new__", |vm, args| match constructor_args(args, "list")? {
        None => Ok(Value::list(Vec::new())),
        Some(value) => Ok(Value::list(vm.iterate(&value)?)),
    });
    add_static(&types.set, "__new__", |vm, args| {
        let items = match constructor_args(args, "set")? {
            None => Vec::new(),
            Some(value) => vm.iterate(&value)?,
        };
        Ok(Value::Set(Arc::new(RwLock::new(Set::from_values(items)?))))
    });
    add_static(&types.dict, "__new__", |vm, args| {
        let (_, rest) = args.split_self("dict")?;
        let ArgValues { args, kwargs } = rest;
        if args.len() > 1 {
            return Err(ExcType::type_error_at_most("dict", 1, args.len()));
        }
        let mut dict = Dict::new();
        if let Some(source) = args.into_iter().next() {
            dict_update_from(vm, &mut dict, &source)?;
        }
        for (key, value) in kwargs {
            dict.set_str(&key, value);
        }
        Ok(Value::Dict(dict.into_ref()))
    });
}

fn to_int(vm: &mut Vm, value: &Value) -> RunResult<Value> {
    match value {
        Value::Int(_) | Value::Long(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(f) => match float_to_int(*f) {
            Ok(i) => Ok(Value::Int(i)),
            Err(err) if f.is_finite() => BigInt::from_f64(f.trunc()).map(Value::from_bigint).ok_or(err),
            Err(err) => Err(err),
        },
        Value::Str(s) => parse_int(s),
        other => match vm.call_special(other, SpecialMethod::Int, Vec::new())? {
            Some(result @ (Value::Int(_) | Value::Long(_))) => Ok(result),
            Some(result) => Err(ExcType::type_error(format!(
                "__int__ returned non-int (type {})",
                result.type_name()
            ))),
            None => Err(ExcType::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

fn parse_int(s: &Str) -> RunResult<Value> {
    let text = s.trim();
    let digits = text.strip_suffix(['l', 'L']).unwrap_or(text);
    if let Ok(i) = digits.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    BigInt::from_str(digits)
        .map(Value::from_bigint)
        .map_err(|_| ExcType::value_error(format!("invalid literal for int() with base 10: '{s}'")))
}

fn to_float(vm: &mut Vm, value: &Value) -> RunResult<f64> {
    if let Some(number) = value.as_number() {
        return Ok(number.to_f64());
    }
    match value {
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ExcType::value_error(format!("could not convert string to float: {s}"))),
        other => match vm.call_special(other, SpecialMethod::Float, Vec::new())? {
            Some(Value::Float(f)) => Ok(f),
            Some(result) => Err(ExcType::type_error(format!(
                "__float__ returned non-float (type {})",
                result.type_name()
            ))),
            None => Err(ExcType::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
    }
}

/// Resolves a possibly negative sequence index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn position(vm: &mut Vm, items: &[Value], needle: &Value) -> RunResult<Option<usize>> {
    for (i, item) in items.iter().enumerate() {
        if vm.equals(item, needle)? {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn count(vm: &mut Vm, items: &[Value], needle: &Value) -> RunResult<i64> {
    let mut n = 0;
    for item in items {
        if vm.equals(item, needle)? {
            n += 1;
        }
    }
    Ok(n)
}

fn as_int(index: Option<usize>) -> Value {
    Value::Int(index.and_then(|i| i64::try_from(i).ok()).unwrap_or(-1))
}

fn install_list(t: &TypeRef) {
    add_method(t, "append", |_, args| {
        let (receiver, item) = args.get_two_args("append")?;
        receiver!(&receiver, List, "list", "append").write().push(item);
        Ok(Value::None)
    });
    add_method(t, "extend", |vm, args| {
        let (receiver, iterable) = args.get_two_args("extend")?;
        let list = receiver!(&receiver, List, "list", "extend");
        let items = vm.iterate(&iterable)?;
        list.write().extend(items);
        Ok(Value::None)
    });
    add_method(t, "insert", |vm, args| {
        let (receiver, rest) = args.split_self("insert")?;
        let (index, item) = rest.get_two_args("insert")?;
        let list = receiver!(&receiver, List, "list", "insert");
        let index = coerce_index(vm, &index)?;
        let mut items = list.write();
        let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
        let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
        items.insert(usize::try_from(at).unwrap_or(0), item);
        Ok(Value::None)
    });
    add_method(t, "pop", |vm, args| {
        let (receiver, rest) = args.split_self("pop")?;
        let list = receiver!(&receiver, List, "list", "pop");
        let index = match rest.get_zero_one_arg("pop")? {
            Some(index) => coerce_index(vm, &index)?,
            None => -1,
        };
        let mut items = list.write();
        if items.is_empty() {
            return Err(ExcType::IndexError.error("pop from empty list"));
        }
        let at = normalize_index(index, items.len())
            .ok_or_else(|| ExcType::IndexError.error("pop index out of range"))?;
        Ok(items.remove(at))
    });
    add_method(t, "remove", |vm, args| {
        let (receiver, needle) = args.get_two_args("remove")?;
        let list = receiver!(&receiver, List, "list", "remove");
        let snapshot = list.read().clone();
        match position(vm, &snapshot, &needle)? {
            Some(at) => {
                let mut items = list.write();
                if at < items.len() {
                    items.remove(at);
                }
                Ok(Value::None)
            }
            None => Err(ExcType::value_error("list.remove(x): x not in list")),
        }
    });
    add_method(t, "index", |vm, args| {
        let (receiver, needle) = args.get_two_args("index")?;
        let snapshot = receiver!(&receiver, List, "list", "index").read().clone();
        match position(vm, &snapshot, &needle)? {
            Some(at) => Ok(as_int(Some(at))),
            None => Err(ExcType::value_error(format!("{} is not in list", vm.repr(&needle)?))),
        }
    });
    add_method(t, "count", |vm, args| {
        let (receiver, needle) = args.get_two_args("count")?;
        let snapshot = receiver!(&receiver, List, "list", "count").read().clone();
        count(vm, &snapshot, &needle).map(Value::Int)
    });
    add_method(t, "reverse", |_, args| {
        let receiver = args.get_one_arg("reverse")?;
        receiver!(&receiver, List, "list", "reverse").write().reverse();
        Ok(Value::None)
    });
}

fn install_tuple(t: &TypeRef) {
    add_method(t, "index", |vm, args| {
        let (receiver, needle) = args.get_two_args("index")?;
        let items = receiver!(&receiver, Tuple, "tuple", "index").clone();
        match position(vm, &items, &needle)? {
            Some(at) => Ok(as_int(Some(at))),
            None => Err(ExcType::value_error("tuple.index(x): x not in tuple")),
        }
    });
    add_method(t, "count", |vm, args| {
        let (receiver, needle) = args.get_two_args("count")?;
        let items = receiver!(&receiver, Tuple, "tuple", "count").clone();
        count(vm, &items, &needle).map(Value::Int)
    });
}

/// Merges a mapping or an iterable of pairs into `dict`.
fn dict_update_from(vm: &mut Vm, dict: &mut Dict, source: &Value) -> RunResult<()> {
    if let Value::Dict(other) = source {
        let other = other.read().clone();
        dict.update(&other);
        return Ok(());
    }
    for (i, pair) in vm.iterate(source)?.into_iter().enumerate() {
        let items = vm.iterate(&pair).map_err(|_| {
            ExcType::type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        let [key, value] = <[Value; 2]>::try_from(items).map_err(|items| {
            ExcType::value_error(format!(
                "dictionary update sequence element #{i} has length {}; 2 is required",
                items.len()
            ))
        })?;
        dict.insert(key, value)?;
    }
    Ok(())
}

fn install_dict(t: &TypeRef) {
    add_method(t, "keys", |_, args| {
        let receiver = args.get_one_arg("keys")?;
        Ok(Value::list(receiver!(&receiver, Dict, "dict", "keys").read().keys()))
    });
    add_method(t, "values", |_, args| {
        let receiver = args.get_one_arg("values")?;
        Ok(Value::list(receiver!(&receiver, Dict, "dict", "values").read().values()))
    });
    add_method(t, "items", |_, args| {
        let receiver = args.get_one_arg("items")?;
        let items = receiver!(&receiver, Dict, "dict", "items").read().items();
        Ok(Value::list(items.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect()))
    });
    add_method(t, "get", |_, args| {
        let (receiver, rest) = args.split_self("get")?;
        let (key, default) = rest.get_one_two_args("get")?;
        let found = receiver!(&receiver, Dict, "dict", "get").read().get(&key)?;
        Ok(found.or(default).unwrap_or(Value::None))
    });
    add_method(t, "has_key", |_, args| {
        let (receiver, key) = args.get_two_args("has_key")?;
        Ok(Value::Bool(receiver!(&receiver, Dict, "dict", "has_key").read().contains(&key)?))
    });
    add_method(t, "setdefault", |_, args| {
        let (receiver, rest) = args.split_self("setdefault")?;
        let (key, default) = rest.get_one_two_args("setdefault")?;
        let mut dict = receiver!(&receiver, Dict, "dict", "setdefault").write();
        if let Some(existing) = dict.get(&key)? {
            return Ok(existing);
        }
        let default = default.unwrap_or(Value::None);
        dict.insert(key, default.clone())?;
        Ok(default)
    });
    add_method(t, "pop", |_, args| {
        let (receiver, rest) = args.split_self("pop")?;
        let (key, default) = rest.get_one_two_args("pop")?;
        let removed = receiver!(&receiver, Dict, "dict", "pop").write().remove(&key)?;
        match (removed, default) {
            (Some(value), _) | (None, Some(value)) => Ok(value),
            (None, None) => Err(ExcType::key_error(&key)),
        }
    });
    add_method(t, "update", |vm, args| {
        let (receiver, rest) = args.split_self("update")?;
        let dict = receiver!(&receiver, Dict, "dict", "update").clone();
        let ArgValues { args, kwargs } = rest;
        if args.len() > 1 {
            return Err(ExcType::type_error_at_most("update", 1, args.len()));
        }
        let mut merged = dict.read().clone();
        if let Some(source) = args.into_iter().next() {
            dict_update_from(vm, &mut merged, &source)?;
        }
        for (key, value) in kwargs {
            merged.set_str(&key, value);
        }
        *dict.write() = merged;
        Ok(Value::None)
    });
    add_method(t, "clear", |_, args| {
        let receiver = args.get_one_arg("clear")?;
        receiver!(&receiver, Dict, "dict", "clear").write().clear();
        Ok(Value::None)
    });
    add_method(t, "copy", |_, args| {
        let receiver = args.get_one_arg("copy")?;
        let copy = receiver!(&receiver, Dict, "dict", "copy").read().clone();
        Ok(Value::Dict(copy.into_ref()))
    });
}

fn expect_str<'a>(value: &'a Value, method: &str) -> RunResult<&'a str> {
    value.as_str().ok_or_else(|| {
        ExcType::type_error(format!(
            "{method}() argument must be str, not {}",
            value.type_name()
        ))
    })
}

fn install_str(t: &TypeRef) {
    add_method(t, "join", |vm, args| {
        let (receiver, iterable) = args.get_two_args("join")?;
        let sep = receiver!(&receiver, Str, "str", "join");
        let mut parts = Vec::new();
        for (i, item) in vm.iterate(&iterable)?.iter().enumerate() {
            let part = item.as_str().ok_or_else(|| {
                ExcType::type_error(format!(
                    "sequence item {i}: expected string, {} found",
                    item.type_name()
                ))
            })?;
            parts.push(part.to_owned());
        }
        Ok(Value::str(&parts.join(&**sep)))
    });
    add_method(t, "split", |_, args| {
        let (receiver, rest) = args.split_self("split")?;
        let s = receiver!(&receiver, Str, "str", "split");
        let parts: Vec<Value> = match rest.get_zero_one_arg("split")? {
            None | Some(Value::None) => s.split_whitespace().map(Value::str).collect(),
            Some(sep) => {
                let sep = expect_str(&sep, "split")?;
                if sep.is_empty() {
                    return Err(ExcType::value_error("empty separator"));
                }
                s.split(sep).map(Value::str).collect()
            }
        };
        Ok(Value::list(parts))
    });
    add_method(t, "strip", |_, args| {
        let (receiver, rest) = args.split_self("strip")?;
        let s = receiver!(&receiver, Str, "str", "strip");
        Ok(match rest.get_zero_one_arg("strip")? {
            None | Some(Value::None) => Value::str(s.trim()),
            Some(chars) => {
                let chars = expect_str(&chars, "strip")?;
                Value::str(s.trim_matches(|c: char| chars.contains(c)))
            }
        })
    });
    add_method(t, "lower", |_, args| {
        let receiver = args.get_one_arg("lower")?;
        Ok(Value::str(&receiver!(&receiver, Str, "str", "lower").to_lowercase()))
    });
    add_method(t, "upper", |_, args| {
        let receiver = args.get_one_arg("upper")?;
        Ok(Value::str(&receiver!(&receiver, Str, "str", "upper").to_uppercase()))
    });
    add_method(t, "startswith", |_, args| {
        let (receiver, prefix) = args.get_two_args("startswith")?;
        let s = receiver!(&receiver, Str, "str", "startswith");
        Ok(Value::Bool(s.starts_with(expect_str(&prefix, "startswith")?)))
    });
    add_method(t, "endswith", |_, args| {
        let (receiver, suffix) = args.get_two_args("endswith")?;
        let s = receiver!(&receiver, Str, "str", "endswith");
        Ok(Value::Bool(s.ends_with(expect_str(&suffix, "endswith")?)))
    });
    add_method(t, "replace", |_, args| {
        let (receiver, rest) = args.split_self("replace")?;
        let s = receiver!(&receiver, Str, "str", "replace");
        let (old, new) = rest.get_two_args("replace")?;
        Ok(Value::str(&s.replace(expect_str(&old, "replace")?, expect_str(&new, "replace")?)))
    });
    add_method(t, "find", |_, args| {
        let (receiver, needle) = args.get_two_args("find")?;
        let s = receiver!(&receiver, Str, "str", "find");
        let byte_offset = s.find(expect_str(&needle, "find")?);
        Ok(as_int(byte_offset.map(|at| s[..at].chars().count())))
    });
}

fn install_set(t: &TypeRef) {
    add_method(t, "add", |_, args| {
        let (receiver, item) = args.get_two_args("add")?;
        receiver!(&receiver, Set, "set", "add").write().add(item)?;
        Ok(Value::None)
    });
    add_method(t, "discard", |_, args| {
        let (receiver, item) = args.get_two_args("discard")?;
        receiver!(&receiver, Set, "set", "discard").write().discard(&item)?;
        Ok(Value::None)
    });
    add_method(t, "remove", |_, args| {
        let (receiver, item) = args.get_two_args("remove")?;
        if receiver!(&receiver, Set, "set", "remove").write().discard(&item)? {
            Ok(Value::None)
        } else {
            Err(ExcType::key_error(&item))
        }
    });
    add_method(t, "copy", |_, args| {
        let receiver = args.get_one_arg("copy")?;
        let copy = receiver!(&receiver, Set, "set", "copy").read().clone();
        Ok(Value::Set(Arc::new(RwLock::new(copy))))
    });
}
