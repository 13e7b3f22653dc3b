//! Implementation of the isinstance() and issubclass() builtins.

use crate::{
    args::ArgValues,
    bytecode::Vm,
    exception::{ExcType, RunResult},
    types::ClassLike,
    value::Value,
};

/// Whether `cls` is a subclass of `spec`, where `spec` is a class or a (nested) tuple of them.
///
/// Returns `None` when `spec` contains something that is not a class.
fn matches_spec(cls: &ClassLike, spec: &Value) -> Option<bool> {
    match spec {
        Value::Tuple(items) => {
            let mut found = false;
            for item in items.iter() {
                found |= matches_spec(cls, item)?;
            }
            Some(found)
        }
        other => ClassLike::from_value(other).map(|target| cls.is_subclass(&target)),
    }
}

pub fn builtin_isinstance(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, spec) = args.get_two_args("isinstance")?;
    matches_spec(&obj.class_of(), &spec).map(Value::Bool).ok_or_else(|| {
        ExcType::type_error("isinstance() arg 2 must be a class, type, or tuple of classes and types")
    })
}

pub fn builtin_issubclass(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (cls, spec) = args.get_two_args("issubclass")?;
    let Some(cls) = ClassLike::from_value(&cls) else {
        return Err(ExcType::type_error("issubclass() arg 1 must be a class"));
    };
    matches_spec(&cls, &spec)
        .map(Value::Bool)
        .ok_or_else(|| ExcType::type_error("issubclass() arg 2 must be a class or tuple of classes"))
}
