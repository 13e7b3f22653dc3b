//! Implementation of the getattr(), setattr(), hasattr() and delattr() builtins.

use crate::{
    args::ArgValues,
    bytecode::Vm,
    exception::{ExcType, RunResult},
    value::Value,
};

fn attr_name(func: &str, name: &Value) -> RunResult<String> {
    match name {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(ExcType::type_error(format!(
            "{func}(): attribute name must be string, not '{}'",
            other.type_name()
        ))),
    }
}

/// `getattr(object, name[, default])`; the default only replaces an `AttributeError`.
pub fn builtin_getattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let count = args.count();
    if !(2..=3).contains(&count) {
        return Err(if count < 2 {
            ExcType::type_error_at_least("getattr", 2, count)
        } else {
            ExcType::type_error_at_most("getattr", 3, count)
        });
    }
    let (obj, name, default) = if count == 3 {
        let (obj, name, default) = args.get_three_args("getattr")?;
        (obj, name, Some(default))
    } else {
        let (obj, name) = args.get_two_args("getattr")?;
        (obj, name, None)
    };
    let name = attr_name("getattr", &name)?;
    match (vm.get_attr(&obj, &name), default) {
        (Err(err), Some(default)) if err.matches_type(ExcType::AttributeError) => Ok(default),
        (result, _) => result,
    }
}

pub fn builtin_setattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name, value) = args.get_three_args("setattr")?;
    let name = attr_name("setattr", &name)?;
    vm.set_attr(&obj, &name, value)?;
    Ok(Value::None)
}

pub fn builtin_delattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("delattr")?;
    let name = attr_name("delattr", &name)?;
    vm.del_attr(&obj, &name)?;
    Ok(Value::None)
}

/// `hasattr(object, name)`; only an `AttributeError` counts as absent.
pub fn builtin_hasattr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (obj, name) = args.get_two_args("hasattr")?;
    let name = attr_name("hasattr", &name)?;
    match vm.get_attr(&obj, &name) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(err) if err.matches_type(ExcType::AttributeError) => Ok(Value::Bool(false)),
        Err(err) => Err(err),
    }
}
