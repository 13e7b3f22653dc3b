//! Implementation of the iter() and next() builtins.

use crate::{
    args::ArgValues,
    bytecode::Vm,
    exception::{PyException, RunResult},
    value::Value,
};

pub fn builtin_iter(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("iter")?;
    vm.get_iter(&value)
}

/// `next(iterator[, default])`; an exhausted iterator yields `default` or raises `StopIteration`.
pub fn builtin_next(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let (iter, default) = args.get_one_two_args("next")?;
    match (vm.next_item(&iter)?, default) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(PyException::stop_iteration(Value::None).into()),
    }
}

