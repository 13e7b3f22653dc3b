//! Implementation of the repr() builtin.

use crate::{args::ArgValues, bytecode::Vm, exception::RunResult, value::Value};

pub fn builtin_repr(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("repr")?;
    let repr = vm.repr(&value)?;
    Ok(Value::str(&repr))
}
