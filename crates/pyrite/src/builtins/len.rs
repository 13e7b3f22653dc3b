//! Implementation of the len() builtin.

use crate::{args::ArgValues, bytecode::Vm, exception::RunResult, value::Value};

pub fn builtin_len(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("len")?;
    let len = vm.len(&value)?;
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}
