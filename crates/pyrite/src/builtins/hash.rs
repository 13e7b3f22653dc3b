//! Implementation of the hash() builtin.

use crate::{args::ArgValues, bytecode::Vm, exception::RunResult, value::Value};

pub fn builtin_hash(vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("hash")?;
    Ok(Value::Int(vm.hash(&value)?))
}
