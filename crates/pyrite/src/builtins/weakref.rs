//! Implementation of the getweakrefcount() builtin.

use crate::{
    args::ArgValues, aux_attrs::AuxAttrs, bytecode::Vm, exception::RunResult, types::weakref::aux_of, value::Value,
};

/// Number of live weak references to an object; zero for objects that cannot have any.
pub fn builtin_getweakrefcount(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("getweakrefcount")?;
    let count = aux_of(&value).map_or(0, AuxAttrs::weakref_count);
    Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
}
