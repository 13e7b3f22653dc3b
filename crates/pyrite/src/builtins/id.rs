//! Implementation of the id() builtin.

use num_bigint::BigInt;

use crate::{
    args::ArgValues, aux_attrs::AuxAttrs, bytecode::Vm, exception::RunResult, py_hash::hash_value,
    types::weakref::aux_of, value::Value,
};

/// Implementation of the `id()` builtin function.
///
/// Objects with auxiliary attributes get a sequential id that stays fixed for their lifetime.
/// Other heap values use their address. Immediate values such as small numbers have no
/// identity apart from their value, so their id is derived from it.
pub fn builtin_id(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("id")?;
    let id = match aux_of(&value).map(AuxAttrs::stable_id) {
        Some(id) => id,
        None => match value.addr() {
            0 => hash_value(&value)?,
            addr => addr as u64,
        },
    };
    Ok(Value::from_bigint(BigInt::from(id)))
}
