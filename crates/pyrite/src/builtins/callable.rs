//! Implementation of the callable() builtin.

use crate::{args::ArgValues, bytecode::Vm, exception::RunResult, types::SpecialMethod, value::Value};

/// Implementation of the `callable()` builtin function.
///
/// Functions, methods, classes and weak references are callable; other objects are callable
/// when their class defines `__call__`.
pub fn builtin_callable(_vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("callable")?;
    let callable = match &value {
        Value::Function(_)
        | Value::BoundMethod(_)
        | Value::Builtin(_)
        | Value::Type(_)
        | Value::Class(_)
        | Value::WeakRef(_) => true,
        other => other.class_of().slot(SpecialMethod::Call).is_some(),
    };
    Ok(Value::Bool(callable))
}
