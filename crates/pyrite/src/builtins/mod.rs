//! The `__builtin__` namespace.
//!
//! Each builtin function has its own submodule. Types and exception classes come from
//! [`builtin_types`] and are installed under their Python names.

mod attr;
mod callable;
mod hash;
mod id;
mod isinstance;
mod iter;
mod len;
mod range;
mod repr;
mod weakref;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    args::ArgValues,
    bytecode::Vm,
    exception::{ExcType, RunResult},
    function::BuiltinFunction,
    types::{Dict, builtin_types},
    value::Value,
};

/// Every interpreter-native builtin function.
///
/// All variants serialize to lowercase (e.g., `GetAttr` -> "getattr").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinsFunctions {
    Callable,
    DelAttr,
    GetAttr,
    GetWeakRefCount,
    HasAttr,
    Hash,
    Id,
    IsInstance,
    IsSubclass,
    Iter,
    Len,
    Next,
    Range,
    Repr,
    SetAttr,
}

impl BuiltinsFunctions {
    pub fn call(self, vm: &mut Vm, args: ArgValues) -> RunResult<Value> {
        match self {
            Self::Callable => callable::builtin_callable(vm, args),
            Self::DelAttr => attr::builtin_delattr(vm, args),
            Self::GetAttr => attr::builtin_getattr(vm, args),
            Self::GetWeakRefCount => weakref::builtin_getweakrefcount(vm, args),
            Self::HasAttr => attr::builtin_hasattr(vm, args),
            Self::Hash => hash::builtin_hash(vm, args),
            Self::Id => id::builtin_id(vm, args),
            Self::IsInstance => isinstance::builtin_isinstance(vm, args),
            Self::IsSubclass => isinstance::builtin_issubclass(vm, args),
            Self::Iter => iter::builtin_iter(vm, args),
            Self::Len => len::builtin_len(vm, args),
            Self::Next => iter::builtin_next(vm, args),
            Self::Range => range::builtin_range(vm, args),
            Self::Repr => repr::builtin_repr(vm, args),
            Self::SetAttr => attr::builtin_setattr(vm, args),
        }
    }
}

/// Builds a fresh builtins namespace.
#[must_use]
pub fn builtins_dict() -> Dict {
    let mut dict = Dict::new();
    for function in BuiltinsFunctions::iter() {
        let name: &'static str = function.into();
        dict.set_str(
            name,
            BuiltinFunction::function(name, move |vm: &mut Vm, args: ArgValues| function.call(vm, args)),
        );
    }
    let types = builtin_types();
    for t in types.named() {
        dict.set_str(&t.name(), Value::Type(t.clone()));
    }
    for exc in ExcType::iter() {
        let name: &'static str = exc.into();
        dict.set_str(name, Value::Type(types.exception(exc)));
    }
    dict.set_str("None", Value::None);
    dict.set_str("NotImplemented", Value::NotImplemented);
    dict.set_str("True", Value::Bool(true));
    dict.set_str("False", Value::Bool(false));
    dict
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_are_lowercase() {
        assert_eq!(BuiltinsFunctions::GetWeakRefCount.to_string(), "getweakrefcount");
        assert_eq!(BuiltinsFunctions::from_str("isinstance"), Ok(BuiltinsFunctions::IsInstance));
    }

    #[test]
    fn namespace_has_types_and_exceptions() {
        let dict = builtins_dict();
        for name in ["object", "type", "property", "super", "ValueError", "len", "True"] {
            assert!(dict.contains_str(name), "missing {name}");
        }
    }
}
