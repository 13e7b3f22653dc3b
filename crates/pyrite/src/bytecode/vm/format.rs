//! `repr()`, `str()` and `hash()` with user overrides.

use num_traits::ToPrimitive;

use super::Vm;
use crate::{
    exception::{ExcType, RunResult},
    py_hash::{hash_bigint, hash_value},
    types::SpecialMethod,
    value::Value,
};

/// Containers nested deeper than this render as `...`.
const MAX_REPR_NESTING: usize = 24;

fn has_user_methods(value: &Value) -> bool {
    matches!(
        value,
        Value::Object(_) | Value::Instance(_) | Value::Exception(_) | Value::Foreign(_)
    )
}

impl Vm {
    /// `repr(value)`
    pub fn repr(&mut self, value: &Value) -> RunResult<String> {
        self.repr_nested(value, 0)
    }

    fn repr_nested(&mut self, value: &Value, depth: usize) -> RunResult<String> {
        if depth > MAX_REPR_NESTING {
            return Ok("...".to_owned());
        }
        match value {
            Value::Tuple(items) => {
                let inner = self.repr_items(items, depth)?;
                Ok(if items.len() == 1 {
                    format!("({inner},)")
                } else {
                    format!("({inner})")
                })
            }
            Value::List(items) => {
                let items = items.read().clone();
                Ok(format!("[{}]", self.repr_items(&items, depth)?))
            }
            Value::Dict(dict) => {
                let entries = dict.read().items();
                let mut parts = Vec::with_capacity(entries.len());
                for (key, item) in &entries {
                    let key = self.repr_nested(key, depth + 1)?;
                    let item = self.repr_nested(item, depth + 1)?;
                    parts.push(format!("{key}: {item}"));
                }
                Ok(format!("{{{}}}", parts.join(", ")))
            }
            other if has_user_methods(other) => {
                match self.call_special(other, SpecialMethod::Repr, Vec::new())? {
                    Some(Value::Str(s)) => Ok(s.to_string()),
                    Some(result) => Err(ExcType::type_error(format!(
                        "__repr__ returned non-string (type {})",
                        result.type_name()
                    ))),
                    None => Ok(other.repr_builtin()),
                }
            }
            other => Ok(other.repr_builtin()),
        }
    }

    fn repr_items(&mut self, items: &[Value], depth: usize) -> RunResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.repr_nested(item, depth + 1)?);
        }
        Ok(parts.join(", "))
    }

    /// `str(value)`: `__str__`, falling back to `repr`.
    pub fn to_str(&mut self, value: &Value) -> RunResult<String> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            other if has_user_methods(other) => match self.call_special(other, SpecialMethod::Str, Vec::new())? {
                Some(Value::Str(s)) => Ok(s.to_string()),
                Some(result) => Err(ExcType::type_error(format!(
                    "__str__ returned non-string (type {})",
                    result.type_name()
                ))),
                None => self.repr(other),
            },
            Value::Tuple(_) | Value::List(_) | Value::Dict(_) => self.repr(value),
            other => Ok(other.str_builtin()),
        }
    }

    /// `hash(value)`
    ///
    /// Classic instances that define `__eq__` or `__cmp__` without `__hash__` are
    /// unhashable, the others hash by identity.
    pub fn hash(&mut self, value: &Value) -> RunResult<i64> {
        if let Value::Instance(inst) = value {
            let cls = inst.class();
            if cls.lookup("__hash__").is_none() && (cls.lookup("__eq__").is_some() || cls.lookup("__cmp__").is_some())
            {
                return Err(ExcType::type_error("unhashable instance"));
            }
        }
        if has_user_methods(value)
            && let Some(result) = self.call_special(value, SpecialMethod::Hash, Vec::new())?
        {
            return match result {
                Value::Int(h) => Ok(h),
                Value::Bool(b) => Ok(i64::from(b)),
                Value::Long(big) => Ok(big.to_i64().unwrap_or_else(|| as_signed(hash_bigint(&big)))),
                other => Err(ExcType::type_error(format!(
                    "__hash__ should return an integer, not {}",
                    other.type_name()
                ))),
            };
        }
        hash_value(value).map(as_signed)
    }
}

fn as_signed(hash: u64) -> i64 {
    i64::from_ne_bytes(hash.to_ne_bytes())
}
