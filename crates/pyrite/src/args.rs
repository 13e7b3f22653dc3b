use std::vec::IntoIter;

use num_traits::ToPrimitive;

use crate::{
    bytecode::Vm,
    exception::{ExcType, RunResult},
    types::SpecialMethod,
    value::{Str, Value},
};

/// Arguments of a call: positional values followed by keyword pairs in call order.
///
/// The `get_*` helpers validate the shape expected by native callables and produce the
/// usual arity errors.
#[derive(Debug, Clone, Default)]
pub struct ArgValues {
    pub args: Vec<Value>,
    pub kwargs: Vec<(Str, Value)>,
}

impl ArgValues {
    #[must_use]
    pub fn new(args: Vec<Value>) -> Self {
        Self { args, kwargs: Vec::new() }
    }

    #[must_use]
    pub fn with_kwargs(args: Vec<Value>, kwargs: Vec<(Str, Value)>) -> Self {
        Self { args, kwargs }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Total number of arguments supplied.
    #[must_use]
    pub fn count(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    /// Returns a copy with `first` prepended to the positional arguments.
    #[must_use]
    pub fn prepend(mut self, first: Value) -> Self {
        self.args.insert(0, first);
        self
    }

    fn reject_kwargs(&self, name: &str) -> RunResult<()> {
        match self.kwargs.first() {
            Some(_) => Err(ExcType::type_error(format!("{name}() takes no keyword arguments"))),
            None => Ok(()),
        }
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.reject_kwargs(name)?;
        let mut it = self.exact::<1>(name)?;
        Ok(it.next().unwrap_or(Value::None))
    }

    /// Checks that exactly two positional arguments were passed.
    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.reject_kwargs(name)?;
        let mut it = self.exact::<2>(name)?;
        Ok((it.next().unwrap_or(Value::None), it.next().unwrap_or(Value::None)))
    }

    /// Checks that exactly three positional arguments were passed.
    pub fn get_three_args(self, name: &str) -> RunResult<(Value, Value, Value)> {
        self.reject_kwargs(name)?;
        let mut it = self.exact::<3>(name)?;
        Ok((
            it.next().unwrap_or(Value::None),
            it.next().unwrap_or(Value::None),
            it.next().unwrap_or(Value::None),
        ))
    }

    /// Accepts zero or one positional argument.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.reject_kwargs(name)?;
        if self.args.len() > 1 {
            return Err(ExcType::type_error_at_most(name, 1, self.args.len()));
        }
        Ok(self.args.into_iter().next())
    }

    /// Accepts one required and one optional positional argument.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.reject_kwargs(name)?;
        match self.args.len() {
            0 => Err(ExcType::type_error_at_least(name, 1, 0)),
            1 | 2 => {
                let mut it = self.args.into_iter();
                Ok((it.next().unwrap_or(Value::None), it.next()))
            }
            n => Err(ExcType::type_error_at_most(name, 2, n)),
        }
    }

    /// Splits off the receiver of a method call.
    pub fn split_self(mut self, name: &str) -> RunResult<(Value, Self)> {
        if self.args.is_empty() {
            return Err(ExcType::type_error(format!("descriptor '{name}' needs an argument")));
        }
        let receiver = self.args.remove(0);
        Ok((receiver, self))
    }

    /// Binds positional and keyword arguments of a native callable to `params`.
    ///
    /// The first `required` parameters must be supplied; the rest come back as `None` when
    /// absent.
    pub fn bind_named(self, name: &str, params: &[&str], required: usize) -> RunResult<Vec<Option<Value>>> {
        if self.args.len() > params.len() {
            return Err(ExcType::type_error_at_most(name, params.len(), self.args.len()));
        }
        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(self.args) {
            *slot = Some(value);
        }
        for (key, value) in self.kwargs {
            let Some(index) = params.iter().position(|p| **p == *key) else {
                return Err(ExcType::type_error(format!(
                    "'{key}' is an invalid keyword argument for {name}()"
                )));
            };
            if bound[index].is_some() {
                return Err(ExcType::type_error(format!(
                    "{name}() got multiple values for keyword argument '{key}'"
                )));
            }
            bound[index] = Some(value);
        }
        let supplied = bound.iter().take(required).filter(|slot| slot.is_some()).count();
        if supplied < required {
            return Err(ExcType::type_error_at_least(name, required, supplied));
        }
        Ok(bound)
    }

    fn exact<const N: usize>(self, name: &str) -> RunResult<IntoIter<Value>> {
        if self.args.len() == N {
            Ok(self.args.into_iter())
        } else {
            Err(ExcType::type_error_arg_count(name, N, self.args.len()))
        }
    }
}

/// Coerces an argument used as an integer index or count.
///
/// Integers pass through. A float is accepted with a `DeprecationWarning` and truncated via
/// its `__int__` conversion. Other objects are converted through `__index__` or `__int__`.
pub fn coerce_index(vm: &mut Vm, value: &Value) -> RunResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Long(big) => big
            .to_i64()
            .ok_or_else(|| ExcType::OverflowError.error("Python int too large to convert to C long")),
        Value::Float(f) => {
            vm.warn(ExcType::DeprecationWarning, "integer argument expected, got float")?;
            float_to_int(*f)
        }
        Value::Object(_) | Value::Instance(_) => {
            let converted = match vm.call_special(value, SpecialMethod::Index, Vec::new())? {
                Some(v) => v,
                None => vm
                    .call_special(value, SpecialMethod::Int, Vec::new())?
                    .ok_or_else(|| integer_expected(value))?,
            };
            match converted {
                Value::Int(i) => Ok(i),
                other => Err(ExcType::type_error(format!(
                    "__int__ returned non-int (type {})",
                    other.type_name()
                ))),
            }
        }
        other => Err(integer_expected(other)),
    }
}

fn integer_expected(value: &Value) -> crate::exception::RunError {
    ExcType::type_error(format!("integer argument expected, got {}", value.type_name()))
}

#[expect(clippy::cast_possible_truncation, reason = "range checked before the cast")]
pub(crate) fn float_to_int(f: f64) -> RunResult<i64> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if truncated >= i64::MIN as f64 && truncated < i64::MAX as f64 {
        Ok(truncated as i64)
    } else {
        Err(ExcType::OverflowError.error("cannot convert float to integer"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn arity_helpers_report_counts() {
        let args = ArgValues::new(vec![Value::Int(1), Value::Int(2)]);
        let err = args.get_one_arg("len").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: len() takes exactly 1 argument (2 given)");

        let args = ArgValues::new(vec![]);
        let err = args.get_one_two_args("getattr").unwrap_err();
        assert_eq!(err.to_string(), "TypeError: getattr() takes at least 1 argument (0 given)");
    }

    #[test]
    fn prepend_keeps_order() {
        let args = ArgValues::new(vec![Value::Int(2)]).prepend(Value::Int(1));
        assert_eq!(args.args, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn bind_named_mixes_positional_and_keywords() {
        let args = ArgValues::with_kwargs(vec![Value::Int(1)], vec![(Arc::from("doc"), Value::str("d"))]);
        let bound = args.bind_named("property", &["fget", "fset", "fdel", "doc"], 0).unwrap();
        assert_eq!(bound, vec![Some(Value::Int(1)), None, None, Some(Value::str("d"))]);

        let args = ArgValues::with_kwargs(vec![], vec![(Arc::from("bogus"), Value::None)]);
        let err = args.bind_named("property", &["fget"], 0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: 'bogus' is an invalid keyword argument for property()"
        );
    }

    #[test]
    fn float_truncates_toward_zero() {
        assert_eq!(float_to_int(2.9).unwrap(), 2);
        assert_eq!(float_to_int(-2.9).unwrap(), -2);
        assert!(float_to_int(f64::NAN).is_err());
    }
}
