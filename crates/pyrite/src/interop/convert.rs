use std::sync::Arc;

use num_traits::ToPrimitive;

use super::{ConversionError, ForeignObject, HostKind, HostValue, register_host_class};
use crate::{
    exception::{ExcType, RunError, RunResult},
    value::Value,
};

/// Brings a host value into the interpreter. Host objects get their reflected type.
#[must_use]
pub fn wrap(value: HostValue) -> Value {
    match value {
        HostValue::None => Value::None,
        HostValue::Bool(b) => Value::Bool(b),
        HostValue::Int(i) => Value::Int(i),
        HostValue::Float(f) => Value::Float(f),
        HostValue::Str(s) => Value::str(&s),
        HostValue::Bytes(b) => Value::Bytes(Arc::from(b)),
        HostValue::List(items) => Value::list(items.into_iter().map(wrap).collect()),
        HostValue::Object(obj) => {
            let class = register_host_class(obj.class().clone());
            Value::Foreign(ForeignObject::new(class, obj))
        }
    }
}

/// Converts an interpreter value to the host `kind`.
///
/// `None` adapts to `Object` and `Any` as a null reference. Numbers widen from `bool` to
/// `int` to `float` but never narrow. A list containing itself is [`ConversionError::Cyclic`].
pub fn adapt(value: &Value, kind: HostKind) -> Result<HostValue, ConversionError> {
    adapt_within(value, kind, &mut Vec::new())
}

/// `open` holds the lists currently being converted.
fn adapt_within(value: &Value, kind: HostKind, open: &mut Vec<usize>) -> Result<HostValue, ConversionError> {
    let mismatch = || ConversionError::Mismatch {
        expected: kind,
        found: value.type_name().to_string(),
    };
    match (kind, value) {
        (HostKind::None | HostKind::Object | HostKind::Any, Value::None) => Ok(HostValue::None),
        (HostKind::Bool | HostKind::Any, Value::Bool(b)) => Ok(HostValue::Bool(*b)),
        (HostKind::Int, Value::Bool(b)) => Ok(HostValue::Int(i64::from(*b))),
        (HostKind::Int | HostKind::Any, Value::Int(i)) => Ok(HostValue::Int(*i)),
        (HostKind::Int | HostKind::Any, Value::Long(big)) => {
            big.to_i64().map(HostValue::Int).ok_or(ConversionError::Overflow(HostKind::Int))
        }
        (HostKind::Float, Value::Bool(b)) => Ok(HostValue::Float(f64::from(u8::from(*b)))),
        (HostKind::Float, Value::Int(i)) => Ok(HostValue::Float(*i as f64)),
        (HostKind::Float, Value::Long(big)) => big
            .to_f64()
            .filter(|f| f.is_finite())
            .map(HostValue::Float)
            .ok_or(ConversionError::Overflow(HostKind::Float)),
        (HostKind::Float | HostKind::Any, Value::Float(f)) => Ok(HostValue::Float(*f)),
        (HostKind::Str | HostKind::Any, Value::Str(s)) => Ok(HostValue::Str(s.to_string())),
        (HostKind::Bytes | HostKind::Any, Value::Bytes(b)) => Ok(HostValue::Bytes(b.to_vec())),
        (HostKind::List | HostKind::Any, Value::List(list)) => {
            let id = Arc::as_ptr(list) as usize;
            if open.contains(&id) {
                return Err(ConversionError::Cyclic);
            }
            open.push(id);
            let items = list.read().clone();
            let adapted = adapt_items(&items, open);
            open.pop();
            adapted
        }
        (HostKind::List | HostKind::Any, Value::Tuple(items)) => adapt_items(items, open),
        (HostKind::Object | HostKind::Any, Value::Foreign(obj)) => Ok(HostValue::Object(obj.host().clone())),
        (HostKind::Any, other) => Err(ConversionError::Unsupported(other.type_name().to_string())),
        _ => Err(mismatch()),
    }
}

fn adapt_items(items: &[Value], open: &mut Vec<usize>) -> Result<HostValue, ConversionError> {
    items
        .iter()
        .map(|item| adapt_within(item, HostKind::Any, open))
        .collect::<Result<Vec<_>, _>>()
        .map(HostValue::List)
}

/// [`adapt`] with the failure raised as an interpreter exception.
pub fn unwrap(value: &Value, kind: HostKind) -> RunResult<HostValue> {
    adapt(value, kind).map_err(RunError::from)
}

impl From<ConversionError> for RunError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Overflow(_) => ExcType::OverflowError.error(err),
            ConversionError::Mismatch { .. } | ConversionError::Unsupported(_) => ExcType::type_error(err),
            ConversionError::Cyclic => ExcType::value_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn numbers_widen_but_do_not_narrow() {
        assert_eq!(adapt(&Value::Bool(true), HostKind::Int), Ok(HostValue::Int(1)));
        assert_eq!(adapt(&Value::Int(3), HostKind::Float), Ok(HostValue::Float(3.0)));
        assert_eq!(
            adapt(&Value::Float(3.5), HostKind::Int),
            Err(ConversionError::Mismatch {
                expected: HostKind::Int,
                found: "float".to_owned()
            })
        );
    }

    #[test]
    fn none_is_a_null_object() {
        assert_eq!(adapt(&Value::None, HostKind::Object), Ok(HostValue::None));
        assert!(adapt(&Value::None, HostKind::Str).is_err());
    }

    #[test]
    fn sequences_adapt_elementwise() {
        let value = Value::tuple(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(
            adapt(&value, HostKind::List),
            Ok(HostValue::List(vec![HostValue::Int(1), HostValue::Str("a".to_owned())]))
        );
        let value = Value::list(vec![Value::Set(Arc::default())]);
        assert_eq!(
            adapt(&value, HostKind::List),
            Err(ConversionError::Unsupported("set".to_owned()))
        );
    }

    #[test]
    fn self_referencing_lists_are_rejected() {
        let list = Value::list(Vec::new());
        let Value::List(items) = &list else {
            panic!("expected a list");
        };
        items.write().push(list.clone());
        assert_eq!(adapt(&list, HostKind::Any), Err(ConversionError::Cyclic));

        let shared = Value::list(vec![Value::Int(1)]);
        let twice = Value::tuple(vec![shared.clone(), shared]);
        assert_eq!(
            adapt(&twice, HostKind::List),
            Ok(HostValue::List(vec![
                HostValue::List(vec![HostValue::Int(1)]),
                HostValue::List(vec![HostValue::Int(1)]),
            ]))
        );
        items.write().clear();
    }

    #[test]
    fn wrap_is_structural() {
        let value = wrap(HostValue::List(vec![HostValue::Int(2), HostValue::None]));
        let Value::List(items) = value else {
            panic!("expected a list");
        };
        assert_eq!(*items.read(), vec![Value::Int(2), Value::None]);
    }
}
