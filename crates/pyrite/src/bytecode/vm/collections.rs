//! Subscription, iteration, length and sequence unpacking.

use super::Vm;
use crate::{
    args::coerce_index,
    exception::{ExcType, RunResult},
    types::{PyIterator, SpecialMethod},
    value::Value,
};

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

/// Sequence indices must be integers; floats are not silently truncated here.
fn sequence_index(vm: &mut Vm, container: &Value, key: &Value) -> RunResult<i64> {
    match key {
        Value::Int(_) | Value::Bool(_) | Value::Long(_) | Value::Object(_) | Value::Instance(_) => {
            coerce_index(vm, key)
        }
        other => Err(ExcType::type_error(format!(
            "{} indices must be integers, not {}",
            container.type_name(),
            other.type_name()
        ))),
    }
}

fn is_iterator(value: &Value) -> bool {
    matches!(value, Value::Iterator(_) | Value::Generator(_)) || value.class_of().slot(SpecialMethod::Next).is_some()
}

impl Vm {
    /// `obj[key]`
    pub fn get_item(&mut self, obj: &Value, key: &Value) -> RunResult<Value> {
        match obj {
            Value::List(items) => {
                let index = sequence_index(self, obj, key)?;
                let items = items.read();
                normalize_index(index, items.len())
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| ExcType::IndexError.error("list index out of range"))
            }
            Value::Tuple(items) => {
                let index = sequence_index(self, obj, key)?;
                normalize_index(index, items.len())
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| ExcType::IndexError.error("tuple index out of range"))
            }
            Value::Str(s) => {
                let index = sequence_index(self, obj, key)?;
                let count = s.chars().count();
                normalize_index(index, count)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
                    .ok_or_else(|| ExcType::IndexError.error("string index out of range"))
            }
            Value::Dict(dict) => dict.read().get_item(key),
            other => match self.call_special(other, SpecialMethod::GetItem, vec![key.clone()])? {
                Some(value) => Ok(value),
                None => Err(ExcType::type_error(format!(
                    "'{}' object has no attribute '__getitem__'",
                    other.type_name()
                ))),
            },
        }
    }

    /// `obj[key] = value`
    pub fn set_item(&mut self, obj: &Value, key: Value, value: Value) -> RunResult<()> {
        match obj {
            Value::List(items) => {
                let index = sequence_index(self, obj, &key)?;
                let mut items = items.write();
                let len = items.len();
                let slot = normalize_index(index, len)
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| ExcType::IndexError.error("list assignment index out of range"))?;
                *slot = value;
                Ok(())
            }
            Value::Dict(dict) => {
                dict.write().insert(key, value)?;
                Ok(())
            }
            other => match self.call_special(other, SpecialMethod::SetItem, vec![key, value])? {
                Some(_) => Ok(()),
                None => Err(ExcType::type_error(format!(
                    "'{}' object does not support item assignment",
                    other.type_name()
                ))),
            },
        }
    }

    /// `del obj[key]`
    pub fn del_item(&mut self, obj: &Value, key: &Value) -> RunResult<()> {
        match obj {
            Value::List(items) => {
                let index = sequence_index(self, obj, key)?;
                let mut items = items.write();
                let at = normalize_index(index, items.len())
                    .ok_or_else(|| ExcType::IndexError.error("list assignment index out of range"))?;
                items.remove(at);
                Ok(())
            }
            Value::Dict(dict) => match dict.write().remove(key)? {
                Some(_) => Ok(()),
                None => Err(ExcType::key_error(key)),
            },
            other => match self.call_special(other, SpecialMethod::DelItem, vec![key.clone()])? {
                Some(_) => Ok(()),
                None => Err(ExcType::type_error(format!(
                    "'{}' object doesn't support item deletion",
                    other.type_name()
                ))),
            },
        }
    }

    /// `iter(value)`
    ///
    /// Objects without `__iter__` but with `__getitem__` iterate through the sequence
    /// protocol.
    pub fn get_iter(&mut self, value: &Value) -> RunResult<Value> {
        match value {
            Value::Iterator(_) | Value::Generator(_) => Ok(value.clone()),
            Value::List(list) => Ok(PyIterator::list(list.clone())),
            Value::Tuple(items) => Ok(PyIterator::tuple(items.clone())),
            Value::Str(s) => Ok(PyIterator::string(s.clone())),
            Value::Dict(dict) => Ok(PyIterator::values(dict.read().keys())),
            Value::Set(set) => Ok(PyIterator::values(set.read().values())),
            other => {
                if let Some(iter) = self.call_special(other, SpecialMethod::Iter, Vec::new())? {
                    if !is_iterator(&iter) {
                        return Err(ExcType::type_error(format!(
                            "iter() returned non-iterator of type '{}'",
                            iter.type_name()
                        )));
                    }
                    return Ok(iter);
                }
                if other.class_of().slot(SpecialMethod::GetItem).is_some() {
                    return Ok(PyIterator::sequence(other.clone()));
                }
                Err(ExcType::type_error_not_iterable(other.type_name()))
            }
        }
    }

    /// Advances an iterator; `Ok(None)` signals exhaustion.
    pub fn next_item(&mut self, iter: &Value) -> RunResult<Option<Value>> {
        match iter {
            Value::Iterator(it) => it.next(self),
            Value::Generator(generator) => generator.next_item(self),
            other => match self.call_special(other, SpecialMethod::Next, Vec::new()) {
                Ok(Some(item)) => Ok(Some(item)),
                Ok(None) => Err(ExcType::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                ))),
                Err(err) if err.matches_type(ExcType::StopIteration) => Ok(None),
                Err(err) => Err(err),
            },
        }
    }

    /// Drains an iterable into a vector.
    pub fn iterate(&mut self, value: &Value) -> RunResult<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.read().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            _ => {
                let iter = self.get_iter(value)?;
                let mut items = Vec::new();
                while let Some(item) = self.next_item(&iter)? {
                    items.push(item);
                }
                Ok(items)
            }
        }
    }

    /// `len(value)`
    pub fn len(&mut self, value: &Value) -> RunResult<usize> {
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::Bytes(b) => b.len(),
            Value::Tuple(items) => items.len(),
            Value::List(items) => items.read().len(),
            Value::Dict(dict) => dict.read().len(),
            Value::Set(set) => set.read().len(),
            other => match self.call_special(other, SpecialMethod::Len, Vec::new())? {
                Some(Value::Int(n)) => {
                    usize::try_from(n).map_err(|_| ExcType::value_error("__len__() should return >= 0"))?
                }
                Some(Value::Bool(b)) => usize::from(b),
                Some(_) => return Err(ExcType::type_error("an integer is required")),
                None => {
                    return Err(ExcType::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            },
        };
        Ok(len)
    }

    /// `UNPACK_SEQUENCE`: exactly `n` items, in order.
    pub(crate) fn unpack_sequence(&mut self, seq: &Value, n: usize) -> RunResult<Vec<Value>> {
        let items = match seq {
            Value::Tuple(items) => items.to_vec(),
            Value::List(items) => items.read().clone(),
            other => {
                let iter = self.get_iter(other)?;
                let mut items = Vec::with_capacity(n);
                while let Some(item) = self.next_item(&iter)? {
                    items.push(item);
                    if items.len() > n {
                        break;
                    }
                }
                items
            }
        };
        match items.len() {
            len if len == n => Ok(items),
            len if len > n => Err(ExcType::value_error("too many values to unpack")),
            1 => Err(ExcType::value_error("need more than 1 value to unpack")),
            len => Err(ExcType::value_error(format!("need more than {len} values to unpack"))),
        }
    }
}
