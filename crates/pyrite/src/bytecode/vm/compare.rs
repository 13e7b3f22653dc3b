//! Comparison, truth testing and membership.
//!
//! Rich comparisons try the left operand's method, then the right operand's swapped method.
//! When neither is defined, `==`/`!=` fall back to identity and ordering falls back to the
//! Python 2 default order: `None` sorts first, numbers before other objects, otherwise by
//! type name and then by object address.

use std::cmp::Ordering;

use super::{STACK_GROWTH, STACK_RED_ZONE, Vm};
use crate::{
    bytecode::CmpOp,
    exception::{ExcType, RunResult, class_matches},
    types::{ClassLike, SpecialMethod},
    value::Value,
};

impl CmpOp {
    fn special(self) -> Option<(SpecialMethod, SpecialMethod)> {
        Some(match self {
            Self::Lt => (SpecialMethod::Lt, SpecialMethod::Gt),
            Self::Le => (SpecialMethod::Le, SpecialMethod::Ge),
            Self::Eq => (SpecialMethod::Eq, SpecialMethod::Eq),
            Self::Ne => (SpecialMethod::Ne, SpecialMethod::Ne),
            Self::Gt => (SpecialMethod::Gt, SpecialMethod::Lt),
            Self::Ge => (SpecialMethod::Ge, SpecialMethod::Le),
            _ => return None,
        })
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            _ => false,
        }
    }
}

fn is_user_object(value: &Value) -> bool {
    matches!(value, Value::Instance(_) | Value::Object(_) | Value::Foreign(_) | Value::Exception(_))
}

impl Vm {
    /// `COMPARE_OP`.
    pub(crate) fn compare(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        match op {
            CmpOp::Is => Ok(Value::Bool(lhs.is(rhs))),
            CmpOp::IsNot => Ok(Value::Bool(!lhs.is(rhs))),
            CmpOp::In => Ok(Value::Bool(self.contains(rhs, lhs)?)),
            CmpOp::NotIn => Ok(Value::Bool(!self.contains(rhs, lhs)?)),
            CmpOp::ExcMatch => {
                check_handler(rhs)?;
                Ok(Value::Bool(
                    ClassLike::from_value(lhs).is_some_and(|cls| class_matches(&cls, rhs)),
                ))
            }
            _ => self.rich_compare(op, lhs, rhs),
        }
    }

    /// `lhs <op> rhs` for the six ordering and equality operators.
    pub fn rich_compare(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if let Some((forward, swapped)) = op.special()
            && (is_user_object(lhs) || is_user_object(rhs))
        {
            if let Some(result) = self.call_special(lhs, forward, vec![rhs.clone()])?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
            if let Some(result) = self.call_special(rhs, swapped, vec![lhs.clone()])?
                && !matches!(result, Value::NotImplemented)
            {
                return Ok(result);
            }
        }
        let ordering = self.builtin_ordering(op, lhs, rhs)?;
        Ok(Value::Bool(ordering.is_some_and(|ordering| op.holds(ordering))))
    }

    /// `lhs == rhs` as a Rust bool.
    pub fn equals(&mut self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        if let Some(eq) = lhs.builtin_eq(rhs) {
            return Ok(eq);
        }
        let result = self.rich_compare(CmpOp::Eq, lhs, rhs)?;
        self.truthy(&result)
    }

    /// Ordering without user methods. `None` means unordered (a NaN operand).
    fn builtin_ordering(&mut self, op: CmpOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Ordering>> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return Ok(a.partial_cmp(&b));
        }
        match (lhs, rhs) {
            (Value::Str(a), Value::Str(b)) => return Ok(Some(a.cmp(b))),
            (Value::Bytes(a), Value::Bytes(b)) => return Ok(Some(a.cmp(b))),
            (Value::Tuple(a), Value::Tuple(b)) => return self.sequence_ordering(op, a, b),
            (Value::List(a), Value::List(b)) => {
                let (a, b) = (a.read().clone(), b.read().clone());
                return self.sequence_ordering(op, &a, &b);
            }
            _ => {}
        }
        if lhs.is(rhs) {
            return Ok(Some(Ordering::Equal));
        }
        if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            return Ok(Some(match lhs.builtin_eq(rhs) {
                Some(true) => Ordering::Equal,
                _ => Ordering::Less,
            }));
        }
        Ok(Some(default_order(lhs, rhs)))
    }

    /// Lexicographic ordering: the first unequal pair decides, then the lengths.
    ///
    /// Nesting counts against the recursion limit, so self-referencing containers raise
    /// instead of overflowing the native stack.
    fn sequence_ordering(&mut self, op: CmpOp, a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
        if self.cmp_depth >= self.config().recursion_limit {
            return Err(ExcType::RuntimeError.error("maximum recursion depth exceeded in cmp"));
        }
        self.cmp_depth += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, || self.compare_items(op, a, b));
        self.cmp_depth -= 1;
        result
    }

    fn compare_items(&mut self, op: CmpOp, a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
        for (x, y) in a.iter().zip(b) {
            if self.equals(x, y)? {
                continue;
            }
            if matches!(op, CmpOp::Eq | CmpOp::Ne) {
                return Ok(Some(Ordering::Less));
            }
            let less = self.rich_compare(CmpOp::Lt, x, y)?;
            return Ok(Some(if self.truthy(&less)? {
                Ordering::Less
            } else {
                Ordering::Greater
            }));
        }
        Ok(Some(a.len().cmp(&b.len())))
    }

    /// Truth value: `__nonzero__`, then `__len__`, otherwise true.
    pub fn truthy(&mut self, value: &Value) -> RunResult<bool> {
        if let Some(truth) = value.truthy_builtin() {
            return Ok(truth);
        }
        if let Some(result) = self.call_special(value, SpecialMethod::Nonzero, Vec::new())? {
            return match result {
                Value::Bool(b) => Ok(b),
                Value::Int(i) => Ok(i != 0),
                other => Err(ExcType::type_error(format!(
                    "__nonzero__ should return bool or int, returned {}",
                    other.type_name()
                ))),
            };
        }
        if value.class_of().slot(SpecialMethod::Len).is_some() {
            return Ok(self.len(value)? != 0);
        }
        Ok(true)
    }

    /// `item in container`.
    pub fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Str(haystack) => match item {
                Value::Str(needle) => Ok(haystack.contains(&**needle)),
                other => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::Tuple(items) => self.any_equal(items, item),
            Value::List(items) => {
                let items = items.read().clone();
                self.any_equal(&items, item)
            }
            Value::Dict(dict) => dict.read().contains(item),
            Value::Set(set) => set.read().contains(item),
            other => {
                if let Some(result) = self.call_special(other, SpecialMethod::Contains, vec![item.clone()])? {
                    return self.truthy(&result);
                }
                let iter = self.get_iter(other).map_err(|err| {
                    if err.matches_type(ExcType::TypeError) {
                        ExcType::type_error(format!("argument of type '{}' is not iterable", other.type_name()))
                    } else {
                        err
                    }
                })?;
                while let Some(candidate) = self.next_item(&iter)? {
                    if self.equals(&candidate, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn any_equal(&mut self, items: &[Value], item: &Value) -> RunResult<bool> {
        for candidate in items {
            if candidate.is(item) || self.equals(candidate, item)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Rejects `except` handlers that are neither classes nor tuples of classes.
fn check_handler(handler: &Value) -> RunResult<()> {
    match handler {
        Value::Tuple(items) => items.iter().try_for_each(check_handler),
        Value::Class(_) | Value::Type(_) => Ok(()),
        other => Err(ExcType::type_error(format!(
            "catching classes that do not inherit from BaseException is not allowed, got '{}'",
            other.type_name()
        ))),
    }
}

/// Python 2 fallback order for unrelated objects.
fn default_order(lhs: &Value, rhs: &Value) -> Ordering {
    match (lhs, rhs) {
        (Value::None, _) => return Ordering::Less,
        (_, Value::None) => return Ordering::Greater,
        _ => {}
    }
    match (lhs.as_number().is_some(), rhs.as_number().is_some()) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    lhs.type_name()
        .cmp(&rhs.type_name())
        .then_with(|| lhs.addr().cmp(&rhs.addr()))
}
