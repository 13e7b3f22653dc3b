//! Binary and unary operator dispatch.
//!
//! Operators follow the Python 2 protocol:
//! 1. numeric operands take the native fast path (with big-int promotion);
//! 2. strings, tuples and lists get native concatenation and repetition;
//! 3. otherwise the left operand's `__op__` is tried, then the right operand's `__rop__`.
//!
//! A dunder returning `NotImplemented` counts as absent. When neither side handles the
//! operation the result is `TypeError: unsupported operand type(s)`.

use std::sync::Arc;

use super::Vm;
use crate::{
    args::coerce_index,
    bytecode::Opcode,
    exception::{ExcType, RunResult},
    types::{
        SpecialMethod,
        long_int::{self, NumOp},
    },
    value::Value,
};

/// Binary operators reachable from bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    TrueDiv,
    FloorDiv,
    Mod,
}

impl BinOp {
    pub(crate) fn from_opcode(op: Opcode) -> Option<Self> {
        Some(match op {
            Opcode::BinaryAdd => Self::Add,
            Opcode::BinarySubtract => Self::Sub,
            Opcode::BinaryMultiply => Self::Mul,
            Opcode::BinaryDivide => Self::Div,
            Opcode::BinaryTrueDivide => Self::TrueDiv,
            Opcode::BinaryFloorDivide => Self::FloorDiv,
            Opcode::BinaryModulo => Self::Mod,
            _ => return None,
        })
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div | Self::TrueDiv => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
        }
    }

    fn num_op(self) -> NumOp {
        match self {
            Self::Add => NumOp::Add,
            Self::Sub => NumOp::Sub,
            Self::Mul => NumOp::Mul,
            Self::Div => NumOp::Div,
            Self::TrueDiv => NumOp::TrueDiv,
            Self::FloorDiv => NumOp::FloorDiv,
            Self::Mod => NumOp::Mod,
        }
    }

    /// The forward and reflected special methods.
    fn methods(self) -> (SpecialMethod, SpecialMethod) {
        match self {
            Self::Add => (SpecialMethod::Add, SpecialMethod::RAdd),
            Self::Sub => (SpecialMethod::Sub, SpecialMethod::RSub),
            Self::Mul => (SpecialMethod::Mul, SpecialMethod::RMul),
            Self::Div => (SpecialMethod::Div, SpecialMethod::RDiv),
            Self::TrueDiv => (SpecialMethod::TrueDiv, SpecialMethod::RTrueDiv),
            Self::FloorDiv => (SpecialMethod::FloorDiv, SpecialMethod::RFloorDiv),
            Self::Mod => (SpecialMethod::Mod, SpecialMethod::RMod),
        }
    }
}

/// Operands whose operators may be implemented by user code.
fn is_dispatchable(value: &Value) -> bool {
    matches!(value, Value::Instance(_) | Value::Object(_) | Value::Foreign(_) | Value::Exception(_))
}

impl Vm {
    pub(crate) fn binary_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Value> {
        if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
            return long_int::arith(op.num_op(), &a, &b);
        }
        if let Some(result) = self.sequence_op(op, lhs, rhs)? {
            return Ok(result);
        }

        let (forward, reflected) = op.methods();
        if is_dispatchable(lhs)
            && let Some(result) = self.call_special(lhs, forward, vec![rhs.clone()])?
            && !matches!(result, Value::NotImplemented)
        {
            return Ok(result);
        }
        if is_dispatchable(rhs)
            && let Some(result) = self.call_special(rhs, reflected, vec![lhs.clone()])?
            && !matches!(result, Value::NotImplemented)
        {
            return Ok(result);
        }
        Err(ExcType::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        )))
    }

    /// Native concatenation and repetition.
    fn sequence_op(&mut self, op: BinOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        match (op, lhs, rhs) {
            (BinOp::Add, Value::Str(a), Value::Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Some(Value::str(&out)))
            }
            (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
                Ok(Some(Value::tuple(a.iter().chain(b.iter()).cloned().collect())))
            }
            (BinOp::Add, Value::List(a), Value::List(b)) => {
                let mut items = a.read().clone();
                items.extend(b.read().iter().cloned());
                Ok(Some(Value::list(items)))
            }
            (BinOp::Add, Value::Str(_) | Value::Tuple(_) | Value::List(_), other) if !is_dispatchable(other) => {
                Err(ExcType::type_error(format!(
                    "cannot concatenate '{}' and '{}' objects",
                    lhs.type_name(),
                    other.type_name()
                )))
            }
            (BinOp::Mul, seq @ (Value::Str(_) | Value::Tuple(_) | Value::List(_)), count)
            | (BinOp::Mul, count, seq @ (Value::Str(_) | Value::Tuple(_) | Value::List(_)))
                if matches!(count, Value::Int(_) | Value::Bool(_) | Value::Long(_)) =>
            {
                let n = usize::try_from(coerce_index(self, count)?.max(0))
                    .map_err(|_| ExcType::OverflowError.error("repeated sequence is too long"))?;
                Ok(Some(repeat(seq, n)?))
            }
            (BinOp::Mul, Value::Str(_) | Value::Tuple(_) | Value::List(_), Value::Float(_))
            | (BinOp::Mul, Value::Float(_), Value::Str(_) | Value::Tuple(_) | Value::List(_)) => {
                let seq = if matches!(lhs, Value::Float(_)) { rhs } else { lhs };
                Err(ExcType::type_error(format!(
                    "can't multiply sequence by non-int of type 'float' ({})",
                    seq.type_name()
                )))
            }
            _ => Ok(None),
        }
    }

    /// Unary `-`.
    pub(crate) fn negative(&mut self, value: &Value) -> RunResult<Value> {
        if let Some(n) = value.as_number() {
            return Ok(long_int::negate(&n));
        }
        self.unary_special(value, SpecialMethod::Neg, "-")
    }

    /// Unary `+`.
    pub(crate) fn positive(&mut self, value: &Value) -> RunResult<Value> {
        if let Some(n) = value.as_number() {
            return Ok(long_int::positive(&n));
        }
        self.unary_special(value, SpecialMethod::Pos, "+")
    }

    fn unary_special(&mut self, value: &Value, method: SpecialMethod, symbol: &str) -> RunResult<Value> {
        if is_dispatchable(value)
            && let Some(result) = self.call_special(value, method, Vec::new())?
        {
            return Ok(result);
        }
        Err(ExcType::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            value.type_name()
        )))
    }
}

/// Upper bound on the length of a repeated sequence, in elements or bytes.
const MAX_REPEAT_LEN: usize = 1 << 28;

fn repeat(seq: &Value, n: usize) -> RunResult<Value> {
    let len = match seq {
        Value::Str(s) => s.len(),
        Value::Tuple(items) => items.len(),
        Value::List(items) => items.read().len(),
        _ => 0,
    };
    let n = if len == 0 { 0 } else { n };
    if len.checked_mul(n).is_none_or(|total| total > MAX_REPEAT_LEN) {
        return Err(ExcType::OverflowError.error("repeated sequence is too long"));
    }
    Ok(match seq {
        Value::Str(s) => Value::Str(Arc::from(s.repeat(n))),
        Value::Tuple(items) => Value::tuple(cycle(items, n)),
        Value::List(items) => Value::list(cycle(&items.read(), n)),
        other => other.clone(),
    })
}

fn cycle(items: &[Value], n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    out
}
